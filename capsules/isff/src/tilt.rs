// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! Tilt (plane-fit) correction.
//!
//! A 3x3 rotation parameterized by a lean angle and its azimuth aligns the
//! sonic W axis with the normal of the mean-flow plane. The W row of the
//! matrix is the flow W axis expressed in sonic coordinates,
//! `(sin(lean)cos(az), sin(lean)sin(az), cos(lean))`. The U row is either
//! the cross product of the sonic V axis with flow W (`UP_IS_SONIC_W`), or
//! `(Wf x Us) x Wf`, each normalized; the V row completes the right-handed
//! set.

use libm::{cos, fabs, sin, sqrt};

pub struct WindTilter {
    lean: f64,
    lean_azimuth: f64,
    mat: [[f64; 3]; 3],
    identity: bool,
    up_is_sonic_w: bool,
}

impl WindTilter {
    pub fn new() -> WindTilter {
        let mut mat = [[0.0; 3]; 3];
        for (i, row) in mat.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        WindTilter {
            lean: 0.0,
            lean_azimuth: 0.0,
            mat,
            identity: true,
            up_is_sonic_w: false,
        }
    }

    pub fn set_lean_degrees(&mut self, degrees: f64) {
        self.lean = degrees.to_radians();
        self.compute_matrix();
    }

    pub fn set_lean_azimuth_degrees(&mut self, degrees: f64) {
        self.lean_azimuth = degrees.to_radians();
        self.compute_matrix();
    }

    pub fn set_up_is_sonic_w(&mut self, val: bool) {
        self.up_is_sonic_w = val;
        self.compute_matrix();
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    pub fn rotate(&self, u: &mut f32, v: &mut f32, w: &mut f32) {
        if self.identity {
            return;
        }
        let vin = [*u as f64, *v as f64, *w as f64];
        let mut out = [0.0f64; 3];
        for i in 0..3 {
            for j in 0..3 {
                out[i] += self.mat[i][j] * vin[j];
            }
        }
        *u = out[0] as f32;
        *v = out[1] as f32;
        *w = out[2] as f32;
    }

    fn compute_matrix(&mut self) {
        self.identity = fabs(self.lean) < 1.0e-5;

        let sinlean = sin(self.lean);
        let coslean = cos(self.lean);
        let sinaz = sin(self.lean_azimuth);
        let cosaz = cos(self.lean_azimuth);

        // Wf, the flow W axis in the sonic UVW frame.
        self.mat[2][0] = sinlean * cosaz;
        self.mat[2][1] = sinlean * sinaz;
        self.mat[2][2] = coslean;

        if self.up_is_sonic_w {
            // Uf is the cross product of Vs (0,1,0) with Wf.
            let mag = sqrt(coslean * coslean + sinlean * sinlean * cosaz * cosaz);
            self.mat[0][0] = coslean / mag;
            self.mat[0][1] = 0.0;
            self.mat[0][2] = -sinlean * cosaz / mag;
        } else {
            // Cross product of Wf and Us...
            let wf_x_us = [0.0, coslean, -sinlean * sinaz];
            // ...and Uf is the cross of that with Wf, normalized.
            let mut uf = [
                wf_x_us[1] * self.mat[2][2] - wf_x_us[2] * self.mat[2][1],
                wf_x_us[2] * self.mat[2][0] - wf_x_us[0] * self.mat[2][2],
                wf_x_us[0] * self.mat[2][1] - wf_x_us[1] * self.mat[2][0],
            ];
            let mag = sqrt(uf[0] * uf[0] + uf[1] * uf[1] + uf[2] * uf[2]);
            for x in uf.iter_mut() {
                *x /= mag;
            }
            self.mat[0] = uf;
        }

        // Vf = Wf cross Uf.
        self.mat[1][0] = self.mat[2][1] * self.mat[0][2] - self.mat[2][2] * self.mat[0][1];
        self.mat[1][1] = self.mat[2][2] * self.mat[0][0] - self.mat[2][0] * self.mat[0][2];
        self.mat[1][2] = self.mat[2][0] * self.mat[0][1] - self.mat[2][1] * self.mat[0][0];
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn rotate(t: &WindTilter, v: [f32; 3]) -> [f32; 3] {
        let (mut u, mut vv, mut w) = (v[0], v[1], v[2]);
        t.rotate(&mut u, &mut vv, &mut w);
        [u, vv, w]
    }

    #[test]
    fn zero_lean_is_identity() {
        let mut t = WindTilter::new();
        t.set_lean_degrees(0.0);
        t.set_lean_azimuth_degrees(123.0);
        assert!(t.is_identity());
        assert_eq!(rotate(&t, [1.25, -2.5, 3.75]), [1.25, -2.5, 3.75]);
    }

    #[test]
    fn rotation_is_orthonormal() {
        let mut t = WindTilter::new();
        t.set_lean_degrees(5.0);
        t.set_lean_azimuth_degrees(30.0);
        assert!(!t.is_identity());
        let out = rotate(&t, [3.0, 4.0, 0.0]);
        let mag = out[0] * out[0] + out[1] * out[1] + out[2] * out[2];
        assert!((mag - 25.0).abs() < 1e-4);
    }

    #[test]
    fn pure_lean_maps_the_flow_normal_to_w() {
        // A flow normal leaned 10 degrees toward the sonic u axis must
        // come out as pure w.
        let mut t = WindTilter::new();
        t.set_lean_degrees(10.0);
        t.set_lean_azimuth_degrees(0.0);
        let lean = 10.0f64.to_radians();
        let normal = [sin(lean) as f32, 0.0, cos(lean) as f32];
        let out = rotate(&t, normal);
        assert!(out[0].abs() < 1e-6);
        assert!(out[1].abs() < 1e-6);
        assert!((out[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn up_is_sonic_w_variant_stays_orthonormal() {
        let mut t = WindTilter::new();
        t.set_up_is_sonic_w(true);
        t.set_lean_degrees(7.0);
        t.set_lean_azimuth_degrees(200.0);
        let out = rotate(&t, [1.0, 2.0, 3.0]);
        let mag = out[0] * out[0] + out[1] * out[1] + out[2] * out[2];
        assert!((mag - 14.0).abs() < 1e-3);
    }
}
