// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! The 3-D sonic wind pipeline.
//!
//! Processing order is fixed: despike, transducer shadow correction,
//! orientation remap, bias removal and tilt rotation, virtual temperature
//! correction, horizontal azimuth rotation, then derived speed and
//! direction. Calibration files feed the bias, tilt, azimuth and
//! temperature terms and the shadow rotation; a newly crossed record takes
//! effect at the next sample boundary.
//!
//! 2-D anemometers that measure (spd, dir) instead of (u, v) are handled
//! by converting to components before the orientation step and re-deriving
//! (spd, dir) after calibration, keeping the two pairs consistent.

use alloc::vec;
use alloc::vec::Vec;

use calfile::CalFile;
use libm::{atan2f, cosf, sinf, sqrtf};
use log::debug;
use nidas_core::time::USECS_PER_SEC;
use nidas_core::Timetag;

use crate::despike::AdaptiveDespiker;
use crate::orient::{Orientation, WindOrienter};
use crate::rotate::WindRotator;
use crate::shadow::ShadowCorrector;
use crate::tilt::WindTilter;

/// Statistics restart after a channel is quiet this long.
const DATA_GAP_USEC: i64 = 60 * USECS_PER_SEC;

/// Which horizontal pair the instrument actually measures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MeasuredPair {
    /// Orthogonal components; (spd, dir) are derived after rotation.
    #[default]
    Uv,
    /// Speed and direction, as from a propeller vane; converted to
    /// components before orientation.
    SpdDir,
}

#[derive(Clone, Debug)]
pub struct WindConfig {
    pub despike: bool,
    /// Discrimination level for the despiker, in robust sigmas.
    pub despike_threshold: f32,
    pub orientation: Orientation,
    pub bias: [f32; 3],
    pub lean_degrees: f64,
    pub lean_azimuth_degrees: f64,
    pub up_is_sonic_w: bool,
    /// Sonic azimuth: the horizontal rotation bringing +u into geographic
    /// coordinates.
    pub vazimuth_degrees: f64,
    pub tc_slope: f32,
    pub tc_offset: f32,
    pub horizontal_rotation: bool,
    pub tilt_correction: bool,
    pub shadow_factor: f64,
    pub measured_pair: MeasuredPair,
    pub spd_index: Option<usize>,
    pub dir_index: Option<usize>,
    pub ldiag_index: Option<usize>,
    /// First of four per-axis spike flags (u, v, w, tc) in the output.
    pub spike_index: Option<usize>,
}

impl Default for WindConfig {
    fn default() -> WindConfig {
        WindConfig {
            despike: false,
            despike_threshold: 3.5,
            orientation: Orientation::Normal,
            bias: [0.0; 3],
            lean_degrees: 0.0,
            lean_azimuth_degrees: 0.0,
            up_is_sonic_w: false,
            vazimuth_degrees: 0.0,
            tc_slope: 1.0,
            tc_offset: 0.0,
            horizontal_rotation: true,
            tilt_correction: true,
            shadow_factor: 0.0,
            measured_pair: MeasuredPair::Uv,
            spd_index: None,
            dir_index: None,
            ldiag_index: None,
            spike_index: None,
        }
    }
}

pub struct WindProcessor {
    despike: bool,
    despikers: [AdaptiveDespiker; 4],
    ttlast: [Timetag; 4],
    orienter: WindOrienter,
    tilter: WindTilter,
    rotator: WindRotator,
    shadow: ShadowCorrector,
    bias: [f32; 3],
    tc_slope: f32,
    tc_offset: f32,
    horizontal_rotation: bool,
    tilt_correction: bool,
    measured_pair: MeasuredPair,
    spd_index: Option<usize>,
    dir_index: Option<usize>,
    ldiag_index: Option<usize>,
    spike_index: Option<usize>,
    nout: usize,
    oa_cal: Option<CalFile>,
    abc_cal: Option<CalFile>,
}

impl WindProcessor {
    pub fn new(cfg: WindConfig) -> WindProcessor {
        let mut tilter = WindTilter::new();
        tilter.set_up_is_sonic_w(cfg.up_is_sonic_w);
        tilter.set_lean_degrees(cfg.lean_degrees);
        tilter.set_lean_azimuth_degrees(cfg.lean_azimuth_degrees);

        let mut rotator = WindRotator::new();
        rotator.set_angle_degrees(cfg.vazimuth_degrees);

        let mut nout = 5;
        for idx in [cfg.spd_index, cfg.dir_index, cfg.ldiag_index]
            .iter()
            .flatten()
        {
            nout = nout.max(idx + 1);
        }
        if let Some(sx) = cfg.spike_index {
            nout = nout.max(sx + 4);
        }

        let t = cfg.despike_threshold;
        WindProcessor {
            despike: cfg.despike,
            despikers: [
                AdaptiveDespiker::new(t),
                AdaptiveDespiker::new(t),
                AdaptiveDespiker::new(t),
                AdaptiveDespiker::new(t),
            ],
            ttlast: [0; 4],
            orienter: WindOrienter::new(cfg.orientation),
            tilter,
            rotator,
            shadow: ShadowCorrector::new(cfg.shadow_factor),
            bias: cfg.bias,
            tc_slope: cfg.tc_slope,
            tc_offset: cfg.tc_offset,
            horizontal_rotation: cfg.horizontal_rotation,
            tilt_correction: cfg.tilt_correction,
            measured_pair: cfg.measured_pair,
            spd_index: cfg.spd_index,
            dir_index: cfg.dir_index,
            ldiag_index: cfg.ldiag_index,
            spike_index: cfg.spike_index,
            nout,
            oa_cal: None,
            abc_cal: None,
        }
    }

    /// Number of values in each processed sample.
    pub fn nout(&self) -> usize {
        self.nout
    }

    /// Attach the offsets-and-angles calibration file, rows of
    /// `u_off v_off w_off lean lean_az azimuth tc_off tc_slope`.
    pub fn set_offsets_angles_cal(&mut self, cal: CalFile) {
        self.oa_cal = Some(cal);
    }

    /// Attach the abc2uvw rotation file for shadow correction, nine
    /// values per row.
    pub fn set_abc2uvw_cal(&mut self, cal: CalFile) {
        self.abc_cal = Some(cal);
    }

    fn read_cal_files(&mut self, tt: Timetag) {
        if let Some(cal) = self.oa_cal.as_mut() {
            if cal.crossed(tt) {
                if let Some(rec) = cal.value_at(tt) {
                    let d = &rec.data;
                    for i in 0..3.min(d.len()) {
                        self.bias[i] = d[i];
                    }
                    if d.len() > 3 {
                        self.tilter.set_lean_degrees(d[3] as f64);
                    }
                    if d.len() > 4 {
                        self.tilter.set_lean_azimuth_degrees(d[4] as f64);
                    }
                    if d.len() > 5 {
                        self.rotator.set_angle_degrees(d[5] as f64);
                    }
                    if d.len() > 7 {
                        self.tc_offset = d[6];
                        self.tc_slope = d[7];
                    }
                    debug!("offsets_angles record applied");
                }
            }
        }
        if let Some(cal) = self.abc_cal.as_mut() {
            if cal.crossed(tt) {
                if let Some(rec) = cal.value_at(tt) {
                    self.shadow.set_matrix(&rec.data);
                }
            }
        }
    }

    fn despike_uvwt(&mut self, tt: Timetag, uvwtd: &mut [f32; 5]) -> [bool; 4] {
        let mut spikes = [false; 4];
        for i in 0..4 {
            if tt - self.ttlast[i] > DATA_GAP_USEC {
                self.despikers[i].reset();
            }
            let despiked = self.despikers[i].despike(uvwtd[i], &mut spikes[i]);
            if self.despike {
                uvwtd[i] = despiked;
            }
            if !spikes[i] {
                self.ttlast[i] = tt;
            }
        }
        spikes
    }

    /// Process one raw (u, v, w, tc, diag, ...) record into a calibrated
    /// wind sample. Missing trailing inputs read as NaN; extra inputs are
    /// passed through.
    pub fn process(&mut self, tt: Timetag, parsed: &[f32]) -> Vec<f32> {
        let mut uvwtd = [f32::NAN; 5];
        for (i, slot) in uvwtd.iter_mut().enumerate() {
            if i < parsed.len() {
                *slot = parsed[i];
            }
        }

        let diag_ok = !uvwtd[4].is_nan() && uvwtd[4] == 0.0;

        // A vane measures speed and direction; make components first so
        // every correction below applies uniformly.
        if self.measured_pair == MeasuredPair::SpdDir {
            let spd = uvwtd[0];
            let dir = uvwtd[1].to_radians();
            uvwtd[0] = -spd * sinf(dir);
            uvwtd[1] = -spd * cosf(dir);
        }

        self.read_cal_files(tt);

        let mut spikes = [false; 4];
        if self.despike || self.spike_index.is_some() {
            spikes = self.despike_uvwt(tt, &mut uvwtd);
        }

        // Shadow correction happens in raw probe coordinates, before any
        // orientation fix.
        self.shadow.correct(&mut uvwtd);

        self.orienter.apply(&mut uvwtd);

        // Bias removal is part of the tilt correction.
        if self.tilt_correction {
            for i in 0..3 {
                uvwtd[i] -= self.bias[i];
            }
            if !self.tilter.is_identity() {
                let [mut u, mut v, mut w] = [uvwtd[0], uvwtd[1], uvwtd[2]];
                self.tilter.rotate(&mut u, &mut v, &mut w);
                uvwtd[0] = u;
                uvwtd[1] = v;
                uvwtd[2] = w;
            }
        }

        uvwtd[3] = uvwtd[3] * self.tc_slope + self.tc_offset;

        if self.horizontal_rotation {
            let (mut u, mut v) = (uvwtd[0], uvwtd[1]);
            self.rotator.rotate(&mut u, &mut v);
            uvwtd[0] = u;
            uvwtd[1] = v;
        }

        // Seed the output with everything parsed, then overwrite the wind
        // variables and any derived values.
        let mut out = vec![f32::NAN; self.nout];
        for (i, slot) in out.iter_mut().enumerate() {
            if i < parsed.len() {
                *slot = parsed[i];
            }
        }
        let ncopy = self.nout.min(uvwtd.len());
        out[..ncopy].copy_from_slice(&uvwtd[..ncopy]);

        if let Some(sx) = self.spike_index {
            for (i, &spiked) in spikes.iter().enumerate() {
                out[sx + i] = f32::from(spiked as u8);
            }
        }

        if let Some(ldx) = self.ldiag_index {
            out[ldx] = f32::from(!diag_ok as u8);
            if !diag_ok {
                for slot in out.iter_mut().take(4.min(self.nout)) {
                    *slot = f32::NAN;
                }
            }
        }

        if let Some(sdx) = self.spd_index {
            out[sdx] = sqrtf(out[0] * out[0] + out[1] * out[1]);
        }
        if let Some(ddx) = self.dir_index {
            let mut dr = atan2f(-out[0], -out[1]).to_degrees();
            if dr < 0.0 {
                dr += 360.0;
            }
            out[ddx] = dr;
        }

        out
    }
}
