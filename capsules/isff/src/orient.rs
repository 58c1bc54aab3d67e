// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! Sonic orientation correction.
//!
//! When the sonic is mounted in its normal orientation, +w is upward with
//! respect to gravity and +u is wind into the array. Any other mounting is
//! corrected with a fixed index-and-sign remap of (u, v, w):
//!
//! `out[i] = sx[i] * in[tx[i]]` for i = 0, 1, 2.

/// Canonical sonic mountings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Orientation {
    /// No component change.
    #[default]
    Normal,
    /// Mounted pointing down: a 90 degree rotation about the sonic v axis
    /// followed by a 180 degree rotation about the sonic u axis, so the
    /// new +w is upward again. u <- w, v <- -v, w <- u.
    Down,
    /// Direction measured counterclockwise; negate v to convert to
    /// clockwise.
    Lefthanded,
    /// Flipped over, a 180 degree rotation about the sonic u axis:
    /// v <- -v, w <- -w.
    Flipped,
    /// On its side, a 90 degree rotation about the u axis: v <- -w,
    /// w <- v.
    Horizontal,
}

impl Orientation {
    pub fn from_name(name: &str) -> Option<Orientation> {
        match name {
            "normal" => Some(Orientation::Normal),
            "down" => Some(Orientation::Down),
            "lefthanded" => Some(Orientation::Lefthanded),
            "flipped" => Some(Orientation::Flipped),
            "horizontal" => Some(Orientation::Horizontal),
            _ => None,
        }
    }
}

pub struct WindOrienter {
    tx: [usize; 3],
    sx: [f32; 3],
    unusual: bool,
}

impl WindOrienter {
    pub fn new(orientation: Orientation) -> WindOrienter {
        let (tx, sx, unusual) = match orientation {
            Orientation::Normal => ([0, 1, 2], [1.0, 1.0, 1.0], false),
            Orientation::Down => ([2, 1, 0], [1.0, -1.0, 1.0], true),
            Orientation::Lefthanded => ([0, 1, 2], [1.0, -1.0, 1.0], true),
            Orientation::Flipped => ([0, 1, 2], [1.0, -1.0, -1.0], true),
            Orientation::Horizontal => ([0, 2, 1], [1.0, -1.0, 1.0], true),
        };
        WindOrienter { tx, sx, unusual }
    }

    /// Remap the leading (u, v, w) of `uvw` in place.
    pub fn apply(&self, uvw: &mut [f32]) {
        if !self.unusual {
            return;
        }
        let mut out = [0.0f32; 3];
        for i in 0..3 {
            out[i] = self.sx[i] * uvw[self.tx[i]];
        }
        uvw[..3].copy_from_slice(&out);
    }

    /// 2-D variant for propeller vanes: only u and v exist.
    pub fn apply_2d(&self, u: &mut f32, v: &mut f32) -> bool {
        if !self.unusual {
            return false;
        }
        let mut uvw = [*u, *v, 0.0];
        self.apply(&mut uvw);
        *u = uvw[0];
        *v = uvw[1];
        true
    }
}
