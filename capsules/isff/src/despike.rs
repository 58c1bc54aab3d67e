// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! Adaptive single-sample outlier rejection.
//!
//! Each channel keeps a short running window of accepted values. A new
//! value is a spike when its distance from the running median exceeds a
//! threshold multiple of the robust scale (median absolute deviation).
//! Spikes are reported and replaced by the running median. The caller
//! restarts the statistics after a data gap.

use alloc::vec::Vec;

/// Values kept in the running window.
const WINDOW: usize = 25;
/// Accepted values required before rejection starts.
const MIN_POINTS: usize = 10;
/// MAD to standard deviation scale for a normal distribution.
const MAD_SCALE: f32 = 1.4826;
/// Smallest scale used in the test, so constant signals with noise-free
/// windows do not reject everything.
const SIGMA_FLOOR: f32 = 1.0e-4;

pub struct AdaptiveDespiker {
    window: [f32; WINDOW],
    len: usize,
    next: usize,
    threshold: f32,
    scratch: Vec<f32>,
}

impl AdaptiveDespiker {
    /// `threshold` is the discrimination level in robust standard
    /// deviations; 3.5 is a common choice.
    pub fn new(threshold: f32) -> AdaptiveDespiker {
        AdaptiveDespiker {
            window: [0.0; WINDOW],
            len: 0,
            next: 0,
            threshold,
            scratch: Vec::with_capacity(WINDOW),
        }
    }

    /// Test one value. Sets `spike` and returns the replacement (the
    /// running median) for spikes; otherwise returns the value and folds
    /// it into the window. NaN input is reported like a spike and left
    /// NaN.
    pub fn despike(&mut self, value: f32, spike: &mut bool) -> f32 {
        if value.is_nan() {
            *spike = true;
            return value;
        }

        if self.len >= MIN_POINTS {
            let median = self.median();
            let sigma = self.robust_sigma(median).max(SIGMA_FLOOR);
            if libm::fabsf(value - median) / sigma > self.threshold {
                *spike = true;
                return median;
            }
        }

        *spike = false;
        self.window[self.next] = value;
        self.next = (self.next + 1) % WINDOW;
        if self.len < WINDOW {
            self.len += 1;
        }
        value
    }

    /// Forget the running statistics, e.g. after a 60 s data gap.
    pub fn reset(&mut self) {
        self.len = 0;
        self.next = 0;
    }

    fn median(&mut self) -> f32 {
        self.scratch.clear();
        self.scratch.extend_from_slice(&self.window[..self.len]);
        self.scratch.sort_unstable_by(f32::total_cmp);
        self.scratch[self.len / 2]
    }

    fn robust_sigma(&mut self, median: f32) -> f32 {
        self.scratch.clear();
        for &v in self.window[..self.len].iter() {
            self.scratch.push(libm::fabsf(v - median));
        }
        self.scratch.sort_unstable_by(f32::total_cmp);
        MAD_SCALE * self.scratch[self.len / 2]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn passes_clean_data() {
        let mut d = AdaptiveDespiker::new(3.5);
        let mut spike = false;
        for i in 0..100 {
            let x = (i % 7) as f32 * 0.1;
            let y = d.despike(x, &mut spike);
            assert!(!spike);
            assert_eq!(y, x);
        }
    }

    #[test]
    fn replaces_an_outlier_with_the_median() {
        let mut d = AdaptiveDespiker::new(3.5);
        let mut spike = false;
        for i in 0..50 {
            d.despike(10.0 + (i % 5) as f32 * 0.01, &mut spike);
        }
        let y = d.despike(500.0, &mut spike);
        assert!(spike);
        assert!((y - 10.0).abs() < 0.1);

        // The statistics were not polluted by the spike.
        let y = d.despike(10.02, &mut spike);
        assert!(!spike);
        assert_eq!(y, 10.02);
    }

    #[test]
    fn accepts_everything_while_learning() {
        let mut d = AdaptiveDespiker::new(3.5);
        let mut spike = false;
        // Far fewer than MIN_POINTS values: no rejection yet.
        for x in [0.0, 1000.0, -1000.0] {
            let y = d.despike(x, &mut spike);
            assert!(!spike);
            assert_eq!(y, x);
        }
    }

    #[test]
    fn nan_is_flagged_and_preserved() {
        let mut d = AdaptiveDespiker::new(3.5);
        let mut spike = false;
        for i in 0..20 {
            d.despike(i as f32 * 0.1, &mut spike);
        }
        let y = d.despike(f32::NAN, &mut spike);
        assert!(spike);
        assert!(y.is_nan());
    }

    #[test]
    fn reset_forgets_the_window() {
        let mut d = AdaptiveDespiker::new(3.5);
        let mut spike = false;
        for _ in 0..30 {
            d.despike(0.0, &mut spike);
        }
        d.reset();
        // After the reset a wild value is accepted again.
        let y = d.despike(999.0, &mut spike);
        assert!(!spike);
        assert_eq!(y, 999.0);
    }
}
