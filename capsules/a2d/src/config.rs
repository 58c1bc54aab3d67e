// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! Decoded configuration and status structures.
//!
//! These are the payloads of the engine's control operations. On the wire
//! (the character device ioctls) they are packed little-endian C-layout
//! records; the layouts here are `repr(C)` with fixed-width fields so the
//! binary compatibility is testable.

use alloc::vec::Vec;

use ncar_a2d::registers::NUM_CHANNELS;
use short_filters::FilterKind;

/// Global engine configuration.
#[derive(Clone, Debug)]
pub struct A2dConfig {
    /// Conversion rate over all channels, Hz. Must divide 1000000 evenly.
    pub scan_rate: u32,
    /// Reader latency window: a completed sample is delivered to a waiting
    /// reader within this long of its timestamp. 0 selects the 1/10 s
    /// default.
    pub latency_usecs: i64,
}

/// One output sample stream.
#[derive(Clone, Debug)]
pub struct SampleConfig {
    /// Stream id written to every output sample.
    pub index: u16,
    /// Output rate, Hz; must divide the scan rate evenly.
    pub rate: u32,
    pub filter: FilterKind,
    /// Card channels feeding this stream, in output order.
    pub channels: Vec<usize>,
    /// Per-channel amplifier gains, aligned with `channels`.
    pub gains: Vec<u8>,
    /// Per-channel input polarity, aligned with `channels`.
    pub bipolar: Vec<bool>,
    /// Filter-specific configuration blob.
    pub filter_data: Vec<u8>,
}

/// Calibration source control.
#[derive(Clone, Debug, Default)]
pub struct CalConfig {
    /// Enable (true) or disconnect (false) the calibration source.
    pub state: bool,
    /// Requested calibration voltage.
    pub vcal: i8,
    /// Channels to switch onto the calibration source.
    pub calset: [bool; NUM_CHANNELS],
}

/// Counters and health info maintained by the engine, snapshotted every
/// 10 seconds so a mid-interval reader sees a stable view.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct A2dStatus {
    /// Samples dropped because a ring was full.
    pub skipped_samples: u32,
    /// Transitions into the resetting state since start.
    pub resets: u32,
    /// Card serial number from the board status word.
    pub ser_num: u16,
    /// Histogram of FIFO levels 0..=5 observed at poll time over the
    /// snapshot interval.
    pub pre_fifo_level: [u32; 6],
    /// Polls that found the FIFO outside the acceptable band.
    pub bad_fifo_level: u32,
    /// Last good converter status words, one per channel.
    pub goodval: [u16; NUM_CHANNELS],
}

/// Valid calibration voltages for a gain and polarity pairing.
///
/// The measurable span depends on the amplifier setting:
/// gain 1 bipolar covers -10..10 V, gain 2 unipolar 0..10 V, gain 2
/// bipolar -5..5 V, gain 4 unipolar 0..5 V.
pub fn cal_volt_within_range(volts: i8, gain: u8, bipolar: bool) -> bool {
    // Ordered cal voltages: 0, +1, +5, -10, +10 map to spans 0..=4.
    let span = match (gain, bipolar) {
        (1, true) => 0,
        (2, false) => 1,
        (2, true) => 2,
        (4, false) => 3,
        _ => return false,
    };
    match volts {
        0 | 1 => true,
        5 => span <= 3,
        -10 => span == 0,
        10 => span <= 1,
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_layout_is_stable() {
        // The status structure crosses the device boundary as a packed
        // little-endian C-layout record; its size is part of the ABI.
        assert_eq!(core::mem::size_of::<A2dStatus>(), 56);
        assert_eq!(core::mem::align_of::<A2dStatus>(), 4);
    }

    #[test]
    fn cal_ranges_follow_the_gain_table() {
        // gain 1 bipolar: everything
        for v in [0, 1, 5, -10, 10] {
            assert!(cal_volt_within_range(v, 1, true), "v={}", v);
        }
        // gain 2 unipolar: 0..10, no negative
        assert!(cal_volt_within_range(10, 2, false));
        assert!(!cal_volt_within_range(-10, 2, false));
        // gain 2 bipolar: +-5
        assert!(cal_volt_within_range(5, 2, true));
        assert!(!cal_volt_within_range(10, 2, true));
        // gain 4 unipolar: 0..5
        assert!(cal_volt_within_range(5, 4, false));
        assert!(!cal_volt_within_range(10, 4, false));
        // unsupported pairings measure nothing
        assert!(!cal_volt_within_range(1, 3, true));
        // unsupported voltage
        assert!(!cal_volt_within_range(7, 1, true));
    }
}
