// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! End-to-end acquisition scenarios against the emulated card.

use dsm_sim::Dsm;
use ncar_a2d::registers::COEF_BLOCK_WORDS;
use nidas_a2d::{A2dConfig, SampleConfig, TEMPERATURE_SAMPLE_INDEX};
use nidas_core::sample::OutputSample;
use nidas_core::{ErrorCode, PollFlags, Timetag};
use short_filters::FilterKind;

const T0: Timetag = 1_600_000_000_000_000;

fn build_dsm(rate: u32, filter: FilterKind, channels: Vec<usize>) -> Dsm {
    let mut dsm = Dsm::new(T0);
    dsm.configure(A2dConfig {
        scan_rate: 500,
        latency_usecs: 0,
    })
    .unwrap();
    let n = channels.len();
    dsm.add_sample(SampleConfig {
        index: 1,
        rate,
        filter,
        channels,
        gains: vec![1; n],
        bipolar: vec![true; n],
        filter_data: vec![],
    })
    .unwrap();
    dsm.set_coefficients(&vec![0u16; COEF_BLOCK_WORDS]).unwrap();
    dsm
}

fn drain(dsm: &mut Dsm, timeout_ms: u32) -> Vec<OutputSample> {
    let mut buf = [0u8; 8192];
    let mut out = Vec::new();
    match dsm.read_blocking(&mut buf, timeout_ms) {
        Ok(n) => {
            let mut off = 0;
            while let Some((samp, used)) = OutputSample::decode_le(&buf[off..n]) {
                out.push(samp);
                off += used;
            }
        }
        Err(ErrorCode::TIMEDOUT) => {}
        Err(e) => panic!("read failed: {:?}", e),
    }
    out
}

#[test]
fn pickoff_stream_at_source_rate() {
    let mut dsm = build_dsm(500, FilterKind::Pickoff, vec![0]);
    dsm.set_levels([1000, 0, 0, 0, 0, 0, 0, 0]);
    dsm.start().unwrap();

    // PPS synchronization occupies the first virtual second.
    dsm.run_virtual_ms(1_200);
    assert!(dsm.with_engine(|e| e.is_running()));

    let mut samples = Vec::new();
    while samples.len() < 50 {
        let batch = drain(&mut dsm, 2_000);
        assert!(!batch.is_empty(), "no samples within the timeout");
        samples.extend(batch);
    }

    for s in samples.iter() {
        assert_eq!(s.id, 1);
        assert_eq!(s.values(), &[1000]);
    }
    for pair in samples.windows(2) {
        assert_eq!(pair[1].timetag - pair[0].timetag, 2_000);
    }
    assert!(dsm.read_flag().wakeups() > 0);
    dsm.stop();
}

#[test]
fn output_rate_matches_the_configured_rate() {
    // 100 Hz pickoff from 500 Hz scans: any one-second window holds
    // 100 +- 1 samples.
    let mut dsm = build_dsm(100, FilterKind::Pickoff, vec![2]);
    dsm.set_levels([0, 0, 77, 0, 0, 0, 0, 0]);
    dsm.start().unwrap();
    dsm.run_virtual_ms(1_200);

    let mut samples = Vec::new();
    while samples.len() < 220 {
        samples.extend(drain(&mut dsm, 2_000));
    }

    let start = samples[0].timetag;
    let in_window = samples
        .iter()
        .filter(|s| s.timetag >= start && s.timetag < start + 1_000_000)
        .count() as i64;
    assert!((in_window - 100).abs() <= 1, "count {}", in_window);

    for pair in samples.windows(2) {
        assert!(pair[1].timetag > pair[0].timetag);
    }
    dsm.stop();
}

#[test]
fn boxcar_stream_end_to_end() {
    let mut dsm = build_dsm(250, FilterKind::Boxcar, vec![0, 1]);
    dsm.set_signal(Box::new(|n| {
        if n % 2 == 0 {
            [0, 10, 0, 0, 0, 0, 0, 0]
        } else {
            [2, -10, 0, 0, 0, 0, 0, 0]
        }
    }));
    dsm.start().unwrap();
    dsm.run_virtual_ms(1_200);

    let mut samples = Vec::new();
    while samples.len() < 100 {
        samples.extend(drain(&mut dsm, 2_000));
    }
    for s in samples.iter() {
        assert_eq!(s.values(), &[1, 0], "at {}", s.timetag);
    }
    dsm.stop();
}

#[test]
fn missed_poll_resets_and_resumes_monotonic() {
    let mut dsm = build_dsm(500, FilterKind::Pickoff, vec![0]);
    dsm.set_levels([5, 0, 0, 0, 0, 0, 0, 0]);
    dsm.start().unwrap();
    dsm.run_virtual_ms(1_200);

    let mut stamps: Vec<Timetag> = Vec::new();
    while stamps.len() < 40 {
        stamps.extend(drain(&mut dsm, 2_000).iter().map(|s| s.timetag));
    }

    // Lose one poll interrupt; the backlog trips the level check on the
    // following poll and the engine goes into reset.
    dsm.inject_missed_poll();
    dsm.run_virtual_ms(100);
    assert!(dsm.with_engine(|e| !e.is_running()));
    assert!(dsm.with_engine(|e| e.poll_flags().contains(PollFlags::ERR)));
    assert_eq!(dsm.with_engine(|e| e.resets()), 1);

    // Resynchronization spans up to two PPS seconds: one to restart the
    // converters against an edge, one more to release the scan clocks.
    dsm.run_virtual_ms(2_500);
    assert!(dsm.with_engine(|e| e.is_running()));

    let mut resumed: Vec<Timetag> = Vec::new();
    while resumed.len() < 40 {
        let batch = drain(&mut dsm, 2_000);
        assert!(!batch.is_empty(), "no samples after reset");
        resumed.extend(batch.iter().map(|s| s.timetag));
    }

    stamps.extend(resumed);
    for pair in stamps.windows(2) {
        assert!(pair[1] > pair[0], "timetags regressed across the reset");
    }
    dsm.stop();
}

#[test]
fn temperature_stream_appears_at_its_rate() {
    let mut dsm = build_dsm(500, FilterKind::Pickoff, vec![0]);
    dsm.card().set_temperature_c16(30 * 16);
    dsm.with_engine(|e| e.set_temp_rate(Some(nidas_core::time::ClockRate::Hz1)))
        .unwrap();
    dsm.start().unwrap();
    dsm.run_virtual_ms(1_200);

    let mut temps = Vec::new();
    for _ in 0..5 {
        for s in drain(&mut dsm, 3_000) {
            if s.id == TEMPERATURE_SAMPLE_INDEX {
                temps.push(s.values()[0]);
            }
        }
        if !temps.is_empty() {
            break;
        }
    }
    assert!(!temps.is_empty(), "no temperature samples");
    assert!(temps.iter().all(|&t| t == 480));
    dsm.stop();
}

#[test]
fn stopped_board_reads_end_of_stream() {
    let mut dsm = build_dsm(500, FilterKind::Pickoff, vec![0]);
    dsm.start().unwrap();
    dsm.run_virtual_ms(1_200);
    dsm.stop();

    assert!(dsm.with_engine(|e| e.poll_flags().contains(PollFlags::HUP)));
    let mut buf = [0u8; 256];
    assert_eq!(dsm.read_blocking(&mut buf, 100), Ok(0));
}

#[test]
fn blocking_read_times_out_without_data() {
    let mut dsm = build_dsm(500, FilterKind::Pickoff, vec![0]);
    dsm.start().unwrap();
    // Still in the PPS phase: no data can exist yet.
    let mut buf = [0u8; 256];
    assert_eq!(
        dsm.read_blocking(&mut buf, 200),
        Err(ErrorCode::TIMEDOUT)
    );
}
