// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! Demo: run the acquisition engine against the emulated card for a few
//! virtual seconds and log what comes out, then push a burst of CSAT3
//! frames through the wind pipeline.

use dsm_sim::Dsm;
use log::info;

use ncar_a2d::registers::COEF_BLOCK_WORDS;
use nidas_a2d::{A2dConfig, SampleConfig};
use nidas_core::sample::OutputSample;
use nidas_core::time::format_timetag;
use nidas_isff::csat3::Csat3Decoder;
use nidas_isff::{WindConfig, WindProcessor};
use short_filters::FilterKind;

fn run_a2d() {
    let mut dsm = Dsm::new(1_700_000_000_000_000);
    dsm.configure(A2dConfig {
        scan_rate: 500,
        latency_usecs: 0,
    })
    .expect("bad global config");
    dsm.add_sample(SampleConfig {
        index: 1,
        rate: 100,
        filter: FilterKind::Boxcar,
        channels: vec![0, 1],
        gains: vec![2, 2],
        bipolar: vec![true, true],
        filter_data: vec![],
    })
    .expect("bad sample config");
    dsm.add_sample(SampleConfig {
        index: 2,
        rate: 500,
        filter: FilterKind::Pickoff,
        channels: vec![3],
        gains: vec![1],
        bipolar: vec![false],
        filter_data: vec![],
    })
    .expect("bad sample config");
    dsm.set_coefficients(&vec![0u16; COEF_BLOCK_WORDS])
        .expect("bad coefficient block");

    // A ramp on channel 0, constants elsewhere.
    dsm.set_signal(Box::new(|n| {
        let ramp = (n % 1000) as i16;
        [ramp, -100, 0, 2500, 0, 0, 0, 0]
    }));

    dsm.start().expect("start failed");

    let mut buf = [0u8; 4096];
    let mut total = 0usize;
    for _ in 0..10 {
        match dsm.read_blocking(&mut buf, 3_000) {
            Ok(n) => {
                let mut off = 0;
                while let Some((samp, used)) = OutputSample::decode_le(&buf[off..n]) {
                    if total % 50 == 0 {
                        info!(
                            "a2d sample id {} at {}: {:?}",
                            samp.id,
                            format_timetag(samp.timetag),
                            samp.values()
                        );
                    }
                    total += 1;
                    off += used;
                }
            }
            Err(e) => {
                info!("read: {:?}", e);
                break;
            }
        }
    }
    let status = dsm.with_engine(|e| e.get_status());
    info!("a2d: {} samples, status {:?}", total, status);
    dsm.stop();
}

fn run_wind() {
    let mut decoder = Csat3Decoder::new(true, true);
    decoder.set_rate(20);
    let mut processor = WindProcessor::new(WindConfig {
        vazimuth_degrees: 120.0,
        spd_index: Some(5),
        dir_index: Some(6),
        ..WindConfig::default()
    });

    let mut tt = 1_700_000_000_000_000i64;
    for n in 0..10u16 {
        let mut frame = [0u8; 12];
        frame[0..2].copy_from_slice(&(512i16 + n as i16).to_le_bytes());
        frame[2..4].copy_from_slice(&(-256i16).to_le_bytes());
        frame[6..8].copy_from_slice(&0i16.to_le_bytes());
        frame[8..10].copy_from_slice(&(n % 64).to_le_bytes());
        frame[10] = 0x55;
        frame[11] = 0xAA;

        if let Some((wtt, rec)) = decoder.process(tt, &frame) {
            let out = processor.process(wtt, &rec);
            info!(
                "wind at {}: u {:.3} v {:.3} spd {:.3} dir {:.1}",
                format_timetag(wtt),
                out[0],
                out[1],
                out[5],
                out[6]
            );
        }
        tt += 50_000;
    }
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    run_a2d();
    run_wind();
}
