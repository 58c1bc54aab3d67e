// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! The A/D acquisition engine.
//!
//! Turns a free-running card into a timestamped, framed, filtered sample
//! stream. The IRIG driver calls in at the poll rate to drain the card's
//! hardware FIFO into a ring of FIFO samples; a cooperative bottom half
//! breaks those into per-scan records, runs each configured decimating
//! filter, and queues the results for readers. A second, 100 Hz callback
//! services the 1 PPS synchronization phases of startup and reset.

#![no_std]

extern crate alloc;

pub mod config;
pub mod engine;

pub use config::{A2dConfig, A2dStatus, CalConfig, SampleConfig};
pub use engine::{Engine, SCAN_OFFSET_DELAY, TEMPERATURE_SAMPLE_INDEX};

/// Consumer notified when output samples are ready.
///
/// Called from the bottom half when the configured latency has elapsed
/// since the last wakeup or the output ring has reached half full, and on
/// shutdown so blocked readers re-check the stream state.
pub trait ReadClient {
    fn samples_ready(&self);
}
