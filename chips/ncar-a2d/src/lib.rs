// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! Chip-level driver for the NCAR 8-channel sigma-delta A/D card.
//!
//! The card is an ISA-bus board carrying one AD7725 converter per channel,
//! a word-wide 1024-deep hardware FIFO shared by all channels, gain DACs,
//! a calibration voltage DAC, an LM92 temperature sensor behind a
//! bit-banged I2C line, and a system-control latch. This crate owns the
//! card's 16-byte I/O window from configuration to stop and implements the
//! instruction and coefficient handshake protocols; the timing and
//! filtering policy lives above it in the acquisition engine.

#![no_std]

extern crate alloc;

pub mod card;
pub mod registers;
pub mod sim;

pub use card::{A2dCard, CardVariant};
