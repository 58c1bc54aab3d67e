// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! Base types shared by the NIDAS driver stack.
//!
//! This crate carries the pieces every other crate in the workspace needs:
//! the error code set, microsecond timetags and clock rates, the sample
//! types that move between the acquisition engine and its readers, the
//! single-producer single-consumer sample rings, and the hardware interface
//! layer (HIL) traits that the chip drivers and boards implement.

#![no_std]

extern crate alloc;

pub mod collections;
pub mod errorcode;
pub mod hil;
pub mod sample;
pub mod time;
pub mod worker;

pub use errorcode::{ErrorCode, PollFlags};
pub use time::Timetag;
