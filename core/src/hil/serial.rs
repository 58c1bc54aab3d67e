// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! A character serial port, as seen by a probe session.
//!
//! Probe sessions run in the thread that owns the port and are allowed to
//! block; reads take a millisecond deadline and fail with
//! [`ErrorCode::TIMEDOUT`](crate::ErrorCode::TIMEDOUT) when it passes, or
//! [`ErrorCode::INTR`](crate::ErrorCode::INTR) when a signal interrupts the
//! wait.

use crate::errorcode::ErrorCode;

pub trait SerialPort {
    /// Read up to `buf.len()` bytes, waiting at most `timeout_ms`.
    /// Returns the number of bytes read (never 0).
    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, ErrorCode>;

    /// Write the whole buffer.
    fn write(&mut self, buf: &[u8]) -> Result<(), ErrorCode>;

    /// Discard any buffered, unread input.
    fn flush_input(&mut self);
}
