// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! Standard errors, their classes, and the poll flag set.

/// Standard errors.
///
/// Configuration errors are rejected synchronously at the call that supplied
/// the bad value. Transient I/O errors are retried inside the chip driver up
/// to a chip-specific bound and only promoted to a latched error after the
/// retries are exhausted. A latched error is visible to readers as `IO`
/// until the owning engine is stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[allow(non_camel_case_types)]
#[repr(usize)]
pub enum ErrorCode {
    /// Generic failure condition
    FAIL = 1,
    /// Underlying system is busy; retry
    BUSY,
    /// The state requested is already set
    ALREADY,
    /// Component is powered down or not started
    OFF,
    /// An invalid parameter was passed
    INVAL,
    /// Parameter passed was too large
    SIZE,
    /// Memory (a buffer slot) was unavailable
    NOMEM,
    /// Operation is not supported
    NOSUPPORT,
    /// Device does not exist
    NODEVICE,
    /// Packet transmission not acknowledged
    NOACK,
    /// No data available; retry later
    AGAIN,
    /// Operation was interrupted by a signal
    INTR,
    /// A hardware deadline was missed
    TIMEDOUT,
    /// Latched input/output error
    IO,
}

/// Poll readiness and error flags for a sample stream, the way a character
/// device surfaces them through poll(2).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollFlags(u8);

impl PollFlags {
    /// Data is available to read.
    pub const IN: PollFlags = PollFlags(0x01);
    /// The stream is in an error state (resetting or latched).
    pub const ERR: PollFlags = PollFlags(0x02);
    /// The stream was shut down; reads return end of stream.
    pub const HUP: PollFlags = PollFlags(0x04);

    pub const fn empty() -> PollFlags {
        PollFlags(0)
    }

    pub const fn contains(self, other: PollFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: PollFlags) -> PollFlags {
        PollFlags(self.0 | other.0)
    }
}

impl core::ops::BitOr for PollFlags {
    type Output = PollFlags;

    fn bitor(self, rhs: PollFlags) -> PollFlags {
        self.union(rhs)
    }
}

impl core::ops::BitOrAssign for PollFlags {
    fn bitor_assign(&mut self, rhs: PollFlags) {
        self.0 |= rhs.0;
    }
}
