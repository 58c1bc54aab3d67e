// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! The IRIG timecode clock.
//!
//! A companion driver decodes an IRIG timecode line and provides two
//! services: a microsecond-accurate wall clock, and periodic callbacks at a
//! small set of rates (see [`ClockRate`]). Callback dispatch is
//! non-reentrant; if a tick overruns its period the missed tick is simply
//! lost, and consumers detect the gap themselves (the A/D engine sees it as
//! a bad FIFO level on the next tick).
//!
//! Registration and unregistration are serialized inside the driver and
//! must be made from the owning thread, never from inside a callback.

use crate::time::Timetag;

/// Rates a callback can be registered at, re-exported for implementors.
pub use crate::time::ClockRate as IrigRate;

/// Wall clock side of the IRIG driver.
pub trait IrigClock {
    /// Current time, microseconds since 1970 UTC.
    fn now(&self) -> Timetag;
}

/// A consumer of periodic IRIG callbacks.
pub trait IrigClient {
    /// One tick at the registered rate. `now` is the tick's IRIG time.
    fn irig_tick(&mut self, now: Timetag);
}

// Plain closures make fine clients; drivers that split their work across
// several rates register one closure per rate.
impl<F: FnMut(Timetag)> IrigClient for F {
    fn irig_tick(&mut self, now: Timetag) {
        self(now)
    }
}

/// Opaque handle for a registered callback, used to unregister it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallbackHandle(pub usize);
