// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! Bottom-half scheduling seam.
//!
//! Interrupt-context producers (the A/D poll tick) hand heavy work to a
//! cooperative worker. The producer only pokes a scheduler; the board owns
//! the queue and runs the drained work from task context.

/// Scheduler handle given to interrupt-context code.
pub trait WorkScheduler {
    /// Request that the owning board run the worker soon. Must be cheap and
    /// safe to call from callback context; duplicate requests coalesce.
    fn schedule(&self);
}

/// A scheduler that drops requests, for callers with no bottom half wired.
pub struct NullScheduler;

impl WorkScheduler for NullScheduler {
    fn schedule(&self) {}
}
