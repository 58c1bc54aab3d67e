// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! Single-producer single-consumer slot ring for samples.
//!
//! The ring owns its slots, each preallocated to the fixed maximum the
//! producer will ever write, so the hot path never allocates. Capacity must
//! be a power of two; indexing is free-running with a mask, which keeps the
//! empty and full states distinguishable without a separate count.
//!
//! Producers never block: when the ring is full, [`SampleRing::head_slot`]
//! returns `None` and the producer drops the sample and accounts for it.

use alloc::vec::Vec;

/// A bounded ring of reusable sample slots.
pub struct SampleRing<T> {
    slots: Vec<T>,
    mask: usize,
    head: usize,
    tail: usize,
}

impl<T> SampleRing<T> {
    /// Create a ring of `capacity` slots (a power of two), each built by
    /// `init`.
    pub fn new_with(capacity: usize, init: impl Fn() -> T) -> SampleRing<T> {
        assert!(capacity.is_power_of_two() && capacity > 0);
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(init());
        }
        SampleRing {
            slots,
            mask: capacity - 1,
            head: 0,
            tail: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.head.wrapping_sub(self.tail)
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Free slots remaining for the producer.
    pub fn space(&self) -> usize {
        self.capacity() - self.len()
    }

    /// The next slot to fill, or `None` when the ring is full. The write is
    /// not visible to the consumer until [`Self::publish`].
    pub fn head_slot(&mut self) -> Option<&mut T> {
        if self.is_full() {
            return None;
        }
        let idx = self.head & self.mask;
        Some(&mut self.slots[idx])
    }

    /// Make the slot returned by the last [`Self::head_slot`] visible.
    pub fn publish(&mut self) {
        debug_assert!(!self.is_full());
        self.head = self.head.wrapping_add(1);
    }

    /// The oldest unconsumed slot, if any.
    pub fn tail_slot(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        let idx = self.tail & self.mask;
        Some(&self.slots[idx])
    }

    /// Release the slot returned by the last [`Self::tail_slot`].
    pub fn consume(&mut self) {
        debug_assert!(!self.is_empty());
        self.tail = self.tail.wrapping_add(1);
    }

    /// Discard everything queued. Only safe while producer and consumer are
    /// quiescent, e.g. during a reset with callbacks unregistered.
    pub fn clear(&mut self) {
        self.tail = self.head;
    }
}
