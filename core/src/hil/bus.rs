// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! Access to an ISA-bus I/O port window.
//!
//! A card owns a small window of I/O ports (16 bytes for the NCAR A/D) from
//! configuration until stop; offsets here are relative to the jumpered base
//! address. Control transfers are 8 bit, data transfers 16 bit, and 16-bit
//! reads present host byte order (the card itself is little-endian on the
//! wire).

/// One card's I/O port window.
///
/// Implementations take `&self`; a hardware implementation is a pair of
/// `in`/`out` instructions, and emulated cards use interior mutability.
pub trait IsaBus {
    fn outb(&self, offset: usize, val: u8);
    fn inb(&self, offset: usize) -> u8;
    fn outw(&self, offset: usize, val: u16);
    fn inw(&self, offset: usize) -> u16;

    /// Busy-wait. The chip protocols need microsecond pauses between port
    /// operations and tens of milliseconds for DAC latch settling.
    fn delay_us(&self, usecs: u32);
}

impl<T: IsaBus + ?Sized> IsaBus for &T {
    fn outb(&self, offset: usize, val: u8) {
        (*self).outb(offset, val)
    }

    fn inb(&self, offset: usize) -> u8 {
        (*self).inb(offset)
    }

    fn outw(&self, offset: usize, val: u16) {
        (*self).outw(offset, val)
    }

    fn inw(&self, offset: usize) -> u16 {
        (*self).inw(offset)
    }

    fn delay_us(&self, usecs: u32) {
        (*self).delay_us(usecs)
    }
}
