// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! Register and bit definitions for the card and the AD7725 converters.
//!
//! The card decodes a 16-byte I/O window. One byte written to the command
//! register selects the current I/O target; a following 8-bit transfer at
//! offset 0 or 16-bit transfer at `2 * channel` then talks to that target.
//! The command register sits at offset 0x0F, except on the ARM CPLD
//! variant where it is 0x0E and the last channel is lost to it.

use tock_registers::register_bitfields;

/// Size of the card's I/O window in bytes.
pub const IO_WIDTH: usize = 0x10;

/// Cards a system may carry; device nodes are `ncar_a2d<N>` for
/// N in 0..MAX_BOARDS.
pub const MAX_BOARDS: usize = 4;

/// Device name stem for the character devices.
pub const DEVICE_NAME: &str = "ncar_a2d";

/// Command register offset on x86 carriers.
pub const CMD_OFFSET_X86: usize = 0x0F;
/// Command register offset on the ARM CPLD variant.
pub const CMD_OFFSET_ARM: usize = 0x0E;

/// A/D channels per card.
pub const NUM_CHANNELS: usize = 8;
/// Channels usable on x86 carriers.
pub const NUM_USABLE_CHANNELS_X86: usize = 8;
/// Channels usable on the ARM CPLD variant, which steals the last channel
/// decode for the command register. Keep separate from the x86 limit.
pub const NUM_USABLE_CHANNELS_ARM: usize = 7;

/// Words in the card's hardware FIFO.
pub const HW_FIFO_DEPTH: usize = 1024;

/// 16-bit transfer offset for a channel's converter.
pub const fn chan_offset(channel: usize) -> usize {
    2 * channel
}

/// I/O targets selectable through the command register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum IoTarget {
    /// FIFO data (read) or FIFO control byte (write).
    Fifo = 0x0,
    /// AD7725 instruction word for a channel.
    ChipCmd = 0x1,
    /// I2C lines to the temperature sensor.
    ChipData = 0x2,
    /// Gain DAC bank 0.
    D2a0 = 0x3,
    /// Gain DAC bank 1.
    D2a1 = 0x4,
    /// Calibration voltage DAC.
    D2a2 = 0x5,
    /// Read converter interrupt lines, write offset/cal masks.
    SysCtl = 0x6,
    /// Read board status and serial number, write master chip select.
    FifoStat = 0x7,
}

/// Add to [`IoTarget::ChipCmd`] or [`IoTarget::ChipData`] to read back
/// instead of write.
pub const READ_SELECT: u8 = 0x8;

/// AD7725 instruction words.
pub mod instr {
    /// Read device ID.
    pub const READID: u16 = 0x8802;
    /// Read converted data; starts acquisition.
    pub const READDATA: u16 = 0x8D21;
    /// Begin the configuration (coefficient) write handshake.
    pub const WRCONFIG: u16 = 0x1800;
    /// Configuration write with data masking.
    pub const WRCONFEM: u16 = 0x1A00;
    /// Soft reset; the chip stays configured.
    pub const ABORT: u16 = 0x0000;
    /// Boot from internal ROM.
    pub const BFIR: u16 = 0x2000;
}

register_bitfields![u16,
    /// AD7725 status word, read back through [`IoTarget::ChipCmd`] +
    /// [`READ_SELECT`]. The instruction-register bits echo the previously
    /// written instruction and are the handshake's acknowledgement.
    pub STATUS [
        INSTBSY OFFSET(15) NUMBITS(1) [],
        DATARDY OFFSET(14) NUMBITS(1) [],
        DATAREQ OFFSET(13) NUMBITS(1) [],
        IDERR OFFSET(12) NUMBITS(1) [],
        CRCERR OFFSET(11) NUMBITS(1) [],
        DATAERR OFFSET(10) NUMBITS(1) [],
        INSTREG15 OFFSET(9) NUMBITS(1) [],
        INSTREG13 OFFSET(8) NUMBITS(1) [],
        INSTREG12 OFFSET(7) NUMBITS(1) [],
        INSTREG11 OFFSET(6) NUMBITS(1) [],
        INSTREG06 OFFSET(5) NUMBITS(1) [],
        INSTREG05 OFFSET(4) NUMBITS(1) [],
        INSTREG04 OFFSET(3) NUMBITS(1) [],
        INSTREG01 OFFSET(2) NUMBITS(1) [],
        INSTREG00 OFFSET(1) NUMBITS(1) [],
        CFGEND OFFSET(0) NUMBITS(1) []
    ],

    /// Board status word, read through [`IoTarget::FifoStat`]. The serial
    /// number occupies the upper 10 bits.
    pub BOARD [
        SERIAL OFFSET(6) NUMBITS(10) [],
        PRESYNC OFFSET(5) NUMBITS(1) [],
        /// Inverted 1 PPS line; low while the PPS pulse is visible.
        INV1PPS OFFSET(4) NUMBITS(1) [],
        FIFO_NOT_FULL OFFSET(3) NUMBITS(1) [],
        FIFO_NOT_EMPTY OFFSET(2) NUMBITS(1) [],
        /// Almost full (>= 3/4) or almost empty (<= 1/4).
        FIFO_AFAE OFFSET(1) NUMBITS(1) [],
        FIFO_HALF_FULL OFFSET(0) NUMBITS(1) []
    ],
];

/// Mask of the instruction-echo bits in [`STATUS`].
pub const STATUS_INSTR_MASK: u16 = 0x03FE;

/// The echo the AD7725 presents in its status word after accepting
/// `instruction`. Only a subset of the instruction bits are echoed.
pub const fn instr_echo_bits(instruction: u16) -> u16 {
    let mut expected = 0;
    if instruction & 0x8000 != 0 {
        expected |= 1 << 9; // INSTREG15
    }
    if instruction & 0x2000 != 0 {
        expected |= 1 << 8; // INSTREG13
    }
    if instruction & 0x1000 != 0 {
        expected |= 1 << 7; // INSTREG12
    }
    if instruction & 0x0800 != 0 {
        expected |= 1 << 6; // INSTREG11
    }
    if instruction & 0x0040 != 0 {
        expected |= 1 << 5; // INSTREG06
    }
    if instruction & 0x0020 != 0 {
        expected |= 1 << 4; // INSTREG05
    }
    if instruction & 0x0010 != 0 {
        expected |= 1 << 3; // INSTREG04
    }
    if instruction & 0x0002 != 0 {
        expected |= 1 << 2; // INSTREG01
    }
    if instruction & 0x0001 != 0 {
        expected |= 1 << 1; // INSTREG00
    }
    expected
}

/// FIFO control byte bits, written through [`IoTarget::Fifo`].
pub mod fifoctl {
    /// Cycle 0-1-0 to clear the FIFO.
    pub const FIFOCLR: u8 = 0x01;
    /// Let the converters run automatically.
    pub const AUTO: u8 = 0x02;
    /// Stop the converter scan clocks; latched by cycling [`SYNCCK`].
    pub const SYNC: u8 = 0x04;
    /// Clock to latch the [`SYNC`] bit value.
    pub const SYNCCK: u8 = 0x08;
    /// Allow the GPS 1 PPS edge to clear SYNC.
    pub const PPS_ENABLE: u8 = 0x10;
}

/// User-facing coefficient block length, in 16-bit words. Blocks of this
/// exact size are accepted by the configure op; the on-chip handshake
/// downloads the leading [`CHIP_COEF_WORDS`] of the block to every
/// converter and the remainder of the block is carried unused, matching
/// the fixed-size filter files the block is loaded from.
pub const COEF_BLOCK_WORDS: usize = 2048;

/// Words actually downloaded to each AD7725 by the WRCONFIG handshake.
pub const CHIP_COEF_WORDS: usize = 517;

/// Gain DAC code for a channel, or `None` for an unsupported pairing.
/// Unipolar mode supports gains 1, 2 and 4; bipolar accepts anything but
/// programs the lowest gain for unexpected values.
pub const fn gain_code(channel: usize, gain: u8, bipolar: bool) -> Option<u16> {
    let base: u16 = if bipolar {
        match gain {
            2 => 0x4400,
            4 => 0x8800,
            _ => 0x2200, // gain 1, and the fallback for unexpected inputs
        }
    } else {
        match gain {
            1 => 0x1100,
            2 => 0x4400,
            4 => 0x8800,
            _ => return None,
        }
    };
    Some(base + channel as u16)
}

/// Calibration voltage DAC codes.
pub mod vcal {
    /// DAC code leaving the calibration line open.
    pub const OPEN: u16 = 0x01;

    /// Code for a supported calibration voltage, or `None`.
    pub const fn code(volts: i8) -> Option<u16> {
        match volts {
            0 => Some(0x00),
            1 => Some(0x03),
            5 => Some(0x05),
            -10 => Some(0x09),
            10 => Some(0x11),
            _ => None,
        }
    }
}

/// I2C line bits on the [`IoTarget::ChipData`] target.
pub mod i2c {
    pub const SCL: u8 = 0x2;
    pub const SDA: u8 = 0x1;
    /// Bus address of the LM92 temperature register.
    pub const LM92_ADDR: u8 = 0x48;
}

#[cfg(test)]
mod test {
    use super::*;
    use tock_registers::LocalRegisterCopy;

    #[test]
    fn echo_bits_for_readdata() {
        // RdCONV = 0x8D21 echoes 1 0 0 1 0 1 0 0 1 into bits 9..=1.
        let echo = instr_echo_bits(instr::READDATA);
        assert_eq!(echo, 0b10_0101_0010 << 0);
        assert_eq!(echo & !STATUS_INSTR_MASK, 0);
    }

    #[test]
    fn echo_bits_for_abort_are_empty() {
        assert_eq!(instr_echo_bits(instr::ABORT), 0);
    }

    #[test]
    fn status_word_decodes() {
        let st: LocalRegisterCopy<u16, STATUS::Register> =
            LocalRegisterCopy::new(0x8000 | 0x2000 | 0x0001);
        assert!(st.is_set(STATUS::INSTBSY));
        assert!(st.is_set(STATUS::DATAREQ));
        assert!(st.is_set(STATUS::CFGEND));
        assert!(!st.is_set(STATUS::CRCERR));
    }

    #[test]
    fn board_serial_number_field() {
        let st: LocalRegisterCopy<u16, BOARD::Register> =
            LocalRegisterCopy::new((0x2A5 << 6) | 0x08 | 0x10);
        assert_eq!(st.read(BOARD::SERIAL), 0x2A5);
        assert!(st.is_set(BOARD::INV1PPS));
        assert!(st.is_set(BOARD::FIFO_NOT_FULL));
    }

    #[test]
    fn gain_codes_match_the_dac_table() {
        assert_eq!(gain_code(0, 1, true), Some(0x2200));
        assert_eq!(gain_code(3, 2, true), Some(0x4403));
        assert_eq!(gain_code(7, 4, false), Some(0x8807));
        assert_eq!(gain_code(1, 1, false), Some(0x1101));
        assert_eq!(gain_code(1, 3, false), None);
        // Unexpected bipolar gains fall back to the lowest gain.
        assert_eq!(gain_code(2, 9, true), Some(0x2202));
    }

    #[test]
    fn vcal_codes() {
        assert_eq!(vcal::code(10), Some(0x11));
        assert_eq!(vcal::code(-10), Some(0x09));
        assert_eq!(vcal::code(3), None);
    }
}
