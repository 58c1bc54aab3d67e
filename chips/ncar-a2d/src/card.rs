// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! The card protocol: instruction writes with echo verification, the
//! coefficient download handshake, DAC programming, sync and FIFO control.
//!
//! Every operation follows the same pattern: select an I/O target through
//! the command register, then transfer at offset 0 (8 bit, or 16 bit for
//! the FIFO and DACs) or at `2 * channel` (16 bit, per-converter).

use log::{debug, error, info, warn};
use nidas_core::hil::bus::IsaBus;
use nidas_core::ErrorCode;
use tock_registers::LocalRegisterCopy;

use crate::registers::{
    self, chan_offset, fifoctl, gain_code, i2c, instr, instr_echo_bits, vcal, IoTarget,
    CHIP_COEF_WORDS, CMD_OFFSET_ARM, CMD_OFFSET_X86, NUM_CHANNELS, NUM_USABLE_CHANNELS_ARM,
    NUM_USABLE_CHANNELS_X86, STATUS, STATUS_INSTR_MASK,
};

/// Carrier variant. The ARM CPLD build moves the command register into the
/// last channel's decode and so loses that channel; it also tolerates a
/// slower PPS search. The two limits stay separate on purpose.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CardVariant {
    X86,
    Arm,
}

impl CardVariant {
    pub const fn cmd_offset(self) -> usize {
        match self {
            CardVariant::X86 => CMD_OFFSET_X86,
            CardVariant::Arm => CMD_OFFSET_ARM,
        }
    }

    pub const fn usable_channels(self) -> usize {
        match self {
            CardVariant::X86 => NUM_USABLE_CHANNELS_X86,
            CardVariant::Arm => NUM_USABLE_CHANNELS_ARM,
        }
    }

    /// Deadline for finding a 1 PPS edge during startup.
    pub const fn pps_deadline_secs(self) -> u32 {
        match self {
            CardVariant::X86 => 2,
            CardVariant::Arm => 10,
        }
    }

    /// Whether the FIFO-level check tolerates catching up after a missed
    /// poll (levels 1..=3) or demands the nominal level exactly.
    pub const fn tolerant_fifo_band(self) -> bool {
        match self {
            CardVariant::X86 => false,
            CardVariant::Arm => true,
        }
    }
}

/// One A/D card behind an ISA port window.
pub struct A2dCard<B: IsaBus> {
    bus: B,
    variant: CardVariant,
    /// Shadow of the FIFO control byte; the hardware register is
    /// write-only.
    fifoctl: u8,
    /// Shadow of the offset/cal latch, also write-only.
    offcal: u16,
    /// Shadow of the I2C line byte.
    i2c_lines: u8,
}

impl<B: IsaBus> A2dCard<B> {
    pub fn new(bus: B, variant: CardVariant) -> A2dCard<B> {
        A2dCard {
            bus,
            variant,
            fifoctl: 0,
            offcal: 0,
            i2c_lines: i2c::SCL | i2c::SDA,
        }
    }

    pub fn variant(&self) -> CardVariant {
        self.variant
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    fn select(&self, target: IoTarget) {
        self.bus.outb(self.variant.cmd_offset(), target as u8);
    }

    fn select_readback(&self, target: IoTarget) {
        self.bus
            .outb(self.variant.cmd_offset(), target as u8 + registers::READ_SELECT);
    }

    /// Status word of one converter.
    pub fn chip_status(&self, channel: usize) -> u16 {
        self.select_readback(IoTarget::ChipCmd);
        self.bus.inw(chan_offset(channel))
    }

    fn write_instruction(&self, channel: usize, instruction: u16) {
        self.select(IoTarget::ChipCmd);
        self.bus.outw(chan_offset(channel), instruction);
    }

    /// Send ABORT (soft reset, configuration retained) to one converter.
    /// The chip acknowledges by clearing everything but INSTBSY and CFGEND.
    pub fn stop_chip(&mut self, channel: usize) {
        const NTRY: usize = 10;
        let mut status = 0;
        for ntry in 0..NTRY {
            if ntry % 4 == 0 {
                self.write_instruction(channel, instr::ABORT);
            }
            status = self.chip_status(channel);
            if status & 0x7FFE == 0 {
                return;
            }
            info!(
                "a2d: abort channel {}: status {:#06x}, ntry {}",
                channel, status, ntry
            );
        }
        debug!(
            "a2d: abort channel {} never settled, status {:#06x}",
            channel, status
        );
    }

    pub fn stop_all_chips(&mut self) {
        for ch in 0..self.variant.usable_channels() {
            self.stop_chip(ch);
        }
    }

    /// Put one converter into acquisition with READDATA, verifying the
    /// instruction echo in the status word.
    pub fn start_chip(&mut self, channel: usize) -> Result<(), ErrorCode> {
        const NTRY: usize = 20;
        if channel >= self.variant.usable_channels() {
            return Err(ErrorCode::INVAL);
        }
        let expected = instr_echo_bits(instr::READDATA);
        for ntry in 0..NTRY {
            self.write_instruction(channel, instr::READDATA);
            let status = self.chip_status(channel);
            if status & STATUS_INSTR_MASK == expected {
                return Ok(());
            }
            info!(
                "a2d: READDATA on channel {} not echoed: expected {:#06x}, status {:#06x}, ntry {}",
                channel, expected, status, ntry
            );
        }
        Err(ErrorCode::IO)
    }

    pub fn start_all_chips(&mut self) -> Result<(), ErrorCode> {
        for ch in 0..self.variant.usable_channels() {
            self.start_chip(ch)?;
        }
        Ok(())
    }

    /// Wait for the converter's interrupt line, the chip's only signal
    /// that the next coefficient may be written. Microsecond busy poll,
    /// re-selecting the readback target every few tries, bounded at 100
    /// iterations.
    fn wait_channel_interrupt(&self, channel: usize, ncoef: usize) -> Result<(), ErrorCode> {
        const NTRY: usize = 100;
        let mask = 1u8 << channel;
        let mut lines = 0;
        for ntry in 0..NTRY {
            if ntry % 4 == 0 {
                self.select(IoTarget::SysCtl);
            }
            lines = self.bus.inb(0);
            if lines & mask != 0 {
                return Ok(());
            }
            self.bus.delay_us(1);
        }
        warn!(
            "a2d: interrupt bit not set for channel {}, ncoef {}, lines {:#04x}",
            channel, ncoef, lines
        );
        Err(ErrorCode::TIMEDOUT)
    }

    fn status_copy(&self, channel: usize) -> LocalRegisterCopy<u16, STATUS::Register> {
        LocalRegisterCopy::new(self.chip_status(channel))
    }

    /// Download the coefficient table into one converter.
    ///
    /// WRCONFIG opens a word-by-word handshake: before each coefficient
    /// the chip must raise its interrupt line and present DATAREQ without
    /// CRCERR or IDERR; after the final word it must present CFGEND alone.
    /// Any other combination fails the configuration.
    pub fn configure_chip(&mut self, channel: usize, coefs: &[u16]) -> Result<(), ErrorCode> {
        const NTRY: usize = 10;
        if channel >= self.variant.usable_channels() || coefs.len() < CHIP_COEF_WORDS {
            return Err(ErrorCode::INVAL);
        }
        let coefs = &coefs[..CHIP_COEF_WORDS];

        let expected = instr_echo_bits(instr::WRCONFIG);
        let mut ntry = 0;
        loop {
            if ntry % 2 == 0 {
                self.write_instruction(channel, instr::WRCONFIG);
            }
            let status = self.chip_status(channel);
            if status & STATUS_INSTR_MASK == expected {
                break;
            }
            warn!(
                "a2d: WRCONFIG on channel {} not echoed: expected {:#06x}, status {:#06x}, ntry {}",
                channel, expected, status, ntry
            );
            ntry += 1;
            if ntry == NTRY {
                error!("a2d: channel {} would not enter configuration", channel);
                return Err(ErrorCode::TIMEDOUT);
            }
        }

        for (ncoef, &coef) in coefs.iter().enumerate() {
            self.wait_channel_interrupt(channel, ncoef)?;

            let status = self.status_copy(channel);
            if !status.is_set(STATUS::DATAREQ) {
                error!(
                    "a2d: no data request before coefficient {} on channel {}, status {:#06x}",
                    ncoef,
                    channel,
                    status.get()
                );
                return Err(ErrorCode::IO);
            }
            if status.is_set(STATUS::CRCERR) || status.is_set(STATUS::IDERR) {
                error!(
                    "a2d: CRC/ID error before coefficient {} on channel {}, status {:#06x}",
                    ncoef,
                    channel,
                    status.get()
                );
                return Err(ErrorCode::IO);
            }

            self.select(IoTarget::D2a0);
            self.bus.outw(chan_offset(channel), coef);
        }

        // The chip raises the interrupt once more after the last word.
        self.wait_channel_interrupt(channel, coefs.len())?;
        let status = self.status_copy(channel);
        if status.is_set(STATUS::IDERR) {
            error!("a2d: ID error after coefficient download on channel {}", channel);
            return Err(ErrorCode::IO);
        }
        if status.is_set(STATUS::CRCERR) {
            error!("a2d: CRC error after coefficient download on channel {}", channel);
            return Err(ErrorCode::IO);
        }
        if !status.is_set(STATUS::CFGEND) {
            error!(
                "a2d: CFGEND not presented after configuring channel {}, status {:#06x}",
                channel,
                status.get()
            );
            return Err(ErrorCode::IO);
        }
        Ok(())
    }

    /// Download the same coefficient block into every usable converter.
    pub fn configure_all_chips(&mut self, coefs: &[u16]) -> Result<(), ErrorCode> {
        for ch in 0..self.variant.usable_channels() {
            self.configure_chip(ch, coefs)?;
        }
        Ok(())
    }

    /// Program one channel's gain DAC.
    pub fn set_gain(&mut self, channel: usize, gain: u8, bipolar: bool) -> Result<(), ErrorCode> {
        if channel >= self.variant.usable_channels() {
            return Err(ErrorCode::INVAL);
        }
        let code = gain_code(channel, gain, bipolar).ok_or(ErrorCode::INVAL)?;
        self.select(IoTarget::D2a0);
        self.bus.delay_us(10_000);
        self.bus.outw(0, code);
        self.bus.delay_us(10_000);
        Ok(())
    }

    /// Program every channel's gain DAC and the polarity latch. The DAC
    /// latch only takes reliably on the third full rewrite, so all gains
    /// are written three times with a D2A1 select between passes.
    pub fn set_gains_and_offset(
        &mut self,
        gains: &[u8; NUM_CHANNELS],
        bipolar: &[bool; NUM_CHANNELS],
    ) -> Result<(), ErrorCode> {
        self.fifoctl = 0;
        self.offcal = 0;

        for _repeat in 0..3 {
            for ch in 0..self.variant.usable_channels() {
                if gains[ch] > 0 {
                    self.set_gain(ch, gains[ch], bipolar[ch])?;
                }
            }
            self.select(IoTarget::D2a1);
            self.bus.delay_us(10_000);
        }

        self.set_offset(bipolar);
        Ok(())
    }

    /// Write the unipolar/offset mask into the system-control latch. The
    /// latch takes inverted bits, offset selections in the high byte.
    pub fn set_offset(&mut self, bipolar: &[bool; NUM_CHANNELS]) {
        let mut off_chans: u16 = 0;
        for ch in 0..NUM_CHANNELS {
            off_chans >>= 1;
            if !bipolar[ch] {
                off_chans += 0x80;
            }
        }
        self.select(IoTarget::SysCtl);
        self.offcal = !(off_chans << 8) & 0xFFFF;
        self.bus.outw(0, self.offcal);
    }

    /// Switch the selected channels onto the calibration voltage source,
    /// keeping the polarity selections. Calibration selections occupy the
    /// low byte of the latch.
    pub fn set_cal(&mut self, bipolar: &[bool; NUM_CHANNELS], calset: &[bool; NUM_CHANNELS]) {
        let mut off_chans: u16 = 0;
        let mut cal_chans: u16 = 0;
        for ch in 0..NUM_CHANNELS {
            off_chans >>= 1;
            cal_chans >>= 1;
            if !bipolar[ch] {
                off_chans += 0x80;
            }
            if calset[ch] {
                cal_chans += 0x80;
            }
        }
        self.select(IoTarget::SysCtl);
        self.offcal = !(((off_chans << 8) & 0xFF00) | cal_chans) & 0xFFFF;
        self.bus.outw(0, self.offcal);
    }

    /// Drive the calibration DAC to one of the supported voltages.
    pub fn set_vcal(&mut self, volts: i8) -> Result<(), ErrorCode> {
        let code = vcal::code(volts).ok_or(ErrorCode::INVAL)?;
        // Open the source before each change to avoid shorting it.
        self.unset_vcal();
        self.select(IoTarget::D2a2);
        self.bus.outw(0, code & 0x1F);
        Ok(())
    }

    /// Leave the calibration line open.
    pub fn unset_vcal(&mut self) {
        self.select(IoTarget::D2a2);
        self.bus.outw(0, vcal::OPEN);
    }

    fn write_fifoctl(&self) {
        self.bus.outb(0, self.fifoctl);
    }

    /// Raise SYNC, stopping the converter scan clocks until cleared by
    /// program control or by an enabled 1 PPS edge.
    pub fn set_sync(&mut self) {
        self.select(IoTarget::Fifo);
        self.fifoctl |= fifoctl::SYNC;
        self.write_fifoctl();
        self.bus.outb(0, self.fifoctl | fifoctl::SYNCCK);
        self.write_fifoctl();
    }

    pub fn clear_sync(&mut self) {
        self.select(IoTarget::Fifo);
        self.fifoctl &= !fifoctl::SYNC;
        self.write_fifoctl();
        self.bus.outb(0, self.fifoctl | fifoctl::SYNCCK);
        self.write_fifoctl();
    }

    /// Let a 1 PPS edge clear SYNC.
    pub fn enable_pps(&mut self) {
        self.select(IoTarget::Fifo);
        self.bus.outb(0, self.fifoctl | fifoctl::PPS_ENABLE);
    }

    /// Cycle the FIFO clear bit.
    pub fn clear_fifo(&mut self) {
        self.select(IoTarget::Fifo);
        self.fifoctl &= !fifoctl::FIFOCLR;
        self.write_fifoctl();
        self.bus.outb(0, self.fifoctl | fifoctl::FIFOCLR);
        self.write_fifoctl();
    }

    pub fn set_auto(&mut self) {
        self.select(IoTarget::Fifo);
        self.fifoctl |= fifoctl::AUTO;
        self.write_fifoctl();
    }

    pub fn clear_auto(&mut self) {
        self.select(IoTarget::Fifo);
        self.fifoctl &= !fifoctl::AUTO;
        self.write_fifoctl();
    }

    /// Route the chosen converter's interrupt to the card's master line.
    pub fn set_master(&mut self, channel: usize) -> Result<(), ErrorCode> {
        if channel >= self.variant.usable_channels() {
            error!("a2d: bad master chip number {}", channel);
            return Err(ErrorCode::INVAL);
        }
        self.select(IoTarget::FifoStat);
        self.bus.outb(0, channel as u8);
        Ok(())
    }

    /// Raw board status word: serial number in the top 10 bits, FIFO and
    /// PPS state in the low 6.
    pub fn board_status(&self) -> u16 {
        self.select(IoTarget::FifoStat);
        self.bus.inw(0)
    }

    pub fn serial_number(&self) -> u16 {
        self.board_status() >> 6
    }

    /// True while the inverted 1 PPS line is low, i.e. the pulse is
    /// visible.
    pub fn pps_visible(&self) -> bool {
        let st: LocalRegisterCopy<u16, crate::registers::BOARD::Register> =
            LocalRegisterCopy::new(self.board_status());
        !st.is_set(crate::registers::BOARD::INV1PPS)
    }

    /// FIFO fill level:
    /// 0 empty, 1 below 1/4, 2 below 1/2, 3 below 3/4, 4 below full,
    /// 5 full.
    pub fn fifo_level(&self) -> usize {
        let status = self.board_status();
        let st: LocalRegisterCopy<u16, crate::registers::BOARD::Register> =
            LocalRegisterCopy::new(status);

        if !st.is_set(crate::registers::BOARD::FIFO_NOT_FULL) {
            return 5;
        }
        if !st.is_set(crate::registers::BOARD::FIFO_NOT_EMPTY) {
            return 0;
        }
        // Two bits locate the quarter: half-full, and almost-full-or-empty.
        match status & 0x03 {
            3 => 4,
            2 => 1,
            1 => 3,
            _ => 2,
        }
    }

    /// Drain `out.len()` words from the hardware FIFO. The card's
    /// amplifiers invert, so every count is negated on the way out.
    pub fn read_fifo(&mut self, out: &mut [i16]) {
        self.select(IoTarget::Fifo);
        for v in out.iter_mut() {
            *v = (self.bus.inw(0) as i16).wrapping_neg();
        }
    }

    /// Read and throw away `nvalues` words.
    pub fn discard_fifo(&mut self, nvalues: usize) {
        self.select(IoTarget::Fifo);
        for _ in 0..nvalues {
            let _ = self.bus.inw(0);
        }
    }

    // I2C bit-bang helpers for the LM92 temperature sensor. The two line
    // bits live behind the ChipData target; data is sampled on the rising
    // clock.

    fn i2c_set(&mut self, lines: u8) {
        self.i2c_lines = lines;
        self.bus.outb(0, self.i2c_lines);
        self.bus.delay_us(1);
    }

    fn i2c_clock_hi(&mut self) {
        self.i2c_set(self.i2c_lines | i2c::SCL);
    }

    fn i2c_clock_lo(&mut self) {
        self.i2c_set(self.i2c_lines & !i2c::SCL);
    }

    fn i2c_data_hi(&mut self) {
        self.i2c_set(self.i2c_lines | i2c::SDA);
    }

    fn i2c_data_lo(&mut self) {
        self.i2c_set(self.i2c_lines & !i2c::SDA);
    }

    fn i2c_start(&mut self) {
        self.i2c_data_hi();
        self.i2c_clock_hi();
        self.i2c_data_lo();
        self.i2c_clock_lo();
    }

    fn i2c_stop(&mut self) {
        self.i2c_data_lo();
        self.i2c_clock_hi();
        self.i2c_data_hi();
    }

    fn i2c_get_ack(&mut self) -> bool {
        self.i2c_clock_hi();
        let ack = self.bus.inb(0) & i2c::SDA;
        self.i2c_clock_lo();
        if ack != 0 {
            warn!("a2d: no I2C acknowledge from board");
        }
        ack == 0
    }

    fn i2c_put_ack(&mut self) {
        self.i2c_data_lo();
        self.i2c_clock_hi();
        self.i2c_clock_lo();
        self.i2c_data_hi();
    }

    fn i2c_put_no_ack(&mut self) {
        self.i2c_data_hi();
        self.i2c_clock_hi();
        self.i2c_clock_lo();
    }

    fn i2c_get_byte(&mut self) -> u8 {
        let mut byte = 0;
        for _ in 0..8 {
            self.i2c_clock_hi();
            byte = (byte << 1) | (self.bus.inb(0) & i2c::SDA);
            self.i2c_clock_lo();
        }
        byte
    }

    fn i2c_put_byte(&mut self, mut byte: u8) -> bool {
        for _ in 0..8 {
            if byte & 0x80 != 0 {
                self.i2c_data_hi();
            } else {
                self.i2c_data_lo();
            }
            self.i2c_clock_hi();
            self.i2c_clock_lo();
            byte <<= 1;
        }
        self.i2c_get_ack()
    }

    /// Read the on-board LM92 over I2C. Returns sixteenths of a degree C.
    pub fn temperature(&mut self) -> i16 {
        self.select(IoTarget::ChipData);
        self.i2c_start();

        let mut b0 = 0;
        let mut b1 = 0;
        if self.i2c_put_byte((i2c::LM92_ADDR << 1) | 1) {
            b0 = self.i2c_get_byte();
            self.i2c_put_ack();
            b1 = self.i2c_get_byte();
            self.i2c_put_no_ack();
        }
        self.i2c_stop();
        self.select(IoTarget::Fifo);

        (((b0 as u16) << 8 | b1 as u16) as i16) >> 3
    }
}
