// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! An emulated A/D card for boards and tests without the ISA hardware.
//!
//! The model covers what the driver's protocol actually exercises: target
//! selection through the command register, per-converter instruction echo
//! and the coefficient handshake, the gain and calibration DACs, the FIFO
//! with its level bits, the SYNC/PPS interplay, and the LM92 behind the
//! bit-banged I2C lines. Faults can be injected per converter to drive the
//! retry and reset paths.

use core::cell::RefCell;

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use nidas_core::hil::bus::IsaBus;

use crate::registers::{
    fifoctl, i2c, instr, instr_echo_bits, IoTarget, CHIP_COEF_WORDS, HW_FIFO_DEPTH, NUM_CHANNELS,
    READ_SELECT,
};

#[derive(Default)]
struct Chip {
    configured: bool,
    config_mode: bool,
    coef_count: usize,
    coefs_seen: Vec<u16>,
    running: bool,
    last_echo: u16,
    /// Instructions to swallow without latching the echo.
    echo_fail_budget: u8,
    /// Raise CRCERR once this many coefficients have been accepted.
    fail_crc_at: Option<usize>,
    fail_id: bool,
    /// Extra interrupt-line reads required before the ready bit shows.
    int_delay: u8,
    int_countdown: u8,
    int_pending: bool,
}

impl Chip {
    fn status(&self) -> u16 {
        let mut st: u16 = 0x8000; // INSTBSY
        if self.running {
            st |= 0x4000; // DATARDY
        }
        if self.config_mode {
            st |= 0x2000; // DATAREQ
        }
        if self.fail_id {
            st |= 0x1000;
        }
        if let Some(at) = self.fail_crc_at {
            if self.coef_count > at {
                st |= 0x0800;
            }
        }
        if self.configured && !self.config_mode {
            st |= 0x0001; // CFGEND
        }
        st | self.last_echo
    }

    fn instruction(&mut self, word: u16) {
        if self.echo_fail_budget > 0 {
            self.echo_fail_budget -= 1;
            return;
        }
        self.last_echo = instr_echo_bits(word);
        match word {
            instr::ABORT => {
                self.running = false;
                self.config_mode = false;
            }
            instr::READDATA => {
                self.running = true;
            }
            instr::WRCONFIG => {
                self.config_mode = true;
                self.configured = false;
                self.coef_count = 0;
                self.coefs_seen.clear();
                self.arm_interrupt();
            }
            _ => {}
        }
    }

    fn arm_interrupt(&mut self) {
        self.int_pending = true;
        self.int_countdown = self.int_delay;
    }

    fn coefficient(&mut self, word: u16) {
        self.coefs_seen.push(word);
        self.coef_count += 1;
        if self.coef_count == CHIP_COEF_WORDS {
            self.config_mode = false;
            self.configured = true;
        }
        self.arm_interrupt();
    }

    fn interrupt_line(&mut self) -> bool {
        if !self.int_pending {
            return false;
        }
        if self.int_countdown > 0 {
            self.int_countdown -= 1;
            return false;
        }
        true
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum I2cState {
    Idle,
    RxByte { byte: u8, nbits: u8 },
    AckOut,
    TxByte { byte: u8, nbits: u8 },
    AckIn,
}

struct I2cSlave {
    state: I2cState,
    scl: bool,
    sda_master: bool,
    /// Line the slave drives; true is released (pulled high).
    sda_slave: bool,
    tx: [u8; 2],
    tx_idx: usize,
    /// LM92 temperature register contents.
    reg: u16,
}

impl I2cSlave {
    fn new() -> I2cSlave {
        I2cSlave {
            state: I2cState::Idle,
            scl: true,
            sda_master: true,
            sda_slave: true,
            tx: [0, 0],
            tx_idx: 0,
            reg: 0,
        }
    }

    fn sda(&self) -> bool {
        // Open drain wired-AND.
        self.sda_master && self.sda_slave
    }

    fn lines_written(&mut self, byte: u8) {
        let scl = byte & i2c::SCL != 0;
        let sda = byte & i2c::SDA != 0;

        if self.scl && scl {
            if self.sda_master && !sda {
                // Start: data falls while clock is high.
                self.state = I2cState::RxByte { byte: 0, nbits: 0 };
                self.sda_slave = true;
            } else if !self.sda_master && sda {
                // Stop: data rises while clock is high.
                self.state = I2cState::Idle;
                self.sda_slave = true;
            }
        } else if !self.scl && scl {
            self.rising_edge(sda);
        }

        self.scl = scl;
        self.sda_master = sda;
    }

    fn rising_edge(&mut self, sda: bool) {
        match self.state {
            I2cState::Idle => {}
            I2cState::RxByte { byte, nbits } => {
                let byte = (byte << 1) | sda as u8;
                if nbits == 7 {
                    if byte == (i2c::LM92_ADDR << 1) | 1 {
                        self.tx = self.reg.to_be_bytes();
                        self.tx_idx = 0;
                        self.state = I2cState::AckOut;
                    } else {
                        // Not addressed; leave the line alone.
                        self.state = I2cState::Idle;
                    }
                } else {
                    self.state = I2cState::RxByte {
                        byte,
                        nbits: nbits + 1,
                    };
                }
            }
            I2cState::AckOut => {
                // This is the acknowledge clock; drive low through it.
                self.sda_slave = false;
                self.state = I2cState::TxByte {
                    byte: self.tx[self.tx_idx],
                    nbits: 0,
                };
            }
            I2cState::TxByte { byte, nbits } => {
                self.sda_slave = byte & 0x80 != 0;
                if nbits == 7 {
                    self.state = I2cState::AckIn;
                } else {
                    self.state = I2cState::TxByte {
                        byte: byte << 1,
                        nbits: nbits + 1,
                    };
                }
            }
            I2cState::AckIn => {
                self.sda_slave = true;
                if !sda && self.tx_idx + 1 < self.tx.len() {
                    // Master acknowledged; present the next byte.
                    self.tx_idx += 1;
                    self.state = I2cState::TxByte {
                        byte: self.tx[self.tx_idx],
                        nbits: 0,
                    };
                    // The first bit goes out on the next rising edge; keep
                    // the handler above responsible for it.
                } else {
                    self.state = I2cState::Idle;
                }
            }
        }
    }
}

struct Inner {
    cmd_offset: usize,
    target: u8,
    chips: [Chip; NUM_CHANNELS],
    fifo: VecDeque<u16>,
    overflowed: bool,
    serial: u16,
    auto: bool,
    sync_stopped: bool,
    pps_enabled: bool,
    pps_visible: bool,
    fifoctl_shadow: u8,
    fifo_clears: usize,
    master: Option<u8>,
    offcal: u16,
    vcal_code: u16,
    gain_writes: Vec<u16>,
    i2c: I2cSlave,
    channel_values: [i16; NUM_CHANNELS],
    delay_usecs: u64,
}

impl Inner {
    fn chip_for_offset(&mut self, offset: usize) -> &mut Chip {
        &mut self.chips[(offset / 2) % NUM_CHANNELS]
    }

    fn board_status(&self) -> u16 {
        let len = self.fifo.len();
        let mut st = self.serial << 6;
        if len >= HW_FIFO_DEPTH / 2 {
            st |= 0x01; // half full
        }
        if len <= HW_FIFO_DEPTH / 4 || len >= 3 * HW_FIFO_DEPTH / 4 {
            st |= 0x02; // almost full or almost empty
        }
        if len > 0 {
            st |= 0x04; // not empty
        }
        if len < HW_FIFO_DEPTH && !self.overflowed {
            st |= 0x08; // not full
        }
        if !self.pps_visible {
            st |= 0x10; // inverted 1 PPS
        }
        st
    }

    fn fifoctl_written(&mut self, byte: u8) {
        let prev = self.fifoctl_shadow;
        self.fifoctl_shadow = byte;
        self.auto = byte & fifoctl::AUTO != 0;
        if byte & fifoctl::SYNCCK != 0 {
            self.sync_stopped = byte & fifoctl::SYNC != 0;
        }
        if byte & fifoctl::PPS_ENABLE != 0 {
            self.pps_enabled = true;
        }
        if prev & fifoctl::FIFOCLR == 0 && byte & fifoctl::FIFOCLR != 0 {
            self.fifo.clear();
            self.overflowed = false;
            self.fifo_clears += 1;
        }
    }
}

/// The emulated card. Implements [`IsaBus`]; construct an
/// [`A2dCard`](crate::A2dCard) over `&EmulatedCard` and keep the original
/// to script scans and faults.
pub struct EmulatedCard {
    inner: RefCell<Inner>,
}

impl EmulatedCard {
    pub fn new(variant: crate::CardVariant) -> EmulatedCard {
        EmulatedCard {
            inner: RefCell::new(Inner {
                cmd_offset: variant.cmd_offset(),
                target: 0,
                chips: Default::default(),
                fifo: VecDeque::new(),
                overflowed: false,
                serial: 0x123,
                auto: false,
                sync_stopped: false,
                pps_enabled: false,
                pps_visible: false,
                fifoctl_shadow: 0,
                fifo_clears: 0,
                master: None,
                offcal: 0,
                vcal_code: 0,
                gain_writes: Vec::new(),
                i2c: I2cSlave::new(),
                channel_values: [0; NUM_CHANNELS],
                delay_usecs: 0,
            }),
        }
    }

    // Scripting interface for boards and tests.

    pub fn set_serial(&self, serial: u16) {
        self.inner.borrow_mut().serial = serial;
    }

    pub fn set_pps_visible(&self, visible: bool) {
        let mut inner = self.inner.borrow_mut();
        inner.pps_visible = visible;
        if visible && inner.pps_enabled && inner.sync_stopped {
            // The enabled PPS edge releases the converters.
            inner.sync_stopped = false;
        }
    }

    pub fn set_channel_values(&self, values: [i16; NUM_CHANNELS]) {
        self.inner.borrow_mut().channel_values = values;
    }

    /// Push one scan of the given engineering values. The card presents
    /// negated counts, so the driver's polarity flip restores `values`.
    pub fn produce_scan(&self, values: &[i16; NUM_CHANNELS]) {
        let mut inner = self.inner.borrow_mut();
        if !inner.auto || inner.sync_stopped {
            return;
        }
        for &v in values.iter() {
            if inner.fifo.len() >= HW_FIFO_DEPTH {
                inner.overflowed = true;
                return;
            }
            inner.fifo.push_back(v.wrapping_neg() as u16);
        }
    }

    /// Push `nscans` scans of the stored per-channel values.
    pub fn produce_scans(&self, nscans: usize) {
        for _ in 0..nscans {
            let values = self.inner.borrow().channel_values;
            self.produce_scan(&values);
        }
    }

    /// LM92 register contents, in units of 1/16 degC.
    pub fn set_temperature_c16(&self, sixteenths: i16) {
        // The register keeps the reading in bits 15..3.
        self.inner.borrow_mut().i2c.reg = (sixteenths as u16) << 3;
    }

    pub fn fail_instruction_echo(&self, channel: usize, count: u8) {
        self.inner.borrow_mut().chips[channel].echo_fail_budget = count;
    }

    pub fn fail_crc_at(&self, channel: usize, coef_index: usize) {
        self.inner.borrow_mut().chips[channel].fail_crc_at = Some(coef_index);
    }

    pub fn set_interrupt_delay(&self, channel: usize, reads: u8) {
        self.inner.borrow_mut().chips[channel].int_delay = reads;
    }

    // Observation points.

    pub fn fifo_len(&self) -> usize {
        self.inner.borrow().fifo.len()
    }

    pub fn auto_running(&self) -> bool {
        let inner = self.inner.borrow();
        inner.auto && !inner.sync_stopped
    }

    pub fn sync_stopped(&self) -> bool {
        self.inner.borrow().sync_stopped
    }

    pub fn pps_enabled(&self) -> bool {
        self.inner.borrow().pps_enabled
    }

    pub fn fifo_clears(&self) -> usize {
        self.inner.borrow().fifo_clears
    }

    pub fn master(&self) -> Option<u8> {
        self.inner.borrow().master
    }

    pub fn offcal(&self) -> u16 {
        self.inner.borrow().offcal
    }

    pub fn vcal_code(&self) -> u16 {
        self.inner.borrow().vcal_code
    }

    pub fn gain_writes(&self) -> Vec<u16> {
        self.inner.borrow().gain_writes.clone()
    }

    pub fn chip_configured(&self, channel: usize) -> bool {
        self.inner.borrow().chips[channel].configured
    }

    pub fn chip_running(&self, channel: usize) -> bool {
        self.inner.borrow().chips[channel].running
    }

    pub fn chip_coefs(&self, channel: usize) -> Vec<u16> {
        self.inner.borrow().chips[channel].coefs_seen.clone()
    }

    pub fn delay_usecs(&self) -> u64 {
        self.inner.borrow().delay_usecs
    }
}

impl IsaBus for EmulatedCard {
    fn outb(&self, offset: usize, val: u8) {
        let mut inner = self.inner.borrow_mut();
        if offset == inner.cmd_offset {
            inner.target = val;
            return;
        }
        match inner.target & !READ_SELECT {
            t if t == IoTarget::Fifo as u8 => inner.fifoctl_written(val),
            t if t == IoTarget::FifoStat as u8 => inner.master = Some(val),
            t if t == IoTarget::ChipData as u8 => inner.i2c.lines_written(val),
            _ => {}
        }
    }

    fn inb(&self, _offset: usize) -> u8 {
        let mut inner = self.inner.borrow_mut();
        match inner.target & !READ_SELECT {
            t if t == IoTarget::SysCtl as u8 => {
                let mut lines = 0u8;
                for (ch, chip) in inner.chips.iter_mut().enumerate() {
                    if chip.interrupt_line() {
                        lines |= 1 << ch;
                    }
                }
                lines
            }
            t if t == IoTarget::ChipData as u8 => {
                (inner.i2c.sda() as u8) | ((inner.i2c.scl as u8) << 1)
            }
            _ => 0,
        }
    }

    fn outw(&self, offset: usize, val: u16) {
        let mut inner = self.inner.borrow_mut();
        match inner.target & !READ_SELECT {
            t if t == IoTarget::ChipCmd as u8 => inner.chip_for_offset(offset).instruction(val),
            t if t == IoTarget::D2a0 as u8 => {
                // The DAC bank doubles as the coefficient port during a
                // configuration handshake.
                let in_config = inner.chip_for_offset(offset).config_mode;
                if in_config {
                    inner.chip_for_offset(offset).coefficient(val);
                } else if offset == 0 {
                    inner.gain_writes.push(val);
                }
            }
            t if t == IoTarget::SysCtl as u8 => inner.offcal = val,
            t if t == IoTarget::D2a2 as u8 => inner.vcal_code = val,
            _ => {}
        }
    }

    fn inw(&self, offset: usize) -> u16 {
        let mut inner = self.inner.borrow_mut();
        match inner.target & !READ_SELECT {
            t if t == IoTarget::Fifo as u8 => inner.fifo.pop_front().unwrap_or(0x5555),
            t if t == IoTarget::ChipCmd as u8 => inner.chip_for_offset(offset).status(),
            t if t == IoTarget::FifoStat as u8 => inner.board_status(),
            _ => 0,
        }
    }

    fn delay_us(&self, usecs: u32) {
        self.inner.borrow_mut().delay_usecs += usecs as u64;
    }
}
