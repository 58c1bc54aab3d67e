// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! The acquisition engine proper.
//!
//! Life cycle: `new -> configured -> running <-> resetting -> stopped`.
//! Startup programs the card (gain DACs, polarity latch, coefficient
//! download), then synchronizes the conversion clocks to a 1 PPS edge in
//! two phases serviced from the 100 Hz IRIG callback. While running, the
//! poll callback polices the hardware FIFO level, drains it into the FIFO
//! ring, and schedules the bottom half; any unexpected level forces a
//! reset, and five consecutive failed resets latch an I/O error.

use alloc::boxed::Box;
use alloc::vec::Vec;

use log::{error, info, warn};
use tock_cells::optional_cell::OptionalCell;

use ncar_a2d::registers::{COEF_BLOCK_WORDS, HW_FIFO_DEPTH, NUM_CHANNELS};
use ncar_a2d::{A2dCard, CardVariant};
use nidas_core::collections::SampleRing;
use nidas_core::hil::bus::IsaBus;
use nidas_core::sample::{FifoSample, OutputSample};
use nidas_core::time::{scan_delta_usecs, ClockRate, USECS_PER_SEC};
use nidas_core::worker::WorkScheduler;
use nidas_core::{ErrorCode, PollFlags, Timetag};
use short_filters::ShortFilter;

use crate::config::{cal_volt_within_range, A2dConfig, A2dStatus, CalConfig, SampleConfig};
use crate::ReadClient;

/// The card buffers scans ahead of the FIFO, so the scans drained by a
/// poll are older than the poll's own FIFO arithmetic suggests. Timetags
/// are backed up by this many extra scan periods. The value was calibrated
/// empirically against a PPS edge sampled on channel 0 at 500 Hz scans; it
/// is a constant on purpose, not something derived. The timetag tests
/// below pin the resulting arithmetic.
pub const SCAN_OFFSET_DELAY: i64 = 3;

/// Stream id carried by on-board temperature samples, the first index past
/// the per-channel range.
pub const TEMPERATURE_SAMPLE_INDEX: u16 = NUM_CHANNELS as u16;

/// Ring capacity ceilings; both powers of two.
const FIFO_RING_MAX: usize = 128;
const OUT_RING_MAX: usize = 2048;

/// Consecutive reset failures before the engine latches an I/O error.
const MAX_RESET_FAILURES: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SyncPhase {
    /// Searching for the first PPS edge to align the startup sequence.
    WaitPps1 { deadline: Timetag },
    /// Converters armed and the FIFO cleared; waiting for the edge that
    /// releases the scan clocks.
    WaitPps2 { deadline: Timetag },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    New,
    Configured,
    Starting(SyncPhase),
    Running,
    Resetting(SyncPhase),
    Stopped,
}

struct Stream {
    filter: Box<dyn ShortFilter>,
    rate: u32,
}

pub struct Engine<'a, B: IsaBus> {
    card: A2dCard<B>,
    state: State,
    error_state: Option<ErrorCode>,

    config: Option<A2dConfig>,
    streams: Vec<Stream>,
    gains: [u8; NUM_CHANNELS],
    bipolar: [bool; NUM_CHANNELS],
    coef_block: Option<Vec<u16>>,
    cal: CalConfig,

    // Derived at start.
    scan_dt: i64,
    poll_rate: Option<ClockRate>,
    nfifo_values: usize,
    /// Initial poll ticks skipped after synchronization, so the first
    /// serviced poll never catches a FIFO mid-scan.
    first_poll_delay: u32,
    polls_to_skip: u32,
    discard_next_scan: bool,

    fifo_ring: SampleRing<FifoSample>,
    out_ring: SampleRing<OutputSample>,
    toss: OutputSample,
    latency_usecs: i64,
    last_wakeup: Timetag,

    read_client: OptionalCell<&'a dyn ReadClient>,
    scheduler: OptionalCell<&'a dyn WorkScheduler>,

    cur_status: A2dStatus,
    prev_status: A2dStatus,
    skipped: u32,
    resets: u32,
    reset_failures: u32,
    read_ctr: u32,

    temp_rate: Option<ClockRate>,
    current_temp: i16,
}

impl<'a, B: IsaBus> Engine<'a, B> {
    pub fn new(card: A2dCard<B>) -> Engine<'a, B> {
        Engine {
            card,
            state: State::New,
            error_state: None,
            config: None,
            streams: Vec::new(),
            gains: [0; NUM_CHANNELS],
            bipolar: [true; NUM_CHANNELS],
            coef_block: None,
            cal: CalConfig::default(),
            scan_dt: 0,
            poll_rate: None,
            nfifo_values: 0,
            first_poll_delay: 1,
            polls_to_skip: 0,
            discard_next_scan: false,
            fifo_ring: SampleRing::new_with(1, || FifoSample::with_capacity(0)),
            out_ring: SampleRing::new_with(1, || OutputSample::with_capacity(0)),
            toss: OutputSample::with_capacity(NUM_CHANNELS + 1),
            latency_usecs: USECS_PER_SEC / 10,
            last_wakeup: 0,
            read_client: OptionalCell::empty(),
            scheduler: OptionalCell::empty(),
            cur_status: A2dStatus::default(),
            prev_status: A2dStatus::default(),
            skipped: 0,
            resets: 0,
            reset_failures: 0,
            read_ctr: 0,
            temp_rate: None,
            current_temp: 0,
        }
    }

    pub fn set_read_client(&self, client: &'a dyn ReadClient) {
        self.read_client.set(client);
    }

    pub fn set_work_scheduler(&self, scheduler: &'a dyn WorkScheduler) {
        self.scheduler.set(scheduler);
    }

    pub fn variant(&self) -> CardVariant {
        self.card.variant()
    }

    /// Poll callback rate while running, for the board to register.
    pub fn poll_rate(&self) -> Option<ClockRate> {
        self.poll_rate
    }

    pub fn is_running(&self) -> bool {
        self.state == State::Running
    }

    // Configuration operations. All are rejected while acquisition runs.

    /// Set the global scan rate and latency window.
    pub fn configure(&mut self, cfg: A2dConfig) -> Result<(), ErrorCode> {
        if self.busy() {
            warn!("a2d: card is running, can't configure");
            return Err(ErrorCode::BUSY);
        }
        if cfg.scan_rate == 0
            || cfg.scan_rate > 5000
            || USECS_PER_SEC % cfg.scan_rate as i64 != 0
        {
            return Err(ErrorCode::INVAL);
        }
        if pick_poll_rate(cfg.scan_rate).is_none() {
            return Err(ErrorCode::INVAL);
        }
        self.scan_dt = scan_delta_usecs(cfg.scan_rate);
        self.latency_usecs = if cfg.latency_usecs > 0 {
            cfg.latency_usecs
        } else {
            USECS_PER_SEC / 10
        };
        self.config = Some(cfg);
        self.state = State::Configured;
        Ok(())
    }

    /// Append one output sample stream.
    pub fn add_sample(&mut self, cfg: SampleConfig) -> Result<(), ErrorCode> {
        if self.busy() {
            warn!("a2d: card is running, can't configure");
            return Err(ErrorCode::BUSY);
        }
        let global = self.config.as_ref().ok_or(ErrorCode::INVAL)?;
        let scan_rate = global.scan_rate;

        if cfg.rate == 0 || scan_rate % cfg.rate != 0 {
            error!(
                "a2d: scan rate {} is not a multiple of rate {} for sample {}",
                scan_rate, cfg.rate, cfg.index
            );
            return Err(ErrorCode::INVAL);
        }
        if cfg.channels.is_empty()
            || cfg.channels.len() != cfg.gains.len()
            || cfg.channels.len() != cfg.bipolar.len()
        {
            return Err(ErrorCode::INVAL);
        }
        for &ch in cfg.channels.iter() {
            if ch >= self.card.variant().usable_channels() {
                return Err(ErrorCode::INVAL);
            }
        }

        let decimation = (scan_rate / cfg.rate) as usize;
        let data = if cfg.filter_data.is_empty() {
            None
        } else {
            Some(cfg.filter_data.as_slice())
        };
        let filter = short_filters::make(cfg.filter, cfg.index, decimation, &cfg.channels, data)?;

        for (i, &ch) in cfg.channels.iter().enumerate() {
            self.gains[ch] = cfg.gains[i];
            self.bipolar[ch] = cfg.bipolar[i];
        }
        self.streams.push(Stream {
            filter,
            rate: cfg.rate,
        });
        Ok(())
    }

    /// Cache the converter coefficient block for the next start.
    pub fn set_coefficients(&mut self, block: &[u16]) -> Result<(), ErrorCode> {
        if self.busy() {
            return Err(ErrorCode::BUSY);
        }
        if block.len() != COEF_BLOCK_WORDS {
            return Err(ErrorCode::INVAL);
        }
        self.coef_block = Some(block.into());
        Ok(())
    }

    /// Temperature sampling rate, at most 10 Hz. `None` disables it.
    pub fn set_temp_rate(&mut self, rate: Option<ClockRate>) -> Result<(), ErrorCode> {
        if let Some(r) = rate {
            if r.hz() > 10 {
                warn!("a2d: illegal rate for temperature probe (> 10 Hz)");
                return Err(ErrorCode::INVAL);
            }
        }
        self.temp_rate = rate;
        Ok(())
    }

    pub fn temp_rate(&self) -> Option<ClockRate> {
        self.temp_rate
    }

    fn busy(&self) -> bool {
        matches!(
            self.state,
            State::Running | State::Starting(_) | State::Resetting(_)
        )
    }

    /// Switch channels onto the calibration voltage source. Only legal
    /// while running.
    pub fn set_cal(&mut self, cfg: CalConfig) -> Result<(), ErrorCode> {
        if self.state != State::Running {
            return Err(ErrorCode::AGAIN);
        }
        self.cal = cfg;
        self.card.unset_vcal();

        let mut any_enabled = false;
        let mut calset = [false; NUM_CHANNELS];
        for ch in 0..NUM_CHANNELS {
            let wanted = self.cal.calset[ch] && self.cal.state;
            let legal =
                cal_volt_within_range(self.cal.vcal, self.gains[ch], self.bipolar[ch]);
            calset[ch] = wanted && legal;
            any_enabled |= calset[ch];
        }
        self.card.set_cal(&self.bipolar, &calset);

        if !any_enabled {
            info!("a2d: all cal channels and the vcal generator are off");
            return Ok(());
        }
        self.card.set_vcal(self.cal.vcal)
    }

    /// Program the card and begin acquisition. The hardware programming
    /// runs synchronously; PPS synchronization continues in the 100 Hz
    /// callback, and the first samples appear once it completes.
    pub fn start(&mut self, now: Timetag) -> Result<(), ErrorCode> {
        if self.busy() {
            return Err(ErrorCode::BUSY);
        }
        let cfg = self.config.as_ref().ok_or(ErrorCode::INVAL)?;
        if self.streams.is_empty() {
            return Err(ErrorCode::INVAL);
        }
        let scan_rate = cfg.scan_rate;

        let poll_rate = pick_poll_rate(scan_rate).ok_or(ErrorCode::INVAL)?;
        let nscans_per_poll = (scan_rate / poll_rate.hz()) as usize;
        self.poll_rate = Some(poll_rate);
        self.nfifo_values = nscans_per_poll * NUM_CHANNELS;
        self.first_poll_delay = 1;

        info!(
            "a2d: poll rate {} Hz, {} FIFO values per poll, first poll delay {}",
            poll_rate.hz(),
            self.nfifo_values,
            self.first_poll_delay
        );

        // Ring sizes cover two seconds of data, next power of two, capped.
        let nfifo_slots = (2 * poll_rate.hz() as usize)
            .next_power_of_two()
            .clamp(4, FIFO_RING_MAX);
        let total_rate: u32 = self.streams.iter().map(|s| s.rate).sum();
        let nout_slots = (2 * total_rate as usize)
            .next_power_of_two()
            .clamp(4, OUT_RING_MAX);
        let nfifo_values = self.nfifo_values;
        self.fifo_ring =
            SampleRing::new_with(nfifo_slots, || FifoSample::with_capacity(nfifo_values));
        self.out_ring =
            SampleRing::new_with(nout_slots, || OutputSample::with_capacity(NUM_CHANNELS + 1));

        self.cur_status = A2dStatus::default();
        self.prev_status = A2dStatus::default();
        self.skipped = 0;
        self.resets = 0;
        self.reset_failures = 0;
        self.read_ctr = 0;
        self.error_state = None;
        self.last_wakeup = now;

        // An explicit master converter drives the card's interrupt line;
        // use the first channel in service.
        let master = (0..self.card.variant().usable_channels())
            .find(|&ch| self.gains[ch] > 0)
            .ok_or(ErrorCode::IO)?;
        self.card.set_master(master)?;

        // Hold the scan clocks and soft-reset every converter before
        // touching the DACs.
        self.card.set_sync();
        self.card.stop_all_chips();

        self.card.set_gains_and_offset(&self.gains, &self.bipolar)?;

        // From a cold boot the converters need to run briefly before they
        // will take a configuration download.
        self.card.clear_sync();
        self.card.start_all_chips()?;
        self.card.bus().delay_us(20_000);
        self.card.stop_all_chips();
        self.card.clear_fifo();

        let block = self.coef_block.as_ref().ok_or(ErrorCode::INVAL)?;
        if let Err(e) = self.card.configure_all_chips(block) {
            error!("a2d: converter configuration failed");
            return Err(e);
        }
        self.card.stop_all_chips();

        self.begin_sync(now, false);
        Ok(())
    }

    /// Stop acquisition, cancel callbacks, drain state. Never fails.
    pub fn stop(&mut self) {
        if self.state == State::New {
            return;
        }
        self.card.clear_auto();
        self.card.stop_all_chips();

        for ch in 0..NUM_CHANNELS {
            self.cur_status.goodval[ch] = if self.gains[ch] > 0 {
                self.card.chip_status(ch)
            } else {
                0
            };
        }

        self.streams.clear();
        self.gains = [0; NUM_CHANNELS];
        self.fifo_ring.clear();
        self.out_ring.clear();
        self.state = State::Stopped;

        // Blocked readers observe the hangup.
        self.read_client.map(|c| c.samples_ready());
    }

    fn begin_sync(&mut self, now: Timetag, resetting: bool) {
        self.fifo_ring.clear();
        self.out_ring.clear();

        let deadline =
            now + self.card.variant().pps_deadline_secs() as i64 * USECS_PER_SEC;
        let phase = SyncPhase::WaitPps1 { deadline };
        self.state = if resetting {
            State::Resetting(phase)
        } else {
            State::Starting(phase)
        };
    }

    /// Trigger the reset path, from a FIFO fault or an external request.
    fn begin_reset(&mut self, now: Timetag) {
        self.resets += 1;
        self.cur_status.resets = self.resets;
        self.begin_sync(now, true);
    }

    /// 100 Hz IRIG callback: services the PPS phases.
    pub fn hundred_hz_tick(&mut self, now: Timetag) {
        let phase = match self.state {
            State::Starting(p) | State::Resetting(p) => p,
            _ => return,
        };
        match phase {
            SyncPhase::WaitPps1 { deadline } => {
                if self.card.pps_visible() {
                    self.arm_converters(now);
                } else if now >= deadline {
                    error!("a2d: PPS not found");
                    self.sync_failed(now);
                }
            }
            SyncPhase::WaitPps2 { deadline } => {
                if self.card.pps_visible() {
                    self.sync_complete();
                } else if now >= deadline {
                    error!("a2d: PPS not found");
                    self.sync_failed(now);
                }
            }
        }
    }

    /// First PPS edge found: restart the converters against it and arm the
    /// hardware to release the scan clocks on the next edge.
    fn arm_converters(&mut self, now: Timetag) {
        self.card.stop_all_chips();
        if let Err(e) = self.card.start_all_chips() {
            error!("a2d: converters would not start: {:?}", e);
            self.sync_failed(now);
            return;
        }
        self.card.set_sync(); // hold the scan clocks
        self.card.set_auto();
        self.card.clear_fifo();
        self.card.bus().delay_us(20_000);
        self.card.enable_pps(); // next edge clears SYNC

        let deadline =
            now + self.card.variant().pps_deadline_secs() as i64 * USECS_PER_SEC;
        let phase = SyncPhase::WaitPps2 { deadline };
        self.state = match self.state {
            State::Resetting(_) => State::Resetting(phase),
            _ => State::Starting(phase),
        };
    }

    fn sync_complete(&mut self) {
        self.discard_next_scan = true;
        self.polls_to_skip = self.first_poll_delay;
        self.read_ctr = 0;
        self.reset_failures = 0;
        self.cur_status.ser_num = self.card.serial_number();
        match self.state {
            State::Resetting(_) => info!("a2d: reset succeeded"),
            _ => info!("a2d: acquisition started, serial number {}", self.cur_status.ser_num),
        }
        self.state = State::Running;
    }

    fn sync_failed(&mut self, now: Timetag) {
        self.reset_failures += 1;
        if self.reset_failures >= MAX_RESET_FAILURES {
            error!(
                "a2d: {} consecutive reset failures, giving up",
                self.reset_failures
            );
            self.error_state = Some(ErrorCode::IO);
            self.state = State::Stopped;
            self.read_client.map(|c| c.samples_ready());
            return;
        }
        warn!(
            "a2d: restarting synchronization, attempt {}",
            self.reset_failures + 1
        );
        let resetting = matches!(self.state, State::Resetting(_));
        self.begin_sync(now, resetting);
    }

    /// Poll callback, dispatched at the poll rate from soft-interrupt
    /// context. Drains one FIFO sample and schedules the bottom half.
    pub fn poll_tick(&mut self, now: Timetag) {
        if self.state != State::Running {
            return;
        }
        if self.polls_to_skip > 0 {
            self.polls_to_skip -= 1;
            return;
        }

        if self.discard_next_scan {
            // The backlog from the skipped polls may end in a partial
            // scan; drop all of it so level policing starts clean.
            self.discard_whole_fifo();
            self.discard_next_scan = false;
            return;
        }

        let level = self.card.fifo_level();
        self.cur_status.pre_fifo_level[level] += 1;

        let ok = if self.card.variant().tolerant_fifo_band() {
            level >= 1 && level <= 3
        } else {
            level == 1
        };
        if !ok {
            self.cur_status.bad_fifo_level += 1;
            error!(
                "a2d: restarting acquisition due to bad FIFO level {}",
                level
            );
            self.begin_reset(now);
            return;
        }

        let nfifo = self.nfifo_values;
        match self.fifo_ring.head_slot() {
            None => {
                self.card.discard_fifo(nfifo);
                self.skipped += (nfifo / NUM_CHANNELS) as u32;
                self.cur_status.skipped_samples = self.skipped;
                if self.skipped % 100 == 0 {
                    warn!("a2d: skipped samples {}", self.skipped);
                }
            }
            Some(slot) => {
                slot.timetag = now;
                slot.len = nfifo;
                self.card.read_fifo(&mut slot.data[..nfifo]);
                self.fifo_ring.publish();
                self.scheduler.map(|s| s.schedule());
            }
        }

        self.read_ctr += 1;
        let polls_per_snapshot = self.poll_rate.map(|r| r.hz() * 10).unwrap_or(200);
        if self.read_ctr % polls_per_snapshot == 0 {
            self.cur_status.skipped_samples = self.skipped;
            self.cur_status.resets = self.resets;
            self.prev_status = self.cur_status;
            self.cur_status = A2dStatus {
                ser_num: self.prev_status.ser_num,
                ..A2dStatus::default()
            };
        }
    }

    fn discard_whole_fifo(&mut self) {
        // Bounded by the hardware depth; each pass drops one scan.
        for _ in 0..(HW_FIFO_DEPTH / NUM_CHANNELS) {
            if self.card.fifo_level() == 0 {
                break;
            }
            self.card.discard_fifo(NUM_CHANNELS);
        }
    }

    /// Bottom half: filter every queued FIFO sample and wake readers.
    pub fn run_worker(&mut self, now: Timetag) {
        while let Some(samp) = self.fifo_ring.tail_slot() {
            let nscans = samp.len / NUM_CHANNELS;
            // Scans in this drain began (nscans + offset) scan periods
            // before the drain's own timetag.
            let tt0 = samp.timetag - (nscans as i64 + SCAN_OFFSET_DELAY) * self.scan_dt;

            for k in 0..nscans {
                let tt = tt0 + k as i64 * self.scan_dt;
                let scan = &samp.data[k * NUM_CHANNELS..(k + 1) * NUM_CHANNELS];
                for stream in self.streams.iter_mut() {
                    match self.out_ring.head_slot() {
                        None => {
                            // Keep the filter state moving even though the
                            // output has nowhere to go.
                            self.skipped += 1;
                            self.cur_status.skipped_samples = self.skipped;
                            if self.skipped % 5000 == 0 {
                                warn!("a2d: skipped samples {}", self.skipped);
                            }
                            stream.filter.filter(tt, scan, &mut self.toss);
                        }
                        Some(out) => {
                            if stream.filter.filter(tt, scan, out) {
                                self.out_ring.publish();
                            }
                        }
                    }
                }
            }
            self.fifo_ring.consume();

            // Wake a waiting reader when the latency window has elapsed,
            // or earlier if the output ring is filling.
            if !self.out_ring.is_empty()
                && (now - self.last_wakeup > self.latency_usecs
                    || self.out_ring.space() < self.out_ring.capacity() / 2)
            {
                self.read_client.map(|c| c.samples_ready());
                self.last_wakeup = now;
            }
        }
    }

    /// Temperature callback at the configured rate: queue an on-board
    /// temperature sample under the reserved stream id.
    pub fn temp_tick(&mut self, now: Timetag) {
        if self.state != State::Running {
            return;
        }
        self.current_temp = self.card.temperature();
        match self.out_ring.head_slot() {
            None => {
                self.skipped += 1;
                self.cur_status.skipped_samples = self.skipped;
            }
            Some(out) => {
                out.timetag = now;
                out.id = TEMPERATURE_SAMPLE_INDEX;
                out.data[0] = self.current_temp;
                out.len = 1;
                self.out_ring.publish();
                self.read_client.map(|c| c.samples_ready());
            }
        }
    }

    /// Latest on-board temperature, sixteenths of a degree C.
    pub fn get_temp(&self) -> i16 {
        self.current_temp
    }

    /// Transitions into the resetting state since start.
    pub fn resets(&self) -> u32 {
        self.resets
    }

    /// Snapshot of the engine counters from the last 10 second interval.
    pub fn get_status(&self) -> A2dStatus {
        self.prev_status
    }

    /// Poll readiness, the way the character device surfaces it.
    pub fn poll_flags(&self) -> PollFlags {
        let mut flags = PollFlags::empty();
        if self.error_state.is_some() || matches!(self.state, State::Resetting(_)) {
            flags |= PollFlags::ERR;
        }
        if self.state == State::Stopped && self.error_state.is_none() {
            flags |= PollFlags::HUP;
        }
        if !self.out_ring.is_empty() {
            flags |= PollFlags::IN;
        }
        flags
    }

    /// Non-blocking read: copy out as many whole output samples as fit.
    ///
    /// Samples are never split across reads. An empty ring is `AGAIN`; a
    /// buffer that cannot hold even one sample is `INVAL`; a latched
    /// engine error is `IO`; a stopped engine reads as end of stream
    /// (`Ok(0)`).
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, ErrorCode> {
        if let Some(_err) = self.error_state {
            return Err(ErrorCode::IO);
        }
        if self.state == State::Stopped {
            return Ok(0);
        }

        let mut filled = 0;
        while let Some(samp) = self.out_ring.tail_slot() {
            let n = samp.wire_len();
            if n > buf.len() - filled {
                if filled == 0 && n > buf.len() {
                    return Err(ErrorCode::INVAL);
                }
                break;
            }
            samp.encode_le(&mut buf[filled..filled + n]);
            filled += n;
            self.out_ring.consume();
        }
        if filled == 0 {
            return Err(ErrorCode::AGAIN);
        }
        Ok(filled)
    }
}

/// Poll rates the IRIG driver can dispatch, smallest that keeps each drain
/// under a quarter of the hardware FIFO and still divides the scan rate.
fn pick_poll_rate(scan_rate: u32) -> Option<ClockRate> {
    const LADDER: [u32; 5] = [10, 20, 25, 50, 100];
    let words_per_sec = scan_rate * NUM_CHANNELS as u32;
    let floor = words_per_sec / (HW_FIFO_DEPTH as u32 / 4);
    LADDER
        .iter()
        .copied()
        .find(|&hz| hz >= floor && scan_rate % hz == 0)
        .and_then(ClockRate::from_hz)
}
