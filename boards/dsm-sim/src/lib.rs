// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! Host board: the acquisition stack wired to an emulated A/D card.
//!
//! Everything hardware-shaped is simulated against a virtual IRIG clock
//! that advances 10 ms per tick: the card produces scans at the configured
//! rate, a 1 PPS pulse fires at each virtual second, the IRIG dispatcher
//! runs registered callbacks, and the bottom half drains after them, the
//! same shape the real DSM has with its timecode card and workqueue.
//! Blocking reads wait on virtual time, so tests are deterministic.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Mutex;

use log::info;

use ncar_a2d::registers::NUM_CHANNELS;
use ncar_a2d::sim::EmulatedCard;
use ncar_a2d::{A2dCard, CardVariant};
use nidas_a2d::{A2dConfig, Engine, ReadClient, SampleConfig};
use nidas_core::hil::bus::IsaBus;
use nidas_core::hil::irig::{CallbackHandle, IrigClient, IrigClock, IrigRate};
use nidas_core::worker::WorkScheduler;
use nidas_core::{ErrorCode, Timetag};

/// One IRIG base tick, the 100 Hz callback period.
pub const TICK_USECS: i64 = 10_000;

type IrigCallback = Box<dyn IrigClient>;

struct CallbackEntry {
    rate: IrigRate,
    cb: IrigCallback,
}

/// The simulated IRIG driver: a wall clock plus rate callbacks.
///
/// The callback table is mutex protected; registration must come from the
/// owning thread and never from inside a callback.
pub struct SimIrig {
    now: Cell<Timetag>,
    tick_count: Cell<u64>,
    callbacks: Mutex<Vec<Option<CallbackEntry>>>,
}

impl SimIrig {
    pub fn new(start: Timetag) -> SimIrig {
        SimIrig {
            now: Cell::new(start),
            tick_count: Cell::new(0),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, rate: IrigRate, cb: IrigCallback) -> CallbackHandle {
        let mut table = self.callbacks.lock().unwrap();
        table.push(Some(CallbackEntry { rate, cb }));
        CallbackHandle(table.len() - 1)
    }

    pub fn unregister(&self, handle: CallbackHandle) {
        let mut table = self.callbacks.lock().unwrap();
        if let Some(slot) = table.get_mut(handle.0) {
            *slot = None;
        }
    }

    /// Advance one base tick and dispatch every callback whose rate is
    /// due. Missed dispatch never happens here; real missed interrupts
    /// are injected above this layer.
    pub fn tick(&self) {
        self.now.set(self.now.get() + TICK_USECS);
        let count = self.tick_count.get();
        self.tick_count.set(count + 1);
        let now = self.now.get();

        let mut table = self.callbacks.lock().unwrap();
        for entry in table.iter_mut().flatten() {
            let divisor = 100 / entry.rate.hz() as u64;
            if count % divisor == 0 {
                entry.cb.irig_tick(now);
            }
        }
    }
}

impl IrigClock for SimIrig {
    fn now(&self) -> Timetag {
        self.now.get()
    }
}

/// Bus handle cloning a shared emulated card.
#[derive(Clone)]
pub struct CardHandle(pub Rc<EmulatedCard>);

impl IsaBus for CardHandle {
    fn outb(&self, offset: usize, val: u8) {
        self.0.outb(offset, val)
    }

    fn inb(&self, offset: usize) -> u8 {
        self.0.inb(offset)
    }

    fn outw(&self, offset: usize, val: u16) {
        self.0.outw(offset, val)
    }

    fn inw(&self, offset: usize) -> u16 {
        self.0.inw(offset)
    }

    fn delay_us(&self, usecs: u32) {
        self.0.delay_us(usecs)
    }
}

/// Coalescing bottom-half request flag, the workqueue seam.
pub struct PendingWork {
    pending: Cell<bool>,
}

impl PendingWork {
    const fn new() -> PendingWork {
        PendingWork {
            pending: Cell::new(false),
        }
    }

    fn take(&self) -> bool {
        self.pending.replace(false)
    }
}

impl WorkScheduler for PendingWork {
    fn schedule(&self) {
        self.pending.set(true);
    }
}

/// Read wakeup flag, signalled by the engine per its latency policy.
pub struct ReadFlag {
    ready: Cell<bool>,
    wakeups: Cell<u32>,
}

impl ReadFlag {
    const fn new() -> ReadFlag {
        ReadFlag {
            ready: Cell::new(false),
            wakeups: Cell::new(0),
        }
    }

    pub fn wakeups(&self) -> u32 {
        self.wakeups.get()
    }

    /// Consume the ready flag, the condition a blocked reader waits on.
    pub fn take_ready(&self) -> bool {
        self.ready.replace(false)
    }
}

impl ReadClient for ReadFlag {
    fn samples_ready(&self) {
        self.ready.set(true);
        self.wakeups.set(self.wakeups.get() + 1);
    }
}

/// Per-scan signal source for the emulated card.
pub type SignalFn = Box<dyn FnMut(u64) -> [i16; NUM_CHANNELS]>;

/// One DSM with one A/D card.
pub struct Dsm {
    irig: Rc<SimIrig>,
    card: Rc<EmulatedCard>,
    engine: Rc<RefCell<Engine<'static, CardHandle>>>,
    workq: &'static PendingWork,
    read_flag: &'static ReadFlag,
    scan_rate: u32,
    scans_produced: u64,
    signal: Rc<RefCell<SignalFn>>,
    /// Pending injected "missed interrupt" count for the poll callback.
    skip_polls: Rc<Cell<u32>>,
    handles: Vec<CallbackHandle>,
}

impl Dsm {
    pub fn new(start: Timetag) -> Dsm {
        let card = Rc::new(EmulatedCard::new(CardVariant::X86));
        let engine = Engine::new(A2dCard::new(CardHandle(card.clone()), CardVariant::X86));

        // The board owns these for the life of the process, the same way
        // a hardware board leaks its component state at init.
        let workq: &'static PendingWork = Box::leak(Box::new(PendingWork::new()));
        let read_flag: &'static ReadFlag = Box::leak(Box::new(ReadFlag::new()));
        engine.set_work_scheduler(workq);
        engine.set_read_client(read_flag);

        Dsm {
            irig: Rc::new(SimIrig::new(start)),
            card,
            engine: Rc::new(RefCell::new(engine)),
            workq,
            read_flag,
            scan_rate: 0,
            scans_produced: 0,
            signal: Rc::new(RefCell::new(
                Box::new(|_| [0i16; NUM_CHANNELS]) as SignalFn
            )),
            skip_polls: Rc::new(Cell::new(0)),
            handles: Vec::new(),
        }
    }

    pub fn card(&self) -> &EmulatedCard {
        &self.card
    }

    pub fn irig(&self) -> &SimIrig {
        &self.irig
    }

    pub fn read_flag(&self) -> &ReadFlag {
        self.read_flag
    }

    pub fn set_signal(&mut self, signal: SignalFn) {
        *self.signal.borrow_mut() = signal;
    }

    /// Values the card converts from here on.
    pub fn set_levels(&mut self, levels: [i16; NUM_CHANNELS]) {
        self.set_signal(Box::new(move |_| levels));
    }

    pub fn configure(&mut self, cfg: A2dConfig) -> Result<(), ErrorCode> {
        self.scan_rate = cfg.scan_rate;
        self.engine.borrow_mut().configure(cfg)
    }

    pub fn add_sample(&self, cfg: SampleConfig) -> Result<(), ErrorCode> {
        self.engine.borrow_mut().add_sample(cfg)
    }

    pub fn set_coefficients(&self, block: &[u16]) -> Result<(), ErrorCode> {
        self.engine.borrow_mut().set_coefficients(block)
    }

    pub fn with_engine<R>(&self, f: impl FnOnce(&mut Engine<'static, CardHandle>) -> R) -> R {
        f(&mut self.engine.borrow_mut())
    }

    /// Program the card, register the IRIG callbacks, and let the PPS
    /// machinery bring acquisition up over the following virtual second.
    pub fn start(&mut self) -> Result<(), ErrorCode> {
        let now = self.irig.now();
        self.engine.borrow_mut().start(now)?;

        // 100 Hz service callback for the PPS phases.
        let engine = self.engine.clone();
        self.handles.push(self.irig.register(
            IrigRate::Hz100,
            Box::new(move |now| engine.borrow_mut().hundred_hz_tick(now)),
        ));

        // The poll callback at the engine's chosen rate. An injected
        // skip models a missed soft interrupt: the tick is simply lost.
        let poll_rate = self
            .engine
            .borrow()
            .poll_rate()
            .ok_or(ErrorCode::FAIL)?;
        let engine = self.engine.clone();
        let skips = self.skip_polls.clone();
        self.handles.push(self.irig.register(
            poll_rate,
            Box::new(move |now| {
                if skips.get() > 0 {
                    skips.set(skips.get() - 1);
                    return;
                }
                engine.borrow_mut().poll_tick(now);
            }),
        ));

        if let Some(rate) = self.engine.borrow().temp_rate() {
            let engine = self.engine.clone();
            self.handles.push(self.irig.register(
                rate,
                Box::new(move |now| engine.borrow_mut().temp_tick(now)),
            ));
        }

        info!("dsm-sim: started, poll rate {} Hz", poll_rate.hz());
        Ok(())
    }

    pub fn stop(&mut self) {
        for handle in self.handles.drain(..) {
            self.irig.unregister(handle);
        }
        self.engine.borrow_mut().stop();
    }

    /// Drop the next poll callback, as a late soft interrupt would.
    pub fn inject_missed_poll(&self) {
        self.skip_polls.set(self.skip_polls.get() + 1);
    }

    /// One 10 ms step of the virtual world: PPS edge, card conversions,
    /// IRIG dispatch, then the bottom half.
    pub fn tick(&mut self) {
        let count = self.irig.tick_count.get();

        // A 1 PPS pulse, one tick wide, at each virtual second.
        if count % 100 == 0 {
            self.card.set_pps_visible(true);
        } else if count % 100 == 1 {
            self.card.set_pps_visible(false);
        }

        // Conversions accumulated since the last tick.
        if self.scan_rate > 0 {
            let due = (count + 1) * self.scan_rate as u64 / 100;
            while self.scans_produced < due {
                let scan = {
                    let mut signal = self.signal.borrow_mut();
                    (*signal)(self.scans_produced)
                };
                self.card.produce_scan(&scan);
                self.scans_produced += 1;
            }
        }

        self.irig.tick();

        if self.workq.take() {
            let now = self.irig.now();
            self.engine.borrow_mut().run_worker(now);
        }
    }

    pub fn run_ticks(&mut self, n: usize) {
        for _ in 0..n {
            self.tick();
        }
    }

    pub fn run_virtual_ms(&mut self, ms: u64) {
        self.run_ticks((ms / 10) as usize);
    }

    /// Blocking read against virtual time: waits until the engine has
    /// data, end of stream, an error, or the timeout.
    pub fn read_blocking(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, ErrorCode> {
        let deadline = self.irig.now() + timeout_ms as i64 * 1_000;
        loop {
            match self.engine.borrow_mut().read(buf) {
                Err(ErrorCode::AGAIN) => {}
                other => return other,
            }
            if self.irig.now() >= deadline {
                return Err(ErrorCode::TIMEDOUT);
            }
            self.tick();
        }
    }
}
