// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! Campbell CSAT3 sonic anemometer: binary frame decoding and the serial
//! configuration session.
//!
//! Data frames are 12 bytes, little-endian: five 16-bit words (u, v, w,
//! speed-of-sound, diagnostic) and the record separator `0x55 0xAA`. The
//! low six diagnostic bits are a mod-64 frame counter, bits 6..=11 are
//! per-axis range codes, bits 12..=15 flag probe errors. The probe buffers
//! two samples internally, so wind timetags are shifted two frames back.
//!
//! The session side brings a probe from an unknown state into data mode:
//! terminal mode via `T`, a `??` status query, optional rate and driver
//! programming, and `D` back to data. Losing the status query is
//! survivable; losing data is not.

use alloc::string::String;
use alloc::vec::Vec;

use log::{debug, info, warn};
use nidas_core::hil::irig::IrigClock;
use nidas_core::hil::serial::SerialPort;
use nidas_core::time::USECS_PER_SEC;
use nidas_core::{ErrorCode, Timetag};

/// Gamma-R product used to convert speed of sound to virtual temperature.
/// The textbook value for dry air is 401.856; the instrument's own
/// conversion uses 402.684 and that is what is matched here.
pub const GAMMA_R: f32 = 402.684;

pub const KELVIN_AT_0C: f32 = 273.15;

/// Bytes in a wind frame, separator included.
pub const WIND_IN_LEN: usize = 12;

/// Range-code scaling: counts to m/s is `2^-(9 + range)`.
const SCALE: [f32; 4] = [
    1.0 / 512.0,
    1.0 / 1024.0,
    1.0 / 2048.0,
    1.0 / 4096.0,
];

/// Special diagnostic words marking all axes invalid.
const DIAG_NAN_ENCODINGS: [u16; 2] = [0xF03F, 0xF000];

/// Stateful frame decoder: handles the two-sample timetag shift and the
/// mod-64 counter check.
pub struct Csat3Decoder {
    /// NaN the whole record when the probe flags an error.
    nan_if_diag: bool,
    check_counter: bool,
    counter: i32,
    /// Two-deep timetag shift register; negative while priming.
    nttsave: i32,
    timetags: [Timetag; 2],
    /// Restart the shift register after this long without a frame;
    /// 0 disables the check.
    gap_dt_usecs: i64,
    ttlast: Timetag,
}

impl Csat3Decoder {
    pub fn new(nan_if_diag: bool, check_counter: bool) -> Csat3Decoder {
        Csat3Decoder {
            nan_if_diag,
            check_counter,
            counter: -1,
            nttsave: -2,
            timetags: [0; 2],
            gap_dt_usecs: 0,
            ttlast: 0,
        }
    }

    /// Expected reporting rate, used to size the data-gap window at ten
    /// frame periods.
    pub fn set_rate(&mut self, rate: u32) {
        self.gap_dt_usecs = if rate > 0 {
            10 * (USECS_PER_SEC / rate as i64)
        } else {
            0
        };
    }

    /// Decode one raw frame. Returns the wind record (u, v, w, tc, diag)
    /// and its shifted timetag, or `None` while the shift register primes
    /// or for an unrecognizable frame.
    pub fn process(&mut self, tt: Timetag, frame: &[u8]) -> Option<(Timetag, [f32; 5])> {
        let mut inlen = frame.len();
        if inlen < WIND_IN_LEN || inlen > WIND_IN_LEN + 2 {
            return None;
        }
        if frame[inlen - 2] != 0x55 || frame[inlen - 1] != 0xAA {
            return None;
        }
        if inlen > WIND_IN_LEN {
            // Serializer boxes append extra words; only the leading wind
            // frame matters.
            inlen = WIND_IN_LEN;
        }
        debug_assert!(inlen >= 10);

        let mut win = [0i16; 5];
        for (i, w) in win.iter_mut().enumerate() {
            *w = i16::from_le_bytes([frame[2 * i], frame[2 * i + 1]]);
        }

        // Restart the timetag shift on a data gap.
        if self.gap_dt_usecs > 0 && tt - self.ttlast > self.gap_dt_usecs {
            self.nttsave = -2;
        }
        self.ttlast = tt;

        if self.nttsave < 0 {
            self.timetags[(self.nttsave + 2) as usize] = tt;
            self.nttsave += 1;
            return None;
        }
        let wind_tt = self.timetags[self.nttsave as usize];
        self.timetags[self.nttsave as usize] = tt;
        self.nttsave = (self.nttsave + 1) % 2;

        let diag_word = win[4] as u16;
        let cntr = (diag_word & 0x003F) as i32;
        let mut out = [f32::NAN; 5];
        let mut diag: u16;

        if DIAG_NAN_ENCODINGS.contains(&diag_word) {
            diag = (diag_word & 0xF000) >> 12;
        } else {
            let range = [
                ((diag_word & 0x0C00) >> 10) as usize,
                ((diag_word & 0x0300) >> 8) as usize,
                ((diag_word & 0x00C0) >> 6) as usize,
            ];
            diag = (diag_word & 0xF000) >> 12;

            if diag != 0 && self.nan_if_diag {
                // All four NaN; already seeded.
            } else {
                let mut nmissing = 0;
                for i in 0..3 {
                    if win[i] == -32768 {
                        nmissing += 1;
                    } else {
                        out[i] = win[i] as f32 * SCALE[range[i]];
                    }
                }
                // Speed of sound is only valid when the paths are.
                if nmissing < 3 && win[3] != -32768 {
                    let c = win[3] as f32 * 0.001 + 340.0;
                    out[3] = c * c / GAMMA_R - KELVIN_AT_0C;
                }
            }
        }

        if self.check_counter {
            if self.counter >= 0 && (self.counter + 1) % 64 != cntr {
                diag += 16;
            }
            self.counter = cntr;
        }
        out[4] = diag as f32;

        Some((wind_tt, out))
    }
}

/// Everything a `??` status query can tell us.
#[derive(Clone, Debug, Default)]
pub struct ProbeStatus {
    pub acq_rate: u32,
    /// Oversampling flag character: 'g' for 10 Hz 6x, 'h' for 20 Hz 3x,
    /// ' ' or '0' for none.
    pub osc: char,
    pub serial_number: String,
    pub revision: String,
    /// RI setting: 1 means RS-232 drivers always powered.
    pub rts_independent: i32,
    /// RS setting: 1 means the 0x55AA record separator is emitted.
    pub rec_separator: i32,
}

/// How an open attempt ended, when it did not end in a timeout error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Query and data both succeeded.
    Opened { serial_number: String },
    /// Data flows but the probe never answered the status query; reading
    /// proceeds without a serial number.
    DataOnly,
    /// The query worked but no data arrived; the caller's read timeout
    /// will reschedule the open.
    QueryOnly { serial_number: String },
}

/// Consecutive failed opens tolerated before settling for partial success.
const NOPEN_TRY: u32 = 5;

pub struct Csat3Probe {
    /// Requested reporting rate, 0 to leave the probe alone.
    rate: u32,
    oversample: bool,
    consecutive_open_failures: u32,
    serial_number: String,
}

impl Csat3Probe {
    pub fn new(rate: u32, oversample: bool) -> Csat3Probe {
        Csat3Probe {
            rate,
            oversample,
            consecutive_open_failures: 0,
            serial_number: String::new(),
        }
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// Two-character acquisition command for a rate and oversample mode.
    pub fn rate_command(rate: u32, oversample: bool) -> Option<&'static str> {
        let table: [(u32, bool, &'static str); 13] = [
            (1, false, "A2"),
            (2, false, "A5"),
            (3, false, "A6"),
            (5, false, "A7"),
            (6, false, "A8"),
            (10, false, "A9"),
            (12, false, "Aa"),
            (15, false, "Ab"),
            (20, false, "Ac"),
            (30, false, "Ad"),
            (60, false, "Ae"),
            (10, true, "Ag"),
            (20, true, "Ah"),
        ];
        table
            .iter()
            .find(|&&(r, os, _)| r == rate && os == oversample)
            .map(|&(_, _, cmd)| cmd)
    }

    /// Ensure the probe is configured and in data mode.
    ///
    /// On a hard failure (no query response and no data within the
    /// attempt's budget) this returns `TIMEDOUT` so the outer driver
    /// reschedules the open.
    pub fn open(
        &mut self,
        port: &mut dyn SerialPort,
        clock: &dyn IrigClock,
    ) -> Result<OpenOutcome, ErrorCode> {
        let rate_cmd = if self.rate > 0 {
            match Self::rate_command(self.rate, self.oversample) {
                Some(cmd) => Some(cmd),
                None => {
                    warn!(
                        "csat3: rate {} Hz not supported with oversample {}",
                        self.rate, self.oversample
                    );
                    return Err(ErrorCode::INVAL);
                }
            }
        } else {
            None
        };

        self.terminal_mode(port, clock)?;

        let mut status = self.query(port, clock)?;
        debug!(
            "csat3: AQ={} os={} serial \"{}\" rev {} RI={} RS={}",
            status.acq_rate,
            status.osc,
            status.serial_number,
            status.revision,
            status.rts_independent,
            status.rec_separator
        );

        // Keep the RS-232 drivers powered independent of RTS, and make
        // sure the record separator is on.
        if status.rts_independent != 1 {
            port.write(b"ri 1\r")?;
            self.settle(port, 100);
        }
        if status.rec_separator != 1 {
            port.write(b"rs 1\r")?;
            self.settle(port, 100);
        }

        if !status.serial_number.is_empty() {
            let mut rate_ok = self.rate == 0;
            if !self.oversample && status.acq_rate == self.rate {
                if status.osc == ' ' || status.osc == '0' {
                    rate_ok = true;
                }
            }
            if self.oversample && status.acq_rate == 60 {
                if self.rate == 10 && status.osc == 'g' {
                    rate_ok = true;
                }
                if self.rate == 20 && status.osc == 'h' {
                    rate_ok = true;
                }
            }

            if !rate_ok {
                // A mismatched rate implies a requested one, so the
                // command was resolved up front.
                if let Some(cmd) = rate_cmd {
                    info!("csat3: setting rate with {}", cmd);
                    let result = self.send_rate_command(port, clock, cmd)?;
                    debug!("csat3: rate command response \"{}\"", result);
                    // The probe takes a moment to reprogram itself.
                    self.settle(port, 3_000);
                    status = self.query(port, clock)?;
                }
            }

            if status.serial_number != self.serial_number {
                info!(
                    "csat3: serial number \"{}\", revision {}",
                    status.serial_number, status.revision
                );
            }
            self.serial_number = status.serial_number.clone();
        }

        let dataok = self.data_mode(port, clock)?;

        if status.serial_number.is_empty() {
            self.consecutive_open_failures += 1;
            if dataok {
                if self.consecutive_open_failures >= NOPEN_TRY {
                    warn!(
                        "csat3: cannot query serial number but data is flowing after {} open failures; reading anyway",
                        self.consecutive_open_failures
                    );
                    return Ok(OpenOutcome::DataOnly);
                }
                warn!("csat3: cannot query serial number, data received");
            }
            return Err(ErrorCode::TIMEDOUT);
        }
        if !dataok {
            self.consecutive_open_failures += 1;
            if self.consecutive_open_failures >= NOPEN_TRY {
                warn!(
                    "csat3: serial number \"{}\" but no data after {} open failures; handing off to the read loop",
                    status.serial_number, self.consecutive_open_failures
                );
                return Ok(OpenOutcome::QueryOnly {
                    serial_number: status.serial_number,
                });
            }
            warn!(
                "csat3: serial number \"{}\" but no data received",
                status.serial_number
            );
            return Err(ErrorCode::TIMEDOUT);
        }

        self.consecutive_open_failures = 0;
        info!("csat3: open of \"{}\" complete", status.serial_number);
        Ok(OpenOutcome::Opened {
            serial_number: status.serial_number,
        })
    }

    /// Pause roughly `ms`, draining any echo the probe sends meanwhile.
    fn settle(&self, port: &mut dyn SerialPort, ms: u32) {
        let mut sink = [0u8; 64];
        let mut spent = 0;
        while spent < ms {
            match port.read(&mut sink, 100) {
                Ok(_) => spent += 10,
                Err(_) => spent += 100,
            }
        }
    }

    /// Switch to terminal mode: `T` draws a `>` prompt. A timeout with no
    /// prompt also passes, since a silent probe may already be there.
    fn terminal_mode(
        &self,
        port: &mut dyn SerialPort,
        clock: &dyn IrigClock,
    ) -> Result<(), ErrorCode> {
        let deadline = clock.now() + 5 * USECS_PER_SEC;
        let mut rcvd_prompt = false;

        let mut buf = [0u8; 128];
        'attempts: for attempt in 0..3 {
            // Rev 5 probes at high rates only listen after a P.
            if attempt >= 2 {
                debug!("csat3: sending PT");
                port.write(b"PT")?;
            } else {
                debug!("csat3: sending T");
                port.write(b"T")?;
            }
            for _ in 0..20 {
                match port.read(&mut buf, 1_000) {
                    Ok(n) => {
                        if n > 0 && buf[n - 1] == b'>' {
                            rcvd_prompt = true;
                            break 'attempts;
                        }
                    }
                    // A silent interval: re-send the command. A probe
                    // that is already quiet in terminal mode shows up
                    // when the status query is answered anyway.
                    Err(ErrorCode::TIMEDOUT) => break,
                    Err(e) => return Err(e),
                }
                if clock.now() > deadline {
                    break 'attempts;
                }
            }
            if clock.now() > deadline {
                break;
            }
        }

        if !rcvd_prompt {
            warn!("csat3: no prompt switching probe to terminal mode");
        }
        Ok(())
    }

    /// Send `??` and parse the freeform status report.
    fn query(
        &self,
        port: &mut dyn SerialPort,
        clock: &dyn IrigClock,
    ) -> Result<ProbeStatus, ErrorCode> {
        let deadline = clock.now() + 5 * USECS_PER_SEC;
        let mut result = String::new();
        let mut scanned = false;

        let mut buf = [0u8; 256];
        while !scanned && clock.now() < deadline {
            debug!("csat3: sending ??");
            port.write(b"??\r")?;
            result.clear();
            let mut started = false;

            while !scanned && clock.now() < deadline {
                match port.read(&mut buf, 1_000) {
                    Ok(n) => {
                        let mut chunk = &buf[..n];
                        // The probe echoes the command characters back.
                        if result.is_empty() {
                            while let [b'T' | b'?' | b' ' | b'\r' | b'\n', rest @ ..] = chunk {
                                chunk = rest;
                            }
                        }
                        result.push_str(&String::from_utf8_lossy(chunk));
                    }
                    Err(ErrorCode::TIMEDOUT) => break,
                    Err(e) => return Err(e),
                }

                if !started {
                    // Rev 3 reports start at "ET=", rev 4 and 5 at the
                    // serial number.
                    let et = result.find("ET=");
                    let sn = find_serial_number(&result).map(|(i, _)| i);
                    if let Some(start) = min_opt(et, sn) {
                        result = result.split_off(start);
                        started = true;
                    }
                }
                if started {
                    if let Some(end) = result.find("\n>") {
                        result.truncate(end);
                        scanned = true;
                    }
                }
            }
        }
        port.flush_input();

        if result.is_empty() {
            return Ok(ProbeStatus {
                osc: ' ',
                rts_independent: -1,
                rec_separator: -1,
                revision: "unknown".into(),
                ..ProbeStatus::default()
            });
        }
        debug!("csat3: query result \"{}\"", result);
        Ok(parse_query_result(&result))
    }

    fn send_rate_command(
        &self,
        port: &mut dyn SerialPort,
        clock: &dyn IrigClock,
        cmd: &str,
    ) -> Result<String, ErrorCode> {
        port.write(cmd.as_bytes())?;
        let deadline = clock.now() + 4 * USECS_PER_SEC;

        let mut result = String::new();
        let mut buf = [0u8; 256];
        for _ in 0..10 {
            match port.read(&mut buf, 1_000) {
                Ok(n) => result.push_str(&String::from_utf8_lossy(&buf[..n])),
                Err(ErrorCode::TIMEDOUT) => break,
                Err(e) => return Err(e),
            }
            if clock.now() > deadline {
                break;
            }
        }
        port.flush_input();
        while result.ends_with('>') {
            result.pop();
        }
        Ok(result)
    }

    /// Send `D` and confirm at least one full-length frame arrives.
    fn data_mode(
        &self,
        port: &mut dyn SerialPort,
        clock: &dyn IrigClock,
    ) -> Result<bool, ErrorCode> {
        debug!("csat3: sending D");
        port.write(b"D")?;
        self.settle(port, 250);

        let deadline = clock.now() + 5 * USECS_PER_SEC;
        let mut stream: Vec<u8> = Vec::new();
        let mut last_sep: Option<usize> = None;
        let mut ntimeouts = 0;

        let mut buf = [0u8; 256];
        loop {
            match port.read(&mut buf, 1_000) {
                Ok(n) => {
                    stream.extend_from_slice(&buf[..n]);
                    // Look for record separators a frame apart.
                    let mut i = 1;
                    while i < stream.len() {
                        if stream[i - 1] == 0x55 && stream[i] == 0xAA {
                            let end = i + 1;
                            match last_sep {
                                Some(prev) => {
                                    let d = end - prev;
                                    if d >= WIND_IN_LEN && d < 2 * WIND_IN_LEN {
                                        return Ok(true);
                                    }
                                }
                                None => {
                                    if end == WIND_IN_LEN {
                                        return Ok(true);
                                    }
                                }
                            }
                            last_sep = Some(end);
                        }
                        i += 1;
                    }
                    if stream.len() > 4 * WIND_IN_LEN {
                        let cut = stream.len() - 2 * WIND_IN_LEN;
                        stream.drain(..cut);
                        last_sep = last_sep.and_then(|p| p.checked_sub(cut));
                    }
                }
                Err(ErrorCode::TIMEDOUT) => {
                    ntimeouts += 1;
                    if ntimeouts % 3 != 0 {
                        debug!("csat3: timeout waiting for data, sending D");
                        port.write(b"D")?;
                    } else {
                        debug!("csat3: timeout waiting for data, sending D&");
                        port.write(b"D&")?;
                    }
                }
                Err(e) => return Err(e),
            }
            if clock.now() > deadline {
                info!("csat3: timeout reading probe data");
                return Ok(false);
            }
        }
    }
}

fn min_opt(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// Find the serial number in a status report. Version 3 and 4 numbers
/// start with "SN", version 5 with "Sn"; one test probe used "PR".
fn find_serial_number(text: &str) -> Option<(usize, String)> {
    for prefix in ["SN", "Sn", "PR"] {
        if let Some(idx) = text.find(prefix) {
            let tail = &text[idx..];
            let end = tail
                .find(|c: char| c.is_whitespace())
                .unwrap_or(tail.len());
            if end > prefix.len() {
                return Some((idx, String::from(&tail[..end])));
            }
        }
    }
    None
}

fn parse_int_after(text: &str, key: &str) -> Option<i32> {
    let idx = text.find(key)? + key.len();
    let tail = &text[idx..];
    let end = tail
        .find(|c: char| !(c.is_ascii_digit() || c == '-'))
        .unwrap_or(tail.len());
    tail[..end].parse().ok()
}

fn parse_query_result(result: &str) -> ProbeStatus {
    let mut status = ProbeStatus {
        osc: ' ',
        revision: "unknown".into(),
        rts_independent: -1,
        rec_separator: -1,
        ..ProbeStatus::default()
    };

    if let Some(rate) = parse_int_after(result, "AQ=") {
        status.acq_rate = rate.max(0) as u32;
    }
    if let Some(idx) = result.find("os=") {
        status.osc = result[idx + 3..].chars().next().unwrap_or(' ');
    }
    if let Some(idx) = result.find("rev") {
        let tail = &result[idx + 4..];
        let end = tail
            .find(|c: char| c.is_whitespace())
            .unwrap_or(tail.len());
        if end > 0 {
            status.revision = String::from(&tail[..end]);
        }
    }
    if let Some(ri) = parse_int_after(result, "RI=") {
        status.rts_independent = ri;
    }
    if let Some(rs) = parse_int_after(result, "RS=") {
        status.rec_separator = rs;
    }
    if let Some((_, sn)) = find_serial_number(result) {
        status.serial_number = sn;
    }
    status
}

#[cfg(test)]
mod test {
    use super::*;
    use alloc::collections::VecDeque;
    use alloc::rc::Rc;
    use alloc::string::ToString;
    use alloc::vec;
    use core::cell::{Cell, RefCell};

    fn frame(u: i16, v: i16, w: i16, c: i16, diag: u16) -> [u8; 12] {
        let mut f = [0u8; 12];
        f[0..2].copy_from_slice(&u.to_le_bytes());
        f[2..4].copy_from_slice(&v.to_le_bytes());
        f[4..6].copy_from_slice(&w.to_le_bytes());
        f[6..8].copy_from_slice(&c.to_le_bytes());
        f[8..10].copy_from_slice(&diag.to_le_bytes());
        f[10] = 0x55;
        f[11] = 0xAA;
        f
    }

    /// Push frames until the two-deep shift register yields one.
    fn decode_one(dec: &mut Csat3Decoder, f: &[u8; 12]) -> (Timetag, [f32; 5]) {
        let mut tt = 1_000_000;
        for _ in 0..3 {
            if let Some(out) = dec.process(tt, f) {
                return out;
            }
            tt += 50_000;
        }
        panic!("decoder never primed");
    }

    #[test]
    fn frame_decode_scales_by_range_code() {
        let mut dec = Csat3Decoder::new(true, false);
        // u = 0x1000, range codes zero: 4096 / 512 = 8 m/s exactly.
        let f = frame(0x1000, 0, 0, 0, 0);
        let (_, out) = decode_one(&mut dec, &f);
        assert_eq!(out[0], 8.0);
        assert_eq!(out[1], 0.0);
        assert_eq!(out[2], 0.0);
        let expected_tc = 340.0f32 * 340.0 / GAMMA_R - KELVIN_AT_0C;
        assert!((out[3] - expected_tc).abs() < 1e-3);
        assert_eq!(out[4], 0.0);
    }

    #[test]
    fn range_codes_halve_the_scale() {
        let mut dec = Csat3Decoder::new(true, false);
        // u range code 3: 2^-12.
        let f = frame(4096, 0, 0, 0, 0x0C00);
        let (_, out) = decode_one(&mut dec, &f);
        assert_eq!(out[0], 1.0);
    }

    #[test]
    fn special_diag_words_nan_everything() {
        for d in [0xF03Fu16, 0xF000] {
            let mut dec = Csat3Decoder::new(true, false);
            let f = frame(100, 200, 300, 400, d);
            let (_, out) = decode_one(&mut dec, &f);
            assert!(out[..4].iter().all(|x| x.is_nan()));
            assert_eq!(out[4], 15.0);
        }
    }

    #[test]
    fn missing_value_sentinels() {
        let mut dec = Csat3Decoder::new(true, false);
        let f = frame(-32768, 512, 0, 0, 0);
        let (_, out) = decode_one(&mut dec, &f);
        assert!(out[0].is_nan());
        assert_eq!(out[1], 1.0);
        assert!(!out[3].is_nan());

        // Sound speed alone missing.
        let f = frame(0, 0, 0, -32768, 1);
        if let Some((_, out)) = dec.process(2_000_000, &f) {
            assert!(out[3].is_nan());
        }
    }

    #[test]
    fn diag_bits_nan_winds_when_requested() {
        let mut dec = Csat3Decoder::new(true, false);
        let f = frame(512, 512, 512, 0, 0x1000);
        let (_, out) = decode_one(&mut dec, &f);
        assert!(out[..4].iter().all(|x| x.is_nan()));
        assert_eq!(out[4], 1.0);

        let mut dec = Csat3Decoder::new(false, false);
        let (_, out) = decode_one(&mut dec, &f);
        assert_eq!(out[0], 1.0);
        assert_eq!(out[4], 1.0);
    }

    #[test]
    fn counter_gap_sets_bit_four() {
        let mut dec = Csat3Decoder::new(true, true);
        let mut tt = 0;
        let mut outs = vec![];
        for cntr in [0u16, 1, 2, /* skip 3 */ 4, 5] {
            if let Some(out) = dec.process(tt, &frame(0, 0, 0, 0, cntr)) {
                outs.push(out.1[4]);
            }
            tt += 50_000;
        }
        // Emitted for counters 2, 4, 5; the skip shows on the 4 frame.
        assert_eq!(outs, vec![0.0, 16.0, 0.0]);
    }

    #[test]
    fn timetags_shift_two_frames_back() {
        let mut dec = Csat3Decoder::new(true, false);
        let f = frame(0, 0, 0, 0, 0);
        assert!(dec.process(1_000_000, &f).is_none());
        assert!(dec.process(1_050_000, &f).is_none());
        let (tt, _) = dec.process(1_100_000, &f).unwrap();
        assert_eq!(tt, 1_000_000);
        let (tt, _) = dec.process(1_150_000, &f).unwrap();
        assert_eq!(tt, 1_050_000);
    }

    #[test]
    fn shift_register_restarts_after_a_gap() {
        let mut dec = Csat3Decoder::new(true, false);
        dec.set_rate(20);
        let f = frame(0, 0, 0, 0, 0);
        assert!(dec.process(1_000_000, &f).is_none());
        assert!(dec.process(1_050_000, &f).is_none());
        assert!(dec.process(1_100_000, &f).is_some());
        // More than ten frame periods of silence reprimes the register.
        assert!(dec.process(3_000_000, &f).is_none());
        assert!(dec.process(3_050_000, &f).is_none());
        let (tt, _) = dec.process(3_100_000, &f).unwrap();
        assert_eq!(tt, 3_000_000);
    }

    #[test]
    fn bad_terminator_is_dropped() {
        let mut dec = Csat3Decoder::new(true, false);
        let mut f = frame(0, 0, 0, 0, 0);
        f[11] = 0x00;
        assert!(dec.process(0, &f).is_none());
        assert!(dec.process(1, &f[..8]).is_none());
    }

    // A scripted probe and clock for the session tests.

    struct FakeClock(Rc<Cell<i64>>);

    impl IrigClock for FakeClock {
        fn now(&self) -> Timetag {
            self.0.get()
        }
    }

    struct ScriptedProbe {
        clock: Rc<Cell<i64>>,
        pending: RefCell<VecDeque<u8>>,
        in_terminal: bool,
        /// Terminal-mode commands to ignore, to exercise the retry.
        ignore_t: u32,
        answer_queries: bool,
        emit_data: bool,
        acq_rate: u32,
        osc: char,
        ri: i32,
        rs: i32,
        writes: RefCell<Vec<String>>,
    }

    impl ScriptedProbe {
        fn new(clock: Rc<Cell<i64>>) -> ScriptedProbe {
            ScriptedProbe {
                clock,
                pending: RefCell::new(VecDeque::new()),
                in_terminal: false,
                ignore_t: 0,
                answer_queries: true,
                emit_data: true,
                acq_rate: 20,
                osc: ' ',
                ri: 1,
                rs: 1,
                writes: RefCell::new(Vec::new()),
            }
        }

        fn push(&self, bytes: &[u8]) {
            self.pending.borrow_mut().extend(bytes.iter().copied());
        }

        fn status_report(&self) -> String {
            let mut s = String::new();
            s.push_str("ET= 60 ts=i XD=d GN=434a TK=1 UP=5 FK=0 RN=1 IT=1 DR=102 rx=2 fx=038 BX=0 AH=1 AT=0 RS=");
            s.push_str(if self.rs == 1 { "1" } else { "0" });
            s.push_str(" BR=0 RI=");
            s.push_str(if self.ri == 1 { "1" } else { "0" });
            s.push_str(" GO=00000 HA=0 6X=3 3X=2 PD=2 SD=0 ?d sa=1 WM=o ar=0 ZZ=0 DC=1 ELo=010 010 010 ELb=010 010 010 TNo=99b d TNb=97a JD= 007 C0o=-2-2-2 C0b=-2-2-2 RC=0 tlo=8 8 8 tlb=8 8 8 DTR=01740 CA=1 TD=  duty=026 AQ=");
            s.push_str(&self.acq_rate.to_string());
            s.push_str(" AC=1 CD=0 SR=1 UX=0 MX=0 DTU=02320 DTC=01160 RD=o ss=1 XP=2 RF=018 DS=007 SN1124 os=");
            s.push(self.osc);
            s.push_str(" rev 3.0f\n>");
            s
        }
    }

    impl SerialPort for ScriptedProbe {
        fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, ErrorCode> {
            let mut pending = self.pending.borrow_mut();
            if pending.is_empty() {
                self.clock
                    .set(self.clock.get() + timeout_ms as i64 * 1_000);
                return Err(ErrorCode::TIMEDOUT);
            }
            self.clock.set(self.clock.get() + 10_000);
            let n = buf.len().min(pending.len());
            for slot in buf[..n].iter_mut() {
                *slot = pending.pop_front().unwrap();
            }
            Ok(n)
        }

        fn write(&mut self, bytes: &[u8]) -> Result<(), ErrorCode> {
            let cmd = String::from_utf8_lossy(bytes).to_string();
            self.writes.borrow_mut().push(cmd.clone());
            match cmd.as_str() {
                "T" | "PT" => {
                    if self.ignore_t > 0 {
                        self.ignore_t -= 1;
                    } else {
                        self.in_terminal = true;
                        self.push(b"T\n>");
                    }
                }
                "??\r" => {
                    if self.in_terminal && self.answer_queries {
                        let report = self.status_report();
                        self.push(b"??");
                        self.push(report.as_bytes());
                    }
                }
                "ri 1\r" => self.ri = 1,
                "rs 1\r" => self.rs = 1,
                "D" | "D&" => {
                    self.in_terminal = false;
                    if self.emit_data {
                        for _ in 0..4 {
                            self.push(&frame(100, 0, 0, 0, 0));
                        }
                    }
                }
                cmd => {
                    if let Some(rest) = cmd.strip_prefix('A') {
                        // Acquisition rate command.
                        self.acq_rate = match rest {
                            "c" => 20,
                            "9" => 10,
                            "e" => 60,
                            _ => self.acq_rate,
                        };
                        self.osc = ' ';
                        self.push(b"Acq sigs 60->20 Type x to abort...\n>");
                    }
                }
            }
            Ok(())
        }

        fn flush_input(&mut self) {
            self.pending.borrow_mut().clear();
        }
    }

    #[test]
    fn open_happy_path_reports_serial_number() {
        let time = Rc::new(Cell::new(0i64));
        let clock = FakeClock(time.clone());
        let mut probe = ScriptedProbe::new(time);
        let mut session = Csat3Probe::new(20, false);

        let outcome = session.open(&mut probe, &clock).unwrap();
        assert_eq!(
            outcome,
            OpenOutcome::Opened {
                serial_number: "SN1124".into()
            }
        );
        assert_eq!(session.serial_number(), "SN1124");
        // The rate was already right, so no acquisition command went out.
        assert!(!probe.writes.borrow().iter().any(|w| w.as_str() == "Ac"));
    }

    #[test]
    fn open_retries_terminal_mode() {
        // The probe ignores the first T; the session must still come up
        // within its budget and report the serial number.
        let time = Rc::new(Cell::new(0i64));
        let clock = FakeClock(time.clone());
        let mut probe = ScriptedProbe::new(time.clone());
        probe.ignore_t = 1;
        let mut session = Csat3Probe::new(20, false);

        let start = time.get();
        let outcome = session.open(&mut probe, &clock).unwrap();
        assert!(matches!(outcome, OpenOutcome::Opened { .. }));
        assert_eq!(session.serial_number(), "SN1124");
        assert!(time.get() - start < 10 * USECS_PER_SEC);
    }

    #[test]
    fn open_programs_a_different_rate() {
        let time = Rc::new(Cell::new(0i64));
        let clock = FakeClock(time.clone());
        let mut probe = ScriptedProbe::new(time);
        probe.acq_rate = 60;
        let mut session = Csat3Probe::new(20, false);

        let outcome = session.open(&mut probe, &clock).unwrap();
        assert!(matches!(outcome, OpenOutcome::Opened { .. }));
        assert!(probe.writes.borrow().iter().any(|w| w.as_str() == "Ac"));
        assert_eq!(probe.acq_rate, 20);
    }

    #[test]
    fn unsupported_rate_is_rejected() {
        let time = Rc::new(Cell::new(0i64));
        let clock = FakeClock(time.clone());
        let mut probe = ScriptedProbe::new(time);
        let mut session = Csat3Probe::new(7, false);
        assert_eq!(session.open(&mut probe, &clock), Err(ErrorCode::INVAL));
    }

    #[test]
    fn data_without_query_degrades_after_five_attempts() {
        let time = Rc::new(Cell::new(0i64));
        let clock = FakeClock(time.clone());
        let mut probe = ScriptedProbe::new(time);
        probe.answer_queries = false;
        let mut session = Csat3Probe::new(20, false);

        for _ in 0..4 {
            assert_eq!(session.open(&mut probe, &clock), Err(ErrorCode::TIMEDOUT));
        }
        assert_eq!(session.open(&mut probe, &clock), Ok(OpenOutcome::DataOnly));
    }

    #[test]
    fn query_without_data_hands_off_after_five_attempts() {
        let time = Rc::new(Cell::new(0i64));
        let clock = FakeClock(time.clone());
        let mut probe = ScriptedProbe::new(time);
        probe.emit_data = false;
        let mut session = Csat3Probe::new(20, false);

        for _ in 0..4 {
            assert_eq!(session.open(&mut probe, &clock), Err(ErrorCode::TIMEDOUT));
        }
        assert_eq!(
            session.open(&mut probe, &clock),
            Ok(OpenOutcome::QueryOnly {
                serial_number: "SN1124".into()
            })
        );
    }

    #[test]
    fn rate_command_table() {
        assert_eq!(Csat3Probe::rate_command(20, false), Some("Ac"));
        assert_eq!(Csat3Probe::rate_command(20, true), Some("Ah"));
        assert_eq!(Csat3Probe::rate_command(10, true), Some("Ag"));
        assert_eq!(Csat3Probe::rate_command(60, false), Some("Ae"));
        assert_eq!(Csat3Probe::rate_command(7, false), None);
    }

    #[test]
    fn query_parser_extracts_the_fields() {
        let text = "ET= 60 ... RS=1 ... RI=0 ... AQ=60 ... SN0989 os=h rev 5.0a";
        let st = parse_query_result(text);
        assert_eq!(st.acq_rate, 60);
        assert_eq!(st.osc, 'h');
        assert_eq!(st.serial_number, "SN0989");
        assert_eq!(st.revision, "5.0a");
        assert_eq!(st.rts_independent, 0);
        assert_eq!(st.rec_separator, 1);
    }
}
