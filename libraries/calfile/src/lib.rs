// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright NIDAS Contributors 2024.

//! Timestamped calibration records.
//!
//! A cal file is line-oriented UTF-8 text: a timetag, `YYYY mm dd
//! HH:MM:SS[.ffffff]` or ISO-8601, followed by up to eight floats. `#`
//! starts a comment, blank lines are skipped, and rows must be sorted by
//! time. Streaming lookups keep a cursor so that a monotonically advancing
//! caller pays O(1) amortized per sample; a caller that jumps backwards
//! repositions from the start of the file.
//!
//! Consumers pick up a newly crossed record at the next sample boundary,
//! never mid-sample.

#![no_std]

extern crate alloc;

use alloc::vec::Vec;

use log::warn;
use nidas_core::time::parse_timetag;
use nidas_core::{ErrorCode, Timetag};

/// Most floats a record may carry: eight for parameter files, plus one so
/// the nine-entry abc2uvw rotation matrix rows fit.
pub const MAX_FIELDS: usize = 9;

/// One calibration row.
#[derive(Clone, Debug, PartialEq)]
pub struct CalRecord {
    pub time: Timetag,
    pub data: Vec<f32>,
}

/// A parsed calibration file with a streaming lookup cursor.
pub struct CalFile {
    name: alloc::string::String,
    records: Vec<CalRecord>,
    /// Index of the last record returned, or `usize::MAX` before any.
    cursor: usize,
}

impl CalFile {
    /// Parse the full text of a cal file. Rows out of time order or with
    /// unparseable fields are an error; short and long rows are legal up
    /// to [`MAX_FIELDS`] values.
    pub fn parse(name: &str, text: &str) -> Result<CalFile, ErrorCode> {
        let mut records: Vec<CalRecord> = Vec::new();

        for (lineno, raw) in text.lines().enumerate() {
            let line = match raw.find('#') {
                Some(pos) => &raw[..pos],
                None => raw,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (time, rest) = split_timetag(line)?;
            let mut data = Vec::with_capacity(MAX_FIELDS);
            for field in rest.split_whitespace() {
                if data.len() == MAX_FIELDS + 1 {
                    break;
                }
                // "na" and "nan" are conventional for unknown values.
                let val = match field {
                    "na" | "NA" | "nan" | "NaN" => f32::NAN,
                    _ => field.parse::<f32>().map_err(|_| ErrorCode::INVAL)?,
                };
                data.push(val);
            }
            if data.len() > MAX_FIELDS {
                warn!("{}: line {}: record truncated to {} values", name, lineno + 1, MAX_FIELDS);
                data.truncate(MAX_FIELDS);
            }

            if let Some(last) = records.last() {
                if time < last.time {
                    warn!("{}: line {}: timetag goes backwards", name, lineno + 1);
                    return Err(ErrorCode::INVAL);
                }
            }
            records.push(CalRecord { time, data });
        }

        Ok(CalFile {
            name: name.into(),
            records,
            cursor: usize::MAX,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Time of the first record after the cursor, or `None` at the end.
    /// This is the "next change" time a streaming consumer polls against.
    pub fn next_time(&self) -> Option<Timetag> {
        let next = self.cursor.wrapping_add(1);
        self.records.get(next).map(|r| r.time)
    }

    /// The latest record whose time is at or before `tt`, advancing the
    /// cursor. Returns `None` when `tt` precedes the first record.
    pub fn value_at(&mut self, tt: Timetag) -> Option<&CalRecord> {
        if self.records.is_empty() {
            return None;
        }

        // Fast path: the cursor is already right, or moves forward a step
        // at a time as the caller's timetags advance.
        if self.cursor != usize::MAX && self.records[self.cursor].time > tt {
            // The caller jumped backwards; reposition from scratch.
            self.cursor = usize::MAX;
        }
        loop {
            let next = self.cursor.wrapping_add(1);
            match self.records.get(next) {
                Some(rec) if rec.time <= tt => self.cursor = next,
                _ => break,
            }
        }
        if self.cursor == usize::MAX {
            None
        } else {
            Some(&self.records[self.cursor])
        }
    }

    /// True when `value_at(tt)` would return a different record than the
    /// last call did; lets consumers reload parameters only on a change.
    pub fn crossed(&self, tt: Timetag) -> bool {
        match self.next_time() {
            Some(t) => tt >= t,
            None => false,
        }
    }
}

/// Byte offsets of the whitespace-separated words of `line`.
fn word_spans(line: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in line.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, line.len()));
    }
    spans
}

/// Split a record line into its timetag and the remaining fields. The
/// timetag is either one ISO-8601 word or the four words
/// `YYYY mm dd HH:MM:SS[.ffffff]`.
fn split_timetag(line: &str) -> Result<(Timetag, &str), ErrorCode> {
    let spans = word_spans(line);
    if spans.is_empty() {
        return Err(ErrorCode::INVAL);
    }

    let first = &line[spans[0].0..spans[0].1];
    if first.contains('-') {
        let tt = parse_timetag(first)?;
        return Ok((tt, &line[spans[0].1..]));
    }

    if spans.len() < 4 {
        return Err(ErrorCode::INVAL);
    }
    let stamp = &line[spans[0].0..spans[3].1];
    let tt = parse_timetag(stamp)?;
    let rest = match spans.get(4) {
        Some(&(start, _)) => &line[start..],
        None => "",
    };
    Ok((tt, rest))
}

#[cfg(test)]
mod test {
    use super::*;
    use alloc::vec;

    const OA: &str = "\
# offsets_angles: u.off v.off w.off lean leanaz azimuth tc.off tc.slope
2010 06 01 00:00:00    0.0 0.0 0.0   0.0 0.0   120.0   0.0 1.0
2010 06 15 12:00:00.5  0.1 -0.2 0.0  0.5 30.0  121.0   0.2 1.01
2010 07 01 00:00:00    na na na      na na     na      na na
";

    #[test]
    fn parses_and_looks_up() {
        let mut cf = CalFile::parse("offsets_angles", OA).unwrap();
        assert_eq!(cf.len(), 3);

        let before = parse_timetag("2010 05 01 00:00:00").unwrap();
        assert!(cf.value_at(before).is_none());

        let mid = parse_timetag("2010 06 20 00:00:00").unwrap();
        let rec = cf.value_at(mid).unwrap();
        assert_eq!(rec.data[5], 121.0);
        assert_eq!(rec.data.len(), 8);
    }

    #[test]
    fn cursor_streams_forward() {
        let mut cf = CalFile::parse("oa", OA).unwrap();
        let t0 = parse_timetag("2010 06 01 00:00:00").unwrap();
        for k in 0..100 {
            let tt = t0 + k * 3600 * 1_000_000;
            let rec = cf.value_at(tt).unwrap();
            assert!(rec.time <= tt);
        }
        // Jumping backwards repositions correctly.
        let rec = cf.value_at(t0).unwrap();
        assert_eq!(rec.time, t0);
    }

    #[test]
    fn crossed_reports_changes_once() {
        let mut cf = CalFile::parse("oa", OA).unwrap();
        let t0 = parse_timetag("2010 06 01 00:00:00").unwrap();
        let t1 = parse_timetag("2010 06 15 12:00:00.5").unwrap();
        assert!(cf.crossed(t0));
        cf.value_at(t0);
        assert!(!cf.crossed(t0));
        assert!(cf.crossed(t1));
        cf.value_at(t1);
        assert!(!cf.crossed(t1 + 1));
    }

    #[test]
    fn nan_fields_parse_as_nan() {
        let mut cf = CalFile::parse("oa", OA).unwrap();
        let t = parse_timetag("2010 07 02 00:00:00").unwrap();
        let rec = cf.value_at(t).unwrap();
        assert!(rec.data.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn iso8601_rows() {
        let text = "2021-01-01T00:00:00Z 1.5 2.5\n2021-01-02T00:00:00Z 3.5\n";
        let mut cf = CalFile::parse("abc", text).unwrap();
        let t = parse_timetag("2021 01 01 12:00:00").unwrap();
        assert_eq!(cf.value_at(t).unwrap().data, vec![1.5, 2.5]);
    }

    #[test]
    fn unsorted_rows_are_rejected() {
        let text = "2021 01 02 00:00:00 1\n2021 01 01 00:00:00 2\n";
        assert!(CalFile::parse("bad", text).is_err());
    }

    #[test]
    fn comments_and_blanks() {
        let text = "\n# nothing\n   \n2021 01 01 00:00:00 4 # trailing\n";
        let cf = CalFile::parse("c", text).unwrap();
        assert_eq!(cf.len(), 1);
        assert_eq!(cf.records[0].data, vec![4.0]);
    }

    #[test]
    fn matrix_rows() {
        let text = "2021 01 01 00:00:00 1 0 0 0 1 0 0 0 1\n";
        let cf = CalFile::parse("abc2uvw", text).unwrap();
        assert_eq!(cf.records[0].data.len(), 9);
    }
}
