// SAC binary codec
// Reads and writes header-version-6 SAC files, the persisted form of a TraceRecord

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::time::{self, seconds_between};
use crate::trace::record::TraceRecord;

#[derive(Debug, Error)]
pub enum SacError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File too short: {0} bytes")]
    Truncated(usize),

    #[error("Unsupported header version (nvhdr = {0})")]
    UnsupportedVersion(i32),

    #[error("Unevenly sampled data is not supported")]
    Uneven,

    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}

pub const UNDEFINED: f32 = -12345.0;
const UNDEFINED_INT: i32 = -12345;
const HEADER_VERSION: i32 = 6;

const FLOAT_WORDS: usize = 70;
const INT_WORDS: usize = 40;
const CHAR_BYTES: usize = 192;
const HEADER_BYTES: usize = 4 * (FLOAT_WORDS + INT_WORDS) + CHAR_BYTES;

// Float header word positions
const DELTA: usize = 0;
const DEPMIN: usize = 1;
const DEPMAX: usize = 2;
const B: usize = 5;
const E: usize = 6;
const O: usize = 7;
const T1: usize = 11;
const T2: usize = 12;
const T9: usize = 19;
const STLA: usize = 31;
const STLO: usize = 32;
const EVLA: usize = 35;
const EVLO: usize = 36;
const EVDP: usize = 38;
const USER1: usize = 41;
const DEPMEN: usize = 56;
const GCARC: usize = 53;

// Integer header word positions
const NZYEAR: usize = 0;
const NZJDAY: usize = 1;
const NZHOUR: usize = 2;
const NZMIN: usize = 3;
const NZSEC: usize = 4;
const NZMSEC: usize = 5;
const NVHDR: usize = 6;
const NPTS: usize = 9;
const IFTYPE: usize = 15;
const IZTYPE: usize = 17;
const LEVEN: usize = 35;

const ITIME: i32 = 1;
const IB: i32 = 9;

// Character header byte offsets and widths
const KSTNM: (usize, usize) = (0, 8);
const KHOLE: (usize, usize) = (24, 8);
const KT1: (usize, usize) = (56, 8);
const KCMPNM: (usize, usize) = (160, 8);
const KNETWK: (usize, usize) = (168, 8);

#[derive(Clone, Copy)]
enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn read_f32(self, bytes: &[u8], word: usize) -> f32 {
        let raw = [
            bytes[4 * word],
            bytes[4 * word + 1],
            bytes[4 * word + 2],
            bytes[4 * word + 3],
        ];
        match self {
            ByteOrder::Little => f32::from_le_bytes(raw),
            ByteOrder::Big => f32::from_be_bytes(raw),
        }
    }

    fn read_i32(self, bytes: &[u8], word: usize) -> i32 {
        let raw = [
            bytes[4 * word],
            bytes[4 * word + 1],
            bytes[4 * word + 2],
            bytes[4 * word + 3],
        ];
        match self {
            ByteOrder::Little => i32::from_le_bytes(raw),
            ByteOrder::Big => i32::from_be_bytes(raw),
        }
    }
}

fn defined(value: f32) -> Option<f64> {
    if value == UNDEFINED || !value.is_finite() {
        None
    } else {
        Some(value as f64)
    }
}

fn read_string(chars: &[u8], (offset, width): (usize, usize)) -> String {
    let text = String::from_utf8_lossy(&chars[offset..offset + width]);
    let text = text.trim_end_matches('\0').trim();
    if text == "-12345" {
        String::new()
    } else {
        text.to_string()
    }
}

/// Decode a SAC file held in memory
pub fn decode(bytes: &[u8]) -> Result<TraceRecord, SacError> {
    if bytes.len() < HEADER_BYTES {
        return Err(SacError::Truncated(bytes.len()));
    }

    let ints = &bytes[4 * FLOAT_WORDS..4 * (FLOAT_WORDS + INT_WORDS)];
    let order = if ByteOrder::Little.read_i32(ints, NVHDR) == HEADER_VERSION {
        ByteOrder::Little
    } else if ByteOrder::Big.read_i32(ints, NVHDR) == HEADER_VERSION {
        ByteOrder::Big
    } else {
        return Err(SacError::UnsupportedVersion(
            ByteOrder::Little.read_i32(ints, NVHDR),
        ));
    };

    let floats = &bytes[..4 * FLOAT_WORDS];
    let chars = &bytes[4 * (FLOAT_WORDS + INT_WORDS)..HEADER_BYTES];

    if order.read_i32(ints, LEVEN) == 0 {
        return Err(SacError::Uneven);
    }

    let npts = order.read_i32(ints, NPTS);
    if npts < 0 {
        return Err(SacError::InvalidHeader(format!("npts = {}", npts)));
    }
    let npts = npts as usize;
    let needed = HEADER_BYTES + 4 * npts;
    if bytes.len() < needed {
        return Err(SacError::Truncated(bytes.len()));
    }

    let delta = defined(order.read_f32(floats, DELTA))
        .filter(|d| *d > 0.0)
        .ok_or_else(|| SacError::InvalidHeader("delta undefined".to_string()))?;

    let reference_time = read_reference_time(order, ints)?;

    let data = &bytes[HEADER_BYTES..needed];
    let samples = (0..npts).map(|i| order.read_f32(data, i) as f64).collect();

    let mut record = TraceRecord::new(
        read_string(chars, KSTNM),
        reference_time,
        delta,
        samples,
    );
    record.network = read_string(chars, KNETWK);
    record.location = read_string(chars, KHOLE);
    record.channel = read_string(chars, KCMPNM);
    record.begin = defined(order.read_f32(floats, B)).unwrap_or(0.0);
    record.origin_offset = defined(order.read_f32(floats, O)).unwrap_or(0.0);
    record.event_latitude = defined(order.read_f32(floats, EVLA));
    record.event_longitude = defined(order.read_f32(floats, EVLO));
    record.event_depth = defined(order.read_f32(floats, EVDP));
    record.station_latitude = defined(order.read_f32(floats, STLA));
    record.station_longitude = defined(order.read_f32(floats, STLO));
    record.distance = defined(order.read_f32(floats, GCARC));
    record.predicted_arrival =
        defined(order.read_f32(floats, T1)).map(|t1| t1 - record.origin_offset);
    record.snr = defined(order.read_f32(floats, USER1));
    record.pick = defined(order.read_f32(floats, T2));
    record.auxiliary_pick = defined(order.read_f32(floats, T9));

    let phase = read_string(chars, KT1);
    record.phase = if phase.is_empty() { None } else { Some(phase) };

    Ok(record)
}

fn read_reference_time(order: ByteOrder, ints: &[u8]) -> Result<DateTime<Utc>, SacError> {
    let field = |word: usize, name: &str| -> Result<u32, SacError> {
        let value = order.read_i32(ints, word);
        if value < 0 {
            Err(SacError::InvalidHeader(format!("{} = {}", name, value)))
        } else {
            Ok(value as u32)
        }
    };

    let year = order.read_i32(ints, NZYEAR);
    let reference = time::from_day_of_year(
        year,
        field(NZJDAY, "nzjday")?,
        field(NZHOUR, "nzhour")?,
        field(NZMIN, "nzmin")?,
        field(NZSEC, "nzsec")?,
        field(NZMSEC, "nzmsec")?,
    );
    reference.ok_or_else(|| SacError::InvalidHeader("reference time out of range".to_string()))
}

/// Encode a record as little-endian SAC.
///
/// The header stores the reference instant with millisecond resolution;
/// any remainder is folded into the relative time fields so absolute
/// times survive the round trip.
pub fn encode(record: &TraceRecord) -> Vec<u8> {
    let reference_ms = truncate_to_millis(record.reference_time);
    let carry = seconds_between(record.reference_time, reference_ms);

    let mut floats = [UNDEFINED; FLOAT_WORDS];
    let mut ints = [UNDEFINED_INT; INT_WORDS];
    let mut chars = [b' '; CHAR_BYTES];
    for slot in chars.chunks_mut(8) {
        slot[..6].copy_from_slice(b"-12345");
    }

    let npts = record.samples.len();
    let begin = record.begin + carry;
    let (min, max, sum) = record.samples.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, 0.0),
        |(lo, hi, total), &s| (lo.min(s), hi.max(s), total + s),
    );

    floats[DELTA] = record.delta as f32;
    floats[B] = begin as f32;
    floats[E] = (begin + npts.saturating_sub(1) as f64 * record.delta) as f32;
    floats[O] = (record.origin_offset + carry) as f32;
    if npts > 0 {
        floats[DEPMIN] = min as f32;
        floats[DEPMAX] = max as f32;
        floats[DEPMEN] = (sum / npts as f64) as f32;
    }
    let relative = |value: Option<f64>| value.map(|v| (v + carry) as f32).unwrap_or(UNDEFINED);
    floats[T1] = relative(
        record
            .predicted_arrival
            .map(|arrival| arrival + record.origin_offset),
    );
    floats[T2] = relative(record.pick);
    floats[T9] = relative(record.auxiliary_pick);
    let absolute = |value: Option<f64>| value.map(|v| v as f32).unwrap_or(UNDEFINED);
    floats[EVLA] = absolute(record.event_latitude);
    floats[EVLO] = absolute(record.event_longitude);
    floats[EVDP] = absolute(record.event_depth);
    floats[STLA] = absolute(record.station_latitude);
    floats[STLO] = absolute(record.station_longitude);
    floats[GCARC] = absolute(record.distance);
    floats[USER1] = absolute(record.snr);

    ints[NZYEAR] = reference_ms.year();
    ints[NZJDAY] = reference_ms.ordinal() as i32;
    ints[NZHOUR] = reference_ms.hour() as i32;
    ints[NZMIN] = reference_ms.minute() as i32;
    ints[NZSEC] = reference_ms.second() as i32;
    ints[NZMSEC] = (reference_ms.nanosecond() / 1_000_000) as i32;
    ints[NVHDR] = HEADER_VERSION;
    ints[NPTS] = npts as i32;
    ints[IFTYPE] = ITIME;
    ints[IZTYPE] = IB;
    ints[LEVEN] = 1;

    write_string(&mut chars, KSTNM, &record.station);
    write_string(&mut chars, KNETWK, &record.network);
    write_string(&mut chars, KHOLE, &record.location);
    write_string(&mut chars, KCMPNM, &record.channel);
    if let Some(phase) = &record.phase {
        write_string(&mut chars, KT1, phase);
    }

    let mut bytes = Vec::with_capacity(HEADER_BYTES + 4 * npts);
    for value in floats {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    for value in ints {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes.extend_from_slice(&chars);
    for sample in &record.samples {
        bytes.extend_from_slice(&(*sample as f32).to_le_bytes());
    }
    bytes
}

fn write_string(chars: &mut [u8], (offset, width): (usize, usize), value: &str) {
    if value.is_empty() {
        return;
    }
    let slot = &mut chars[offset..offset + width];
    slot.fill(b' ');
    let raw = value.as_bytes();
    let len = raw.len().min(width);
    slot[..len].copy_from_slice(&raw[..len]);
}

fn truncate_to_millis(instant: DateTime<Utc>) -> DateTime<Utc> {
    let sub_ms = instant.nanosecond() % 1_000_000;
    instant - Duration::nanoseconds(sub_ms as i64)
}

pub fn read(path: &Path) -> Result<TraceRecord, SacError> {
    let bytes = fs::read(path)?;
    decode(&bytes)
}

pub fn write(path: &Path, record: &TraceRecord) -> Result<(), SacError> {
    fs::write(path, encode(record))?;
    Ok(())
}
