// Alignment container ("AQ") wire format
// Fixed-order, whitespace-delimited text consumed by the adaptive-stacking tool
//
// Layout (one item per line):
//   stationCount
//   eventLat eventLon eventDepth
//   year month day
//   hour minute second referenceDelta
//   sampleInterval phaseName
//   then per station:
//     qualityFlag sampleCount tshift stationName
//     sample_0 sample_1 ... sample_{n-1}

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::{FormatError, PickingError, PickingResult};
use crate::time::{self, add_seconds};
use crate::trace::record::TraceRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerHeader {
    pub event_latitude: f64,
    pub event_longitude: f64,
    pub event_depth: f64,

    /// Instant of sample 0 on the common time axis
    pub start: DateTime<Utc>,

    /// Seconds from the event origin to `start`
    pub reference_delta: f64,

    pub sample_interval: f64,
    pub phase: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StationBlock {
    /// 0 when an auxiliary pick was already present upstream, 1 otherwise
    pub quality_flag: u8,

    /// Predicted arrival of this station minus that of the reference station, seconds
    pub tshift: f64,

    pub station: String,
    pub samples: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentContainer {
    pub header: ContainerHeader,
    pub blocks: Vec<StationBlock>,
}

impl AlignmentContainer {
    pub fn station_count(&self) -> usize {
        self.blocks.len()
    }

    /// Event origin reconstructed from the header
    pub fn origin_time(&self) -> DateTime<Utc> {
        add_seconds(self.header.start, -self.header.reference_delta)
    }

    pub fn event_id(&self) -> String {
        time::event_id(self.origin_time())
    }

    /// Check the invariants the external parser relies on
    pub fn validate(&self) -> Result<(), FormatError> {
        if !(self.header.sample_interval > 0.0) {
            return Err(FormatError::Inconsistent {
                line: 5,
                reason: "sample interval must be positive".to_string(),
            });
        }
        if self.header.phase.is_empty() || self.header.phase.contains(char::is_whitespace) {
            return Err(FormatError::Inconsistent {
                line: 5,
                reason: format!("phase name {:?} is not a single token", self.header.phase),
            });
        }

        let expected = self.blocks.first().map(|b| b.samples.len());
        for (index, block) in self.blocks.iter().enumerate() {
            let line = 6 + 2 * index;
            if block.station.is_empty() || block.station.contains(char::is_whitespace) {
                return Err(FormatError::Inconsistent {
                    line,
                    reason: format!("station name {:?} is not a single token", block.station),
                });
            }
            if Some(block.samples.len()) != expected {
                return Err(FormatError::Inconsistent {
                    line,
                    reason: format!(
                        "station {} has {} samples, expected {}",
                        block.station,
                        block.samples.len(),
                        expected.unwrap_or(0)
                    ),
                });
            }
        }
        Ok(())
    }

    /// Render the text form. Shifts, the reference delta and the sample
    /// interval use shortest round-trip formatting; samples keep six
    /// significant digits.
    pub fn to_text(&self) -> String {
        let header = &self.header;
        let start = header.start;
        let mut out = String::new();

        let _ = writeln!(out, "{}", self.blocks.len());
        let _ = writeln!(
            out,
            "{:.6}\t{:.6}\t{:.6}",
            header.event_latitude, header.event_longitude, header.event_depth
        );
        let _ = writeln!(out, "{}\t{}\t{}", start.year(), start.month(), start.day());
        let _ = writeln!(
            out,
            "{}\t{}\t{:.6}\t{}",
            start.hour(),
            start.minute(),
            time::second_of_minute(start),
            header.reference_delta
        );
        let _ = writeln!(out, "{}\t{}", header.sample_interval, header.phase);

        for block in &self.blocks {
            let _ = writeln!(
                out,
                "{}\t{}\t{}\t{}",
                block.quality_flag,
                block.samples.len(),
                block.tshift,
                block.station
            );
            for sample in &block.samples {
                let _ = write!(out, "{:.5e} ", sample);
            }
            out.push('\n');
        }
        out
    }

    pub fn parse(text: &str) -> Result<Self, FormatError> {
        let mut lines = LineReader::new(text);

        let (line, fields) = lines.next("station count")?;
        let count: usize = field(&fields, 0, line, "stationCount")?;

        let (line, fields) = lines.next("event location")?;
        let event_latitude = number(&fields, 0, line, "eventLat")?;
        let event_longitude = number(&fields, 1, line, "eventLon")?;
        let event_depth = number(&fields, 2, line, "eventDepth")?;

        let (date_line, fields) = lines.next("start date")?;
        let year: i32 = field(&fields, 0, date_line, "year")?;
        let month: u32 = field(&fields, 1, date_line, "month")?;
        let day: u32 = field(&fields, 2, date_line, "day")?;

        let (line, fields) = lines.next("start time")?;
        let hour: u32 = field(&fields, 0, line, "hour")?;
        let minute: u32 = field(&fields, 1, line, "minute")?;
        let second = number(&fields, 2, line, "second")?;
        let reference_delta = number(&fields, 3, line, "referenceDelta")?;

        let start = time::from_calendar(year, month, day, hour, minute, second).ok_or_else(|| {
            FormatError::Inconsistent {
                line: date_line,
                reason: format!(
                    "invalid start {}-{}-{} {}:{}:{}",
                    year, month, day, hour, minute, second
                ),
            }
        })?;

        let (line, fields) = lines.next("sample interval")?;
        let sample_interval = number(&fields, 0, line, "sampleInterval")?;
        let phase: String = field(&fields, 1, line, "phaseName")?;

        let mut blocks = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let (line, fields) = lines.next("station block header")?;
            let quality_flag: u8 = field(&fields, 0, line, "qualityFlag")?;
            let sample_count: usize = field(&fields, 1, line, "sampleCount")?;
            let tshift = number(&fields, 2, line, "tshift")?;
            let station: String = field(&fields, 3, line, "stationName")?;

            let (line, fields) = lines.next("station samples")?;
            if fields.len() != sample_count {
                return Err(FormatError::Inconsistent {
                    line,
                    reason: format!(
                        "station {} declares {} samples, found {}",
                        station,
                        sample_count,
                        fields.len()
                    ),
                });
            }
            let samples = fields
                .iter()
                .map(|value| parse_number(value, line, "sample"))
                .collect::<Result<Vec<f64>, _>>()?;

            blocks.push(StationBlock {
                quality_flag,
                tshift,
                station,
                samples,
            });
        }

        if let Some((line, _)) = lines.remaining_content() {
            return Err(FormatError::Inconsistent {
                line,
                reason: format!("unexpected content after {} station blocks", count),
            });
        }

        let container = AlignmentContainer {
            header: ContainerHeader {
                event_latitude,
                event_longitude,
                event_depth,
                start,
                reference_delta,
                sample_interval,
                phase,
            },
            blocks,
        };
        container.validate()?;
        Ok(container)
    }

    pub fn write(&self, path: &Path) -> PickingResult<()> {
        self.validate().map_err(|source| PickingError::Format {
            kind: "alignment container",
            source,
        })?;
        fs::write(path, self.to_text())?;
        Ok(())
    }

    pub fn read(path: &Path) -> PickingResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text).map_err(|source| PickingError::Format {
            kind: "alignment container",
            source,
        })
    }

    /// Rebuild one trace per station block.
    ///
    /// Every block is sampled on the common axis, so each record starts
    /// at the header start instant; the reference instant is the origin.
    pub fn to_records(&self) -> Vec<TraceRecord> {
        let origin = self.origin_time();
        self.blocks
            .iter()
            .map(|block| {
                let mut record = TraceRecord::new(
                    block.station.clone(),
                    origin,
                    self.header.sample_interval,
                    block.samples.clone(),
                );
                record.begin = self.header.reference_delta;
                record.origin_offset = 0.0;
                record.event_latitude = Some(self.header.event_latitude);
                record.event_longitude = Some(self.header.event_longitude);
                record.event_depth = Some(self.header.event_depth);
                record.phase = Some(self.header.phase.clone());
                record
            })
            .collect()
    }
}

/// Line iterator that skips nothing but reports 1-based line numbers
struct LineReader<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
}

impl<'a> LineReader<'a> {
    fn new(text: &'a str) -> Self {
        LineReader {
            lines: text.lines().enumerate(),
        }
    }

    fn next(&mut self, expected: &'static str) -> Result<(usize, Vec<&'a str>), FormatError> {
        match self.lines.next() {
            Some((index, line)) => Ok((index + 1, line.split_whitespace().collect())),
            None => Err(FormatError::UnexpectedEof {
                line: 0,
                expected,
            }),
        }
    }

    /// First non-blank line left over, if any
    fn remaining_content(&mut self) -> Option<(usize, &'a str)> {
        self.lines
            .find(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| (index + 1, line))
    }
}

pub(crate) fn parse_number(value: &str, line: usize, name: &'static str) -> Result<f64, FormatError> {
    match value.parse::<f64>() {
        Ok(number) if number.is_finite() => Ok(number),
        _ => Err(FormatError::InvalidNumber {
            line,
            field: name,
            value: value.to_string(),
        }),
    }
}

/// Finite float at `index`
pub(crate) fn number(
    fields: &[&str],
    index: usize,
    line: usize,
    name: &'static str,
) -> Result<f64, FormatError> {
    let raw = fields
        .get(index)
        .ok_or(FormatError::MissingField { line, field: name })?;
    parse_number(raw, line, name)
}

pub(crate) fn field<T: FromStr>(
    fields: &[&str],
    index: usize,
    line: usize,
    name: &'static str,
) -> Result<T, FormatError> {
    let raw = fields
        .get(index)
        .ok_or(FormatError::MissingField { line, field: name })?;
    raw.parse::<T>().map_err(|_| FormatError::InvalidNumber {
        line,
        field: name,
        value: raw.to_string(),
    })
}
