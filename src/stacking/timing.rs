// Refined-timing table
// Per-station time corrections reported by the stacking tool after convergence

use std::path::Path;

use crate::align::container::{field, parse_number};
use crate::error::{FormatError, PickingError, PickingResult};

/// One station row of the refined-timing table
#[derive(Debug, Clone, PartialEq)]
pub struct TimingRow {
    pub station: String,
    /// Correction after the final stacking iteration, seconds
    pub final_correction: f64,
    /// Correction before the first iteration, seconds
    pub initial_correction: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefinedTiming {
    pub rows: Vec<TimingRow>,
}

impl RefinedTiming {
    /// Parse the table, skipping `header_lines` leading lines.
    ///
    /// Row columns are whitespace separated: index, station, final
    /// correction, an unused column, initial correction. Extra trailing
    /// columns are ignored and blank lines are skipped.
    pub fn parse(text: &str, header_lines: usize) -> Result<Self, FormatError> {
        let mut lines = text.lines().enumerate();
        for skipped in 0..header_lines {
            if lines.next().is_none() {
                return Err(FormatError::UnexpectedEof {
                    line: skipped + 1,
                    expected: "timing header",
                });
            }
        }

        let mut rows = Vec::new();
        for (index, raw) in lines {
            let line = index + 1;
            let fields: Vec<&str> = raw.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            if fields.len() < 5 {
                return Err(FormatError::MissingField {
                    line,
                    field: "initial_correction",
                });
            }

            let station: String = field(&fields, 1, line, "station")?;
            rows.push(TimingRow {
                station,
                final_correction: parse_number(fields[2], line, "final_correction")?,
                initial_correction: parse_number(fields[4], line, "initial_correction")?,
            });
        }

        Ok(RefinedTiming { rows })
    }

    pub fn read(path: &Path, header_lines: usize) -> PickingResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, header_lines).map_err(|source| PickingError::Format {
            kind: "refined timing",
            source,
        })
    }

    /// First row for `station`
    pub fn row(&self, station: &str) -> Option<&TimingRow> {
        self.rows.iter().find(|row| row.station == station)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "tcas refined timing\niterations 10\n\n\n\n\n\n  n  sta   final   err  initial\n";

    #[test]
    fn test_parse_rows() {
        let text = format!(
            "{}1 ST01 0.125 0.01 -0.250\n2 ST02 -1.5 0.02 0.0 extra\n\n3 ST01 9.0 0.0 9.0\n",
            HEADER
        );
        let timing = RefinedTiming::parse(&text, 8).unwrap();
        assert_eq!(timing.rows.len(), 3);

        let first = timing.row("ST01").unwrap();
        assert_eq!(first.final_correction, 0.125);
        assert_eq!(first.initial_correction, -0.25);
        assert_eq!(timing.row("ST02").unwrap().final_correction, -1.5);
        assert!(timing.row("ST03").is_none());
    }

    #[test]
    fn test_header_only_is_empty() {
        let timing = RefinedTiming::parse(HEADER, 8).unwrap();
        assert!(timing.rows.is_empty());
    }

    #[test]
    fn test_short_header_is_rejected() {
        assert_eq!(
            RefinedTiming::parse("only\nthree\nlines\n", 8),
            Err(FormatError::UnexpectedEof {
                line: 4,
                expected: "timing header"
            })
        );
    }

    #[test]
    fn test_malformed_rows() {
        let short = format!("{}1 ST01 0.1 0.0\n", HEADER);
        assert!(matches!(
            RefinedTiming::parse(&short, 8),
            Err(FormatError::MissingField { line: 9, .. })
        ));

        let bad = format!("{}1 ST01 abc 0.0 0.1\n", HEADER);
        assert!(matches!(
            RefinedTiming::parse(&bad, 8),
            Err(FormatError::InvalidNumber {
                field: "final_correction",
                ..
            })
        ));

        let nan = format!("{}1 ST01 0.1 0.0 NaN\n", HEADER);
        assert!(RefinedTiming::parse(&nan, 8).is_err());
    }

    #[test]
    fn test_arbitrary_text_never_panics() {
        // Deterministic pseudo-random inputs built from a small alphabet
        let alphabet = ['1', '.', '-', ' ', '\n', 'a', 'S', 'e', '\t', '9'];
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..500 {
            let mut text = String::new();
            for _ in 0..64 {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                text.push(alphabet[(state % alphabet.len() as u64) as usize]);
            }
            let _ = RefinedTiming::parse(&text, 2);
        }
    }

    #[test]
    fn test_read_wraps_format_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rts1.ttr");
        std::fs::write(&path, "x\n").unwrap();
        assert!(matches!(
            RefinedTiming::read(&path, 8),
            Err(PickingError::Format {
                kind: "refined timing",
                ..
            })
        ));
    }
}
