// Malformed-input tests for the text files exchanged with the stacking tool
// Inputs are derived deterministically from a valid container and timing table

use aspick_lib::align::container::{AlignmentContainer, ContainerHeader, StationBlock};
use aspick_lib::stacking::timing::RefinedTiming;
use aspick_lib::time::from_calendar;
use aspick_lib::FormatError;

fn container() -> AlignmentContainer {
    AlignmentContainer {
        header: ContainerHeader {
            event_latitude: 51.2,
            event_longitude: -178.9,
            event_depth: 22.5,
            start: from_calendar(2003, 12, 31, 23, 59, 50.5).unwrap(),
            reference_delta: 412.5,
            sample_interval: 0.05,
            phase: "P".to_string(),
        },
        blocks: (0..3)
            .map(|i| StationBlock {
                quality_flag: (i % 2) as u8,
                tshift: -1.25 + i as f64,
                station: format!("ST{}", i),
                samples: (0..8).map(|k| ((k + i) as f64 * 0.7).sin()).collect(),
            })
            .collect(),
    }
}

/// Small xorshift generator so every run sees the same cases
struct Cases(u64);

impl Cases {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

#[test]
fn test_valid_container_survives_the_wire() {
    let original = container();
    let parsed = AlignmentContainer::parse(&original.to_text()).unwrap();
    assert_eq!(parsed.station_count(), 3);
    assert_eq!(parsed.header.start, original.header.start);
    for (a, b) in parsed.blocks.iter().zip(original.blocks.iter()) {
        assert_eq!(a.tshift, b.tshift);
        assert_eq!(a.samples.len(), b.samples.len());
    }
}

#[test]
fn test_station_count_mismatch() {
    let text = container().to_text();
    let mut lines: Vec<&str> = text.lines().collect();

    lines[0] = "4";
    assert!(matches!(
        AlignmentContainer::parse(&lines.join("\n")),
        Err(FormatError::UnexpectedEof { .. })
    ));

    lines[0] = "2";
    assert!(matches!(
        AlignmentContainer::parse(&lines.join("\n")),
        Err(FormatError::Inconsistent { line: 10, .. })
    ));
}

#[test]
fn test_truncated_blocks() {
    let text = container().to_text();
    let lines: Vec<&str> = text.lines().collect();
    for keep in 0..lines.len() {
        let truncated = lines[..keep].join("\n");
        assert!(
            AlignmentContainer::parse(&truncated).is_err(),
            "{} lines parsed",
            keep
        );
    }
}

#[test]
fn test_declared_sample_count_mismatch() {
    let text = container().to_text().replacen("\t8\t", "\t9\t", 1);
    assert!(matches!(
        AlignmentContainer::parse(&text),
        Err(FormatError::Inconsistent { line: 7, .. })
    ));
}

#[test]
fn test_non_numeric_fields_rejected() {
    let text = container().to_text();
    let mut cases = Cases(0x9e37_79b9_7f4a_7c15);
    let garbage = ["abc", "NaN", "inf", "--1", "1e", "0x10", ""];

    for _ in 0..300 {
        let mut lines: Vec<Vec<String>> = text
            .lines()
            .map(|l| l.split_whitespace().map(str::to_string).collect())
            .collect();
        // Station names and the phase are free text; corrupt only numeric fields
        let line = cases.below(lines.len());
        if lines[line].is_empty() {
            continue;
        }
        let column = cases.below(lines[line].len());
        let is_text = (line == 4 && column == 1) || (line >= 5 && (line - 5) % 2 == 0 && column == 3);
        if is_text {
            continue;
        }
        let replacement = garbage[cases.below(garbage.len())];
        lines[line][column] = replacement.to_string();

        let corrupted: Vec<String> = lines.iter().map(|fields| fields.join("\t")).collect();
        assert!(
            AlignmentContainer::parse(&corrupted.join("\n")).is_err(),
            "line {} column {} = {:?} was accepted",
            line + 1,
            column,
            replacement
        );
    }
}

#[test]
fn test_random_bytes_never_panic() {
    let mut cases = Cases(0x1234_5678_9abc_def1);
    let alphabet = b"0123456789.-e \t\nPSabc";
    for _ in 0..2000 {
        let len = cases.below(200);
        let text: String = (0..len)
            .map(|_| alphabet[cases.below(alphabet.len())] as char)
            .collect();
        let _ = AlignmentContainer::parse(&text);
        let _ = RefinedTiming::parse(&text, cases.below(10));
    }
}

#[test]
fn test_huge_station_count_is_rejected_cheaply() {
    let text = container()
        .to_text()
        .replacen("3\n", "18446744073709551615\n", 1);
    assert!(matches!(
        AlignmentContainer::parse(&text),
        Err(FormatError::UnexpectedEof { .. })
    ));
}

#[test]
fn test_timing_rows_with_wrong_arity() {
    let header = "h\n".repeat(8);
    for row in ["1", "1 ST0", "1 ST0 0.5", "1 ST0 0.5 0.0"] {
        let text = format!("{}{}\n", header, row);
        assert!(matches!(
            RefinedTiming::parse(&text, 8),
            Err(FormatError::MissingField { line: 9, .. })
        ));
    }

    let text = format!("{}1 ST0 0.5 x 0.25 trailing\n", header);
    let timing = RefinedTiming::parse(&text, 8).unwrap();
    assert_eq!(timing.rows[0].initial_correction, 0.25);
}
