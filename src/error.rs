// Error taxonomy for the alignment and pick-propagation pipeline
// Quality rejections are recoverable per trace; everything else aborts one event

use thiserror::Error;

use crate::trace::sac::SacError;

/// Errors raised while parsing the fixed-format text files exchanged with
/// the external stacking tool (alignment containers and refined timing).
#[derive(Debug, Error, PartialEq)]
pub enum FormatError {
    #[error("line {line}: expected {expected}, found end of input")]
    UnexpectedEof { line: usize, expected: &'static str },

    #[error("line {line}: missing field `{field}`")]
    MissingField { line: usize, field: &'static str },

    #[error("line {line}: field `{field}` is not a valid number: {value:?}")]
    InvalidNumber {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("line {line}: {reason}")]
    Inconsistent { line: usize, reason: String },
}

#[derive(Debug, Error)]
pub enum PickingError {
    #[error("Noise window of station {station} carries no energy")]
    InsufficientSignal { station: String },

    #[error("Only {found} stations available, at least {required} required")]
    InsufficientStations { found: usize, required: usize },

    #[error("Stacking failed for event {event_id} (exit status {status:?}): {reason}")]
    StackingExecution {
        event_id: String,
        status: Option<i32>,
        reason: String,
    },

    #[error("Reference station {station:?} not found for event {event_id}")]
    ReferenceStationNotFound {
        event_id: String,
        station: Option<String>,
    },

    #[error("Multiple reference traces found for event {event_id}: {matches:?}")]
    AmbiguousReferenceMatch {
        event_id: String,
        matches: Vec<String>,
    },

    #[error("Reference trace of station {station} carries no secondary pick")]
    MissingReferencePick { station: String },

    #[error("Trace of station {station} is missing header field {field}")]
    MissingHeader { station: String, field: &'static str },

    #[error("Station {station} is sampled at {delta} s, expected {expected} s")]
    InconsistentSampling {
        station: String,
        delta: f64,
        expected: f64,
    },

    #[error("Event id {0:?} is not of the form YYYYMMDDhhmmss")]
    InvalidEventId(String),

    #[error("Station {station} has origin {found}, not event {event_id}")]
    EventMismatch {
        event_id: String,
        station: String,
        found: String,
    },

    #[error("Travel time unavailable: {0}")]
    TravelTime(String),

    #[error("Signal conditioning failed: {0}")]
    Conditioning(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Event worker failed: {0}")]
    Worker(String),

    #[error("Malformed {kind} file: {source}")]
    Format {
        kind: &'static str,
        #[source]
        source: FormatError,
    },

    #[error("SAC error: {0}")]
    Sac(#[from] SacError),

    #[error("FFT error: {0}")]
    Fft(#[from] realfft::FftError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PickingError {
    /// Whether this error only disqualifies a single trace rather than the event
    pub fn is_trace_local(&self) -> bool {
        matches!(self, PickingError::InsufficientSignal { .. })
    }
}

pub type PickingResult<T> = Result<T, PickingError>;
