// Quality module
// Signal-to-noise gating of station traces ahead of alignment

pub mod gate;

pub use gate::{GateOutcome, QualityGate, Rejection, RejectionReason};
