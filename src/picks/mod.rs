// Picks module
// Back-projection of the refined reference pick onto every station

pub mod propagator;

pub use propagator::{
    compute_picks, corrected_pick, PickPropagator, PropagationReport, SkippedStation, UpdatedPick,
};
