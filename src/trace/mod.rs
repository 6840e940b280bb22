// Trace module
// Station seismograms, their SAC persistence, and the on-disk event layout

pub mod record;
pub mod sac;
pub mod store;

pub use record::{peak_normalize, TraceRecord};
pub use sac::SacError;
pub use store::{Artifact, TraceStore};
