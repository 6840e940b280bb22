// Aspick - array alignment and adaptive-stacking pick propagation
// Module declarations

pub mod align;
pub mod error;
pub mod picks;
pub mod pipeline;
pub mod prepare;
pub mod quality;
pub mod stacking;
pub mod time;
pub mod trace;

pub use error::{FormatError, PickingError, PickingResult};
pub use pipeline::{run_events, EventOutcome, EventPipeline, PipelineConfig};
pub use trace::TraceRecord;
