// Stacking module
// External adaptive-stacking and plotting tools, plus the refined-timing table they produce

pub mod invoker;
pub mod params;
pub mod plot;
pub mod scratch;
pub mod timing;

pub use invoker::{event_id_from_file_name, output_names, StackingInvoker, StackingOutputs};
pub use plot::PlotInvoker;
pub use scratch::ScratchDir;
pub use timing::{RefinedTiming, TimingRow};
