// Alignment module
// Reference selection, sub-sample time shifting, and the container sent to the stacking tool

pub mod container;
pub mod reference;
pub mod serializer;
pub mod shift;

pub use container::{AlignmentContainer, ContainerHeader, StationBlock};
pub use reference::select_reference;
pub use serializer::{AlignedEvent, AlignmentSerializer};
pub use shift::{fractional_shift, peak_index};
