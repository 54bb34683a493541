mod operation;
mod registry;
mod selectors;

pub use operation::{DataKind, Operation};
pub use registry::{EngineRegistry, EngineSpec};
pub use selectors::{EngineSelection, EngineSelector};
