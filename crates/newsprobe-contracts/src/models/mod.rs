mod registry;

pub use registry::{Backend, Endpoint, LocalFamily, ModelRef, ModelRegistry, ModelSpec};
