mod registry;

pub use registry::{ModelRegistry, ModelSpec};
