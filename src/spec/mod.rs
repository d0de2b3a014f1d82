pub mod component;
pub mod registry;

pub use component::*;
pub use registry::*;
