pub mod config;
pub mod decoder;

pub use config::*;
pub use decoder::{configure, not_found, BoundaryJson};
