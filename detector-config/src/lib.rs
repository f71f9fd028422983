//! Detector selection, validated configuration files and checkpoint loading.

mod common;
pub mod architecture;
pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;

pub use architecture::*;
pub use config::*;
pub use dataset::*;
pub use error::*;
