//! Tensor helpers shared by the multibox crates.

mod common;
pub mod compound_tensor;
pub mod tensor;
pub mod utils;

pub use compound_tensor::*;
pub use tensor::*;
