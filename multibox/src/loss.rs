//! Loss function building blocks.

mod config;
mod cross_entropy;
mod matching;
mod mining;
mod misc;
mod multibox_loss;

pub use config::*;
pub use cross_entropy::*;
pub use matching::*;
pub use mining::*;
pub use misc::*;
pub use multibox_loss::*;
