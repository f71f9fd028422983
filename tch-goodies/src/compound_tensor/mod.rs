mod cycxhw;
mod size;
mod tlbr;

pub use cycxhw::*;
pub use size::*;
pub use tlbr::*;
