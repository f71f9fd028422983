//! Training losses of multibox (SSD-family) detectors.
//!
//! The crate assigns prior boxes to ground truth, mines hard negatives and
//! aggregates the localization and classification losses, including the
//! two-stage anchor refinement variant.

mod common;
pub mod box_coder;
pub mod loss;
pub mod prior_box;
pub mod profiling;
