//! Conversions between box representations and the variance-scaled
//! regression encoding used by multibox detectors.
//!
//! Point form boxes are `[n, 4]` tensors of `(xmin, ymin, xmax, ymax)` rows.
//! Center form boxes, including priors, are `[n, 4]` tensors of
//! `(cx, cy, w, h)` rows. Regression offsets share the center form layout.

use crate::common::*;

pub use variance::*;

mod variance {
    use super::*;

    /// Constant divisors applied to the center and size offsets.
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    #[serde(try_from = "[f64; 2]", into = "[f64; 2]")]
    pub struct Variance {
        center: f64,
        size: f64,
    }

    impl Variance {
        pub fn new(center: f64, size: f64) -> Result<Self> {
            ensure!(
                center.is_finite() && center > 0.0,
                "the center variance must be positive, but get {}",
                center
            );
            ensure!(
                size.is_finite() && size > 0.0,
                "the size variance must be positive, but get {}",
                size
            );
            Ok(Self { center, size })
        }

        pub fn center(&self) -> f64 {
            self.center
        }

        pub fn size(&self) -> f64 {
            self.size
        }
    }

    impl Default for Variance {
        fn default() -> Self {
            Self {
                center: 0.1,
                size: 0.2,
            }
        }
    }

    impl TryFrom<[f64; 2]> for Variance {
        type Error = Error;

        fn try_from([center, size]: [f64; 2]) -> Result<Self, Self::Error> {
            Self::new(center, size)
        }
    }

    impl From<Variance> for [f64; 2] {
        fn from(from: Variance) -> Self {
            [from.center, from.size]
        }
    }
}

/// Convert center form priors to point form.
pub fn point_form(priors: &Tensor) -> Result<Tensor> {
    let cycxhw = CyCxHWTensor::from_center_form(priors)?;
    Ok(TlbrTensor::from(&cycxhw).to_point_form())
}

/// Convert point form boxes to center form.
pub fn center_size(boxes: &Tensor) -> Result<Tensor> {
    let tlbr = TlbrTensor::from_point_form(boxes)?;
    Ok(CyCxHWTensor::from(&tlbr).to_center_form())
}

/// Encode matched point form boxes into offsets relative to center form priors.
///
/// The offsets are `(Δcx / w_p / v_c, Δcy / h_p / v_c, ln(w / w_p) / v_s, ln(h / h_p) / v_s)`.
pub fn encode(matched: &Tensor, priors: &Tensor, variance: Variance) -> Result<Tensor> {
    let matched = CyCxHWTensor::from(&TlbrTensor::from_point_form(matched)?);
    let priors = CyCxHWTensor::from_center_form(priors)?;
    ensure!(
        matched.num_samples() == priors.num_samples(),
        "the number of matched boxes ({}) and priors ({}) differ",
        matched.num_samples(),
        priors.num_samples()
    );

    let offset_cx = (matched.cx() - priors.cx()) / (priors.w() * variance.center());
    let offset_cy = (matched.cy() - priors.cy()) / (priors.h() * variance.center());
    let log_ratio = matched.size().log_ratio_to(&priors.size());
    let offset_w = log_ratio.w() / variance.size();
    let offset_h = log_ratio.h() / variance.size();

    Ok(Tensor::cat(&[offset_cx, offset_cy, offset_w, offset_h], 1))
}

/// Decode offsets against center form priors into point form boxes.
///
/// It is the inverse of [encode].
pub fn decode(loc: &Tensor, priors: &Tensor, variance: Variance) -> Result<Tensor> {
    let offsets = CyCxHWTensor::from_center_form(loc)?;
    let priors = CyCxHWTensor::from_center_form(priors)?;
    ensure!(
        offsets.num_samples() == priors.num_samples(),
        "the number of offsets ({}) and priors ({}) differ",
        offsets.num_samples(),
        priors.num_samples()
    );

    let cx = priors.cx() + offsets.cx() * variance.center() * priors.w();
    let cy = priors.cy() + offsets.cy() * variance.center() * priors.h();
    let w = priors.w() * (offsets.w() * variance.size()).exp();
    let h = priors.h() * (offsets.h() * variance.size()).exp();

    let boxes: CyCxHWTensor = CyCxHWTensorUnchecked { cy, cx, h, w }.try_into()?;
    Ok(TlbrTensor::from(&boxes).to_point_form())
}
