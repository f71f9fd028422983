use super::{cycxhw::CyCxHWTensor, size::SizeTensor};
use crate::{common::*, utils::EPSILON};

/// Checked tensor of batched box parameters in TLBR format.
///
/// The packed form used by [TlbrTensor::from_point_form] and
/// [TlbrTensor::to_point_form] is a `[batch, 4]` tensor with columns
/// `(xmin, ymin, xmax, ymax)`, that is `(l, t, r, b)`.
#[derive(Debug, TensorLike, Getters)]
pub struct TlbrTensor {
    /// The top parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) t: Tensor,
    /// The left parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) l: Tensor,
    /// The bottom parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) b: Tensor,
    /// The right parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) r: Tensor,
}

/// Unchecked tensor of batched box parameters in TLBR format.
#[derive(Debug, TensorLike)]
pub struct TlbrTensorUnchecked {
    /// The top parameter in shape `[batch, 1]`.
    pub t: Tensor,
    /// The left parameter in shape `[batch, 1]`.
    pub l: Tensor,
    /// The bottom parameter in shape `[batch, 1]`.
    pub b: Tensor,
    /// The right parameter in shape `[batch, 1]`.
    pub r: Tensor,
}

impl TlbrTensor {
    /// Split a `[batch, 4]` tensor of `(xmin, ymin, xmax, ymax)` rows.
    pub fn from_point_form(boxes: &Tensor) -> Result<Self> {
        let (_, num_entries) = boxes.size2()?;
        ensure!(
            num_entries == 4,
            "expect a [batch, 4] tensor, but get shape {:?}",
            boxes.size()
        );

        Ok(Self {
            l: boxes.i((.., 0..1)),
            t: boxes.i((.., 1..2)),
            r: boxes.i((.., 2..3)),
            b: boxes.i((.., 3..4)),
        })
    }

    /// Pack into a `[batch, 4]` tensor of `(xmin, ymin, xmax, ymax)` rows.
    pub fn to_point_form(&self) -> Tensor {
        let Self { t, l, b, r } = self;
        Tensor::cat(&[l, t, r, b], 1)
    }

    pub fn num_samples(&self) -> i64 {
        let (num, _) = self.t.size2().unwrap();
        num
    }

    pub fn device(&self) -> Device {
        self.t.device()
    }

    /// Compute the box size.
    pub fn size(&self) -> SizeTensor {
        let Self { t, l, b, r } = self;
        SizeTensor {
            h: b - t,
            w: r - l,
        }
    }

    /// Compute the box area in shape `[batch, 1]`.
    pub fn area(&self) -> Tensor {
        self.size().area()
    }

    /// Compute the pairwise intersection areas with the other box tensor.
    ///
    /// The output has shape `[self.num_samples(), other.num_samples()]`.
    pub fn intersect_area_matrix_with(&self, other: &Self) -> Tensor {
        let Self {
            t: lhs_t,
            l: lhs_l,
            b: lhs_b,
            r: lhs_r,
        } = self;
        let (rhs_t, rhs_l, rhs_b, rhs_r) = (
            other.t.view([1, -1]),
            other.l.view([1, -1]),
            other.b.view([1, -1]),
            other.r.view([1, -1]),
        );

        let max_t = lhs_t.maximum(&rhs_t);
        let max_l = lhs_l.maximum(&rhs_l);
        let min_b = lhs_b.minimum(&rhs_b);
        let min_r = lhs_r.minimum(&rhs_r);

        let inner_h = (min_b - max_t).clamp_min(0.0);
        let inner_w = (min_r - max_l).clamp_min(0.0);

        inner_h * inner_w
    }

    /// Compute the pairwise IoU (jaccard overlap) matrix with the other box tensor.
    ///
    /// The output has shape `[self.num_samples(), other.num_samples()]`.
    pub fn iou_matrix_with(&self, other: &Self) -> Tensor {
        let inter_area = self.intersect_area_matrix_with(other);
        let lhs_area = self.area();
        let rhs_area = other.area().view([1, -1]);
        let union_area = (lhs_area + rhs_area - &inter_area).clamp_min(EPSILON);
        inter_area / union_area
    }
}

impl TryFrom<TlbrTensorUnchecked> for TlbrTensor {
    type Error = Error;

    fn try_from(from: TlbrTensorUnchecked) -> Result<Self, Self::Error> {
        let TlbrTensorUnchecked { t, l, b, r } = from;
        match (t.size2()?, l.size2()?, b.size2()?, r.size2()?) {
            ((t_len, 1), (l_len, 1), (b_len, 1), (r_len, 1)) => ensure!(
                t_len == l_len && t_len == b_len && t_len == r_len,
                "size mismatch"
            ),
            _ => bail!("size mismatch"),
        };
        ensure!(
            hashset! {
                t.device(),
                l.device(),
                b.device(),
                r.device(),
            }
            .len()
                == 1,
            "device mismatch"
        );
        Ok(Self { t, l, b, r })
    }
}

impl From<TlbrTensor> for TlbrTensorUnchecked {
    fn from(from: TlbrTensor) -> Self {
        let TlbrTensor { t, l, b, r } = from;
        Self { t, l, b, r }
    }
}

impl From<&CyCxHWTensor> for TlbrTensor {
    fn from(from: &CyCxHWTensor) -> Self {
        let CyCxHWTensor { cy, cx, h, w } = from;

        let t = cy - h / 2.0;
        let b = cy + h / 2.0;
        let l = cx - w / 2.0;
        let r = cx + w / 2.0;

        Self { t, l, b, r }
    }
}
