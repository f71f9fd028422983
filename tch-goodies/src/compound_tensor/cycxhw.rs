use super::{size::SizeTensor, tlbr::TlbrTensor};
use crate::common::*;

/// Checked tensor of batched box parameters in CyCxHW format.
///
/// The packed form used by [CyCxHWTensor::from_center_form] and
/// [CyCxHWTensor::to_center_form] is a `[batch, 4]` tensor with columns
/// `(cx, cy, w, h)`.
#[derive(Debug, TensorLike, Getters)]
pub struct CyCxHWTensor {
    /// The center y parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) cy: Tensor,
    /// The center x parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) cx: Tensor,
    /// The height parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) h: Tensor,
    /// The width parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) w: Tensor,
}

/// Unchecked tensor of batched box parameters in CyCxHW format.
#[derive(Debug, TensorLike)]
pub struct CyCxHWTensorUnchecked {
    /// The center y parameter in shape `[batch, 1]`.
    pub cy: Tensor,
    /// The center x parameter in shape `[batch, 1]`.
    pub cx: Tensor,
    /// The height parameter in shape `[batch, 1]`.
    pub h: Tensor,
    /// The width parameter in shape `[batch, 1]`.
    pub w: Tensor,
}

impl CyCxHWTensor {
    /// Split a `[batch, 4]` tensor of `(cx, cy, w, h)` rows.
    pub fn from_center_form(boxes: &Tensor) -> Result<Self> {
        let (_, num_entries) = boxes.size2()?;
        ensure!(
            num_entries == 4,
            "expect a [batch, 4] tensor, but get shape {:?}",
            boxes.size()
        );

        Ok(Self {
            cx: boxes.i((.., 0..1)),
            cy: boxes.i((.., 1..2)),
            w: boxes.i((.., 2..3)),
            h: boxes.i((.., 3..4)),
        })
    }

    /// Pack into a `[batch, 4]` tensor of `(cx, cy, w, h)` rows.
    pub fn to_center_form(&self) -> Tensor {
        let Self { cy, cx, h, w } = self;
        Tensor::cat(&[cx, cy, w, h], 1)
    }

    pub fn num_samples(&self) -> i64 {
        let (num, _) = self.cy.size2().unwrap();
        num
    }

    pub fn device(&self) -> Device {
        self.cy.device()
    }

    /// Compute box size.
    pub fn size(&self) -> SizeTensor {
        let Self { h, w, .. } = self;
        SizeTensor {
            h: h.shallow_clone(),
            w: w.shallow_clone(),
        }
    }

    /// Compute box area in shape `[batch, 1]`.
    pub fn area(&self) -> Tensor {
        &self.h * &self.w
    }

    /// Compute the pairwise IoU matrix with the other box tensor.
    pub fn iou_matrix_with(&self, other: &Self) -> Tensor {
        TlbrTensor::from(self).iou_matrix_with(&TlbrTensor::from(other))
    }
}

impl TryFrom<CyCxHWTensorUnchecked> for CyCxHWTensor {
    type Error = Error;

    fn try_from(from: CyCxHWTensorUnchecked) -> Result<Self, Self::Error> {
        let CyCxHWTensorUnchecked { cy, cx, h, w } = from;
        match (cy.size2()?, cx.size2()?, h.size2()?, w.size2()?) {
            ((cy_len, 1), (cx_len, 1), (h_len, 1), (w_len, 1)) => ensure!(
                cy_len == cx_len && cy_len == h_len && cy_len == w_len,
                "size mismatch"
            ),
            _ => bail!("size mismatch"),
        };
        ensure!(
            hashset! {
                cy.device(),
                cx.device(),
                h.device(),
                w.device(),
            }
            .len()
                == 1,
            "device mismatch"
        );
        Ok(Self { cy, cx, h, w })
    }
}

impl From<CyCxHWTensor> for CyCxHWTensorUnchecked {
    fn from(from: CyCxHWTensor) -> Self {
        let CyCxHWTensor { cy, cx, h, w } = from;
        Self { cy, cx, h, w }
    }
}

impl From<&TlbrTensor> for CyCxHWTensor {
    fn from(from: &TlbrTensor) -> Self {
        let TlbrTensor { t, l, b, r } = from;
        let cy = (t + b) / 2.0;
        let cx = (l + r) / 2.0;
        let h = b - t;
        let w = r - l;
        Self { cy, cx, h, w }
    }
}
