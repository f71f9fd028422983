use crate::common::*;

/// Unchecked tensor of batched box sizes.
#[derive(Debug, TensorLike)]
pub struct SizeTensorUnchecked {
    pub h: Tensor,
    pub w: Tensor,
}

/// Checked tensor of batched box sizes.
#[derive(Debug, TensorLike, Getters)]
pub struct SizeTensor {
    /// The height in shape `[batch, 1]`.
    #[get = "pub"]
    pub(super) h: Tensor,
    /// The width in shape `[batch, 1]`.
    #[get = "pub"]
    pub(super) w: Tensor,
}

impl SizeTensor {
    pub fn num_samples(&self) -> i64 {
        let (num, _) = self.h.size2().unwrap();
        num
    }

    pub fn device(&self) -> Device {
        self.h.device()
    }

    /// Compute the area in shape `[batch, 1]`.
    pub fn area(&self) -> Tensor {
        &self.h * &self.w
    }

    /// Compute the element-wise natural log of size ratios to the other sizes.
    pub fn log_ratio_to(&self, other: &Self) -> SizeTensor {
        SizeTensor {
            h: (&self.h / &other.h).log(),
            w: (&self.w / &other.w).log(),
        }
    }
}

impl TryFrom<SizeTensorUnchecked> for SizeTensor {
    type Error = Error;

    fn try_from(from: SizeTensorUnchecked) -> Result<Self, Self::Error> {
        let SizeTensorUnchecked { h, w } = from;
        match (h.size2()?, w.size2()?) {
            ((h_len, 1), (w_len, 1)) => ensure!(h_len == w_len, "size mismatch"),
            _ => bail!("size mismatch"),
        };
        ensure!(h.device() == w.device(), "device mismatch");
        Ok(Self { h, w })
    }
}
