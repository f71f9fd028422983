use crate::common::*;

/// Cross entropy over logits with sparse class targets.
#[derive(Debug)]
pub struct CrossEntropyLoss {
    reduction: Reduction,
}

impl CrossEntropyLoss {
    pub fn new(reduction: Reduction) -> Self {
        Self { reduction }
    }

    /// Compute the unreduced loss `log_sum_exp(x) - x[target]` for each sample.
    ///
    /// The `input` has shape `[num_samples, num_classes]` and `target` is an
    /// `Int64` tensor in shape `[num_samples]`.
    pub fn per_sample(input: &Tensor, target: &Tensor) -> Result<Tensor> {
        let (num_samples, num_classes) = input.size2()?;
        ensure!(
            target.kind() == Kind::Int64 && target.size1()? == num_samples,
            "expect target a [{}] int64 tensor",
            num_samples
        );

        if num_samples == 0 {
            return Ok(Tensor::zeros(&[0], (Kind::Float, input.device())));
        }

        let min_target = target.min().int64_value(&[]);
        let max_target = target.max().int64_value(&[]);
        ensure!(
            min_target >= 0 && max_target < num_classes,
            "target values must be in range of [0, {}), but get [{}, {}]",
            num_classes,
            min_target,
            max_target
        );

        let log_sum_exp = input.f_log_sum_exp(1)?;
        let picked = input
            .f_gather(1, &target.view([-1, 1]), false)?
            .squeeze_dim(1);
        Ok(log_sum_exp - picked)
    }

    pub fn forward(&self, input: &Tensor, target: &Tensor) -> Result<Tensor> {
        let loss = Self::per_sample(input, target)?;

        // return zero tensor if the input is empty and the loss is reduced
        if loss.is_empty() && self.reduction != Reduction::None {
            return Ok(Tensor::zeros(&[], (Kind::Float, input.device())));
        }

        let loss = match self.reduction {
            Reduction::None => loss,
            Reduction::Sum => loss.sum(Kind::Float),
            Reduction::Mean => loss.mean(Kind::Float),
            Reduction::Other(code) => bail!("unsupported reduction code {}", code),
        };
        Ok(loss)
    }
}
