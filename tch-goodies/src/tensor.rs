use crate::common::*;

pub trait TensorExt {
    fn is_empty(&self) -> bool;

    /// Compute `log(sum(exp(x)))` along `dim` with the maximum shifted out.
    ///
    /// The reduced dimension is removed from the output.
    fn f_log_sum_exp(&self, dim: i64) -> Result<Tensor>;

    fn log_sum_exp(&self, dim: i64) -> Tensor {
        self.f_log_sum_exp(dim).unwrap()
    }

    /// Compute element-wise smooth-L1 loss against the target without reduction.
    ///
    /// It is quadratic below `beta` and linear above it.
    fn f_smooth_l1(&self, target: &Tensor, beta: f64) -> Result<Tensor>;

    fn smooth_l1(&self, target: &Tensor, beta: f64) -> Tensor {
        self.f_smooth_l1(target, beta).unwrap()
    }

    fn f_sum_tensors<T>(tensors: impl IntoIterator<Item = T>) -> Result<Tensor>
    where
        T: Borrow<Tensor>,
    {
        let mut iter = tensors.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| format_err!("the input iterator must not be empty"))?
            .borrow()
            .shallow_clone();
        let sum = iter.try_fold(first, |lhs, rhs| lhs.f_add(rhs.borrow()))?;
        Ok(sum)
    }

    fn f_weighted_mean_tensors<T>(pairs: impl IntoIterator<Item = (T, f64)>) -> Result<Tensor>
    where
        T: Borrow<Tensor>,
    {
        let weighted_pairs: Vec<_> = pairs
            .into_iter()
            .map(|(tensor, weight)| {
                ensure!(weight >= 0.0, "weights must be non-negative");
                Fallible::Ok((tensor.borrow() * weight, weight))
            })
            .try_collect()?;
        let (tensors, weights) = weighted_pairs.into_iter().unzip_n_vec();
        let sum_weights: f64 = weights.iter().cloned().sum();
        ensure!(sum_weights > 0.0, "the sum of weights must be positive");
        let sum_tensors = Self::f_sum_tensors(tensors)?;
        Ok(sum_tensors / sum_weights)
    }

    fn sum_tensors<T>(tensors: impl IntoIterator<Item = T>) -> Tensor
    where
        T: Borrow<Tensor>,
    {
        Self::f_sum_tensors(tensors).unwrap()
    }

    fn weighted_mean_tensors<T>(pairs: impl IntoIterator<Item = (T, f64)>) -> Tensor
    where
        T: Borrow<Tensor>,
    {
        Self::f_weighted_mean_tensors(pairs).unwrap()
    }
}

impl TensorExt for Tensor {
    fn is_empty(&self) -> bool {
        self.numel() == 0
    }

    fn f_log_sum_exp(&self, dim: i64) -> Result<Tensor> {
        ensure!(
            !self.is_empty(),
            "log_sum_exp is undefined on an empty tensor of shape {:?}",
            self.size()
        );
        let (max, _) = self.f_max_dim(dim, true)?;
        let max = max.detach();
        let sum = self
            .f_sub(&max)?
            .f_exp()?
            .f_sum_dim_intlist(&[dim], true, self.kind())?;
        let output = sum.f_log()?.f_add(&max)?.f_squeeze_dim(dim)?;
        Ok(output)
    }

    fn f_smooth_l1(&self, target: &Tensor, beta: f64) -> Result<Tensor> {
        ensure!(beta > 0.0, "beta must be positive, but get {}", beta);
        ensure!(
            self.size() == target.size(),
            "input and target shapes do not match: {:?} vs {:?}",
            self.size(),
            target.size()
        );

        let diff = self.f_sub(target)?.f_abs()?;
        let quadratic = diff.f_clamp_max(beta)?;
        let linear = diff.f_sub(&quadratic)?;
        let loss = &quadratic * &quadratic * (0.5 / beta) + linear;
        Ok(loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn log_sum_exp_is_stable() -> Result<()> {
        let input = Tensor::of_slice(&[1000f32, 1000.0, -5.0, -5.0]).view([2, 2]);
        let output: Vec<f32> = Vec::from(&input.log_sum_exp(1));
        assert_abs_diff_eq!(output[0], 1000.0 + 2f32.ln(), epsilon = 1e-3);
        assert_abs_diff_eq!(output[1], -5.0 + 2f32.ln(), epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn smooth_l1_test() -> Result<()> {
        let input = Tensor::of_slice(&[0f32, 0.5, 2.0, -3.0]);
        let target = Tensor::zeros(&[4], (Kind::Float, Device::Cpu));
        let loss: Vec<f32> = Vec::from(&input.f_smooth_l1(&target, 1.0)?);
        let expect = [0.0, 0.125, 1.5, 2.5];
        loss.iter().zip(expect).for_each(|(&actual, expect)| {
            assert_abs_diff_eq!(actual, expect, epsilon = 1e-6);
        });
        Ok(())
    }

    #[test]
    fn weighted_mean_test() -> Result<()> {
        let lhs = Tensor::of_slice(&[1f32]);
        let rhs = Tensor::of_slice(&[4f32]);
        let mean = Tensor::f_weighted_mean_tensors([(&lhs, 1.0), (&rhs, 2.0)])?;
        assert_abs_diff_eq!(mean.double_value(&[0]), 3.0, epsilon = 1e-6);
        Ok(())
    }
}
