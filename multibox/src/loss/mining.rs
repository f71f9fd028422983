use crate::common::*;

/// Select the hardest negatives of each image.
///
/// The `loss` has shape `[batch, num_priors]`, and `positive` and the optional
/// `ignored` are boolean masks of the same shape. Per image it picks at most
/// `min(neg_pos_ratio * num_positives, num_priors - 1)` priors that are neither
/// positive nor ignored, in descending loss order with ties broken by the lower
/// prior index. The output is a boolean mask in shape `[batch, num_priors]`.
pub fn hard_negative_mining(
    loss: &Tensor,
    positive: &Tensor,
    neg_pos_ratio: usize,
    ignored: Option<&Tensor>,
) -> Result<Tensor> {
    let (batch_size, num_priors) = loss.size2()?;
    ensure!(
        positive.size2()? == (batch_size, num_priors),
        "the positive mask in shape {:?} does not match the loss in shape {:?}",
        positive.size(),
        loss.size()
    );
    let excluded = match ignored {
        Some(ignored) => {
            ensure!(
                ignored.size2()? == (batch_size, num_priors),
                "the ignored mask in shape {:?} does not match the loss in shape {:?}",
                ignored.size(),
                loss.size()
            );
            positive.logical_or(ignored)
        }
        None => positive.shallow_clone(),
    };
    let device = loss.device();

    let to_cpu_bytes = |mask: &Tensor| -> Vec<u8> {
        Vec::from(&mask.to_device(Device::Cpu).to_kind(Kind::Uint8).reshape(&[-1]))
    };
    let losses: Vec<f32> = Vec::from(
        &loss
            .detach()
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .reshape(&[-1]),
    );
    let positive = to_cpu_bytes(positive);
    let excluded = to_cpu_bytes(&excluded);

    let num_priors = num_priors as usize;
    let max_negatives = num_priors.saturating_sub(1);

    let negative: Vec<u8> = izip!(
        losses.chunks(num_priors.max(1)),
        positive.chunks(num_priors.max(1)),
        excluded.chunks(num_priors.max(1))
    )
    .flat_map(|(losses, positive, excluded)| {
        let num_positives = positive.iter().filter(|&&flag| flag != 0).count();
        let num_negatives = (neg_pos_ratio * num_positives).min(max_negatives);

        let mut candidates: Vec<usize> = (0..num_priors)
            .filter(|&index| excluded[index] == 0)
            .collect();
        candidates.sort_by(|&lhs, &rhs| losses[rhs].total_cmp(&losses[lhs]));

        let mut mask = vec![0u8; num_priors];
        candidates
            .into_iter()
            .take(num_negatives)
            .for_each(|index| mask[index] = 1);
        mask
    })
    .collect();

    let negative = Tensor::of_slice(&negative)
        .view([batch_size, num_priors as i64])
        .to_kind(Kind::Bool)
        .to_device(device);
    Ok(negative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    fn bool_mask(values: &[u8], shape: [i64; 2]) -> Tensor {
        Tensor::of_slice(values).view(shape).to_kind(Kind::Bool)
    }

    fn selected(mask: &Tensor) -> Vec<usize> {
        let flags: Vec<u8> = Vec::from(&mask.to_kind(Kind::Uint8).reshape(&[-1]));
        flags
            .iter()
            .enumerate()
            .filter(|(_, &flag)| flag != 0)
            .map(|(index, _)| index)
            .collect()
    }

    #[test]
    fn selects_highest_loss_negatives() -> Result<()> {
        let mut rng = rand::thread_rng();
        let num_priors = 50;

        let mut losses: Vec<f32> = (0..num_priors).map(|value| value as f32 * 0.1).collect();
        losses.shuffle(&mut rng);
        let mut positive = vec![0u8; num_priors];
        let positive_indexes: Vec<usize> = (0..num_priors).choose_multiple(&mut rng, 4);
        positive_indexes.iter().for_each(|&index| positive[index] = 1);

        let loss = Tensor::of_slice(&losses).view([1, num_priors as i64]);
        let positive_mask = bool_mask(&positive, [1, num_priors as i64]);
        let negative = hard_negative_mining(&loss, &positive_mask, 3, None)?;
        let negative = selected(&negative);

        let mut expect: Vec<usize> = (0..num_priors)
            .filter(|index| !positive_indexes.contains(index))
            .sorted_by(|&lhs, &rhs| losses[rhs].total_cmp(&losses[lhs]))
            .take(12)
            .collect();
        expect.sort_unstable();

        assert_eq!(negative.len(), 12);
        assert_eq!(negative, expect);
        Ok(())
    }

    #[test]
    fn negatives_are_capped_by_prior_count() -> Result<()> {
        let loss = Tensor::of_slice(&[0.1f32, 0.2, 0.3, 0.4]).view([1, 4]);
        let positive = bool_mask(&[1, 0, 0, 0], [1, 4]);
        let negative = hard_negative_mining(&loss, &positive, 10, None)?;
        assert_eq!(selected(&negative), vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn ties_prefer_lower_index() -> Result<()> {
        let loss = Tensor::ones(&[1, 10], (Kind::Float, Device::Cpu));
        let mut positive = vec![0u8; 10];
        positive[2] = 1;
        let positive = bool_mask(&positive, [1, 10]);
        let negative = hard_negative_mining(&loss, &positive, 3, None)?;
        assert_eq!(selected(&negative), vec![0, 1, 3]);
        Ok(())
    }

    #[test]
    fn ignored_priors_are_skipped() -> Result<()> {
        let loss = Tensor::of_slice(&[5f32, 4.0, 3.0, 2.0, 1.0, 0.0]).view([1, 6]);
        let positive = bool_mask(&[0, 0, 0, 0, 0, 1], [1, 6]);
        let ignored = bool_mask(&[1, 0, 1, 0, 0, 0], [1, 6]);
        let negative = hard_negative_mining(&loss, &positive, 2, Some(&ignored))?;
        assert_eq!(selected(&negative), vec![1, 3]);
        Ok(())
    }

    #[test]
    fn images_are_mined_independently() -> Result<()> {
        let loss = Tensor::of_slice(&[1f32, 2.0, 3.0, 4.0, 4.0, 3.0, 2.0, 1.0]).view([2, 4]);
        let positive = bool_mask(&[1, 0, 0, 0, 0, 0, 0, 0], [2, 4]);
        let negative = hard_negative_mining(&loss, &positive, 1, None)?;
        assert_eq!(selected(&negative), vec![3]);
        Ok(())
    }
}
