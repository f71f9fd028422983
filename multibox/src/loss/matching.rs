use crate::{
    box_coder::{self, Variance},
    common::*,
};

/// The overlap assigned to the best prior of every ground truth box.
///
/// It exceeds any IoU so the pair survives thresholding.
pub const FORCED_MATCH_OVERLAP: f64 = 2.0;

/// The per-prior training targets of one image.
#[derive(Debug, TensorLike, Getters)]
pub struct MatchTarget {
    /// Encoded regression targets in shape `[num_priors, 4]`.
    #[get = "pub"]
    pub(crate) loc: Tensor,
    /// Class targets in shape `[num_priors]`, where 0 is background.
    #[get = "pub"]
    pub(crate) conf: Tensor,
    /// The overlap of each prior with its matched ground truth in shape `[num_priors]`.
    #[get = "pub"]
    pub(crate) overlap: Tensor,
}

impl MatchTarget {
    /// Targets of an image without objects: every prior is background.
    pub fn background(num_priors: i64, device: Device) -> Self {
        Self {
            loc: Tensor::zeros(&[num_priors, 4], (Kind::Float, device)),
            conf: Tensor::zeros(&[num_priors], (Kind::Int64, device)),
            overlap: Tensor::zeros(&[num_priors], (Kind::Float, device)),
        }
    }

    pub fn num_priors(&self) -> i64 {
        self.conf.size()[0]
    }

    pub fn positive(&self) -> Tensor {
        self.conf.gt(0)
    }
}

/// Match center form priors to point form ground truth boxes.
///
/// The `labels` must already reserve 0 for background. Priors whose best
/// overlap is below `threshold` become background, except the best prior of
/// each ground truth, which is always assigned. If several ground truths share
/// the same best prior, the later one takes it.
pub fn match_priors(
    threshold: f64,
    truths: &Tensor,
    priors: &Tensor,
    variance: Variance,
    labels: &Tensor,
) -> Result<MatchTarget> {
    let prior_points = box_coder::point_form(priors)?;
    match_boxes(threshold, truths, priors, &prior_points, variance, labels)
}

/// Match against priors refined by the anchor refinement offsets.
///
/// The priors are decoded by `arm_loc` in shape `[num_priors, 4]` first, and
/// both matching and encoding use the refined boxes. Without offsets it is
/// the same as [match_priors].
pub fn refine_match(
    threshold: f64,
    truths: &Tensor,
    priors: &Tensor,
    variance: Variance,
    labels: &Tensor,
    arm_loc: Option<&Tensor>,
) -> Result<MatchTarget> {
    let arm_loc = match arm_loc {
        Some(arm_loc) => arm_loc,
        None => return match_priors(threshold, truths, priors, variance, labels),
    };

    let refined_points = box_coder::decode(&arm_loc.detach(), priors, variance)?;
    let refined = box_coder::center_size(&refined_points)?;
    match_boxes(threshold, truths, &refined, &refined_points, variance, labels)
}

fn match_boxes(
    threshold: f64,
    truths: &Tensor,
    priors: &Tensor,
    prior_points: &Tensor,
    variance: Variance,
    labels: &Tensor,
) -> Result<MatchTarget> {
    let (num_truths, num_entries) = truths.size2()?;
    let (num_priors, _) = priors.size2()?;
    ensure!(
        num_entries == 4,
        "expect ground truth boxes in shape [num_objects, 4], but get {:?}",
        truths.size()
    );
    ensure!(
        labels.size1()? == num_truths,
        "the number of boxes ({}) and labels ({}) differ",
        num_truths,
        labels.size()[0]
    );
    let device = priors.device();

    if num_truths == 0 {
        return Ok(MatchTarget::background(num_priors, device));
    }

    tch::no_grad(|| -> Result<_> {
        // [num_truths, num_priors]
        let overlaps = TlbrTensor::from_point_form(truths)?
            .iou_matrix_with(&TlbrTensor::from_point_form(prior_points)?);
        let (_, best_prior_index) = overlaps.max_dim(1, false);
        let (best_truth_overlap, best_truth_index) = overlaps.max_dim(0, false);

        let (truth_index, overlap) = {
            let best_prior_index: Vec<i64> = Vec::from(&best_prior_index.to_device(Device::Cpu));
            let mut truth_index: Vec<i64> = Vec::from(&best_truth_index.to_device(Device::Cpu));
            let mut overlap: Vec<f32> = Vec::from(
                &best_truth_overlap
                    .to_device(Device::Cpu)
                    .to_kind(Kind::Float),
            );

            best_prior_index
                .iter()
                .enumerate()
                .for_each(|(truth, &prior)| {
                    truth_index[prior as usize] = truth as i64;
                    overlap[prior as usize] = FORCED_MATCH_OVERLAP as f32;
                });

            (
                Tensor::of_slice(&truth_index).to_device(device),
                Tensor::of_slice(&overlap).to_device(device),
            )
        };

        let matched = truths.to_device(device).index_select(0, &truth_index);
        let conf = labels
            .to_device(device)
            .to_kind(Kind::Int64)
            .index_select(0, &truth_index)
            .masked_fill(&overlap.lt(threshold), 0);
        let loc = box_coder::encode(&matched, priors, variance)?;

        Ok(MatchTarget { loc, conf, overlap })
    })
}
