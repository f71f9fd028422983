//! Defines the multibox detection loss.

use super::{
    cross_entropy::CrossEntropyLoss,
    matching::{self, MatchTarget},
    mining,
    misc::{GroundTruth, MultiBoxLossError, MultiBoxPrediction, ZeroPositivePolicy},
};
use crate::{box_coder::Variance, common::*, profiling::Timing};

pub use multibox_loss::*;
pub use multibox_loss_output::*;

mod multibox_loss {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct MultiBoxLossInit {
        /// The number of classes including background.
        pub num_classes: usize,
        pub overlap_thresh: Option<f64>,
        pub neg_pos_ratio: Option<usize>,
        pub neg_overlap: Option<f64>,
        pub do_hard_neg_mining: Option<bool>,
        pub object_score: Option<f64>,
        pub variance: Option<Variance>,
        pub loc_loss_weight: Option<f64>,
        pub zero_positive_policy: Option<ZeroPositivePolicy>,
        pub device: Option<Device>,
    }

    impl MultiBoxLossInit {
        pub fn new(num_classes: usize) -> Self {
            Self {
                num_classes,
                overlap_thresh: None,
                neg_pos_ratio: None,
                neg_overlap: None,
                do_hard_neg_mining: None,
                object_score: None,
                variance: None,
                loc_loss_weight: None,
                zero_positive_policy: None,
                device: None,
            }
        }

        pub fn build(self) -> Result<MultiBoxLoss> {
            let Self {
                num_classes,
                overlap_thresh,
                neg_pos_ratio,
                neg_overlap,
                do_hard_neg_mining,
                object_score,
                variance,
                loc_loss_weight,
                zero_positive_policy,
                device,
            } = self;

            let overlap_thresh = overlap_thresh.unwrap_or(0.5);
            let neg_pos_ratio = neg_pos_ratio.unwrap_or(3);
            let neg_overlap = neg_overlap.unwrap_or(overlap_thresh);
            let do_hard_neg_mining = do_hard_neg_mining.unwrap_or(true);
            let object_score = object_score.unwrap_or(0.01);
            let variance = variance.unwrap_or_default();
            let loc_loss_weight = loc_loss_weight.unwrap_or(1.0);
            let zero_positive_policy = zero_positive_policy.unwrap_or_default();

            ensure!(
                num_classes >= 2,
                "num_classes must be at least 2 including background, but get {}",
                num_classes
            );
            ensure!(
                (0.0..=1.0).contains(&overlap_thresh),
                "overlap_thresh must be in range [0, 1]"
            );
            ensure!(
                (0.0..=overlap_thresh).contains(&neg_overlap),
                "neg_overlap must be in range [0, overlap_thresh]"
            );
            ensure!(neg_pos_ratio > 0, "neg_pos_ratio must be positive");
            ensure!(
                (0.0..=1.0).contains(&object_score),
                "object_score must be in range [0, 1]"
            );
            ensure!(
                loc_loss_weight.is_finite() && loc_loss_weight >= 0.0,
                "loc_loss_weight must be non-negative"
            );

            Ok(MultiBoxLoss {
                num_classes,
                overlap_thresh,
                neg_pos_ratio,
                neg_overlap,
                do_hard_neg_mining,
                object_score,
                variance,
                loc_loss_weight,
                zero_positive_policy,
                device,
            })
        }
    }

    #[derive(Debug, Getters)]
    pub struct MultiBoxLoss {
        #[get = "pub"]
        num_classes: usize,
        overlap_thresh: f64,
        neg_pos_ratio: usize,
        neg_overlap: f64,
        do_hard_neg_mining: bool,
        object_score: f64,
        #[get = "pub"]
        variance: Variance,
        loc_loss_weight: f64,
        zero_positive_policy: ZeroPositivePolicy,
        /// The device of the targets, or the prediction's device if unset.
        #[get = "pub"]
        device: Option<Device>,
    }

    impl MultiBoxLoss {
        /// Compute the loss of a batch.
        ///
        /// The `priors` are center form boxes in shape `[num_priors, 4]` and
        /// `targets` holds one [GroundTruth] per image. If `filter_object` is
        /// set and the prediction carries ARM output, matched anchors whose
        /// objectness does not exceed `object_score` are not positive. They stay
        /// negative candidates for hard negative mining.
        pub fn forward(
            &self,
            prediction: &MultiBoxPrediction,
            priors: &Tensor,
            targets: &[GroundTruth],
            filter_object: bool,
        ) -> Result<MultiBoxLossOutput> {
            let mut timing = Timing::new("multibox loss");

            let MultiBoxPrediction {
                loc: loc_data,
                conf: conf_data,
                arm,
            } = prediction;
            let batch_size = prediction.batch_size();
            let num_priors = prediction.num_priors();
            let num_classes = self.num_classes as i64;
            ensure!(
                prediction.num_classes() == num_classes,
                "expect {} classes in prediction, but get {}",
                num_classes,
                prediction.num_classes()
            );

            // match priors and ground truths of every image
            let MatchTarget {
                loc: loc_t,
                conf: conf_t,
                overlap,
            } = self.build_targets(prediction, priors, targets)?;
            timing.add_event("match_targets");

            // positive anchors, and unmatched anchors in the neg_overlap band
            let matched = conf_t.gt(0);
            let positive = match arm {
                Some(arm) if filter_object => {
                    let is_object = arm.objectness().gt(self.object_score);
                    matched.logical_and(&is_object)
                }
                _ => matched.shallow_clone(),
            };
            let ignored = (self.neg_overlap < self.overlap_thresh).then(|| {
                matched
                    .logical_not()
                    .logical_and(&overlap.ge(self.neg_overlap))
            });
            let num_positives = positive.sum(Kind::Int64).int64_value(&[]);
            timing.add_event("positive_mask");

            // localization loss
            let loc_loss = {
                let mask = positive.unsqueeze(-1).expand_as(loc_data);
                let loc_p = loc_data.masked_select(&mask).view([-1, 4]);
                let loc_t = loc_t.masked_select(&mask).view([-1, 4]);
                loc_p.f_smooth_l1(&loc_t, 1.0)?.sum(Kind::Float)
            };
            timing.add_event("loc_loss");
            debug_assert!(!bool::from(loc_loss.isnan().any()), "NaN detected");

            // classification loss over positives and selected negatives
            let conf_loss = {
                let per_prior = CrossEntropyLoss::per_sample(
                    &conf_data.reshape(&[-1, num_classes]),
                    &conf_t.view([-1]),
                )?
                .view([batch_size, num_priors]);

                let negative = if self.do_hard_neg_mining {
                    mining::hard_negative_mining(
                        &per_prior.detach(),
                        &positive,
                        self.neg_pos_ratio,
                        ignored.as_ref(),
                    )?
                } else {
                    match &ignored {
                        Some(ignored) => positive.logical_or(ignored).logical_not(),
                        None => positive.logical_not(),
                    }
                };
                timing.add_event("hard_negative_mining");

                let support = positive.logical_or(&negative);
                per_prior.masked_select(&support).sum(Kind::Float)
            };
            timing.add_event("conf_loss");
            debug_assert!(!bool::from(conf_loss.isnan().any()), "NaN detected");

            // normalize by the number of positives
            let normalizer = match (num_positives, self.zero_positive_policy) {
                (0, ZeroPositivePolicy::Error) => {
                    return Err(MultiBoxLossError::NoPositiveMatches { batch_size }.into());
                }
                (0, ZeroPositivePolicy::Clamp) => {
                    warn!(
                        "no positive anchors in a batch of {} images, normalize by 1 instead",
                        batch_size
                    );
                    1.0
                }
                (num_positives, _) => num_positives as f64,
            };
            let loc_loss = loc_loss / normalizer;
            let conf_loss = conf_loss / normalizer;
            let total_loss = &conf_loss + self.loc_loss_weight * &loc_loss;
            timing.add_event("sum_losses");

            timing.report();

            Ok(MultiBoxLossOutput {
                total_loss,
                loc_loss,
                conf_loss,
                num_positives,
            })
        }

        /// Match every image in the batch and stack the targets.
        ///
        /// The output tensors have shapes `[batch, num_priors, 4]` and
        /// `[batch, num_priors]`. When the prediction carries ARM output, the
        /// priors are refined by the ARM offsets before matching.
        pub fn build_targets(
            &self,
            prediction: &MultiBoxPrediction,
            priors: &Tensor,
            targets: &[GroundTruth],
        ) -> Result<MatchTarget> {
            let batch_size = prediction.batch_size();
            let num_priors = prediction.num_priors();
            let device = self.device.unwrap_or_else(|| prediction.loc().device());
            ensure!(
                prediction.loc().device() == device,
                "the prediction is on {:?}, but the loss is configured on {:?}",
                prediction.loc().device(),
                device
            );
            ensure!(batch_size > 0, "the batch must not be empty");
            ensure!(
                targets.len() as i64 == batch_size,
                "expect {} ground truth entries, but get {}",
                batch_size,
                targets.len()
            );
            ensure!(
                priors.size2()? == (num_priors, 4),
                "expect priors in shape [{}, 4], but get {:?}",
                num_priors,
                priors.size()
            );
            let priors = priors.to_device(device);

            let matchings: Vec<MatchTarget> = targets
                .iter()
                .enumerate()
                .map(|(index, truth)| {
                    let truths = truth.boxes().to_device(device);
                    let labels = self.class_targets(&truth.labels().to_device(device));
                    let arm_loc = prediction
                        .arm()
                        .as_ref()
                        .map(|arm| arm.loc().select(0, index as i64));

                    matching::refine_match(
                        self.overlap_thresh,
                        &truths,
                        &priors,
                        self.variance,
                        &labels,
                        arm_loc.as_ref(),
                    )
                })
                .try_collect()?;

            let (locs, confs, overlaps) = matchings
                .into_iter()
                .map(|MatchTarget { loc, conf, overlap }| (loc, conf, overlap))
                .unzip_n_vec();

            Ok(MatchTarget {
                loc: Tensor::stack(&locs, 0),
                conf: Tensor::stack(&confs, 0),
                overlap: Tensor::stack(&overlaps, 0),
            })
        }

        /// Shift zero based labels so that 0 is background, or collapse them
        /// to the object class for binary detection.
        fn class_targets(&self, labels: &Tensor) -> Tensor {
            let labels = labels.to_kind(Kind::Int64) + 1;
            if self.num_classes == 2 {
                labels.gt(0).to_kind(Kind::Int64)
            } else {
                labels
            }
        }
    }
}

mod multibox_loss_output {
    use super::*;

    #[derive(Debug, TensorLike)]
    pub struct MultiBoxLossOutput {
        /// `conf_loss + loc_loss_weight * loc_loss`
        pub total_loss: Tensor,
        pub loc_loss: Tensor,
        pub conf_loss: Tensor,
        #[tensor_like(copy)]
        pub num_positives: i64,
    }

    impl MultiBoxLossOutput {
        pub fn weighted_mean<L>(iter: impl IntoIterator<Item = (L, f64)>) -> Result<Self>
        where
            L: Borrow<MultiBoxLossOutput>,
        {
            let outputs: Vec<_> = iter
                .into_iter()
                .map(|(output, weight)| (output.borrow().shallow_clone(), weight))
                .collect();
            let num_positives: i64 = outputs
                .iter()
                .map(|(output, _)| output.num_positives)
                .sum();

            let (total_loss_vec, loc_loss_vec, conf_loss_vec, weight_vec) = outputs
                .into_iter()
                .map(|(output, weight)| {
                    let MultiBoxLossOutput {
                        total_loss,
                        loc_loss,
                        conf_loss,
                        ..
                    } = output;
                    (total_loss, loc_loss, conf_loss, weight)
                })
                .unzip_n_vec();

            let weight_iter = weight_vec.iter().cloned();

            let total_loss = Tensor::f_weighted_mean_tensors(
                total_loss_vec.into_iter().zip(weight_iter.clone()),
            )?;
            let loc_loss =
                Tensor::f_weighted_mean_tensors(loc_loss_vec.into_iter().zip(weight_iter.clone()))?;
            let conf_loss =
                Tensor::f_weighted_mean_tensors(conf_loss_vec.into_iter().zip(weight_iter))?;

            Ok(MultiBoxLossOutput {
                total_loss,
                loc_loss,
                conf_loss,
                num_positives,
            })
        }
    }
}
