use super::{MultiBoxLossInit, ZeroPositivePolicy};
use crate::{box_coder::Variance, common::*};

/// The loss function configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LossConfig {
    /// The number of classes including background.
    pub num_classes: usize,
    /// The IoU threshold above which a prior is matched to a ground truth.
    #[serde(default = "default_overlap_thresh")]
    pub overlap_thresh: R64,
    /// The background class index. Only 0 is supported.
    #[serde(default)]
    pub background_label_id: usize,
    /// Match ground truth against priors. Only `true` is supported.
    #[serde(default = "default_true")]
    pub use_prior_for_matching: bool,
    /// Select negatives by hard negative mining, or use all negatives if disabled.
    #[serde(default = "default_true")]
    pub do_hard_neg_mining: bool,
    /// The maximum ratio of negatives to positives per image.
    #[serde(default = "default_neg_pos_ratio")]
    pub neg_pos_ratio: usize,
    /// Unmatched priors overlapping a ground truth by at least this much are
    /// not used as negatives. Defaults to `overlap_thresh`.
    #[serde(default)]
    pub neg_overlap: Option<R64>,
    /// Encode targets in the loss. Only `false` is supported.
    #[serde(default)]
    pub encode_target: bool,
    /// The ARM objectness at or below which a matched anchor is dropped.
    #[serde(default = "default_object_score")]
    pub object_score: R64,
    #[serde(default)]
    pub variance: Variance,
    /// The device where the targets are built. The targets follow the
    /// prediction if it is not set.
    #[serde(with = "serde_opt_device", default)]
    pub device: Option<Device>,
    /// The weight factor of localization loss.
    #[serde(default = "default_loc_loss_weight")]
    pub loc_loss_weight: R64,
    #[serde(default)]
    pub zero_positive_policy: ZeroPositivePolicy,
}

impl LossConfig {
    /// A configuration with default settings.
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            overlap_thresh: default_overlap_thresh(),
            background_label_id: 0,
            use_prior_for_matching: true,
            do_hard_neg_mining: true,
            neg_pos_ratio: default_neg_pos_ratio(),
            neg_overlap: None,
            encode_target: false,
            object_score: default_object_score(),
            variance: Variance::default(),
            device: None,
            loc_loss_weight: default_loc_loss_weight(),
            zero_positive_policy: ZeroPositivePolicy::default(),
        }
    }

    pub fn multibox_loss_init(&self) -> Result<MultiBoxLossInit> {
        let Self {
            num_classes,
            overlap_thresh,
            background_label_id,
            use_prior_for_matching,
            do_hard_neg_mining,
            neg_pos_ratio,
            neg_overlap,
            encode_target,
            object_score,
            variance,
            device,
            loc_loss_weight,
            zero_positive_policy,
        } = *self;

        ensure!(
            background_label_id == 0,
            "background_label_id must be 0, but get {}",
            background_label_id
        );
        ensure!(
            use_prior_for_matching,
            "use_prior_for_matching must be enabled"
        );
        ensure!(!encode_target, "encode_target is not supported");

        Ok(MultiBoxLossInit {
            num_classes,
            overlap_thresh: Some(overlap_thresh.raw()),
            neg_pos_ratio: Some(neg_pos_ratio),
            neg_overlap: neg_overlap.map(|value| value.raw()),
            do_hard_neg_mining: Some(do_hard_neg_mining),
            object_score: Some(object_score.raw()),
            variance: Some(variance),
            loc_loss_weight: Some(loc_loss_weight.raw()),
            zero_positive_policy: Some(zero_positive_policy),
            device,
        })
    }

    /// Check the configuration by building the loss once.
    pub fn validate(&self) -> Result<()> {
        self.multibox_loss_init()?.build()?;
        Ok(())
    }
}

fn default_overlap_thresh() -> R64 {
    r64(0.5)
}

fn default_true() -> bool {
    true
}

fn default_neg_pos_ratio() -> usize {
    3
}

fn default_object_score() -> R64 {
    r64(0.01)
}

mod serde_opt_device {
    use super::*;
    use serde::{Deserializer, Serializer};

    #[derive(Serialize, Deserialize)]
    struct DeviceWrapper(#[serde(with = "tch_serde::serde_device")] Device);

    pub fn serialize<S>(device: &Option<Device>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        device.map(DeviceWrapper).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Device>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let device = Option::<DeviceWrapper>::deserialize(deserializer)?;
        Ok(device.map(|DeviceWrapper(device)| device))
    }
}

fn default_loc_loss_weight() -> R64 {
    r64(1.0)
}
