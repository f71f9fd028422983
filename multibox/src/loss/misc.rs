use crate::common::*;

/// Ground truth boxes and labels of one image.
#[derive(Debug, TensorLike, Getters)]
pub struct GroundTruth {
    /// Point form boxes in shape `[num_objects, 4]`.
    #[get = "pub"]
    boxes: Tensor,
    /// Zero based class labels in shape `[num_objects]` and kind `Int64`.
    #[get = "pub"]
    labels: Tensor,
}

impl GroundTruth {
    pub fn new(boxes: Tensor, labels: Tensor) -> Result<Self> {
        let (num_boxes, num_entries) = boxes.size2()?;
        let num_labels = labels.size1()?;
        ensure!(
            num_entries == 4,
            "expect boxes in shape [num_objects, 4], but get {:?}",
            boxes.size()
        );
        ensure!(
            num_boxes == num_labels,
            "the number of boxes ({}) and labels ({}) differ",
            num_boxes,
            num_labels
        );
        ensure!(
            boxes.device() == labels.device(),
            "boxes and labels must be on the same device"
        );

        Ok(Self {
            boxes: boxes.to_kind(Kind::Float),
            labels: labels.to_kind(Kind::Int64),
        })
    }

    /// An image without any object.
    pub fn empty(device: Device) -> Self {
        Self {
            boxes: Tensor::zeros(&[0, 4], (Kind::Float, device)),
            labels: Tensor::zeros(&[0], (Kind::Int64, device)),
        }
    }

    /// Build from `(xmin, ymin, xmax, ymax)` rows and labels on CPU.
    pub fn from_slices(boxes: &[[f32; 4]], labels: &[i64]) -> Result<Self> {
        let values: Vec<f32> = boxes.iter().flatten().cloned().collect();
        let boxes = Tensor::of_slice(&values).view([boxes.len() as i64, 4]);
        Self::new(boxes, Tensor::of_slice(labels))
    }

    pub fn num_objects(&self) -> i64 {
        self.labels.size()[0]
    }

    pub fn to_device(&self, device: Device) -> Self {
        Self {
            boxes: self.boxes.to_device(device),
            labels: self.labels.to_device(device),
        }
    }
}

/// The output of the anchor refinement branch of a two-stage detector.
#[derive(Debug, TensorLike, Getters)]
pub struct ArmOutput {
    /// Anchor offsets in shape `[batch, num_priors, 4]`.
    #[get = "pub"]
    pub(crate) loc: Tensor,
    /// Object/background logits in shape `[batch, num_priors, 2]`.
    #[get = "pub"]
    pub(crate) conf: Tensor,
}

impl ArmOutput {
    pub fn new(loc: Tensor, conf: Tensor) -> Result<Self> {
        let (batch_size, num_priors, num_entries) = loc.size3()?;
        ensure!(
            num_entries == 4,
            "expect ARM offsets in shape [batch, num_priors, 4], but get {:?}",
            loc.size()
        );
        ensure!(
            conf.size3()? == (batch_size, num_priors, 2),
            "expect ARM logits in shape [{}, {}, 2], but get {:?}",
            batch_size,
            num_priors,
            conf.size()
        );
        Ok(Self { loc, conf })
    }

    /// The probability of each anchor being an object in shape `[batch, num_priors]`.
    pub fn objectness(&self) -> Tensor {
        self.conf.softmax(-1, Kind::Float).i((.., .., 1))
    }
}

/// Detector predictions consumed by [MultiBoxLoss](super::MultiBoxLoss).
#[derive(Debug, TensorLike, Getters)]
pub struct MultiBoxPrediction {
    /// Box offsets in shape `[batch, num_priors, 4]`.
    #[get = "pub"]
    pub(crate) loc: Tensor,
    /// Class logits in shape `[batch, num_priors, num_classes]`.
    #[get = "pub"]
    pub(crate) conf: Tensor,
    #[get = "pub"]
    pub(crate) arm: Option<ArmOutput>,
}

impl MultiBoxPrediction {
    pub fn new(loc: Tensor, conf: Tensor) -> Result<Self> {
        let (batch_size, num_priors, num_entries) = loc.size3()?;
        let (conf_batch_size, conf_num_priors, _) = conf.size3()?;
        ensure!(
            num_entries == 4,
            "expect offsets in shape [batch, num_priors, 4], but get {:?}",
            loc.size()
        );
        ensure!(
            (batch_size, num_priors) == (conf_batch_size, conf_num_priors),
            "offsets in shape {:?} and logits in shape {:?} do not match",
            loc.size(),
            conf.size()
        );
        Ok(Self {
            loc,
            conf,
            arm: None,
        })
    }

    pub fn with_arm(self, arm: ArmOutput) -> Result<Self> {
        ensure!(
            arm.loc.size() == self.loc.size(),
            "ARM offsets in shape {:?} do not match offsets in shape {:?}",
            arm.loc.size(),
            self.loc.size()
        );
        Ok(Self {
            arm: Some(arm),
            ..self
        })
    }

    pub fn batch_size(&self) -> i64 {
        self.loc.size()[0]
    }

    pub fn num_priors(&self) -> i64 {
        self.loc.size()[1]
    }

    pub fn num_classes(&self) -> i64 {
        self.conf.size()[2]
    }
}

/// The conditions reported by [MultiBoxLoss](super::MultiBoxLoss).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MultiBoxLossError {
    #[error("no positive anchors in a batch of {batch_size} images")]
    NoPositiveMatches { batch_size: i64 },
}

/// The behavior when a batch contains no positive anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZeroPositivePolicy {
    /// Normalize by one instead and log a warning.
    Clamp,
    /// Fail with [MultiBoxLossError::NoPositiveMatches].
    Error,
}

impl Default for ZeroPositivePolicy {
    fn default() -> Self {
        Self::Clamp
    }
}
