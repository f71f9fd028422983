use crate::{
    checkpoint::LoadMode,
    common::*,
    dataset::{DatasetKind, EvaluatorKind},
    error::ConfigError,
};
use multibox::prior_box::{PriorBoxConfig, RetinaAnchorConfig, SsdPriorBoxConfig};

/// The supported network architectures.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, EnumIter, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Architecture {
    Ssd300,
    Ssd512,
    FpnSsd,
    RetinaNet,
    RefineDet,
    S3fd,
    ResNet,
    ChaNet,
}

/// The backbones with published pretrained weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Backbone {
    Vgg16,
    ResNet18,
    ResNet50,
}

impl fmt::Display for Backbone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl Architecture {
    pub fn is_detector(&self) -> bool {
        !matches!(self, Self::ResNet | Self::ChaNet)
    }

    /// Detectors that refine anchors before the final regression.
    pub fn is_two_stage(&self) -> bool {
        matches!(self, Self::RefineDet)
    }

    /// The fixed input size of a detector.
    pub fn image_size(&self) -> Option<usize> {
        let size = match self {
            Self::Ssd300 => 300,
            Self::Ssd512 | Self::FpnSsd | Self::RetinaNet => 512,
            Self::RefineDet => 320,
            Self::S3fd => 640,
            Self::ResNet | Self::ChaNet => return None,
        };
        Some(size)
    }

    /// The prior geometry of a detector.
    pub fn default_priors(&self) -> Option<PriorBoxConfig> {
        let priors = match self {
            Self::Ssd300 => SsdPriorBoxConfig::ssd300().into(),
            Self::Ssd512 | Self::FpnSsd => SsdPriorBoxConfig::ssd512().into(),
            Self::RetinaNet => RetinaAnchorConfig::retinanet512().into(),
            Self::RefineDet => SsdPriorBoxConfig::refinedet320().into(),
            Self::S3fd => SsdPriorBoxConfig::s3fd640().into(),
            Self::ResNet | Self::ChaNet => return None,
        };
        Some(priors)
    }

    /// The pretrained backbone of a detector and the way its weights are
    /// copied into the detector.
    pub fn pretrained_backbone(&self) -> Option<(Backbone, LoadMode)> {
        match self {
            Self::Ssd300 => Some((Backbone::Vgg16, LoadMode::Partial)),
            Self::FpnSsd | Self::RetinaNet => Some((Backbone::ResNet50, LoadMode::Partial)),
            Self::S3fd => Some((Backbone::Vgg16, LoadMode::Positional)),
            Self::Ssd512 | Self::RefineDet | Self::ResNet | Self::ChaNet => None,
        }
    }

    /// The backbones a classifier can be built on.
    pub fn supported_backbones(&self) -> &'static [Backbone] {
        match self {
            Self::ResNet => &[Backbone::ResNet18, Backbone::ResNet50],
            Self::ChaNet => &[Backbone::ResNet18],
            _ => &[],
        }
    }

    pub fn evaluator(&self, dataset: DatasetKind) -> Result<EvaluatorKind, ConfigError> {
        match (self, dataset) {
            (Self::S3fd, DatasetKind::Wider) => Ok(EvaluatorKind::WiderFace),
            _ => Err(ConfigError::UnsupportedEvaluator {
                architecture: *self,
                dataset,
            }),
        }
    }
}

impl FromStr for Architecture {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::iter()
            .find(|arch| arch.as_ref() == name)
            .ok_or_else(|| ConfigError::UnknownArchitecture {
                name: name.to_owned(),
            })
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}
