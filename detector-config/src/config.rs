//! Configuration files of detectors and classifiers.

use crate::{
    architecture::{Architecture, Backbone},
    common::*,
    dataset::DatasetKind,
    error::ConfigError,
};
use multibox::{
    loss::{LossConfig, MultiBoxLoss},
    prior_box::PriorBoxConfig,
};

pub use classifier::*;
pub use config::*;
pub use detector::*;
pub use optimizer::*;

mod config {
    use super::*;

    /// The configuration file, tagged by the architecture name.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "architecture", rename_all = "lowercase")]
    pub enum Config {
        Ssd300(DetectorConfig),
        Ssd512(DetectorConfig),
        FpnSsd(DetectorConfig),
        RetinaNet(DetectorConfig),
        RefineDet(DetectorConfig),
        S3fd(DetectorConfig),
        ResNet(ClassifierConfig),
        ChaNet(ClassifierConfig),
    }

    impl Config {
        /// Load and validate a JSON5 configuration file.
        pub fn open<P>(path: P) -> Result<Self>
        where
            P: AsRef<Path>,
        {
            let path = path.as_ref();
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("unable to read config file {}", path.display()))?;
            let config: Self = text
                .parse()
                .with_context(|| format!("invalid config file {}", path.display()))?;
            info!("loaded {} config from {}", config.architecture(), path.display());
            Ok(config)
        }

        pub fn architecture(&self) -> Architecture {
            match self {
                Self::Ssd300(_) => Architecture::Ssd300,
                Self::Ssd512(_) => Architecture::Ssd512,
                Self::FpnSsd(_) => Architecture::FpnSsd,
                Self::RetinaNet(_) => Architecture::RetinaNet,
                Self::RefineDet(_) => Architecture::RefineDet,
                Self::S3fd(_) => Architecture::S3fd,
                Self::ResNet(_) => Architecture::ResNet,
                Self::ChaNet(_) => Architecture::ChaNet,
            }
        }

        pub fn detector(&self) -> Option<&DetectorConfig> {
            match self {
                Self::Ssd300(config)
                | Self::Ssd512(config)
                | Self::FpnSsd(config)
                | Self::RetinaNet(config)
                | Self::RefineDet(config)
                | Self::S3fd(config) => Some(config),
                Self::ResNet(_) | Self::ChaNet(_) => None,
            }
        }

        pub fn classifier(&self) -> Option<&ClassifierConfig> {
            match self {
                Self::ResNet(config) | Self::ChaNet(config) => Some(config),
                _ => None,
            }
        }

        pub fn validate(&self) -> Result<()> {
            let architecture = self.architecture();
            match self {
                Self::Ssd300(config)
                | Self::Ssd512(config)
                | Self::FpnSsd(config)
                | Self::RetinaNet(config)
                | Self::RefineDet(config)
                | Self::S3fd(config) => config.validate(architecture),
                Self::ResNet(config) | Self::ChaNet(config) => config.validate(architecture),
            }
        }

        /// The prior geometry of a detector, from the file or the architecture default.
        pub fn priors(&self) -> Option<PriorBoxConfig> {
            let config = self.detector()?;
            config
                .priors
                .clone()
                .or_else(|| self.architecture().default_priors())
        }

        /// Build the detection losses of a detector.
        pub fn detector_losses(&self) -> Result<Option<DetectorLosses>> {
            self.detector()
                .map(|config| config.losses(self.architecture()))
                .transpose()
        }
    }

    impl FromStr for Config {
        type Err = Error;

        fn from_str(text: &str) -> Result<Self, Self::Err> {
            let config: Self = json5::from_str(text)?;
            config.validate()?;
            Ok(config)
        }
    }
}

mod detector {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct DetectorConfig {
        /// The input image size. It must agree with the architecture.
        pub image_size: usize,
        pub dataset: DatasetKind,
        pub loss: LossConfig,
        /// Overrides the default prior geometry of the architecture.
        #[serde(default)]
        pub priors: Option<PriorBoxConfig>,
        #[serde(default)]
        pub optimizer: OptimizerConfig,
        /// Initialize the backbone from pretrained weights.
        #[serde(default)]
        pub use_pretrained: bool,
    }

    impl DetectorConfig {
        pub fn validate(&self, architecture: Architecture) -> Result<()> {
            let expected = architecture
                .image_size()
                .ok_or_else(|| format_err!("{} is not a detector", architecture))?;
            if self.image_size != expected {
                return Err(ConfigError::ImageSizeMismatch {
                    architecture,
                    expected,
                    actual: self.image_size,
                }
                .into());
            }

            if let Some(priors) = &self.priors {
                ensure!(
                    priors.image_size() == self.image_size,
                    "the prior geometry is made for image size {}, but the detector uses {}",
                    priors.image_size(),
                    self.image_size
                );
                priors.validate()?;
            }

            self.loss.validate()?;
            self.optimizer.validate()?;
            Ok(())
        }

        /// Build the detection losses.
        ///
        /// Two-stage detectors get an extra object-vs-background loss for the
        /// anchor refinement branch.
        pub fn losses(&self, architecture: Architecture) -> Result<DetectorLosses> {
            let detection = self.loss.multibox_loss_init()?.build()?;
            let refinement = if architecture.is_two_stage() {
                let config = LossConfig {
                    num_classes: 2,
                    ..self.loss.clone()
                };
                Some(config.multibox_loss_init()?.build()?)
            } else {
                None
            };

            Ok(DetectorLosses {
                detection,
                refinement,
            })
        }
    }

    #[derive(Debug)]
    pub struct DetectorLosses {
        /// The loss of the final detection branch.
        pub detection: MultiBoxLoss,
        /// The binary loss of the anchor refinement branch.
        pub refinement: Option<MultiBoxLoss>,
    }
}

mod classifier {
    use super::*;

    /// Number of classes at each level of the label hierarchy.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct ClassCounts {
        pub first: usize,
        pub middle: usize,
        pub last: usize,
    }

    impl Default for ClassCounts {
        fn default() -> Self {
            Self {
                first: 19,
                middle: 21,
                last: 28,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct ClassifierConfig {
        #[serde(default = "default_backbone")]
        pub backbone: Backbone,
        #[serde(default = "default_image_size")]
        pub image_size: usize,
        #[serde(default)]
        pub class_counts: ClassCounts,
        #[serde(default = "default_use_pretrained")]
        pub use_pretrained: bool,
        #[serde(default)]
        pub optimizer: OptimizerConfig,
    }

    impl Default for ClassifierConfig {
        fn default() -> Self {
            Self {
                backbone: default_backbone(),
                image_size: default_image_size(),
                class_counts: ClassCounts::default(),
                use_pretrained: default_use_pretrained(),
                optimizer: OptimizerConfig::default(),
            }
        }
    }

    impl ClassifierConfig {
        pub fn validate(&self, architecture: Architecture) -> Result<()> {
            if !architecture.supported_backbones().contains(&self.backbone) {
                return Err(ConfigError::UnsupportedBackbone {
                    architecture,
                    backbone: self.backbone.to_string(),
                }
                .into());
            }
            ensure!(self.image_size > 0, "image_size must be positive");
            let ClassCounts {
                first,
                middle,
                last,
            } = self.class_counts;
            ensure!(
                first > 0 && middle > 0 && last > 0,
                "class counts must be positive"
            );
            self.optimizer.validate()?;
            Ok(())
        }
    }

    fn default_backbone() -> Backbone {
        Backbone::ResNet50
    }

    fn default_image_size() -> usize {
        96
    }

    fn default_use_pretrained() -> bool {
        true
    }
}

mod optimizer {
    use super::*;

    /// Stochastic gradient descent settings.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct OptimizerConfig {
        #[serde(default = "default_lr")]
        pub lr: R64,
        #[serde(default = "default_momentum")]
        pub momentum: R64,
        #[serde(default = "default_weight_decay")]
        pub weight_decay: R64,
        /// The number of steps whose gradients are accumulated per update.
        #[serde(default = "default_accumulate_grad")]
        pub accumulate_grad: usize,
    }

    impl Default for OptimizerConfig {
        fn default() -> Self {
            Self {
                lr: default_lr(),
                momentum: default_momentum(),
                weight_decay: default_weight_decay(),
                accumulate_grad: default_accumulate_grad(),
            }
        }
    }

    impl OptimizerConfig {
        pub fn validate(&self) -> Result<()> {
            ensure!(self.lr > 0.0, "lr must be positive");
            ensure!(
                self.momentum >= 0.0 && self.momentum < 1.0,
                "momentum must be in range [0, 1)"
            );
            ensure!(self.weight_decay >= 0.0, "weight_decay must be non-negative");
            ensure!(self.accumulate_grad > 0, "accumulate_grad must be positive");
            Ok(())
        }
    }

    fn default_lr() -> R64 {
        r64(1e-2)
    }

    fn default_momentum() -> R64 {
        r64(0.9)
    }

    fn default_weight_decay() -> R64 {
        r64(1e-4)
    }

    fn default_accumulate_grad() -> usize {
        1
    }
}
