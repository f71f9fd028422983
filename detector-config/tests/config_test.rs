use anyhow::Result;
use detector_config::{
    checkpoint::LoadMode, Architecture, Backbone, ClassCounts, Config, ConfigError, DatasetKind,
    EvaluatorKind,
};
use std::path::{Path, PathBuf};

const VALID_FILE_NAMES: &[&str] = &[
    "ssd300.json5",
    "refinedet.json5",
    "s3fd.json5",
    "resnet.json5",
    "chanet.json5",
];

lazy_static::lazy_static! {
    static ref CONFIG_DIR: PathBuf = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("cfg");
    static ref VALID_FILES: Vec<PathBuf> = {
        VALID_FILE_NAMES.iter().map(|file_name| CONFIG_DIR.join(file_name)).collect()
    };
}

#[test]
fn load_valid_configs() -> Result<()> {
    VALID_FILES.iter().try_for_each(|path| -> Result<_> {
        let config = Config::open(path)?;
        if config.architecture().is_detector() {
            let losses = config.detector_losses()?.unwrap();
            assert_eq!(
                losses.refinement.is_some(),
                config.architecture().is_two_stage()
            );
            assert!(config.priors().is_some());
        } else {
            assert!(config.detector_losses()?.is_none());
            assert!(config.classifier().is_some());
        }
        Ok(())
    })?;
    Ok(())
}

#[test]
fn ssd300_config_test() -> Result<()> {
    let config = Config::open(CONFIG_DIR.join("ssd300.json5"))?;
    assert_eq!(config.architecture(), Architecture::Ssd300);

    let detector = config.detector().unwrap();
    assert_eq!(detector.image_size, 300);
    assert_eq!(detector.dataset, DatasetKind::Voc);
    assert!(detector.use_pretrained);
    assert_eq!(detector.optimizer.lr.raw(), 1e-3);
    assert_eq!(detector.optimizer.accumulate_grad, 1);
    assert_eq!(config.priors().unwrap().num_priors(), 8732);

    let losses = config.detector_losses()?.unwrap();
    assert_eq!(*losses.detection.num_classes(), 21);
    assert!(losses.refinement.is_none());

    assert_eq!(
        config.architecture().pretrained_backbone(),
        Some((Backbone::Vgg16, LoadMode::Partial))
    );
    Ok(())
}

#[test]
fn refinedet_config_test() -> Result<()> {
    let config = Config::open(CONFIG_DIR.join("refinedet.json5"))?;
    assert_eq!(config.architecture(), Architecture::RefineDet);
    assert!(config.detector().unwrap().priors.is_some());
    assert_eq!(config.priors().unwrap().num_priors(), 6375);

    let losses = config.detector_losses()?.unwrap();
    assert_eq!(*losses.detection.num_classes(), 21);
    assert_eq!(*losses.refinement.unwrap().num_classes(), 2);
    Ok(())
}

#[test]
fn s3fd_config_test() -> Result<()> {
    let config = Config::open(CONFIG_DIR.join("s3fd.json5"))?;
    let detector = config.detector().unwrap();
    assert_eq!(
        config.architecture().evaluator(detector.dataset)?,
        EvaluatorKind::WiderFace
    );
    assert_eq!(
        config.architecture().pretrained_backbone(),
        Some((Backbone::Vgg16, LoadMode::Positional))
    );
    Ok(())
}

#[test]
fn classifier_config_test() -> Result<()> {
    let config = Config::open(CONFIG_DIR.join("resnet.json5"))?;
    let classifier = config.classifier().unwrap();
    assert_eq!(classifier.backbone, Backbone::ResNet50);
    assert_eq!(classifier.image_size, 96);
    assert_eq!(classifier.class_counts, ClassCounts::default());
    assert!(classifier.use_pretrained);
    assert!(config.priors().is_none());

    let config = Config::open(CONFIG_DIR.join("chanet.json5"))?;
    let classifier = config.classifier().unwrap();
    assert_eq!(classifier.backbone, Backbone::ResNet18);
    assert_eq!(classifier.image_size, 224);
    assert_eq!(classifier.class_counts.last, 30);
    assert_eq!(classifier.optimizer.accumulate_grad, 4);
    Ok(())
}

#[test]
fn invalid_configs_are_rejected() -> Result<()> {
    let err = Config::open(CONFIG_DIR.join("invalid-image-size.json5")).unwrap_err();
    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::ImageSizeMismatch {
            architecture: Architecture::RetinaNet,
            expected: 512,
            actual: 600,
        })
    );

    let err = Config::open(CONFIG_DIR.join("invalid-backbone.json5")).unwrap_err();
    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::UnsupportedBackbone {
            architecture: Architecture::ChaNet,
            backbone: "resnet50".into(),
        })
    );

    [
        "invalid-architecture.json5",
        "invalid-background-label.json5",
        "invalid-unknown-field.json5",
    ]
    .iter()
    .for_each(|file_name| {
        let result = Config::open(CONFIG_DIR.join(file_name));
        assert!(result.is_err(), "{} should be rejected", file_name);
    });

    assert!(Config::open(CONFIG_DIR.join("missing.json5")).is_err());
    Ok(())
}

#[test]
fn config_serde_round_trip() -> Result<()> {
    let config = Config::open(CONFIG_DIR.join("refinedet.json5"))?;
    let text = json5::to_string(&config)?;
    let parsed: Config = text.parse()?;
    assert_eq!(parsed, config);
    Ok(())
}
