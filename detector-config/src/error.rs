use crate::{architecture::Architecture, dataset::DatasetKind};

/// Configuration errors that are reported by name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown architecture '{name}'")]
    UnknownArchitecture { name: String },
    #[error("unknown dataset '{name}'")]
    UnknownDataset { name: String },
    #[error("{architecture} expects image size {expected}, but get {actual}")]
    ImageSizeMismatch {
        architecture: Architecture,
        expected: usize,
        actual: usize,
    },
    #[error("{architecture} does not support the {backbone} backbone")]
    UnsupportedBackbone {
        architecture: Architecture,
        backbone: String,
    },
    #[error("no evaluator for {architecture} on the {dataset} dataset")]
    UnsupportedEvaluator {
        architecture: Architecture,
        dataset: DatasetKind,
    },
}
