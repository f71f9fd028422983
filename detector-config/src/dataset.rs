use crate::{common::*, error::ConfigError};

/// The supported datasets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, EnumIter, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DatasetKind {
    Wider,
    Voc,
    Coco,
}

impl FromStr for DatasetKind {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::iter()
            .find(|kind| kind.as_ref() == name)
            .ok_or_else(|| ConfigError::UnknownDataset {
                name: name.to_owned(),
            })
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// The evaluation procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvaluatorKind {
    /// Face detection evaluation on WIDER FACE.
    WiderFace,
}
