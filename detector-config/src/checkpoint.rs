//! Copying named parameters into a variable store with a per-parameter report.

use crate::common::*;

/// The way checkpoint entries are paired with model parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadMode {
    /// Pair by name. Any unexpected, missing or mismatched entry fails the
    /// loading and nothing is copied.
    Strict,
    /// Pair by name and copy the entries that fit.
    Partial,
    /// Pair by position in creation order and copy the entries that fit.
    Positional,
}

/// Errors of strict checkpoint loading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckpointError {
    #[error(
        "while copying the parameter named '{name}', whose dimensions in the model are {expected:?} and whose dimensions in the checkpoint are {actual:?}"
    )]
    ShapeMismatch {
        name: String,
        expected: Vec<i64>,
        actual: Vec<i64>,
    },
    #[error("unexpected key '{name}' in the checkpoint")]
    UnexpectedKey { name: String },
    #[error("missing key '{name}' in the checkpoint")]
    MissingKey { name: String },
}

/// The outcome of one parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterStatus {
    Loaded,
    ShapeMismatch { expected: Vec<i64>, actual: Vec<i64> },
    /// The checkpoint entry has no counterpart in the model.
    Unexpected,
    /// The model parameter has no counterpart in the checkpoint.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterReport {
    /// The model parameter name, or the checkpoint key of unexpected entries.
    pub name: String,
    pub status: ParameterStatus,
}

impl ParameterReport {
    fn to_error(&self) -> Option<CheckpointError> {
        let name = self.name.clone();
        let error = match &self.status {
            ParameterStatus::Loaded => return None,
            ParameterStatus::ShapeMismatch { expected, actual } => CheckpointError::ShapeMismatch {
                name,
                expected: expected.clone(),
                actual: actual.clone(),
            },
            ParameterStatus::Unexpected => CheckpointError::UnexpectedKey { name },
            ParameterStatus::Missing => CheckpointError::MissingKey { name },
        };
        Some(error)
    }
}

/// The per-parameter outcomes of a loading.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoadReport {
    pub entries: Vec<ParameterReport>,
}

impl LoadReport {
    pub fn num_loaded(&self) -> usize {
        self.loaded().count()
    }

    pub fn loaded(&self) -> impl Iterator<Item = &ParameterReport> {
        self.entries
            .iter()
            .filter(|entry| entry.status == ParameterStatus::Loaded)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &ParameterReport> {
        self.entries
            .iter()
            .filter(|entry| entry.status != ParameterStatus::Loaded)
    }

    /// Whether every parameter on both sides was paired and copied.
    pub fn is_complete(&self) -> bool {
        self.skipped().next().is_none()
    }

    pub fn status_of(&self, name: &str) -> Option<&ParameterStatus> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.status)
    }
}

/// Copy named tensors into the variables of `vs`.
pub fn load_state_dict(
    vs: &nn::VarStore,
    named_tensors: &[(String, Tensor)],
    mode: LoadMode,
) -> Result<LoadReport> {
    let variables = ordered_variables(vs);

    let (pairs, report) = match mode {
        LoadMode::Strict | LoadMode::Partial => pair_by_name(&variables, named_tensors),
        LoadMode::Positional => pair_by_position(&variables, named_tensors),
    };

    if mode == LoadMode::Strict {
        if let Some(error) = report.skipped().find_map(ParameterReport::to_error) {
            return Err(error.into());
        }
    }

    tch::no_grad(|| -> Result<_> {
        pairs.into_iter().try_for_each(|(mut dst, src)| -> Result<_> {
            dst.f_copy_(src)?;
            Ok(())
        })
    })?;

    report.skipped().for_each(|entry| {
        warn!("skip parameter '{}': {:?}", entry.name, entry.status);
    });
    info!(
        "loaded {} parameters, skipped {}",
        report.num_loaded(),
        report.skipped().count()
    );

    Ok(report)
}

/// Read named tensors from a file and copy them into `vs`.
pub fn load_checkpoint_file(
    vs: &nn::VarStore,
    path: impl AsRef<Path>,
    mode: LoadMode,
) -> Result<LoadReport> {
    let path = path.as_ref();
    info!("load checkpoint file {}", path.display());
    let named_tensors = Tensor::load_multi(path)
        .with_context(|| format!("unable to read checkpoint file {}", path.display()))?;
    load_state_dict(vs, &named_tensors, mode)
}

/// Write the variables of `vs` to a file in creation order.
pub fn save_checkpoint_file(vs: &nn::VarStore, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let variables = ordered_variables(vs);
    Tensor::save_multi(&variables, path)
        .with_context(|| format!("unable to write checkpoint file {}", path.display()))?;
    Ok(())
}

/// List variables in creation order, followed by the remaining ones sorted by name.
///
/// The creation order is recovered from the data pointers of trainable
/// variables. Empty variables share a null pointer and go to the sorted tail.
fn ordered_variables(vs: &nn::VarStore) -> Vec<(String, Tensor)> {
    let ranks: HashMap<usize, usize> = vs
        .trainable_variables()
        .iter()
        .filter(|tensor| tensor.numel() > 0)
        .enumerate()
        .map(|(rank, tensor)| (tensor.data_ptr() as usize, rank))
        .collect();

    vs.variables()
        .into_iter()
        .map(|(name, tensor)| {
            let rank = if tensor.numel() > 0 {
                ranks.get(&(tensor.data_ptr() as usize)).copied()
            } else {
                None
            };
            (rank, name, tensor)
        })
        .sorted_by(|(lhs_rank, lhs_name, _), (rhs_rank, rhs_name, _)| {
            lhs_rank
                .is_none()
                .cmp(&rhs_rank.is_none())
                .then(lhs_rank.cmp(rhs_rank))
                .then_with(|| lhs_name.cmp(rhs_name))
        })
        .map(|(_, name, tensor)| (name, tensor))
        .collect()
}

type CopyPair<'a> = (Tensor, &'a Tensor);

fn pair_by_name<'a>(
    variables: &[(String, Tensor)],
    named_tensors: &'a [(String, Tensor)],
) -> (Vec<CopyPair<'a>>, LoadReport) {
    let sources: HashMap<&str, &Tensor> = named_tensors
        .iter()
        .map(|(name, tensor)| (name.as_str(), tensor))
        .collect();
    let known: HashSet<&str> = variables.iter().map(|(name, _)| name.as_str()).collect();

    let mut pairs = vec![];
    let mut entries = vec![];

    variables.iter().for_each(|(name, dst)| {
        let status = match sources.get(name.as_str()) {
            Some(&src) => {
                let status = match_shapes(dst, src);
                if status == ParameterStatus::Loaded {
                    pairs.push((dst.shallow_clone(), src));
                }
                status
            }
            None => ParameterStatus::Missing,
        };
        entries.push(ParameterReport {
            name: name.clone(),
            status,
        });
    });

    named_tensors
        .iter()
        .filter(|(name, _)| !known.contains(name.as_str()))
        .for_each(|(name, _)| {
            entries.push(ParameterReport {
                name: name.clone(),
                status: ParameterStatus::Unexpected,
            });
        });

    (pairs, LoadReport { entries })
}

fn pair_by_position<'a>(
    variables: &[(String, Tensor)],
    named_tensors: &'a [(String, Tensor)],
) -> (Vec<CopyPair<'a>>, LoadReport) {
    let mut pairs = vec![];
    let mut entries = vec![];

    variables
        .iter()
        .zip_longest(named_tensors)
        .for_each(|pair| {
            use itertools::EitherOrBoth::*;

            let (name, status) = match pair {
                Both((name, dst), (_, src)) => {
                    let status = match_shapes(dst, src);
                    if status == ParameterStatus::Loaded {
                        pairs.push((dst.shallow_clone(), src));
                    }
                    (name, status)
                }
                Left((name, _)) => (name, ParameterStatus::Missing),
                Right((name, _)) => (name, ParameterStatus::Unexpected),
            };
            entries.push(ParameterReport {
                name: name.clone(),
                status,
            });
        });

    (pairs, LoadReport { entries })
}

fn match_shapes(dst: &Tensor, src: &Tensor) -> ParameterStatus {
    let expected = dst.size();
    let actual = src.size();
    if expected == actual {
        ParameterStatus::Loaded
    } else {
        ParameterStatus::ShapeMismatch { expected, actual }
    }
}
