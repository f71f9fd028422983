pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use itertools::Itertools as _;
pub use log::{info, warn};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    collections::{HashMap, HashSet},
    fmt,
    path::Path,
    str::FromStr,
};
pub use strum::{AsRefStr, EnumIter, IntoEnumIterator as _};
pub use tch::{nn, Tensor};
