pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use getset::Getters;
pub use itertools::{izip, Itertools as _};
pub use log::{debug, info, warn};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    cmp::Ordering,
    convert::{TryFrom, TryInto},
    iter,
    time::{Duration, Instant},
};
pub use tch::{Device, IndexOp, Kind, Reduction, Tensor};
pub use tch_goodies::{
    CyCxHWTensor, CyCxHWTensorUnchecked, SizeTensor, TensorExt as _, TlbrTensor,
};
pub use tch_tensor_like::TensorLike;

unzip_n::unzip_n!(pub 3);
unzip_n::unzip_n!(pub 4);
