pub use anyhow::{bail, ensure, format_err, Context, Error, Result};
pub use getset::Getters;
pub use itertools::Itertools;
pub use maplit::hashset;
pub use std::{
    borrow::Borrow,
    convert::{TryFrom, TryInto},
};
pub use tch::{Device, IndexOp, Kind, Tensor};
pub use tch_tensor_like::TensorLike;

pub type Fallible<T> = Result<T, Error>;

unzip_n::unzip_n!(pub 2);
