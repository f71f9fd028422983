/// The small constant that keeps divisions away from zero.
pub const EPSILON: f64 = 1e-16;
