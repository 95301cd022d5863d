//! Numeric helpers for log-domain arithmetic

mod logspace;
mod sampling;

pub use logspace::{
    exp_inplace, floor_inplace, log_add, log_inplace, log_normalize, log_sum_exp, max_index,
    scale_inplace, square_inplace, NEG_INF,
};
pub use sampling::sample_discrete;
