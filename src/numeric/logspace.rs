//! Log-sum-exp and elementwise helpers

use ndarray::{ArrayBase, DataMut, Dimension};

/// `log(0)`
pub const NEG_INF: f64 = f64::NEG_INFINITY;

/// Compute `ln(exp(a) + exp(b))` without overflow.
///
/// `-∞` on either side returns the other operand; NaN operands are dropped.
#[inline]
pub fn log_add(a: f64, b: f64) -> f64 {
    if a == NEG_INF || a.is_nan() {
        return if b.is_nan() { NEG_INF } else { b };
    }
    if b == NEG_INF || b.is_nan() {
        return a;
    }
    let (max, min) = if a >= b { (a, b) } else { (b, a) };
    max + (min - max).exp().ln_1p()
}

/// Log-sum-exp over a slice.
///
/// Returns `-∞` for an empty slice or when every term is `-∞`.
pub fn log_sum_exp(xs: &[f64]) -> f64 {
    let max = xs
        .iter()
        .copied()
        .filter(|x| !x.is_nan())
        .fold(NEG_INF, f64::max);
    if max == NEG_INF {
        return NEG_INF;
    }
    if max == f64::INFINITY {
        return max;
    }
    let sum: f64 = xs
        .iter()
        .filter(|x| !x.is_nan())
        .map(|&x| (x - max).exp())
        .sum();
    max + sum.ln()
}

/// Normalize log values in place so that they log-sum-exp to zero.
///
/// Returns the log normalizer. A row whose terms are all `-∞` is left as is.
pub fn log_normalize<S, D>(a: &mut ArrayBase<S, D>) -> f64
where
    S: DataMut<Elem = f64>,
    D: Dimension,
{
    let values: Vec<f64> = a.iter().copied().collect();
    let norm = log_sum_exp(&values);
    if norm.is_finite() {
        a.mapv_inplace(|x| x - norm);
    }
    norm
}

/// Index and value of the largest element, ignoring NaN.
///
/// Ties resolve to the lowest index. Returns `None` for an empty input.
pub fn max_index<'a, I>(values: I) -> Option<(usize, f64)>
where
    I: IntoIterator<Item = &'a f64>,
{
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.into_iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best
}

/// Natural log of every element.
pub fn log_inplace<S, D>(a: &mut ArrayBase<S, D>)
where
    S: DataMut<Elem = f64>,
    D: Dimension,
{
    a.mapv_inplace(f64::ln);
}

/// Exponential of every element.
pub fn exp_inplace<S, D>(a: &mut ArrayBase<S, D>)
where
    S: DataMut<Elem = f64>,
    D: Dimension,
{
    a.mapv_inplace(f64::exp);
}

/// Multiply every element by `factor`.
pub fn scale_inplace<S, D>(a: &mut ArrayBase<S, D>, factor: f64)
where
    S: DataMut<Elem = f64>,
    D: Dimension,
{
    a.mapv_inplace(|x| x * factor);
}

/// Square every element.
pub fn square_inplace<S, D>(a: &mut ArrayBase<S, D>)
where
    S: DataMut<Elem = f64>,
    D: Dimension,
{
    a.mapv_inplace(|x| x * x);
}

/// Raise every element below `floor` to `floor`. Returns how many were raised.
pub fn floor_inplace<S, D>(a: &mut ArrayBase<S, D>, floor: f64) -> usize
where
    S: DataMut<Elem = f64>,
    D: Dimension,
{
    let mut raised = 0;
    a.map_inplace(|x| {
        if *x < floor || x.is_nan() {
            *x = floor;
            raised += 1;
        }
    });
    raised
}
