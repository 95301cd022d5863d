//! Discrete sampling

use rand::Rng;

/// Sample an index from a discrete distribution given by `probs`.
///
/// Probabilities need not sum to exactly one; any leftover mass goes to the
/// last index.
pub fn sample_discrete<R, I>(probs: I, rng: &mut R) -> usize
where
    R: Rng + ?Sized,
    I: IntoIterator<Item = f64>,
{
    let u: f64 = rng.gen();
    let mut cumsum = 0.0;
    let mut last = 0;
    for (i, p) in probs.into_iter().enumerate() {
        cumsum += p;
        last = i;
        if u < cumsum {
            return i;
        }
    }
    last
}
