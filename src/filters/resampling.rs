//! Low-variance (systematic) resampling

use rand::Rng;

use crate::filters::particle::Particle;

/// Usable weight: negative and NaN weights count as zero
fn sanitized(weight: f64) -> f64 {
    if weight.is_finite() {
        weight.max(0.0)
    } else {
        0.0
    }
}

/// Indices selected by one low-variance pass over `weights`.
///
/// One offset u ∈ [0, total/M) and M evenly spaced pointers. Falls back to
/// uniform weights when the total is zero or not finite.
pub fn select_indices<R: Rng>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }

    let mut cumulative: Vec<f64> = Vec::with_capacity(n);
    let mut total = 0.0;
    for w in weights {
        total += sanitized(*w);
        cumulative.push(total);
    }

    if !(total.is_finite() && total / n as f64 > 0.0) {
        log::warn!("Total particle weight is {}; resampling uniformly", total);
        for (i, c) in cumulative.iter_mut().enumerate() {
            *c = (i + 1) as f64;
        }
        total = n as f64;
    }

    let step = total / n as f64;
    let offset = rng.gen_range(0.0..step);
    walk(&cumulative, offset, step)
}

/// Systematic pointer walk over a cumulative weight table.
///
/// Pointers that land past the final sum through rounding are clamped to the
/// last bin with positive width, so trailing zero-weight entries stay unselected.
fn walk(cumulative: &[f64], offset: f64, step: f64) -> Vec<usize> {
    let n = cumulative.len();
    let last = cumulative
        .iter()
        .enumerate()
        .rposition(|(i, c)| if i == 0 { *c > 0.0 } else { *c > cumulative[i - 1] })
        .unwrap_or(n.saturating_sub(1));

    let mut idx = 0;
    let mut selected = Vec::with_capacity(n);
    for m in 0..n {
        let pointer = offset + m as f64 * step;
        while idx < last && pointer >= cumulative[idx] {
            idx += 1;
        }
        selected.push(idx);
    }
    selected
}

/// Build a new set of the same size by deep-copying selected particles.
/// Weights are carried over unchanged.
pub fn low_variance_resample<R: Rng>(particles: &[Particle], rng: &mut R) -> Vec<Particle> {
    let weights: Vec<f64> = particles.iter().map(|p| p.weight).collect();
    select_indices(&weights, rng)
        .into_iter()
        .map(|i| particles[i].clone())
        .collect()
}

/// 1 / Σ w̃ᵢ² over normalized weights; M for uniform, 1 for a single survivor
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let total: f64 = weights.iter().map(|w| sanitized(*w)).sum();
    if !(total.is_finite() && total > 0.0) {
        return 0.0;
    }
    let sum_sq: f64 = weights
        .iter()
        .map(|w| {
            let n = sanitized(*w) / total;
            n * n
        })
        .sum();
    1.0 / sum_sq
}
