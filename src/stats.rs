//! Scalar statistics over per-base vectors. Sequences containing any
//! non-finite element are "non-numeric" and summaries over them are `None`.

use statrs::distribution::{
    ChiSquared, ContinuousCDF, Discrete, DiscreteCDF, Hypergeometric, Normal,
};

/// Lower clamp so combined p-values stay in (0, 1].
const P_FLOOR: f64 = 1e-300;

pub fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() || xs.iter().any(|x| !x.is_finite()) {
        None
    } else {
        Some(xs.iter().sum::<f64>() / xs.len() as f64)
    }
}

/// Population standard deviation (n divisor).
pub fn stdev(xs: &[f64]) -> Option<f64> {
    let mu = mean(xs)?;
    let var =
        xs.iter().map(|x| (x - mu) * (x - mu)).sum::<f64>() / xs.len() as f64;
    Some(var.sqrt())
}

pub fn mean_of_counts(xs: &[u32]) -> f64 {
    if xs.is_empty() {
        0f64
    } else {
        xs.iter().map(|&x| x as f64).sum::<f64>() / xs.len() as f64
    }
}

pub fn median_of_counts(xs: &[u32]) -> f64 {
    let values = xs.iter().map(|&x| x as f64).collect::<Vec<f64>>();
    quantile(&values, 0.5)
}

/// Quantile with linear interpolation at index q * (n - 1), zero on empty
/// input.
pub fn quantile(xs: &[f64], q: f64) -> f64 {
    let mut sorted = xs.to_vec();
    sorted.sort_by(f64::total_cmp);
    quantile_of_sorted(&sorted, q)
}

/// Same as [quantile] over an already ascending-sorted slice.
pub fn quantile_of_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0f64;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
    }
}

/// Benjamini-Hochberg adjustment. Non-finite entries pass through unchanged
/// and do not count toward m. Adjusted values are the running minimum of
/// p * m / rank taken from the largest rank down, clamped to [0, 1], and
/// scattered back to the input order.
pub fn bh_adjust(pvals: &[f64]) -> Vec<f64> {
    let mut order = (0..pvals.len())
        .filter(|&i| pvals[i].is_finite())
        .collect::<Vec<usize>>();
    order.sort_by(|&a, &b| pvals[a].total_cmp(&pvals[b]));
    let m = order.len() as f64;

    let mut adjusted = pvals.to_vec();
    let mut running = 1f64;
    for (rank0, &i) in order.iter().enumerate().rev() {
        let candidate = pvals[i] * m / (rank0 as f64 + 1f64);
        running = running.min(candidate).clamp(0f64, 1f64);
        adjusted[i] = running;
    }
    adjusted
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CombineMethod {
    Stouffer,
    Fisher,
}

/// Combine p-values with Stouffer's inverse-normal method (equal weights) or
/// Fisher's method (-2 sum ln p against chi-squared with 2m d.f.). Output is
/// clamped to (0, 1].
pub fn combine_pvalues(pvals: &[f64], method: CombineMethod) -> f64 {
    if pvals.is_empty() {
        return 1f64;
    }
    let m = pvals.len() as f64;
    let combined = match method {
        CombineMethod::Stouffer => {
            let gaussian = Normal::new(0f64, 1f64)
                .unwrap_or_else(|_| unreachable!("standard normal is valid"));
            let z_sum = pvals
                .iter()
                .map(|&p| {
                    gaussian.inverse_cdf(1f64 - p.clamp(1e-15, 1f64 - 1e-15))
                })
                .sum::<f64>();
            1f64 - gaussian.cdf(z_sum / m.sqrt())
        }
        CombineMethod::Fisher => {
            let x = -2f64
                * pvals
                    .iter()
                    .map(|&p| p.max(P_FLOOR).min(1f64).ln())
                    .sum::<f64>();
            match ChiSquared::new(2f64 * m) {
                Ok(dist) => 1f64 - dist.cdf(x),
                Err(_) => 1f64,
            }
        }
    };
    combined.max(P_FLOOR).min(1f64)
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Tail {
    Left,
    Right,
    TwoSided,
}

/// Fisher's exact test on the 2x2 table [[a, b], [c, d]] under the
/// hypergeometric null with fixed margins. `Tail::Right` is the enrichment
/// tail, P(X >= a).
pub fn fisher_exact(a: u64, b: u64, c: u64, d: u64, tail: Tail) -> f64 {
    let population = a + b + c + d;
    let successes = a + b;
    let draws = a + c;
    // margins are consistent by construction, so the distribution is valid
    let dist = match Hypergeometric::new(population, successes, draws) {
        Ok(dist) => dist,
        Err(_) => return 1f64,
    };
    let support_hi = std::cmp::min(successes, draws);
    let p = match tail {
        Tail::Left => dist.cdf(a),
        Tail::Right => (a..=support_hi).map(|k| dist.pmf(k)).sum::<f64>(),
        Tail::TwoSided => {
            let support_lo = (successes + draws).saturating_sub(population);
            let observed = dist.pmf(a);
            (support_lo..=support_hi)
                .map(|k| dist.pmf(k))
                .filter(|&pk| pk <= observed * (1f64 + 1e-7))
                .sum::<f64>()
        }
    };
    p.clamp(0f64, 1f64)
}

/// Linear remap of x from [old_lo, old_hi] onto [new_lo, new_hi]. A
/// degenerate input range collapses to new_lo.
pub fn maprange(old_lo: f64, old_hi: f64, new_lo: f64, new_hi: f64, x: f64) -> f64 {
    if (old_hi - old_lo).abs() <= f64::EPSILON {
        new_lo
    } else {
        new_lo + (x - old_lo) * (new_hi - new_lo) / (old_hi - old_lo)
    }
}
