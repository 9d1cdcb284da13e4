//! Windowed normalization of raw scores into reactivities. Windows slide
//! with a configurable stride, base classes normalize independently when
//! requested, and overlapping windows average through per-base accumulators.
//! Positions outside the reactive set, and positions masked upstream, stay
//! NaN throughout.

use crate::config::{NormConfig, NormMethod};
use crate::errs::{RfError, RfResult};
use crate::stats;
use crate::util::canonical_sequence;

/// Normalize one transcript's raw scores. Rejects the transcript when the
/// resulting profile carries no numeric value at all.
pub(crate) fn normalize_profile(
    config: &NormConfig,
    sequence: &str,
    scores: &[f64],
) -> RfResult<Vec<f64>> {
    let bases = canonical_sequence(sequence).chars().collect::<Vec<char>>();
    let len = bases.len();
    let reactive = bases
        .iter()
        .map(|&b| config.reactive_bases.contains(b))
        .collect::<Vec<bool>>();

    let mut profile = if config.raw {
        scores
            .iter()
            .zip(reactive.iter())
            .map(|(&s, &r)| if r { s } else { f64::NAN })
            .collect::<Vec<f64>>()
    } else {
        windowed_normalize(config, &bases, &reactive, scores)
    };

    if config.remap_reactivities {
        zarringhalam_remap(&mut profile);
    }
    if profile.iter().all(|v| v.is_nan()) {
        return Err(RfError::LowCoverage);
    }
    Ok(profile)
}

/// Window start positions tiling [0, len): fixed stride, plus one trailing
/// window ending at the last base when the stride tiling falls short.
pub(crate) fn window_starts(
    len: usize,
    window: usize,
    offset: usize,
) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut start = 0usize;
    while start + window <= len {
        starts.push(start);
        start += offset;
    }
    match starts.last() {
        Some(&last) if last + window < len => starts.push(len - window),
        None => starts.push(0),
        _ => {}
    }
    starts
}

fn windowed_normalize(
    config: &NormConfig,
    bases: &[char],
    reactive: &[bool],
    scores: &[f64],
) -> Vec<f64> {
    let len = bases.len();
    let window = config.effective_window(len);
    let offset = config.effective_offset(window);
    let mut accumulators: Vec<Vec<f64>> = vec![Vec::new(); len];

    for start in window_starts(len, window, offset) {
        let end = start + window;
        for class in &class_positions(config, bases, reactive, scores, start, end)
        {
            let values =
                class.iter().map(|&i| scores[i]).collect::<Vec<f64>>();
            let normalized = match config.norm {
                NormMethod::TwoEightPercent => norm_28(&values),
                NormMethod::Winsor90 => winsor_90(&values),
                NormMethod::BoxPlot => box_plot(&values),
            };
            if let Some(normalized) = normalized {
                for (&i, v) in class.iter().zip(normalized) {
                    accumulators[i].push(v);
                }
            }
        }
    }

    accumulators
        .iter()
        .map(|acc| stats::mean(acc).unwrap_or(f64::NAN))
        .collect()
}

/// Positions in [start, end) grouped into normalization classes: one class
/// per reactive character when classes are independent, a single pooled
/// class otherwise. Masked (non-finite) scores never join a class.
fn class_positions(
    config: &NormConfig,
    bases: &[char],
    reactive: &[bool],
    scores: &[f64],
    start: usize,
    end: usize,
) -> Vec<Vec<usize>> {
    let eligible = |i: usize| reactive[i] && scores[i].is_finite();
    if config.norm_independent {
        config
            .reactive_bases
            .chars()
            .map(|class_base| {
                (start..end)
                    .filter(|&i| eligible(i) && bases[i] == class_base)
                    .collect()
            })
            .collect()
    } else {
        vec![(start..end).filter(|&i| eligible(i)).collect()]
    }
}

fn norm_28(values: &[f64]) -> Option<Vec<f64>> {
    let k = values.len();
    let p2 = (0.02 * k as f64).round() as usize;
    let p8 = (0.08 * k as f64).round() as usize;
    if p8 == 0 || p2 >= k {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let hi = std::cmp::min(p2 + p8, k - 1);
    let average = stats::mean(&sorted[p2..=hi])?;
    if average == 0f64 {
        return None;
    }
    Some(values.iter().map(|&v| (v / average).max(0f64)).collect())
}

fn winsor_90(values: &[f64]) -> Option<Vec<f64>> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let q05 = stats::quantile_of_sorted(&sorted, 0.05).max(0f64);
    let q95 = stats::quantile_of_sorted(&sorted, 0.95);
    if q95 <= 0f64 {
        return None;
    }
    Some(
        values
            .iter()
            .map(|&v| (v.max(q05) / q95).min(1f64))
            .collect(),
    )
}

fn box_plot(values: &[f64]) -> Option<Vec<f64>> {
    let k = values.len();
    if k == 0 {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let q25 = stats::quantile_of_sorted(&sorted, 0.25);
    let q75 = stats::quantile_of_sorted(&sorted, 0.75);
    let fence = q75 + 1.5 * (q75 - q25);

    let mut outliers = if k < 50 {
        (0.02 * k as f64).round() as usize
    } else {
        values.iter().filter(|&&v| v > fence).count()
    };
    if outliers == 0 {
        outliers = 1;
    }

    sorted.reverse();
    let remaining = &sorted[std::cmp::min(outliers, k)..];
    let top_n = if (50..100).contains(&k) {
        10
    } else {
        (0.10 * k as f64).round() as usize
    };
    if remaining.is_empty() || top_n == 0 {
        return None;
    }
    let average =
        stats::mean(&remaining[..std::cmp::min(top_n, remaining.len())])?;
    if average == 0f64 {
        return None;
    }
    Some(values.iter().map(|&v| (v / average).max(0f64)).collect())
}

/// Piecewise-linear remap of averaged reactivities onto [0, 1], top bin
/// anchored at the profile maximum.
pub(crate) fn zarringhalam_remap(profile: &mut [f64]) {
    let max = profile
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    for value in profile.iter_mut() {
        if !value.is_finite() {
            continue;
        }
        *value = if *value < 0.25 {
            stats::maprange(0f64, 0.25, 0f64, 0.35, *value)
        } else if *value < 0.30 {
            stats::maprange(0.25, 0.30, 0.35, 0.55, *value)
        } else if *value < 0.70 {
            stats::maprange(0.30, 0.70, 0.55, 0.85, *value)
        } else {
            stats::maprange(0.70, max, 0.85, 1f64, *value)
        };
    }
}
