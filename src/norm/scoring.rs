//! Raw per-base scoring. Every method gates on transcript-level coverage
//! first; per-base masking uses `f64::NAN`, never zero, so downstream
//! normalization can tell "masked" from "unreactive".

use crate::config::{NormConfig, ScoringMethod};
use crate::errs::{RfError, RfResult};
use crate::rc::RcEntry;
use crate::stats;
use crate::util::same_sequence;

fn gate_coverage(entry: &RcEntry, config: &NormConfig) -> RfResult<()> {
    if entry.passes_coverage(config.mean_coverage, config.median_coverage) {
        Ok(())
    } else {
        Err(RfError::LowCoverage)
    }
}

fn gate_control(
    treated: &RcEntry,
    control: &RcEntry,
    config: &NormConfig,
) -> RfResult<()> {
    if !same_sequence(&treated.sequence, &control.sequence) {
        return Err(RfError::SeqMismatch);
    }
    gate_coverage(control, config)
}

/// Compute the raw score vector for one transcript. `untreated` is required
/// for Ding and Siegfried, `denatured` is only consulted by Siegfried.
pub(crate) fn score_transcript(
    config: &NormConfig,
    treated: &RcEntry,
    untreated: Option<&RcEntry>,
    denatured: Option<&RcEntry>,
) -> RfResult<Vec<f64>> {
    gate_coverage(treated, config)?;
    if let Some(untreated) = untreated {
        gate_control(treated, untreated, config)?;
    }
    if let Some(denatured) = denatured {
        gate_control(treated, denatured, config)?;
    }

    let mut scores = match config.scoring {
        ScoringMethod::Ding => {
            let untreated =
                untreated.ok_or(RfError::MissingTranscript)?;
            ding_scores(config, treated, untreated)?
        }
        ScoringMethod::Rouskin => {
            treated.counts.iter().map(|&t| t as f64).collect()
        }
        ScoringMethod::Siegfried => {
            let untreated =
                untreated.ok_or(RfError::MissingTranscript)?;
            siegfried_scores(config, treated, untreated, denatured)
        }
        ScoringMethod::Zubradt => zubradt_scores(treated),
    };

    // positions the samples cannot speak for are reported as NaN
    for i in 0..treated.len() {
        let mut low = treated.coverage[i] < config.nan;
        if let Some(untreated) = untreated {
            low = low || untreated.coverage[i] < config.nan;
        }
        if let Some(denatured) = denatured {
            low = low || denatured.coverage[i] < config.nan;
        }
        if low {
            scores[i] = f64::NAN;
        }
    }
    Ok(scores)
}

fn ding_scores(
    config: &NormConfig,
    treated: &RcEntry,
    untreated: &RcEntry,
) -> RfResult<Vec<f64>> {
    let pc = config.pseudocount;
    let t_log = treated
        .counts
        .iter()
        .map(|&t| (t as f64 + pc).ln())
        .collect::<Vec<f64>>();
    let u_log = untreated
        .counts
        .iter()
        .map(|&u| (u as f64 + pc).ln())
        .collect::<Vec<f64>>();
    let t_mean = stats::mean(&t_log).ok_or(RfError::LowCoverage)?;
    let u_mean = stats::mean(&u_log).ok_or(RfError::LowCoverage)?;
    if t_mean == 0f64 || u_mean == 0f64 {
        return Err(RfError::LowCoverage);
    }
    Ok(t_log
        .iter()
        .zip(u_log.iter())
        .map(|(&t, &u)| {
            (t / t_mean - u / u_mean).max(0f64).min(config.max_score)
        })
        .collect())
}

fn mutation_rate(count: u32, coverage: u32) -> f64 {
    if coverage > 0 {
        count as f64 / coverage as f64
    } else {
        0f64
    }
}

fn siegfried_scores(
    config: &NormConfig,
    treated: &RcEntry,
    untreated: &RcEntry,
    denatured: Option<&RcEntry>,
) -> Vec<f64> {
    (0..treated.len())
        .map(|i| {
            let low_coverage = treated.coverage[i] < config.nan
                || untreated.coverage[i] < config.nan
                || denatured.map_or(false, |d| d.coverage[i] < config.nan);
            let u_rate =
                mutation_rate(untreated.counts[i], untreated.coverage[i]);
            if low_coverage || u_rate > config.max_untreated_mut {
                return f64::NAN;
            }
            let t_rate =
                mutation_rate(treated.counts[i], treated.coverage[i]);
            match denatured {
                Some(denatured) => {
                    let d_rate = mutation_rate(
                        denatured.counts[i],
                        denatured.coverage[i],
                    );
                    if d_rate > 0f64 {
                        ((t_rate - u_rate) / d_rate).max(0f64)
                    } else {
                        0f64
                    }
                }
                None => (t_rate - u_rate).max(0f64),
            }
        })
        .collect()
}

fn zubradt_scores(treated: &RcEntry) -> Vec<f64> {
    treated
        .counts
        .iter()
        .zip(treated.coverage.iter())
        .map(|(&t, &n)| mutation_rate(t, n))
        .collect()
}

#[cfg(test)]
mod scoring_tests {
    use assert_approx_eq::assert_approx_eq;

    use crate::config::NormMethod;

    use super::*;

    fn entry(id: &str, counts: Vec<u32>, coverage: Vec<u32>) -> RcEntry {
        let sequence = "ACGT".repeat(counts.len() / 4 + 1)
            [..counts.len()]
            .to_owned();
        RcEntry::new(id.to_owned(), sequence, counts, coverage)
    }

    fn config(scoring: ScoringMethod) -> NormConfig {
        NormConfig::with_methods(scoring, NormMethod::BoxPlot)
    }

    #[test]
    fn test_mean_coverage_gate() {
        let mut cfg = config(ScoringMethod::Rouskin);
        cfg.mean_coverage = 5f64;
        let treated = entry("tx", vec![0, 5, 0, 10], vec![4, 4, 4, 4]);
        match score_transcript(&cfg, &treated, None, None) {
            Err(RfError::LowCoverage) => {}
            other => panic!("expected low coverage, got {other:?}"),
        }
    }

    #[test]
    fn test_rouskin_scores_are_counts() {
        let cfg = config(ScoringMethod::Rouskin);
        let treated = entry("tx", vec![0, 5, 0, 10], vec![20, 20, 20, 20]);
        let scores = score_transcript(&cfg, &treated, None, None).unwrap();
        assert_eq!(scores, vec![0f64, 5f64, 0f64, 10f64]);
    }

    #[test]
    fn test_ding_rejects_all_zero_untreated() {
        let cfg = config(ScoringMethod::Ding);
        let treated = entry("tx", vec![3, 0, 2, 5], vec![30, 30, 30, 30]);
        // all-zero counts with the default pseudocount make ln(u + 1) = 0
        let untreated = entry("tx", vec![0, 0, 0, 0], vec![30, 30, 30, 30]);
        match score_transcript(&cfg, &treated, Some(&untreated), None) {
            Err(RfError::LowCoverage) => {}
            other => panic!("expected low coverage, got {other:?}"),
        }
    }

    #[test]
    fn test_ding_caps_at_max_score() {
        let mut cfg = config(ScoringMethod::Ding);
        cfg.max_score = 1.5;
        let treated =
            entry("tx", vec![500, 1, 1, 1], vec![1000, 1000, 1000, 1000]);
        let untreated =
            entry("tx", vec![1, 1, 1, 1], vec![1000, 1000, 1000, 1000]);
        let scores =
            score_transcript(&cfg, &treated, Some(&untreated), None).unwrap();
        assert!(scores.iter().all(|&s| s.is_nan() || s <= 1.5));
        assert_approx_eq!(scores[0], 1.5);
    }

    #[test]
    fn test_sequence_mismatch_detected() {
        let cfg = config(ScoringMethod::Ding);
        let treated = entry("tx", vec![1, 1, 1, 1], vec![30, 30, 30, 30]);
        let mut untreated =
            entry("tx", vec![1, 1, 1, 1], vec![30, 30, 30, 30]);
        untreated.sequence = "GGGG".to_owned();
        match score_transcript(&cfg, &treated, Some(&untreated), None) {
            Err(RfError::SeqMismatch) => {}
            other => panic!("expected sequence mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_siegfried_masks_high_untreated_rate() {
        let mut cfg = config(ScoringMethod::Siegfried);
        cfg.max_untreated_mut = 0.05;
        let treated =
            entry("tx", vec![30, 30, 30], vec![100, 100, 100]);
        // middle position mutates at 10% in the untreated sample
        let untreated = entry("tx", vec![1, 10, 1], vec![100, 100, 100]);
        let scores =
            score_transcript(&cfg, &treated, Some(&untreated), None).unwrap();
        assert!(scores[0].is_finite());
        assert!(scores[1].is_nan());
        assert_approx_eq!(scores[2], 0.29);
    }

    #[test]
    fn test_siegfried_denatured_ratio_and_zero_guard() {
        let cfg = config(ScoringMethod::Siegfried);
        let treated = entry("tx", vec![20, 20], vec![100, 100]);
        let untreated = entry("tx", vec![0, 0], vec![100, 100]);
        let denatured = entry("tx", vec![40, 0], vec![100, 100]);
        let scores = score_transcript(
            &cfg,
            &treated,
            Some(&untreated),
            Some(&denatured),
        )
        .unwrap();
        assert_approx_eq!(scores[0], 0.5);
        // zero denatured rate zeroes the score instead of dividing
        assert_approx_eq!(scores[1], 0f64);
    }

    #[test]
    fn test_zubradt_rates_and_nan_floor() {
        let cfg = config(ScoringMethod::Zubradt);
        let treated =
            entry("tx", vec![5, 3, 1, 0], vec![50, 30, 5, 0]);
        let scores = score_transcript(&cfg, &treated, None, None).unwrap();
        assert_approx_eq!(scores[0], 0.1);
        assert_approx_eq!(scores[1], 0.1);
        // coverage below the nan floor (10) is masked, including zero
        assert!(scores[2].is_nan());
        assert!(scores[3].is_nan());
    }
}
