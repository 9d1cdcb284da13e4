//! Peak calling over immunoprecipitation coverage: tiled windows scored for
//! enrichment against the transcript median, Fisher right-tail p-values
//! adjusted per transcript with Benjamini-Hochberg, significant windows
//! merged into peaks.

use derive_new::new;

use crate::errs::{RfError, RfResult};
use crate::norm::normalize::window_starts;
use crate::rc::RcEntry;
use crate::stats::{
    self, bh_adjust, combine_pvalues, fisher_exact, CombineMethod, Tail,
};
use crate::util::{same_sequence, TAB};

pub mod subcommand;

/// One merged enriched region, coordinates half-open on the right.
#[derive(Debug, Clone, new)]
pub struct Peak {
    pub id: String,
    pub start: usize,
    pub end: usize,
    pub score: f64,
    pub pvalue: f64,
}

impl Peak {
    pub fn to_row(&self) -> String {
        format!(
            "{}{TAB}{}{TAB}{}{TAB}{:.3}{TAB}{:.3e}\n",
            self.id, self.start, self.end, self.score, self.pvalue
        )
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PeakParams {
    pub window: usize,
    pub offset: usize,
    pub enrichment: f64,
    pub max_pvalue: f64,
    pub pseudocount: f64,
    pub merge_distance: usize,
    pub mean_coverage: f64,
    pub median_coverage: f64,
}

impl PeakParams {
    pub(crate) fn validate(&self) -> RfResult<()> {
        let fail = |msg: String| Err(RfError::Config(msg));
        if self.window < 10 {
            return fail(format!(
                "window must be >= 10, got {}",
                self.window
            ));
        }
        if self.offset == 0 {
            return fail("offset must be >= 1".to_owned());
        }
        if !(self.pseudocount > 0f64) {
            return fail(format!(
                "pseudocount must be > 0, got {}",
                self.pseudocount
            ));
        }
        if !(self.max_pvalue > 0f64 && self.max_pvalue <= 1f64) {
            return fail(format!(
                "p-value cutoff must be in (0, 1], got {}",
                self.max_pvalue
            ));
        }
        if !self.enrichment.is_finite() {
            return fail("enrichment cutoff must be finite".to_owned());
        }
        Ok(())
    }
}

fn round_count(x: f64) -> u64 {
    x.round().max(0f64) as u64
}

/// Scan one transcript for enriched windows and merge them into peaks.
pub(crate) fn call_peaks(
    params: &PeakParams,
    ip: &RcEntry,
    control: Option<&RcEntry>,
) -> RfResult<Vec<Peak>> {
    if !ip.passes_coverage(params.mean_coverage, params.median_coverage) {
        return Err(RfError::LowCoverage);
    }
    if let Some(control) = control {
        if !same_sequence(&ip.sequence, &control.sequence) {
            return Err(RfError::SeqMismatch);
        }
        if !control
            .passes_coverage(params.mean_coverage, params.median_coverage)
        {
            return Err(RfError::LowCoverage);
        }
    }

    // windows stop at the last base, so peak ends stay below the
    // transcript length
    let scan_len = match ip.len() {
        0 | 1 => return Ok(Vec::new()),
        len => len - 1,
    };
    let window = std::cmp::min(params.window, scan_len);
    let starts = window_starts(scan_len, window, params.offset);

    let ip_median = ip.median_coverage();
    let control_median = control.map_or(ip_median, |c| c.median_coverage());
    let ip_means = starts
        .iter()
        .map(|&s| stats::mean_of_counts(&ip.coverage[s..s + window]))
        .collect::<Vec<f64>>();
    let control_means = match control {
        Some(control) => starts
            .iter()
            .map(|&s| {
                stats::mean_of_counts(&control.coverage[s..s + window])
            })
            .collect::<Vec<f64>>(),
        // without a control the background is the mean of the window means
        None => {
            let background = ip_means.iter().sum::<f64>()
                / ip_means.len().max(1) as f64;
            vec![background; starts.len()]
        }
    };

    let pc = params.pseudocount;
    let ip_ratio = |m: f64| (m + pc) / (ip_median + pc);
    let mut scores = Vec::with_capacity(starts.len());
    let mut pvalues = Vec::with_capacity(starts.len());
    for (&ip_mean, &control_mean) in ip_means.iter().zip(control_means.iter())
    {
        let score = match control {
            Some(_) => {
                let control_ratio =
                    (control_mean + pc) / (control_median + pc);
                (ip_ratio(ip_mean) / control_ratio).log2()
            }
            None => ip_ratio(ip_mean).log2(),
        };
        let pvalue = fisher_exact(
            round_count(ip_mean),
            round_count(ip_median),
            round_count(control_mean),
            round_count(control_median),
            Tail::Right,
        );
        scores.push(score);
        pvalues.push(pvalue);
    }
    let adjusted = bh_adjust(&pvalues);

    let mut kept: Vec<(usize, usize, f64, f64)> = Vec::new();
    for ((&start, &score), &padj) in
        starts.iter().zip(scores.iter()).zip(adjusted.iter())
    {
        if padj < params.max_pvalue && score >= params.enrichment {
            kept.push((start, start + window, score, padj));
        }
    }

    Ok(merge_windows(&ip.id, &kept, params.merge_distance))
}

/// Merge significant windows whose intervals come within `merge_distance` of
/// the running group; the group's score is the mean of member scores and its
/// p-value the Stouffer combination of member p-values.
fn merge_windows(
    id: &str,
    windows: &[(usize, usize, f64, f64)],
    merge_distance: usize,
) -> Vec<Peak> {
    let mut peaks = Vec::new();
    let mut current: Option<(usize, usize, Vec<f64>, Vec<f64>)> = None;

    let flush = |group: (usize, usize, Vec<f64>, Vec<f64>),
                 peaks: &mut Vec<Peak>| {
        let (start, end, scores, pvalues) = group;
        let score = scores.iter().sum::<f64>() / scores.len() as f64;
        let pvalue = combine_pvalues(&pvalues, CombineMethod::Stouffer);
        peaks.push(Peak::new(id.to_owned(), start, end, score, pvalue));
    };

    for &(start, end, score, pvalue) in windows {
        match current.as_mut() {
            Some((_, group_end, scores, pvalues))
                if start <= *group_end + merge_distance =>
            {
                *group_end = std::cmp::max(*group_end, end);
                scores.push(score);
                pvalues.push(pvalue);
            }
            _ => {
                if let Some(group) = current.take() {
                    flush(group, &mut peaks);
                }
                current = Some((start, end, vec![score], vec![pvalue]));
            }
        }
    }
    if let Some(group) = current.take() {
        flush(group, &mut peaks);
    }
    peaks
}

#[cfg(test)]
mod peaks_tests {
    use super::*;

    fn params() -> PeakParams {
        PeakParams {
            window: 150,
            offset: 150,
            enrichment: 3f64,
            max_pvalue: 0.05,
            pseudocount: 1f64,
            merge_distance: 0,
            mean_coverage: 0f64,
            median_coverage: 0f64,
        }
    }

    fn entry_with_coverage(id: &str, coverage: Vec<u32>) -> RcEntry {
        let len = coverage.len();
        let sequence = "ACGT".repeat(len / 4 + 1)[..len].to_owned();
        RcEntry::new(id.to_owned(), sequence, vec![0; len], coverage)
    }

    #[test]
    fn test_params_validation() {
        let mut p = params();
        assert!(p.validate().is_ok());
        p.window = 5;
        assert!(p.validate().is_err());
        p.window = 150;
        p.max_pvalue = 0f64;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_single_plateau_yields_one_peak() {
        let mut coverage = vec![10u32; 1000];
        for c in coverage.iter_mut().take(600).skip(400) {
            *c = 200;
        }
        let ip = entry_with_coverage("tx", coverage);
        let peaks = call_peaks(&params(), &ip, None).unwrap();

        assert_eq!(peaks.len(), 1);
        let peak = &peaks[0];
        assert!(peak.start >= 400 && peak.end <= 600);
        assert!(peak.start < peak.end);
        assert!(peak.score > 3f64);
        assert!(peak.pvalue < 0.05);
    }

    #[test]
    fn test_flat_coverage_yields_no_peaks() {
        let ip = entry_with_coverage("tx", vec![25u32; 900]);
        let peaks = call_peaks(&params(), &ip, None).unwrap();
        assert!(peaks.is_empty());
    }

    #[test]
    fn test_coverage_gate_rejects() {
        let mut p = params();
        p.mean_coverage = 50f64;
        let ip = entry_with_coverage("tx", vec![25u32; 900]);
        match call_peaks(&p, &ip, None) {
            Err(RfError::LowCoverage) => {}
            other => panic!("expected low coverage, got {other:?}"),
        }
    }

    #[test]
    fn test_control_sequence_mismatch() {
        let ip = entry_with_coverage("tx", vec![25u32; 100]);
        let mut control = entry_with_coverage("tx", vec![25u32; 100]);
        control.sequence = "G".repeat(100);
        match call_peaks(&params(), &ip, Some(&control)) {
            Err(RfError::SeqMismatch) => {}
            other => panic!("expected sequence mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_control_suppresses_shared_enrichment() {
        let mut coverage = vec![10u32; 600];
        for c in coverage.iter_mut().take(450).skip(300) {
            *c = 300;
        }
        let ip = entry_with_coverage("tx", coverage.clone());
        // the control carries the same plateau, enrichment cancels
        let control = entry_with_coverage("tx", coverage);
        let peaks = call_peaks(&params(), &ip, Some(&control)).unwrap();
        assert!(peaks.is_empty());
    }

    #[test]
    fn test_merge_respects_distance() {
        let windows = vec![
            (0usize, 150usize, 4f64, 0.001f64),
            (150, 300, 5f64, 0.002),
            (600, 750, 6f64, 0.003),
        ];
        let merged = merge_windows("tx", &windows, 0);
        assert_eq!(merged.len(), 2);
        assert_eq!((merged[0].start, merged[0].end), (0, 300));
        assert!((merged[0].score - 4.5).abs() < 1e-9);
        assert_eq!((merged[1].start, merged[1].end), (600, 750));

        let merged = merge_windows("tx", &windows, 300);
        assert_eq!(merged.len(), 1);
        assert_eq!((merged[0].start, merged[0].end), (0, 750));
    }
}
