//! The normalization engine: raw scoring of treated/control count profiles
//! followed by windowed normalization into per-base reactivities, one XML
//! document per transcript.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, error};

use crate::config::{NormConfig, ScoringMethod};
use crate::errs::{RfError, RfResult};
use crate::rc::{RcEntry, RcReader};
use crate::xml::{self, NamedVector, ProfileDocument, ProfileHeader};

pub mod normalize;
pub mod scoring;
pub mod subcommand;

const NORM_DECIMALS: usize = 3;

/// Private per-worker file handles.
pub(crate) struct NormWorker {
    pub(crate) treated: RcReader,
    pub(crate) untreated: Option<RcReader>,
    pub(crate) denatured: Option<RcReader>,
}

/// Shared result counters, incremented by workers as transcripts resolve.
#[derive(Debug, Default)]
pub(crate) struct NormCounts {
    covered: AtomicUsize,
    incov: AtomicUsize,
    diffseq: AtomicUsize,
    missing: AtomicUsize,
    failed: AtomicUsize,
}

impl NormCounts {
    pub(crate) fn record(&self, id: &str, result: &RfResult<()>) {
        let counter = match result {
            Ok(()) => &self.covered,
            Err(RfError::LowCoverage) => {
                debug!("{id}: coverage below thresholds");
                &self.incov
            }
            Err(RfError::SeqMismatch) => {
                debug!("{id}: samples disagree on the sequence");
                &self.diffseq
            }
            Err(RfError::MissingTranscript) => {
                debug!("{id}: absent from a control store");
                &self.missing
            }
            Err(e) => {
                error!("{id}: {e}");
                &self.failed
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn covered(&self) -> usize {
        self.covered.load(Ordering::Relaxed)
    }

    pub(crate) fn rows(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("covered", self.covered.load(Ordering::Relaxed)),
            ("incov", self.incov.load(Ordering::Relaxed)),
            ("diffseq", self.diffseq.load(Ordering::Relaxed)),
            ("missing", self.missing.load(Ordering::Relaxed)),
            ("failed", self.failed.load(Ordering::Relaxed)),
        ]
    }
}

fn fetch_control(
    reader: Option<&mut RcReader>,
    id: &str,
) -> RfResult<Option<RcEntry>> {
    match reader {
        Some(reader) => {
            reader.get(id)?.map(Some).ok_or(RfError::MissingTranscript)
        }
        None => Ok(None),
    }
}

/// Score, normalize and emit one transcript.
pub(crate) fn process_transcript(
    worker: &mut NormWorker,
    id: &str,
    config: &NormConfig,
    out_dir: &Path,
) -> RfResult<()> {
    let treated = worker
        .treated
        .get(id)?
        .ok_or_else(|| RfError::CorruptRecord(id.to_owned()))?;
    let untreated = fetch_control(worker.untreated.as_mut(), id)?;
    let denatured = fetch_control(worker.denatured.as_mut(), id)?;

    let scores = scoring::score_transcript(
        config,
        &treated,
        untreated.as_ref(),
        denatured.as_ref(),
    )?;
    let profile =
        normalize::normalize_profile(config, &treated.sequence, &scores)?;

    let doc = build_document(config, &treated, profile);
    xml::write_profile(&doc, out_dir.join(format!("{id}.xml")), NORM_DECIMALS)
}

fn build_document(
    config: &NormConfig,
    treated: &RcEntry,
    profile: Vec<f64>,
) -> ProfileDocument {
    let window = config.effective_window(treated.len());
    let offset = config.effective_offset(window);
    let norm = if config.raw {
        "raw".to_owned()
    } else {
        config.norm.to_string()
    };
    let mut header = ProfileHeader {
        combined: false,
        tool: xml::TOOL_NORM.to_owned(),
        keep_attr: false,
        reactive: config.reactive_bases.to_string(),
        scoring: Some(config.scoring.to_string()),
        norm: Some(norm),
        win: Some(window.to_string()),
        offset: Some(offset.to_string()),
        remap: Some(xml::tf(config.remap_reactivities).to_owned()),
        ..Default::default()
    };
    match config.scoring {
        ScoringMethod::Ding => {
            header.max = Some(config.max_score.to_string());
            header.pseudo = Some(config.pseudocount.to_string());
        }
        ScoringMethod::Siegfried => {
            header.maxumut = Some(config.max_untreated_mut.to_string());
        }
        ScoringMethod::Rouskin | ScoringMethod::Zubradt => {}
    }
    ProfileDocument {
        header,
        id: treated.id.clone(),
        sequence: treated.sequence.clone(),
        vectors: vec![NamedVector {
            name: "reactivity".to_owned(),
            values: profile,
        }],
        errors: vec![],
    }
}
