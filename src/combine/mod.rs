//! Replicate combination: per-transcript XML profiles from K inputs are
//! checked for compatibility, then merged into per-base mean/stdev vectors.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::bail;
use itertools::Itertools;
use log::{debug, error};
use rustc_hash::FxHashMap;

use crate::config::ReactiveBases;
use crate::errs::{CompatField, RfError, RfResult};
use crate::stats;
use crate::util::{canonical_sequence, same_sequence};
use crate::xml::{self, NamedVector, ProfileDocument};

pub mod subcommand;

/// Shared rejection counters, one bump per transcript.
#[derive(Debug, Default)]
pub(crate) struct CombineCounts {
    combined: AtomicUsize,
    difftool: AtomicUsize,
    diffseq: AtomicUsize,
    diffscore: AtomicUsize,
    diffnorm: AtomicUsize,
    diffoffset: AtomicUsize,
    diffwin: AtomicUsize,
    failed: AtomicUsize,
}

impl CombineCounts {
    pub(crate) fn record(&self, id: &str, result: &RfResult<()>) {
        let counter = match result {
            Ok(()) => &self.combined,
            Err(RfError::Incompatible(field)) => {
                debug!("{id}: replicates disagree on {field}");
                match field {
                    CompatField::Tool => &self.difftool,
                    CompatField::Sequence => &self.diffseq,
                    CompatField::Scoring => &self.diffscore,
                    CompatField::Norm => &self.diffnorm,
                    CompatField::Offset => &self.diffoffset,
                    CompatField::Window => &self.diffwin,
                }
            }
            Err(e) => {
                error!("{id}: {e}");
                &self.failed
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn combined(&self) -> usize {
        self.combined.load(Ordering::Relaxed)
    }

    pub(crate) fn rows(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("combined", self.combined.load(Ordering::Relaxed)),
            ("difftool", self.difftool.load(Ordering::Relaxed)),
            ("diffseq", self.diffseq.load(Ordering::Relaxed)),
            ("diffscore", self.diffscore.load(Ordering::Relaxed)),
            ("diffnorm", self.diffnorm.load(Ordering::Relaxed)),
            ("diffoffset", self.diffoffset.load(Ordering::Relaxed)),
            ("diffwin", self.diffwin.load(Ordering::Relaxed)),
            ("failed", self.failed.load(Ordering::Relaxed)),
        ]
    }
}

/// Map transcript id to document path for one input, which may be a single
/// XML file or a directory of per-transcript documents.
pub(crate) fn collect_input(
    input: &Path,
) -> anyhow::Result<FxHashMap<String, PathBuf>> {
    let mut map = FxHashMap::default();
    if input.is_dir() {
        for entry in std::fs::read_dir(input)? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "xml") {
                if let Some(stem) =
                    path.file_stem().and_then(|s| s.to_str())
                {
                    map.insert(stem.to_owned(), path);
                }
            }
        }
    } else {
        let doc = xml::read_profile(input)?;
        map.insert(doc.id, input.to_path_buf());
    }
    if map.is_empty() {
        bail!("no XML profiles found under {}", input.display());
    }
    Ok(map)
}

/// Identifiers present in every input, sorted for deterministic scheduling.
pub(crate) fn common_ids(maps: &[FxHashMap<String, PathBuf>]) -> Vec<String> {
    match maps.split_first() {
        Some((first, rest)) => first
            .keys()
            .filter(|id| rest.iter().all(|m| m.contains_key(*id)))
            .cloned()
            .sorted()
            .collect(),
        None => Vec::new(),
    }
}

fn round_to(value: f64, decimals: usize) -> f64 {
    if value.is_finite() {
        let scale = 10f64.powi(decimals as i32);
        (value * scale).round() / scale
    } else {
        value
    }
}

/// One pass per field over every replicate, higher-priority fields checked
/// across all K inputs before lower-priority ones, so a transcript always
/// lands on the counter of its most severe disagreement.
fn check_compatibility(docs: &[ProfileDocument]) -> RfResult<()> {
    let first = &docs[0];
    let rest = &docs[1..];
    if rest.iter().any(|doc| doc.header.tool != first.header.tool) {
        return Err(RfError::Incompatible(CompatField::Tool));
    }
    if rest
        .iter()
        .any(|doc| !same_sequence(&doc.sequence, &first.sequence))
    {
        return Err(RfError::Incompatible(CompatField::Sequence));
    }
    if rest.iter().any(|doc| doc.header.win != first.header.win) {
        return Err(RfError::Incompatible(CompatField::Window));
    }
    if first.header.tool != xml::TOOL_MODCALL {
        if rest
            .iter()
            .any(|doc| doc.header.scoring != first.header.scoring)
        {
            return Err(RfError::Incompatible(CompatField::Scoring));
        }
        if rest.iter().any(|doc| {
            doc.header.norm != first.header.norm
                || doc.header.remap != first.header.remap
        }) {
            return Err(RfError::Incompatible(CompatField::Norm));
        }
        if rest
            .iter()
            .any(|doc| doc.header.offset != first.header.offset)
        {
            return Err(RfError::Incompatible(CompatField::Offset));
        }
    }
    // replicates of the same tool must carry the same vector layout
    for doc in rest {
        let matches = doc.vectors.len() == first.vectors.len()
            && doc
                .vectors
                .iter()
                .zip(first.vectors.iter())
                .all(|(a, b)| a.name == b.name);
        if !matches {
            return Err(RfError::MalformedDocument(format!(
                "replicates of {} carry different value elements",
                first.id
            )));
        }
    }
    Ok(())
}

/// Merge K compatible documents into one combined document with per-base
/// means (and stdevs when requested).
pub(crate) fn combine_documents(
    docs: &[ProfileDocument],
    decimals: usize,
    with_stdev: bool,
) -> RfResult<ProfileDocument> {
    check_compatibility(docs)?;
    let first = &docs[0];

    let reactive_sets = docs
        .iter()
        .map(|doc| {
            doc.header.reactive.parse::<ReactiveBases>().map_err(|e| {
                RfError::MalformedDocument(format!(
                    "bad reactive set in {}: {e}",
                    doc.id
                ))
            })
        })
        .collect::<RfResult<Vec<ReactiveBases>>>()?;
    let reactive_union = reactive_sets
        .iter()
        .skip(1)
        .fold(reactive_sets[0].clone(), |acc, set| acc.union(set));

    let algorithm = if docs
        .iter()
        .all(|doc| doc.header.algorithm == first.header.algorithm)
    {
        first.header.algorithm.clone()
    } else {
        Some("Combined".to_owned())
    };

    let bases =
        canonical_sequence(&first.sequence).chars().collect::<Vec<char>>();
    let len = bases.len();
    let mut vectors = Vec::with_capacity(first.vectors.len());
    let mut errors = Vec::new();
    for (v_idx, vector) in first.vectors.iter().enumerate() {
        let mut means = vec![f64::NAN; len];
        let mut stdevs = vec![f64::NAN; len];
        let mut acc = Vec::with_capacity(docs.len());
        for i in 0..len {
            acc.clear();
            for (doc, set) in docs.iter().zip(reactive_sets.iter()) {
                if set.contains(bases[i]) {
                    acc.push(doc.vectors[v_idx].values[i]);
                }
            }
            if let Some(mean) = stats::mean(&acc) {
                means[i] = round_to(mean, decimals);
            }
            if let Some(stdev) = stats::stdev(&acc) {
                stdevs[i] = round_to(stdev, decimals);
            }
        }
        vectors.push(NamedVector { name: vector.name.clone(), values: means });
        if with_stdev {
            errors.push(NamedVector {
                name: format!("{}-error", vector.name),
                values: stdevs,
            });
        }
    }

    let mut header = first.header.clone();
    header.combined = true;
    header.reactive = reactive_union.to_string();
    header.algorithm = algorithm;

    Ok(ProfileDocument {
        header,
        id: first.id.clone(),
        sequence: first.sequence.clone(),
        vectors,
        errors,
    })
}
