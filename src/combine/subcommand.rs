use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Args;
use log::info;
use rustc_hash::FxHashMap;

use crate::combine::{
    collect_input, combine_documents, common_ids, CombineCounts,
};
use crate::errs::{RfError, RfResult};
use crate::logging::init_logging;
use crate::pool::process_transcripts;
use crate::util::{format_counts_table, get_master_progress_bar};
use crate::xml;

#[derive(Args)]
#[command(arg_required_else_help = true)]
pub struct CombineArgs {
    /// Reactivity XML profiles, or directories of per-transcript profiles.
    /// At least two replicates are required; only transcripts present in
    /// every input are combined.
    #[arg(required = true, num_args = 2..)]
    inputs: Vec<PathBuf>,
    /// Directory to write one combined XML document per transcript.
    #[clap(help_heading = "Output Options")]
    #[arg(short = 'o', long, default_value = "rf_combine")]
    output: PathBuf,
    /// Overwrite the output directory if it already exists.
    #[clap(help_heading = "Output Options")]
    #[arg(long, default_value_t = false)]
    force: bool,
    /// Decimal digits for combined values.
    #[clap(help_heading = "Output Options")]
    #[arg(long, default_value_t = 3)]
    decimals: usize,
    /// Emit per-base standard deviations as *-error elements.
    #[clap(help_heading = "Output Options")]
    #[arg(long, default_value_t = false)]
    stdev: bool,
    /// Number of parallel worker threads.
    #[clap(help_heading = "Compute Options")]
    #[arg(short = 'p', long, default_value_t = 1)]
    processors: usize,
    /// Path to file to write run log.
    #[clap(help_heading = "Logging Options")]
    #[arg(long, alias = "log")]
    log_filepath: Option<PathBuf>,
    /// Hide the progress bar.
    #[clap(help_heading = "Logging Options")]
    #[arg(long, default_value_t = false, hide_short_help = true)]
    suppress_progress: bool,
}

fn combine_one(
    id: &str,
    maps: &[FxHashMap<String, PathBuf>],
    decimals: usize,
    with_stdev: bool,
    out_dir: &Path,
) -> RfResult<()> {
    let docs = maps
        .iter()
        .map(|map| {
            let path = map.get(id).ok_or(RfError::MissingTranscript)?;
            xml::read_profile(path)
        })
        .collect::<RfResult<Vec<xml::ProfileDocument>>>()?;
    let combined = combine_documents(&docs, decimals, with_stdev)?;
    xml::write_profile(&combined, out_dir.join(format!("{id}.xml")), decimals)
}

impl CombineArgs {
    pub fn run(&self) -> anyhow::Result<()> {
        let _handle = init_logging(self.log_filepath.as_ref());
        if !(1..=10).contains(&self.decimals) {
            bail!("decimals must be in [1, 10], got {}", self.decimals);
        }

        if self.output.exists() {
            if self.force {
                std::fs::remove_dir_all(&self.output)?;
            } else {
                bail!(
                    "output directory {} exists, use --force to overwrite",
                    self.output.display()
                );
            }
        }
        std::fs::create_dir_all(&self.output)?;

        let maps = self
            .inputs
            .iter()
            .map(|input| {
                collect_input(input).with_context(|| {
                    format!("failed to gather profiles from {input:?}")
                })
            })
            .collect::<anyhow::Result<Vec<FxHashMap<String, PathBuf>>>>()?;
        let ids = common_ids(&maps);
        if ids.is_empty() {
            bail!("the {} inputs share no transcript", maps.len());
        }
        info!(
            "combining {} replicates over {} shared transcripts",
            maps.len(),
            ids.len()
        );

        let counts = CombineCounts::default();
        let progress =
            get_master_progress_bar(ids.len(), self.suppress_progress);
        process_transcripts(
            ids,
            self.processors,
            || Ok(()),
            |_, id| {
                let result = combine_one(
                    id,
                    &maps,
                    self.decimals,
                    self.stdev,
                    &self.output,
                );
                counts.record(id, &result);
            },
            |_| progress.inc(1),
        )?;
        progress.finish_and_clear();

        info!(
            "done, {} transcripts combined into {}\n{}",
            counts.combined(),
            self.output.display(),
            format_counts_table(&counts.rows())
        );
        Ok(())
    }
}
