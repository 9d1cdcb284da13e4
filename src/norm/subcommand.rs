use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context};
use clap::Args;
use log::info;

use crate::config::{
    NormConfig, NormMethod, ReactiveBases, ScoringMethod, WindowSize,
};
use crate::logging::init_logging;
use crate::norm::{process_transcript, NormCounts, NormWorker};
use crate::pool::process_transcripts;
use crate::rc::RcReader;
use crate::util::{format_counts_table, get_master_progress_bar};

#[derive(Args)]
#[command(arg_required_else_help = true)]
pub struct NormArgs {
    /// Count store (RC) for the treated sample.
    #[clap(help_heading = "Input Options")]
    #[arg(short = 't', long)]
    treated: PathBuf,
    /// Count store (RC) for the untreated control. Required by the Ding and
    /// Siegfried scoring schemes.
    #[clap(help_heading = "Input Options")]
    #[arg(short = 'u', long)]
    untreated: Option<PathBuf>,
    /// Count store (RC) for the denatured control, consulted by Siegfried
    /// scoring only.
    #[clap(help_heading = "Input Options")]
    #[arg(short = 'd', long)]
    denatured: Option<PathBuf>,
    /// Directory to write one reactivity XML document per transcript.
    #[clap(help_heading = "Output Options")]
    #[arg(short = 'o', long, default_value = "rf_norm")]
    output: PathBuf,
    /// Overwrite the output directory if it already exists.
    #[clap(help_heading = "Output Options")]
    #[arg(long, default_value_t = false)]
    force: bool,
    /// Scoring method: 1 Ding, 2 Rouskin, 3 Siegfried, 4 Zubradt.
    #[clap(help_heading = "Scoring Options")]
    #[arg(short = 's', long = "scoring", default_value_t = 1)]
    scoring_method: u8,
    /// Normalization method: 1 2-8%, 2 90% Winsorize, 3 box-plot.
    #[clap(help_heading = "Scoring Options")]
    #[arg(short = 'n', long = "norm", default_value_t = 1)]
    norm_method: u8,
    /// Normalization window in bases (at least 3), or "whole-transcript".
    /// Defaults to whole-transcript for Ding/Siegfried and 50 for
    /// Rouskin/Zubradt.
    #[clap(help_heading = "Scoring Options")]
    #[arg(long, value_parser = WindowSize::from_str)]
    norm_window: Option<WindowSize>,
    /// Distance between successive window starts, defaults to the window
    /// length.
    #[clap(help_heading = "Scoring Options")]
    #[arg(long)]
    window_offset: Option<usize>,
    /// Bases to report reactivities on, e.g. AC; N selects all four.
    #[clap(help_heading = "Scoring Options")]
    #[arg(long, default_value = "N", value_parser = ReactiveBases::from_str)]
    reactive_bases: ReactiveBases,
    /// Normalize each reactive base class independently instead of pooling
    /// them.
    #[clap(help_heading = "Scoring Options")]
    #[arg(long, default_value_t = false)]
    norm_independent: bool,
    /// Pseudocount added before taking ratios or logs.
    #[clap(help_heading = "Scoring Options")]
    #[arg(long, default_value_t = 1.0)]
    pseudocount: f64,
    /// Cap on Ding scores.
    #[clap(help_heading = "Scoring Options")]
    #[arg(long, default_value_t = 10.0)]
    max_score: f64,
    /// Discard transcripts whose mean coverage is below this threshold.
    #[clap(help_heading = "Coverage Options")]
    #[arg(long, default_value_t = 0.0)]
    mean_coverage: f64,
    /// Discard transcripts whose median coverage is below this threshold.
    #[clap(help_heading = "Coverage Options")]
    #[arg(long, default_value_t = 0.0)]
    median_coverage: f64,
    /// Report positions with coverage below this value as NaN.
    #[clap(help_heading = "Coverage Options")]
    #[arg(long, default_value_t = 10)]
    nan: u32,
    /// Remap averaged reactivities onto [0, 1] with the Zarringhalam
    /// piecewise-linear scheme.
    #[clap(help_heading = "Scoring Options")]
    #[arg(long, default_value_t = false)]
    remap_reactivities: bool,
    /// Mask positions whose untreated mutation rate exceeds this value
    /// (Siegfried scoring).
    #[clap(help_heading = "Scoring Options")]
    #[arg(long, default_value_t = 0.05)]
    max_untreated_mut: f64,
    /// Skip normalization and report raw scores.
    #[clap(help_heading = "Scoring Options")]
    #[arg(long, default_value_t = false)]
    raw: bool,
    /// Load every scoring and normalization option from a saved key=value
    /// bundle; the individual options above are ignored.
    #[clap(help_heading = "Scoring Options")]
    #[arg(long, conflicts_with = "save_config")]
    config_file: Option<PathBuf>,
    /// Write the effective option bundle to this file after validation.
    #[clap(help_heading = "Scoring Options")]
    #[arg(long)]
    save_config: Option<PathBuf>,
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

impl NormArgs {
    fn make_config(&self) -> anyhow::Result<NormConfig> {
        let config = match &self.config_file {
            Some(fp) => NormConfig::from_file(fp).with_context(|| {
                format!("failed to load configuration from {fp:?}")
            })?,
            None => {
                let scoring = ScoringMethod::from_code(self.scoring_method)?;
                let norm = NormMethod::from_code(self.norm_method)?;
                let mut config = NormConfig::with_methods(scoring, norm);
                if let Some(window) = self.norm_window {
                    config.norm_window = window;
                }
                config.window_offset = self.window_offset;
                config.reactive_bases = self.reactive_bases.clone();
                config.norm_independent = self.norm_independent;
                config.pseudocount = self.pseudocount;
                config.max_score = self.max_score;
                config.mean_coverage = self.mean_coverage;
                config.median_coverage = self.median_coverage;
                config.nan = self.nan;
                config.remap_reactivities = self.remap_reactivities;
                config.max_untreated_mut = self.max_untreated_mut;
                config.raw = self.raw;
                config.validate()?;
                config
            }
        };
        if let Some(fp) = &self.save_config {
            config.to_file(fp).with_context(|| {
                format!("failed to save configuration to {fp:?}")
            })?;
            info!("saved configuration to {}", fp.display());
        }
        Ok(config)
    }

    pub fn run(&self) -> anyhow::Result<()> {
        let _handle = init_logging(self.log_filepath.as_ref());
        let config = self.make_config()?;

        if config.scoring.requires_untreated() && self.untreated.is_none() {
            bail!(
                "{} scoring requires an untreated count store (--untreated)",
                config.scoring
            );
        }
        if self.untreated.is_some() && !config.scoring.requires_untreated() {
            bail!("{} scoring does not use an untreated sample", config.scoring);
        }
        if self.denatured.is_some() && !config.scoring.accepts_denatured() {
            bail!("a denatured count store is only used by Siegfried scoring");
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

        let treated = RcReader::open(&self.treated).with_context(|| {
            format!("failed to open treated count store {:?}", self.treated)
        })?;
        let ids = treated.ids().map(String::from).collect::<Vec<String>>();
        // open the control stores up front so a bad path aborts before the
        // pool starts
        for fp in [&self.untreated, &self.denatured].into_iter().flatten() {
            RcReader::open(fp).with_context(|| {
                format!("failed to open control count store {fp:?}")
            })?;
        }

        info!(
            "scoring {} transcripts with the {} scheme, {} normalization",
            ids.len(),
            config.scoring,
            if config.raw {
                "no".to_owned()
            } else {
                config.norm.to_string()
            }
        );

        let counts = NormCounts::default();
        let progress =
            get_master_progress_bar(ids.len(), self.suppress_progress);
        process_transcripts(
            ids,
            self.processors,
            || {
                Ok(NormWorker {
                    treated: RcReader::open(&self.treated)?,
                    untreated: self
                        .untreated
                        .as_ref()
                        .map(RcReader::open)
                        .transpose()?,
                    denatured: self
                        .denatured
                        .as_ref()
                        .map(RcReader::open)
                        .transpose()?,
                })
            },
            |worker, id| {
                let result =
                    process_transcript(worker, id, &config, &self.output);
                counts.record(id, &result);
            },
            |_| progress.inc(1),
        )?;
        progress.finish_and_clear();

        info!(
            "done, {} transcripts written to {}\n{}",
            counts.covered(),
            self.output.display(),
            format_counts_table(&counts.rows())
        );
        Ok(())
    }
}
