use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Context};
use clap::Args;
use log::{debug, error, info};

use crate::errs::{RfError, RfResult};
use crate::logging::init_logging;
use crate::peaks::{call_peaks, Peak, PeakParams};
use crate::pool::process_transcripts;
use crate::rc::RcReader;
use crate::util::{format_counts_table, get_master_progress_bar};

#[derive(Args)]
#[command(arg_required_else_help = true)]
pub struct PeakcallArgs {
    /// Count store (RC) for the immunoprecipitated sample.
    #[clap(help_heading = "Input Options")]
    #[arg(short = 'i', long)]
    ip: PathBuf,
    /// Count store (RC) for the input/control sample. Without it the
    /// transcript-wide mean of window means serves as the background.
    #[clap(help_heading = "Input Options")]
    #[arg(short = 'c', long)]
    control: Option<PathBuf>,
    /// Output BED file of merged peaks.
    #[clap(help_heading = "Output Options")]
    #[arg(short = 'o', long, default_value = "rf_peakcall.bed")]
    output: PathBuf,
    /// Overwrite the output file if it already exists.
    #[clap(help_heading = "Output Options")]
    #[arg(long, default_value_t = false)]
    force: bool,
    /// Window length in bases (at least 10).
    #[clap(help_heading = "Peak Options")]
    #[arg(short = 'w', long, default_value_t = 150)]
    window: usize,
    /// Distance between successive window starts, defaults to the window
    /// length.
    #[clap(help_heading = "Peak Options")]
    #[arg(long)]
    offset: Option<usize>,
    /// Minimum log2 enrichment for a window to be kept.
    #[clap(help_heading = "Peak Options")]
    #[arg(short = 'e', long, default_value_t = 3.0)]
    enrichment: f64,
    /// Benjamini-Hochberg adjusted p-value cutoff.
    #[clap(help_heading = "Peak Options")]
    #[arg(short = 'v', long = "pvalue", default_value_t = 0.05)]
    max_pvalue: f64,
    /// Pseudocount added to window means and medians before taking ratios.
    #[clap(help_heading = "Peak Options")]
    #[arg(long, default_value_t = 1.0)]
    pseudocount: f64,
    /// Merge significant windows closer than this many bases.
    #[clap(help_heading = "Peak Options")]
    #[arg(short = 'd', long, default_value_t = 0)]
    merge_distance: usize,
    /// Discard transcripts whose mean coverage is below this threshold.
    #[clap(help_heading = "Coverage Options")]
    #[arg(long, default_value_t = 0.0)]
    mean_coverage: f64,
    /// Discard transcripts whose median coverage is below this threshold.
    #[clap(help_heading = "Coverage Options")]
    #[arg(long, default_value_t = 0.0)]
    median_coverage: f64,
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

#[derive(Debug, Default)]
struct PeakCounts {
    covered: AtomicUsize,
    nopeaks: AtomicUsize,
    incov: AtomicUsize,
    diffseq: AtomicUsize,
    missing: AtomicUsize,
    failed: AtomicUsize,
}

impl PeakCounts {
    fn record(&self, id: &str, result: &RfResult<Vec<Peak>>) {
        let counter = match result {
            Ok(peaks) if peaks.is_empty() => &self.nopeaks,
            Ok(_) => &self.covered,
            Err(RfError::LowCoverage) => {
                debug!("{id}: coverage below thresholds");
                &self.incov
            }
            Err(RfError::SeqMismatch) => {
                debug!("{id}: samples disagree on the sequence");
                &self.diffseq
            }
            Err(RfError::MissingTranscript) => {
                debug!("{id}: absent from the control store");
                &self.missing
            }
            Err(e) => {
                error!("{id}: {e}");
                &self.failed
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn rows(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("covered", self.covered.load(Ordering::Relaxed)),
            ("nopeaks", self.nopeaks.load(Ordering::Relaxed)),
            ("incov", self.incov.load(Ordering::Relaxed)),
            ("diffseq", self.diffseq.load(Ordering::Relaxed)),
            ("missing", self.missing.load(Ordering::Relaxed)),
            ("failed", self.failed.load(Ordering::Relaxed)),
        ]
    }
}

struct PeakWorker {
    ip: RcReader,
    control: Option<RcReader>,
}

fn scan_transcript(
    worker: &mut PeakWorker,
    id: &str,
    params: &PeakParams,
) -> RfResult<Vec<Peak>> {
    let ip = worker
        .ip
        .get(id)?
        .ok_or_else(|| RfError::CorruptRecord(id.to_owned()))?;
    let control = match worker.control.as_mut() {
        Some(reader) => Some(
            reader.get(id)?.ok_or(RfError::MissingTranscript)?,
        ),
        None => None,
    };
    call_peaks(params, &ip, control.as_ref())
}

impl PeakcallArgs {
    fn params(&self) -> PeakParams {
        PeakParams {
            window: self.window,
            offset: self.offset.unwrap_or(self.window),
            enrichment: self.enrichment,
            max_pvalue: self.max_pvalue,
            pseudocount: self.pseudocount,
            merge_distance: self.merge_distance,
            mean_coverage: self.mean_coverage,
            median_coverage: self.median_coverage,
        }
    }

    pub fn run(&self) -> anyhow::Result<()> {
        let _handle = init_logging(self.log_filepath.as_ref());
        let params = self.params();
        params.validate()?;

        if self.output.exists() && !self.force {
            bail!(
                "output file {} exists, use --force to overwrite",
                self.output.display()
            );
        }
        crate::util::create_out_directory(&self.output)?;

        let ip = RcReader::open(&self.ip).with_context(|| {
            format!("failed to open IP count store {:?}", self.ip)
        })?;
        let ids = ip.ids().map(String::from).collect::<Vec<String>>();
        if let Some(fp) = &self.control {
            RcReader::open(fp).with_context(|| {
                format!("failed to open control count store {fp:?}")
            })?;
        }

        info!(
            "scanning {} transcripts, window {}, offset {}",
            ids.len(),
            params.window,
            params.offset
        );

        let counts = PeakCounts::default();
        let mut peaks: Vec<Peak> = Vec::new();
        let progress =
            get_master_progress_bar(ids.len(), self.suppress_progress);
        process_transcripts(
            ids,
            self.processors,
            || {
                Ok(PeakWorker {
                    ip: RcReader::open(&self.ip)?,
                    control: self
                        .control
                        .as_ref()
                        .map(RcReader::open)
                        .transpose()?,
                })
            },
            |worker, id| {
                let result = scan_transcript(worker, id, &params);
                counts.record(id, &result);
                result.unwrap_or_default()
            },
            |transcript_peaks| {
                peaks.extend(transcript_peaks);
                progress.inc(1);
            },
        )?;
        progress.finish_and_clear();

        peaks.sort_by(|a, b| {
            a.id.cmp(&b.id).then(a.start.cmp(&b.start))
        });
        let mut writer = BufWriter::new(File::create(&self.output)?);
        for peak in &peaks {
            writer.write_all(peak.to_row().as_bytes())?;
        }
        writer.flush()?;

        info!(
            "done, {} peaks written to {}\n{}",
            peaks.len(),
            self.output.display(),
            format_counts_table(&counts.rows())
        );
        Ok(())
    }
}
