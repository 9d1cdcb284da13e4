use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use prettytable::format::FormatBuilder;
use prettytable::{row, Table};

pub(crate) const TAB: char = '\t';

pub(crate) fn create_out_directory<T: AsRef<std::ffi::OsStr>>(
    raw_path: T,
) -> anyhow::Result<()> {
    if let Some(p) = Path::new(&raw_path).parent() {
        if !p.exists() && p != Path::new("") {
            info!("creating directory at {p:?}");
            std::fs::create_dir_all(p)?;
        }
    }
    Ok(())
}

pub(crate) fn get_master_progress_bar(n: usize, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let style = ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.green/yellow} {pos:>7}/{len:7} {msg}",
    )
    .unwrap()
    .progress_chars("##-");
    ProgressBar::new(n as u64).with_style(style)
}

/// Render end-of-run counters as a compact two-column table for the log.
pub(crate) fn format_counts_table(rows: &[(&str, usize)]) -> String {
    let mut table = Table::new();
    table.set_format(
        FormatBuilder::new().padding(1, 1).column_separator(' ').build(),
    );
    for (label, count) in rows {
        table.add_row(row![label, count]);
    }
    table.to_string()
}

/// Uppercases and folds RNA `U` into `T` so equivalent spellings of the same
/// transcript compare equal.
pub(crate) fn canonical_sequence(sequence: &str) -> String {
    sequence
        .chars()
        .map(|c| match c.to_ascii_uppercase() {
            'U' => 'T',
            other => other,
        })
        .collect()
}

pub(crate) fn same_sequence(a: &str, b: &str) -> bool {
    a.len() == b.len() && canonical_sequence(a) == canonical_sequence(b)
}
