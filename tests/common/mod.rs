use std::path::{Path, PathBuf};
use std::process::Output;

use anyhow::anyhow;
use rf_tools::rc::RcWriter;
use rf_tools::xml::{self, NamedVector, ProfileDocument, ProfileHeader};

pub fn run_rftools(args: &[&str]) -> anyhow::Result<Output> {
    let exe = Path::new(env!("CARGO_BIN_EXE_rftools"));
    assert!(exe.exists());

    let output = std::process::Command::new(exe)
        .args(args)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?
        .wait_with_output()?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(anyhow!("failed to run {:?}", args.join(" ")))
    }
}

/// Write a count store with one entry per (id, sequence, counts, coverage)
/// tuple.
pub fn write_store(
    path: &Path,
    entries: &[(&str, &str, Vec<u32>, Vec<u32>)],
) {
    let mut writer = RcWriter::create(path).unwrap();
    for (id, sequence, counts, coverage) in entries {
        writer.write_entry(id, sequence, counts, coverage).unwrap();
    }
    writer.finish().unwrap();
}

/// Write a minimal rf-norm reactivity document the combiner accepts.
pub fn write_norm_profile(
    dir: &Path,
    id: &str,
    sequence: &str,
    values: &[f64],
    scoring: &str,
) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let header = ProfileHeader {
        combined: false,
        tool: xml::TOOL_NORM.to_owned(),
        keep_attr: false,
        reactive: "N".to_owned(),
        scoring: Some(scoring.to_owned()),
        norm: Some("90% Winsorize".to_owned()),
        win: Some(sequence.len().to_string()),
        offset: Some(sequence.len().to_string()),
        remap: Some("FALSE".to_owned()),
        ..Default::default()
    };
    let doc = ProfileDocument {
        header,
        id: id.to_owned(),
        sequence: sequence.to_owned(),
        vectors: vec![NamedVector {
            name: "reactivity".to_owned(),
            values: values.to_vec(),
        }],
        errors: vec![],
    };
    let path = dir.join(format!("{id}.xml"));
    xml::write_profile(&doc, &path, 3).unwrap();
    path
}
