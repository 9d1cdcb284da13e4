use std::path::Path;

use assert_approx_eq::assert_approx_eq;
use rand::prelude::*;
use rand::rngs::StdRng;
use rf_tools::xml::read_profile;

use crate::common::{run_rftools, write_store};

mod common;

#[test]
fn test_norm_help() {
    let _ = run_rftools(&["norm", "--help"])
        .expect("failed to run rftools norm help");
}

#[test]
fn test_norm_rouskin_winsorize_profile() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("treated.rc");
    write_store(
        &store,
        &[(
            "tx1",
            "ACGUACGUAC",
            vec![0, 0, 5, 0, 0, 10, 0, 0, 5, 0],
            vec![20; 10],
        )],
    );
    let out_dir = dir.path().join("norm_out");

    run_rftools(&[
        "norm",
        "-t",
        store.to_str().unwrap(),
        "-o",
        out_dir.to_str().unwrap(),
        "-s",
        "2",
        "-n",
        "2",
        "--norm-window",
        "10",
        "--suppress-progress",
    ])
    .expect("failed to run rftools norm");

    let doc = read_profile(out_dir.join("tx1.xml")).unwrap();
    assert_eq!(doc.header.tool, "rf-norm");
    assert_eq!(doc.header.scoring.as_deref(), Some("Rouskin"));
    assert_eq!(doc.sequence.len(), 10);

    let values = &doc.primary().unwrap().values;
    assert_eq!(values.len(), 10);
    assert!(values.iter().all(|&v| (0f64..=1f64).contains(&v)));
    // signal concentrates where the counts were, zeros stay at zero
    assert_approx_eq!(values[5], 1f64, 1e-3);
    assert_approx_eq!(values[2], 0.645, 1e-3);
    assert_approx_eq!(values[8], 0.645, 1e-3);
    for i in [0usize, 1, 3, 4, 6, 7, 9] {
        assert_approx_eq!(values[i], 0f64, 1e-9);
    }
}

#[test]
fn test_norm_low_coverage_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("treated.rc");
    write_store(
        &store,
        &[(
            "tx1",
            "ACGUACGUAC",
            vec![0, 0, 5, 0, 0, 10, 0, 0, 5, 0],
            vec![4; 10],
        )],
    );
    let out_dir = dir.path().join("norm_out");

    run_rftools(&[
        "norm",
        "-t",
        store.to_str().unwrap(),
        "-o",
        out_dir.to_str().unwrap(),
        "-s",
        "2",
        "-n",
        "2",
        "--mean-coverage",
        "5",
        "--suppress-progress",
    ])
    .expect("failed to run rftools norm");

    // the transcript is rejected, no document is written
    assert!(out_dir.exists());
    assert!(!out_dir.join("tx1.xml").exists());
}

#[test]
fn test_norm_ding_all_zero_untreated_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let treated = dir.path().join("treated.rc");
    let untreated = dir.path().join("untreated.rc");
    write_store(
        &treated,
        &[("tx1", "ACGTACGTACGT", vec![3; 12], vec![50; 12])],
    );
    write_store(
        &untreated,
        &[("tx1", "ACGTACGTACGT", vec![0; 12], vec![50; 12])],
    );
    let out_dir = dir.path().join("norm_out");

    run_rftools(&[
        "norm",
        "-t",
        treated.to_str().unwrap(),
        "-u",
        untreated.to_str().unwrap(),
        "-o",
        out_dir.to_str().unwrap(),
        "-s",
        "1",
        "-n",
        "3",
        "--suppress-progress",
    ])
    .expect("failed to run rftools norm");

    assert!(!out_dir.join("tx1.xml").exists());
}

#[test]
fn test_norm_siegfried_masks_untreated_rate() {
    let dir = tempfile::tempdir().unwrap();
    let treated = dir.path().join("treated.rc");
    let untreated = dir.path().join("untreated.rc");
    let sequence = "ACGTACGTACGTACGTACGT";
    let mut untreated_counts = vec![1u32; 20];
    // untreated mutation rate 0.10 at one position, cutoff is 0.05
    untreated_counts[5] = 10;
    write_store(
        &treated,
        &[("tx1", sequence, vec![30; 20], vec![100; 20])],
    );
    write_store(
        &untreated,
        &[("tx1", sequence, untreated_counts, vec![100; 20])],
    );
    let out_dir = dir.path().join("norm_out");

    run_rftools(&[
        "norm",
        "-t",
        treated.to_str().unwrap(),
        "-u",
        untreated.to_str().unwrap(),
        "-o",
        out_dir.to_str().unwrap(),
        "-s",
        "3",
        "-n",
        "2",
        "--raw",
        "--suppress-progress",
    ])
    .expect("failed to run rftools norm");

    let doc = read_profile(out_dir.join("tx1.xml")).unwrap();
    let values = &doc.primary().unwrap().values;
    assert!(values[5].is_nan());
    assert!(values[4].is_finite());
    assert_approx_eq!(values[4], 0.29, 1e-3);
}

fn random_store(path: &Path, seed: u64) {
    let mut rng: StdRng = StdRng::seed_from_u64(seed);
    let mut entries = Vec::new();
    for i in 0..12 {
        let len = rng.gen_range(40..200);
        let sequence = (0..len)
            .map(|_| ['A', 'C', 'G', 'T'][rng.gen_range(0..4)])
            .collect::<String>();
        let counts =
            (0..len).map(|_| rng.gen_range(0..30)).collect::<Vec<u32>>();
        let coverage =
            (0..len).map(|_| rng.gen_range(10..100)).collect::<Vec<u32>>();
        entries.push((format!("tx{i:02}"), sequence, counts, coverage));
    }
    let borrowed = entries
        .iter()
        .map(|(id, seq, counts, cov)| {
            (id.as_str(), seq.as_str(), counts.clone(), cov.clone())
        })
        .collect::<Vec<(&str, &str, Vec<u32>, Vec<u32>)>>();
    write_store(path, &borrowed);
}

fn dir_contents(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let path = entry.unwrap().path();
            let name =
                path.file_name().unwrap().to_string_lossy().to_string();
            (name, std::fs::read(&path).unwrap())
        })
        .collect::<Vec<(String, Vec<u8>)>>();
    files.sort_by(|a, b| a.0.cmp(&b.0));
    files
}

#[test]
fn test_norm_parallel_matches_serial() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("treated.rc");
    random_store(&store, 42);

    let mut outputs = Vec::new();
    for (label, processors) in
        [("serial_a", "1"), ("serial_b", "1"), ("parallel", "4")]
    {
        let out_dir = dir.path().join(label);
        run_rftools(&[
            "norm",
            "-t",
            store.to_str().unwrap(),
            "-o",
            out_dir.to_str().unwrap(),
            "-s",
            "2",
            "-n",
            "2",
            "-p",
            processors,
            "--suppress-progress",
        ])
        .expect("failed to run rftools norm");
        outputs.push(dir_contents(&out_dir));
    }

    // serial runs are bit-identical, the parallel run emits the same set of
    // byte-identical documents
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[0], outputs[2]);
    assert!(!outputs[0].is_empty());
}

#[test]
fn test_norm_config_file_reproduces_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("treated.rc");
    random_store(&store, 7);
    let config = dir.path().join("norm.conf");

    let out_a = dir.path().join("out_a");
    run_rftools(&[
        "norm",
        "-t",
        store.to_str().unwrap(),
        "-o",
        out_a.to_str().unwrap(),
        "-s",
        "4",
        "-n",
        "3",
        "--norm-window",
        "60",
        "--window-offset",
        "20",
        "--reactive-bases",
        "AC",
        "--save-config",
        config.to_str().unwrap(),
        "--suppress-progress",
    ])
    .expect("failed to run rftools norm");
    assert!(config.exists());

    let out_b = dir.path().join("out_b");
    run_rftools(&[
        "norm",
        "-t",
        store.to_str().unwrap(),
        "-o",
        out_b.to_str().unwrap(),
        "--config-file",
        config.to_str().unwrap(),
        "--suppress-progress",
    ])
    .expect("failed to run rftools norm from config");

    assert_eq!(dir_contents(&out_a), dir_contents(&out_b));
}
