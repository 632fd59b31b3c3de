//! A complete run from config to finished run directory.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use readsim::config::SimulatorConfig;
use readsim::error::{ConfigError, SimError};
use readsim::launch::{finish_run, prepare_run};
use readsim::writer::SUMMARY_COLUMNS;

fn write_reads(path: &Path, n: usize, len: usize) {
    let mut content = String::new();
    for i in 0..n {
        content.push_str(&format!(">source{i}\n{}\n", "ACGT".repeat(len / 4)));
    }
    fs::write(path, content).unwrap();
}

fn count_records(reads_dir: &Path) -> usize {
    fs::read_dir(reads_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "fasta"))
        .map(|p| fs::read_to_string(p).unwrap().matches('>').count())
        .sum()
}

#[test]
fn test_full_run_produces_consistent_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let reads = dir.path().join("reads.fasta");
    write_reads(&reads, 200, 2000);
    let config = SimulatorConfig {
        n_channels: 4,
        acceleration_factor: 200.0,
        seed: Some(5),
        max_reads_per_file: 5,
        log_interval: 10.0,
        ..SimulatorConfig::new(&reads, dir.path().join("run"))
    };

    let run = prepare_run(&config).unwrap();
    run.start().unwrap();
    thread::sleep(Duration::from_millis(300));
    let report = finish_run(&run).unwrap();
    assert!(!run.simulator.is_running());

    let root = dir.path().join("run");
    let reads_dir = root.join("reads");
    assert!(report.reads_written > 0);
    assert_eq!(count_records(&reads_dir) as u64, report.reads_written);
    assert_eq!(report.summary_rows as u64, report.reads_written);

    let live = fs::read_to_string(root.join("live_sequencing_summary.txt")).unwrap();
    assert_eq!(live.lines().next().unwrap(), SUMMARY_COLUMNS.join("\t"));
    assert_eq!(live.lines().count() as u64 - 1, report.reads_written);

    let summary = fs::read_to_string(root.join("sequencing_summary.txt")).unwrap();
    assert_eq!(summary.lines().count(), live.lines().count());

    let stats: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(root.join("simulator_stats.json")).unwrap()).unwrap();
    assert_eq!(stats["channels"].as_array().unwrap().len(), 4);
    assert_eq!(stats["totals"]["reads_written"].as_u64(), Some(report.reads_written));
    assert_eq!(stats["params"]["n_channels"].as_u64(), Some(4));
}

#[test]
fn test_existing_run_dir() {
    let dir = tempfile::tempdir().unwrap();
    let reads = dir.path().join("reads.fasta");
    write_reads(&reads, 10, 100);
    let config = SimulatorConfig {
        n_channels: 2,
        ..SimulatorConfig::new(&reads, dir.path().join("run"))
    };

    let first = prepare_run(&config).unwrap();
    assert!(matches!(
        prepare_run(&config),
        Err(SimError::Config(ConfigError::RunDirExists { .. }))
    ));

    // A live run keeps its directory even with overwrite.
    let overwrite = SimulatorConfig {
        overwrite: true,
        ..config
    };
    assert!(prepare_run(&overwrite).is_err());

    finish_run(&first).unwrap();
    drop(first);
    let second = prepare_run(&overwrite).unwrap();
    assert!(!second.run_dir.summary_path().exists());
}
