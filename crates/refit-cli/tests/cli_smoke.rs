use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent directory should be created");
    }
    fs::write(path, content).expect("file should be written");
}

fn refit_signals(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_refit-signals"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("refit-signals should start")
}

fn noise_matrix(diagonal: f64) -> String {
    format!("[[{diagonal}, 0.5], [0.5, {diagonal}]]")
}

/// Writes a config with relative artifact paths next to a two-channel noise
/// artifact and a single-gang lightmap; returns the config path.
fn write_artifacts(temp: &TempDir, noise_bins: usize) -> PathBuf {
    let frequencies = (1..=noise_bins)
        .map(|bin| {
            format!(
                r#"{{ "bin": {bin}, "rr": {}, "ii": {}, "ri": {} }}"#,
                noise_matrix(10.0),
                noise_matrix(12.0),
                noise_matrix(0.0)
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");
    write_file(
        &temp.path().join("artifacts/noise.json"),
        &format!(r#"{{ "channels": [10, 152], "frequencies": [{frequencies}] }}"#),
    );
    write_file(
        &temp.path().join("artifacts/lightmap.json"),
        r#"
        {
          "gangs": [
            {
              "gang": 152,
              "lightmap": {
                "x": { "low": -250.0, "high": 250.0, "bins": 2 },
                "y": { "low": -250.0, "high": 250.0, "bins": 2 },
                "z": { "low": -250.0, "high": 250.0, "bins": 2 },
                "values": [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]
              },
              "gainmap": { "times": [1.3e9], "values": [1.0] }
            }
          ]
        }
        "#,
    );
    let config_path = temp.path().join("artifacts/config.json");
    write_file(
        &config_path,
        r#"
        {
          "lightmap_path": "lightmap.json",
          "noise_path": "noise.json",
          "frequency_window": { "min": 1, "max": 4 },
          "gemm_backend": "reference"
        }
        "#,
    );
    config_path
}

fn write_run_inputs(temp: &TempDir, events: &str) -> [PathBuf; 3] {
    let conditions = temp.path().join("conditions.json");
    let wire_response = temp.path().join("wire-response.json");
    let events_path = temp.path().join("events.json");
    write_file(
        &conditions,
        r#"{ "default_uwire_gain": 300.0, "grid_correction": 1.0 }"#,
    );
    write_file(
        &wire_response,
        r#"{ "deposit": [0.0, 0.5, 1.0, 1.0], "induction": [0.0, 0.1, 0.0, 0.0] }"#,
    );
    write_file(&events_path, events);
    [conditions, wire_response, events_path]
}

const GATED_EVENTS: &str = r#"
{
  "events": [
    { "id": 1, "header": { "sample_count": 2047, "trigger_seconds": 1300000000 } },
    {
      "id": 2,
      "header": { "sample_count": 1000, "trigger_seconds": 1300000000 },
      "uwire_signals": [ { "channel": 10, "time": 1000.0, "denoised_energy": 7.0 } ],
      "charge_clusters": [
        { "x": 0.0, "y": 0.0, "z": 50.0, "drift_time": 20000.0,
          "purity_corrected_energy": 1500.0, "uwire_signals": [0] }
      ],
      "scintillation_clusters": [ { "time": 990000.0, "charge_clusters": [0] } ]
    }
  ]
}
"#;

#[test]
fn help_lists_both_subcommands() {
    let output = refit_signals(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("run"), "stdout: {stdout}");
    assert!(stdout.contains("check-config"), "stdout: {stdout}");
}

#[test]
fn missing_required_flag_is_a_usage_error() {
    let output = refit_signals(&["run", "--config", "config.json"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("ERROR: [CONFIG.CLI_USAGE]"),
        "stderr: {stderr}"
    );
}

#[test]
fn check_config_accepts_complete_artifacts() {
    let temp = TempDir::new().expect("tempdir should be created");
    let config = write_artifacts(&temp, 4);
    let output = refit_signals(&["check-config", "--config", config.to_str().expect("utf-8")]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("Configuration OK: 1 APD gangs, 2 noise channels, bins 1..=4"),
        "stdout: {stdout}"
    );
}

#[test]
fn check_config_reports_missing_noise_bins() {
    let temp = TempDir::new().expect("tempdir should be created");
    let config = write_artifacts(&temp, 3);
    let output = refit_signals(&["check-config", "--config", config.to_str().expect("utf-8")]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("[CONFIG.NOISE_FREQUENCY]"));
}

#[test]
fn check_config_reports_missing_artifact() {
    let temp = TempDir::new().expect("tempdir should be created");
    let config = write_artifacts(&temp, 4);
    fs::remove_file(temp.path().join("artifacts/lightmap.json")).expect("remove lightmap");
    let output = refit_signals(&["check-config", "--config", config.to_str().expect("utf-8")]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("[CONFIG.LIGHTMAP_ARTIFACT]"));
}

#[test]
fn run_writes_a_report_for_gated_events() {
    let temp = TempDir::new().expect("tempdir should be created");
    let config = write_artifacts(&temp, 4);
    let [conditions, wire_response, events] = write_run_inputs(&temp, GATED_EVENTS);
    let report_path = temp.path().join("out/report.json");

    let output = refit_signals(&[
        "run",
        "--config",
        config.to_str().expect("utf-8"),
        "--conditions",
        conditions.to_str().expect("utf-8"),
        "--wire-response",
        wire_response.to_str().expect("utf-8"),
        "--events",
        events.to_str().expect("utf-8"),
        "--report",
        report_path.to_str().expect("utf-8"),
        "--backend",
        "faer",
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(
        String::from_utf8_lossy(&output.stdout)
            .contains("Refit 0 of 2 events (1 passed through, 1 dropped)")
    );

    let report: Value =
        serde_json::from_str(&fs::read_to_string(&report_path).expect("report should exist"))
            .expect("report should be valid json");
    let events = report["events"].as_array().expect("events array");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["outcome"], "passed_through");
    assert!(events[0].get("diagnostic").is_none());
    assert_eq!(events[1]["outcome"], "dropped");
    assert!(
        events[1]["diagnostic"]
            .as_str()
            .expect("diagnostic")
            .contains("[GATE.SAMPLE_COUNT]")
    );
    // The stale input energy is cleared even though the event was dropped.
    assert_eq!(events[1]["uwire_energies_kev"][0], 0.0);
    assert_eq!(report["statistics"]["events_seen"], 2);
    assert_eq!(report["statistics"]["events_dropped"], 1);
}

#[test]
fn dangling_cluster_link_aborts_the_run() {
    let temp = TempDir::new().expect("tempdir should be created");
    let config = write_artifacts(&temp, 4);
    let [conditions, wire_response, events] = write_run_inputs(
        &temp,
        r#"
        {
          "events": [
            {
              "id": 9,
              "header": { "sample_count": 2047, "trigger_seconds": 1300000000 },
              "scintillation_clusters": [ { "time": 990000.0, "charge_clusters": [3] } ]
            }
          ]
        }
        "#,
    );
    let report_path = temp.path().join("report.json");

    let output = refit_signals(&[
        "run",
        "--config",
        config.to_str().expect("utf-8"),
        "--conditions",
        conditions.to_str().expect("utf-8"),
        "--wire-response",
        wire_response.to_str().expect("utf-8"),
        "--events",
        events.to_str().expect("utf-8"),
        "--report",
        report_path.to_str().expect("utf-8"),
    ]);
    assert_eq!(output.status.code(), Some(5));
    assert!(String::from_utf8_lossy(&output.stderr).contains("ERROR: [INVARIANT.EVENT_LINKS]"));
    assert!(!report_path.exists());
}

#[test]
fn invalid_threshold_override_is_rejected() {
    let temp = TempDir::new().expect("tempdir should be created");
    let config = write_artifacts(&temp, 4);
    let [conditions, wire_response, events] = write_run_inputs(&temp, GATED_EVENTS);

    let output = refit_signals(&[
        "run",
        "--config",
        config.to_str().expect("utf-8"),
        "--conditions",
        conditions.to_str().expect("utf-8"),
        "--wire-response",
        wire_response.to_str().expect("utf-8"),
        "--events",
        events.to_str().expect("utf-8"),
        "--threshold=-1",
    ]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("[CONFIG.RESIDUAL_THRESHOLD]"));
}
