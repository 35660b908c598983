use super::CliError;
use anyhow::Context;
use refit_core::calibration::{load_lightmap_set, load_static_conditions};
use refit_core::common::{RefitConfig, load_json_document, load_refit_config};
use refit_core::domain::{Event, RefitError, RefitErrorCategory};
use refit_core::numerics::GemmBackend;
use refit_core::refit::{
    EventOutcome, RefitStatistics, SolveReport, initialize, load_noise_correlations,
    load_wire_response, process, shutdown,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(clap::Args)]
pub(super) struct RunArgs {
    /// Engine configuration path
    #[arg(long)]
    config: PathBuf,

    /// Detector conditions path
    #[arg(long)]
    conditions: PathBuf,

    /// Unshaped wire response path
    #[arg(long)]
    wire_response: PathBuf,

    /// Event file path
    #[arg(long)]
    events: PathBuf,

    /// JSON report output path
    #[arg(long, default_value = "refit-report.json")]
    report: PathBuf,

    /// Residual threshold overriding the configuration
    #[arg(long)]
    threshold: Option<f64>,

    /// GEMM backend overriding the configuration
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,
}

#[derive(clap::Args)]
pub(super) struct CheckConfigArgs {
    /// Engine configuration path
    #[arg(long)]
    config: PathBuf,
}

#[derive(Clone, Copy, clap::ValueEnum)]
pub(super) enum BackendArg {
    Faer,
    Reference,
}

impl From<BackendArg> for GemmBackend {
    fn from(value: BackendArg) -> Self {
        match value {
            BackendArg::Faer => Self::Faer,
            BackendArg::Reference => Self::Reference,
        }
    }
}

#[derive(Deserialize)]
struct EventFile {
    events: Vec<Event>,
}

#[derive(Serialize)]
struct RunReport {
    events: Vec<EventReport>,
    statistics: RefitStatistics,
}

#[derive(Serialize)]
struct EventReport {
    id: u64,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    solve: Option<SolveReport>,
    uwire_energies_kev: Vec<f64>,
    cluster_energies_kev: Vec<f64>,
    scintillation_energies_kev: Vec<f64>,
}

impl EventReport {
    fn new(event: &Event, outcome: &EventOutcome) -> Self {
        let (diagnostic, solve) = match outcome {
            EventOutcome::Refit(summary) => (
                summary.warning.as_ref().map(RefitError::diagnostic_line),
                Some(summary.solve),
            ),
            EventOutcome::PassedThrough => (None, None),
            EventOutcome::Dropped(error) => (Some(error.diagnostic_line()), None),
        };
        Self {
            id: event.id,
            outcome: outcome.as_str(),
            diagnostic,
            solve,
            uwire_energies_kev: event
                .uwire_signals
                .iter()
                .map(|signal| signal.denoised_energy)
                .collect(),
            cluster_energies_kev: event
                .charge_clusters
                .iter()
                .map(|cluster| cluster.denoised_energy)
                .collect(),
            scintillation_energies_kev: event
                .scintillation_clusters
                .iter()
                .map(|cluster| cluster.denoised_energy)
                .collect(),
        }
    }
}

pub(super) fn run_refit_command(args: RunArgs) -> Result<i32, CliError> {
    let mut config = load_config(&args.config)?;
    if let Some(threshold) = args.threshold {
        config.residual_threshold = threshold;
    }
    if let Some(backend) = args.backend {
        config.gemm_backend = backend.into();
    }
    let conditions = load_static_conditions(&args.conditions).map_err(CliError::Compute)?;
    let wire_response = load_wire_response(&args.wire_response).map_err(CliError::Compute)?;
    let event_file: EventFile = load_json_document(&args.events)
        .map_err(|error| CliError::Compute(error.into_refit_error("CONFIG.EVENT_FILE")))?;

    let mut state = initialize(config, wire_response).map_err(CliError::Compute)?;
    let mut reports = Vec::with_capacity(event_file.events.len());
    for mut event in event_file.events {
        let outcome = process(&mut state, &mut event, &conditions).map_err(CliError::Compute)?;
        if let EventOutcome::Refit(summary) = &outcome {
            if let Some(warning) = &summary.warning {
                warn!(event = event.id, "{warning}");
            }
        }
        reports.push(EventReport::new(&event, &outcome));
    }
    let statistics = shutdown(state);

    let report = RunReport {
        events: reports,
        statistics,
    };
    write_report(&args.report, &report)?;
    println!(
        "Refit {} of {} events ({} passed through, {} dropped)",
        report.statistics.events_refit,
        report.statistics.events_seen,
        report.statistics.events_passed_through,
        report.statistics.events_dropped
    );
    println!("JSON report: {}", args.report.display());

    if report.statistics.convergence_failures > 0 {
        Ok(RefitErrorCategory::ConvergenceFailure.exit_code())
    } else {
        Ok(0)
    }
}

pub(super) fn run_check_config_command(args: CheckConfigArgs) -> Result<i32, CliError> {
    let config = load_config(&args.config)?;
    let lightmaps = load_lightmap_set(&config.lightmap_path).map_err(CliError::Compute)?;
    let noise = load_noise_correlations(&config.noise_path).map_err(CliError::Compute)?;

    let window = config.frequency_window;
    if let Some(bin) = (window.min..=window.max).find(|&bin| noise.frequency(bin).is_none()) {
        return Err(CliError::Compute(RefitError::configuration(
            "CONFIG.NOISE_FREQUENCY",
            format!(
                "noise artifact '{}' has no entry for bin {bin} of window [{}, {}]",
                config.noise_path.display(),
                window.min,
                window.max
            ),
        )));
    }

    println!(
        "Configuration OK: {} APD gangs, {} noise channels, bins {}..={}, {} backend",
        lightmaps.len(),
        noise.channels.len(),
        window.min,
        window.max,
        config.gemm_backend
    );
    Ok(0)
}

/// Loads and validates `path`; relative artifact paths are taken relative to
/// the configuration file.
fn load_config(path: &Path) -> Result<RefitConfig, CliError> {
    let mut config = load_refit_config(path).map_err(CliError::Compute)?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    config.lightmap_path = resolve_relative(base, &config.lightmap_path);
    config.noise_path = resolve_relative(base, &config.noise_path);
    info!(
        lightmap = %config.lightmap_path.display(),
        noise = %config.noise_path.display(),
        backend = %config.gemm_backend,
        "loaded refit configuration"
    );
    Ok(config)
}

fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn write_report(path: &Path, report: &RunReport) -> Result<(), CliError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create report directory '{}'", parent.display()))?;
    }
    let rendered = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    fs::write(path, rendered)
        .with_context(|| format!("failed to write report '{}'", path.display()))?;
    Ok(())
}
