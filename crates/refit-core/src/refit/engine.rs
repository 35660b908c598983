//! Event loop entry points. [`initialize`] loads the calibration artifacts
//! once, [`process`] refits one event at a time and [`shutdown`] reports the
//! accumulated statistics.

use super::assembler::{
    RefitSystem, expected_yield, full_clusters, initial_guess, photon_gains, poisson_factors,
    resolve_wire_models,
};
use super::noise::{NoiseBlockStore, NoiseCorrelations, load_noise_correlations, select_channels};
use super::operator::RefitOperator;
use super::projection::{
    cluster_energy_kev, project_amplitudes, scintillation_energy_kev, waveform_spectra,
    wire_energy_kev,
};
use super::solver::{SolveReport, SolverSettings, solve_block_bicgstab};
use super::stats::RefitStatistics;
use super::templates::{
    LightTemplateBuilder, UnshapedWireResponse, build_wire_models, collection_signals,
};
use crate::calibration::{ConditionsProvider, LightmapSet, load_lightmap_set};
use crate::common::RefitConfig;
use crate::common::constants::{FULL_LENGTH_SAMPLE_COUNT, WAVEFORM_LENGTH};
use crate::domain::{DetectorHalf, Event, RefitError, RefitErrorCategory, RefitResult};
use crate::numerics::{Gemm, WaveformFft};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What happened to one event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// Denoised energies were written back.
    Refit(RefitSummary),
    /// No scintillation cluster; the event is left as it came in.
    PassedThrough,
    /// A gate or a missing calibration stopped the refit. Denoised fields stay
    /// at zero.
    Dropped(RefitError),
}

impl EventOutcome {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Refit(_) => "refit",
            Self::PassedThrough => "passed_through",
            Self::Dropped(_) => "dropped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefitSummary {
    pub channel_count: usize,
    pub wire_signal_count: usize,
    pub solve: SolveReport,
    /// Set when the solver exhausted every attempt; energies are still
    /// written from the last iterate.
    #[serde(skip)]
    pub warning: Option<RefitError>,
    pub scintillation_energy_kev: f64,
}

/// Process-scoped state carried from one event to the next.
pub struct EngineState {
    config: RefitConfig,
    settings: SolverSettings,
    gemm: Box<dyn Gemm>,
    lightmaps: LightmapSet,
    noise: NoiseCorrelations,
    wire_response: UnshapedWireResponse,
    store: NoiseBlockStore,
    light_builder: LightTemplateBuilder,
    fft: WaveformFft,
    statistics: RefitStatistics,
}

/// Loads the lightmap and noise artifacts named by `config`.
pub fn initialize(
    config: RefitConfig,
    wire_response: UnshapedWireResponse,
) -> RefitResult<EngineState> {
    config.validate()?;
    let started = Instant::now();
    let lightmaps = load_lightmap_set(&config.lightmap_path)?;
    let noise = load_noise_correlations(&config.noise_path)?;
    let loaded = started.elapsed();
    info!(
        gangs = lightmaps.len(),
        noise_channels = noise.channels.len(),
        noise_bins = noise.frequencies.len(),
        "loaded calibration artifacts"
    );

    let mut state = EngineState::from_parts(config, wire_response, lightmaps, noise)?;
    state.statistics.timers.noise_load += loaded;
    Ok(state)
}

/// Refits `event` in place. Only fatal errors come back as `Err`; gates and
/// missing calibrations yield [`EventOutcome::Dropped`].
pub fn process(
    state: &mut EngineState,
    event: &mut Event,
    conditions: &dyn ConditionsProvider,
) -> RefitResult<EventOutcome> {
    event.validate_links()?;
    event.reset_denoised();

    let started = Instant::now();
    state.statistics.events_seen += 1;
    let outcome = match state.refit(event, conditions) {
        Ok(outcome) => outcome,
        Err(error) if error.is_fatal() => return Err(error),
        Err(error) => {
            // A partially written event must not leak out as dropped.
            event.reset_denoised();
            match error.category() {
                RefitErrorCategory::MissingCalibration => {
                    warn!(event = event.id, "{error}");
                }
                _ => debug!(event = event.id, "{error}"),
            }
            EventOutcome::Dropped(error)
        }
    };

    match &outcome {
        EventOutcome::Refit(_) => {}
        EventOutcome::PassedThrough => state.statistics.events_passed_through += 1,
        EventOutcome::Dropped(_) => state.statistics.events_dropped += 1,
    }
    state.statistics.timers.event += started.elapsed();
    Ok(outcome)
}

pub fn shutdown(state: EngineState) -> RefitStatistics {
    state.statistics.log_summary();
    state.statistics
}

impl EngineState {
    /// Builds an engine from already loaded artifacts.
    pub fn from_parts(
        config: RefitConfig,
        wire_response: UnshapedWireResponse,
        lightmaps: LightmapSet,
        noise: NoiseCorrelations,
    ) -> RefitResult<Self> {
        config.validate()?;
        noise.validate()?;
        let wire_response = wire_response.normalized()?;
        let settings = SolverSettings::with_threshold(config.residual_threshold);
        let gemm = config.gemm_backend.instantiate();
        debug!(
            backend = gemm.name(),
            threshold = settings.threshold,
            min_bin = config.frequency_window.min,
            max_bin = config.frequency_window.max,
            "refit engine ready"
        );
        Ok(Self {
            light_builder: LightTemplateBuilder::new(config.frequency_window),
            fft: WaveformFft::new(WAVEFORM_LENGTH),
            store: NoiseBlockStore::new(),
            statistics: RefitStatistics::default(),
            config,
            settings,
            gemm,
            lightmaps,
            noise,
            wire_response,
        })
    }

    pub fn config(&self) -> &RefitConfig {
        &self.config
    }

    pub fn statistics(&self) -> &RefitStatistics {
        &self.statistics
    }

    /// Noise blocks of the most recent channel set.
    pub fn noise_store(&self) -> &NoiseBlockStore {
        &self.store
    }

    fn refit(
        &mut self,
        event: &mut Event,
        conditions: &dyn ConditionsProvider,
    ) -> RefitResult<EventOutcome> {
        if event.scintillation_clusters.is_empty() {
            return Ok(EventOutcome::PassedThrough);
        }
        if event.header.sample_count != FULL_LENGTH_SAMPLE_COUNT {
            return Err(RefitError::skipped(
                "GATE.SAMPLE_COUNT",
                format!(
                    "event {} has sample count {}, expected {FULL_LENGTH_SAMPLE_COUNT}",
                    event.id, event.header.sample_count
                ),
            ));
        }
        if event.scintillation_clusters.len() != 1 {
            return Err(RefitError::skipped(
                "GATE.SCINTILLATION_COUNT",
                format!(
                    "event {} has {} scintillation clusters",
                    event.id,
                    event.scintillation_clusters.len()
                ),
            ));
        }

        let header = event.header;
        let channel_map = conditions.channel_map(&header).ok_or_else(|| {
            RefitError::missing_calibration(
                "CALIB.CHANNEL_MAP",
                format!("no channel map for event {}", event.id),
            )
        })?;
        let channels = select_channels(event, channel_map);
        if let Some(&channel) = channels
            .iter()
            .find(|&&channel| event.waveform(channel).map_or(0, <[f64]>::len) != WAVEFORM_LENGTH)
        {
            return Err(RefitError::skipped(
                "GATE.WAVEFORM_LENGTH",
                format!(
                    "event {} channel {channel} is not {WAVEFORM_LENGTH} samples long",
                    event.id
                ),
            ));
        }

        let window = self.config.frequency_window;
        let refreshing = Instant::now();
        if self.store.refresh(channels, window, &self.noise)? {
            self.statistics.channel_set_rebuilds += 1;
            self.statistics.timers.noise_load += refreshing.elapsed();
        }

        let clusters = full_clusters(event, 0);
        if clusters.is_empty() {
            return Err(RefitError::skipped(
                "GATE.FIDUCIAL",
                format!("event {} has no fiducial charge cluster", event.id),
            ));
        }

        let unix_time = header.unix_time();
        let expected = expected_yield(event, &clusters, &self.store, &self.lightmaps, unix_time)?;
        if !expected.has_yield() {
            return Err(RefitError::skipped(
                "GATE.LIGHT_YIELD",
                format!("event {} expects no APD gang above 1 ADC", event.id),
            ));
        }

        let light_template = self
            .light_builder
            .build(event.scintillation_clusters[0].time);
        let signals = collection_signals(event, &clusters);
        let models = build_wire_models(
            event,
            &signals,
            &self.wire_response,
            conditions,
            window,
            &self.fft,
        )?;
        let wires = resolve_wire_models(&models, &self.store)?;

        // Everything the write-back needs is fetched before solving. The
        // write-back rewrites every charge cluster of the event, not only the
        // ones linked to the scintillation cluster, so all of them need their
        // corrections.
        let cluster_corrections = event
            .charge_clusters
            .iter()
            .map(|cluster| {
                let half = DetectorHalf::for_z(cluster.z);
                let lifetime = conditions.electron_lifetime(&header, half).ok_or_else(|| {
                    RefitError::missing_calibration(
                        "CALIB.ELECTRON_LIFETIME",
                        format!("no electron lifetime for {half:?} in event {}", event.id),
                    )
                })?;
                let grid = conditions.grid_correction(&header, cluster).ok_or_else(|| {
                    RefitError::missing_calibration(
                        "CALIB.GRID_CORRECTION",
                        format!("no grid correction for event {}", event.id),
                    )
                })?;
                Ok((cluster.drift_time, lifetime, grid))
            })
            .collect::<RefitResult<Vec<_>>>()?;

        let gains = photon_gains(&self.store, &self.lightmaps, unix_time)?;
        let factors = poisson_factors(&expected, &gains);
        let system = RefitSystem::new(
            &self.store,
            light_template,
            wires,
            expected.per_gang,
            factors,
        )?;
        let layout = system.layout();
        debug!(
            event = event.id,
            channels = layout.channels(),
            wire_signals = layout.wire_signals(),
            column_len = layout.column_len(),
            "assembled refit system"
        );

        let guessing = Instant::now();
        let mut solution = initial_guess(&system, &self.store);
        self.statistics.timers.initial_guess += guessing.elapsed();

        let operator = RefitOperator::new(&self.store, &system, self.gemm.as_ref())?;
        let solving = Instant::now();
        let report =
            solve_block_bicgstab(&operator, &mut solution, self.settings, self.gemm.as_ref());
        self.statistics.timers.solve += solving.elapsed();
        self.statistics.record_operator(operator.timings());
        self.statistics.record_solve(&report);

        let warning = (!report.converged).then(|| {
            RefitError::convergence_failure(
                "SOLVER.CONVERGENCE",
                format!(
                    "event {} did not converge after {} attempts ({} iterations, worst \
                     squared residual {:e})",
                    event.id, report.attempts, report.iterations, report.worst_residual_sq
                ),
            )
        });
        if let Some(warning) = &warning {
            warn!(event = event.id, "{warning}");
        }

        let spectra = waveform_spectra(event, self.store.channels(), window, &self.fft)?;
        let amplitudes = project_amplitudes(layout, &solution, &spectra);

        for (column, wire) in system.wires().iter().enumerate() {
            event.uwire_signals[wire.signal].denoised_energy =
                wire_energy_kev(amplitudes[column], wire.deposit_gain);
        }
        for (cluster, &(drift_time, lifetime, grid)) in
            event.charge_clusters.iter_mut().zip(&cluster_corrections)
        {
            let wire_sum: f64 = cluster
                .uwire_signals
                .iter()
                .map(|&signal| event.uwire_signals[signal].denoised_energy)
                .sum();
            cluster.denoised_energy = cluster_energy_kev(wire_sum, drift_time, lifetime, grid);
        }
        let scintillation_energy = scintillation_energy_kev(amplitudes[layout.wire_signals()]);
        event.scintillation_clusters[0].denoised_energy = scintillation_energy;

        debug!(
            event = event.id,
            iterations = report.iterations,
            scintillation_energy_kev = scintillation_energy,
            "refit event"
        );
        Ok(EventOutcome::Refit(RefitSummary {
            channel_count: layout.channels(),
            wire_signal_count: layout.wire_signals(),
            solve: report,
            warning,
            scintillation_energy_kev: scintillation_energy,
        }))
    }
}
