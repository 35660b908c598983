//! The refit engine: channel layout and noise blocks, signal templates,
//! system assembly, the matrix-free operator, block BiCGSTAB and the
//! projection of the solved filters back onto the event.

pub mod assembler;
pub mod engine;
pub mod layout;
pub mod noise;
pub mod operator;
pub mod projection;
pub mod solver;
pub mod stats;
pub mod templates;

pub use assembler::{
    ChannelTemplate, ExpectedYield, RefitSystem, ResolvedWireModel, expected_yield, full_clusters,
    initial_guess, photon_gains, poisson_factors, resolve_wire_models,
};
pub use engine::{EngineState, EventOutcome, RefitSummary, initialize, process, shutdown};
pub use layout::ColumnLayout;
pub use noise::{
    NoiseBlockStore, NoiseCorrelations, NoiseFrequency, load_noise_correlations, select_channels,
};
pub use operator::{LinearOperator, OperatorTimings, RefitOperator};
pub use projection::{
    cluster_energy_kev, project_amplitudes, scintillation_energy_kev, waveform_spectra,
    wire_energy_kev,
};
pub use solver::{SolveReport, SolverSettings, solve_block_bicgstab};
pub use stats::{RefitStatistics, StageTimers};
pub use templates::{
    LightTemplateBuilder, UnshapedWireResponse, WireModel, build_wire_models,
    build_wire_template, collection_signals, load_wire_response,
};
