//! Detector and electronics constants shared by the refit stages.
//!
//! Times are in ns, energies in keV.

pub const NUMBER_READOUT_CHANNELS: u16 = 226;
pub const NCHANNEL_PER_WIREPLANE: u16 = 38;

/// Header sample count reported by full-length traces.
pub const FULL_LENGTH_SAMPLE_COUNT: usize = 2047;
pub const WAVEFORM_LENGTH: usize = 2048;
/// Bins of the real FFT of a full-length trace (DC through Nyquist).
pub const SPECTRUM_LENGTH: usize = WAVEFORM_LENGTH / 2 + 1;
pub const NYQUIST_BIN: usize = WAVEFORM_LENGTH / 2;

pub const SAMPLE_TIME_NS: f64 = 1000.0;
pub const BANDWIDTH_FACTOR: usize = 10;
pub const SAMPLE_TIME_HIGH_BANDWIDTH_NS: f64 = SAMPLE_TIME_NS / BANDWIDTH_FACTOR as f64;
/// Position of the deposit inside the unshaped wire response.
pub const WIRE_DEPOSIT_TIME_NS: f64 = 256_000.0;
pub const LIGHT_OVERSAMPLING: usize = 5;

pub const THORIUM_PEAK_KEV: f64 = 2615.0;
pub const FIDUCIAL_HALF_EXTENT_MM: f64 = 200.0;
pub const MIN_PURITY_CORRECTED_ENERGY_KEV: f64 = 1.0;
pub const MIN_EXPECTED_YIELD_ADC: f64 = 1.0;

pub const MAX_SOLVER_ITERATIONS: usize = 1000;
pub const SOLVER_ATTEMPTS: usize = 3;
pub const DEFAULT_RESIDUAL_THRESHOLD: f64 = 1.0e-11;

pub const ADC_COUNTS: f64 = 4096.0;
pub const ADC_FULL_SCALE_VOLTS: f64 = 2.5;
pub const ADC_FULL_SCALE_ELECTRONS_WIRE: f64 = 1_228_800.0;
pub const W_VALUE_LXE_KEV_PER_ELECTRON: f64 = 15.6e-3;
pub const REFERENCE_UWIRE_GAIN: f64 = 300.0;

pub const APD_PAIRS_PER_PHOTON: f64 = 1.9;
pub const APD_PREAMP_VOLTS_PER_ELECTRON: f64 = 32.0e-9;
pub const APD_SHAPER_GAIN: f64 = 12.10;
/// Gainmap time (unix seconds) the laser gains were measured at.
pub const APD_GAINMAP_REFERENCE_TIME: f64 = 1_355_409_118.254_096;
