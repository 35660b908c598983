use super::constants::{DEFAULT_RESIDUAL_THRESHOLD, NYQUIST_BIN};
use crate::domain::{RefitError, RefitResult};
use crate::numerics::GemmBackend;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Inclusive range of FFT bins the fit works on. The terminal bin is treated
/// as strictly real.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct FrequencyWindow {
    pub min: usize,
    pub max: usize,
}

impl Default for FrequencyWindow {
    fn default() -> Self {
        Self {
            min: 1,
            max: NYQUIST_BIN,
        }
    }
}

impl FrequencyWindow {
    pub fn new(min: usize, max: usize) -> RefitResult<Self> {
        let window = Self { min, max };
        window.validate()?;
        Ok(window)
    }

    pub fn validate(&self) -> RefitResult<()> {
        if self.min == 0 || self.min > self.max || self.max > NYQUIST_BIN {
            return Err(RefitError::configuration(
                "CONFIG.FREQUENCY_WINDOW",
                format!(
                    "frequency window [{}, {}] must satisfy 1 <= min <= max <= {}",
                    self.min, self.max, NYQUIST_BIN
                ),
            ));
        }
        Ok(())
    }

    pub const fn bin_count(&self) -> usize {
        self.max - self.min + 1
    }

    /// `fMax - fMin`.
    pub const fn span(&self) -> usize {
        self.max - self.min
    }

    /// Interleaved real/imag length with the terminal imaginary part dropped.
    pub const fn template_len(&self) -> usize {
        2 * self.bin_count() - 1
    }

    pub const fn is_terminal_offset(&self, offset: usize) -> bool {
        offset == self.span()
    }
}

fn default_residual_threshold() -> f64 {
    DEFAULT_RESIDUAL_THRESHOLD
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RefitConfig {
    pub lightmap_path: PathBuf,
    pub noise_path: PathBuf,
    #[serde(default = "default_residual_threshold")]
    pub residual_threshold: f64,
    #[serde(default)]
    pub frequency_window: FrequencyWindow,
    #[serde(default)]
    pub gemm_backend: GemmBackend,
}

impl RefitConfig {
    pub fn new(lightmap_path: impl Into<PathBuf>, noise_path: impl Into<PathBuf>) -> Self {
        Self {
            lightmap_path: lightmap_path.into(),
            noise_path: noise_path.into(),
            residual_threshold: DEFAULT_RESIDUAL_THRESHOLD,
            frequency_window: FrequencyWindow::default(),
            gemm_backend: GemmBackend::default(),
        }
    }

    pub fn validate(&self) -> RefitResult<()> {
        if self.lightmap_path.as_os_str().is_empty() {
            return Err(RefitError::configuration(
                "CONFIG.LIGHTMAP_PATH",
                "lightmap path is required",
            ));
        }
        if self.noise_path.as_os_str().is_empty() {
            return Err(RefitError::configuration(
                "CONFIG.NOISE_PATH",
                "noise path is required",
            ));
        }
        if !self.residual_threshold.is_finite() || self.residual_threshold <= 0.0 {
            return Err(RefitError::configuration(
                "CONFIG.RESIDUAL_THRESHOLD",
                format!(
                    "residual threshold must be positive and finite, got {}",
                    self.residual_threshold
                ),
            ));
        }
        self.frequency_window.validate()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl ConfigLoadError {
    pub fn into_refit_error(self, placeholder: &'static str) -> RefitError {
        RefitError::configuration(placeholder, self.to_string())
    }
}

/// Reads and deserializes a JSON document; shared by every artifact loader.
pub fn load_json_document<T>(path: impl AsRef<Path>) -> Result<T, ConfigLoadError>
where
    T: for<'de> Deserialize<'de>,
{
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&source).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_refit_config(path: impl AsRef<Path>) -> RefitResult<RefitConfig> {
    let config: RefitConfig =
        load_json_document(path).map_err(|error| error.into_refit_error("CONFIG.REFIT"))?;
    config.validate()?;
    Ok(config)
}
