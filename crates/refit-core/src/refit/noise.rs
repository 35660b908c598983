use crate::calibration::ChannelMap;
use crate::common::constants::NUMBER_READOUT_CHANNELS;
use crate::common::{FrequencyWindow, load_json_document};
use crate::domain::{ChannelId, ChannelKind, Event, RefitError, RefitResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;
use tracing::debug;

/// Noise covariance of one FFT bin, in the artifact's channel order:
/// `rr[i][j] = <Re_i Re_j>`, `ii[i][j] = <Im_i Im_j>`, `ri[i][j] = <Re_i Im_j>`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NoiseFrequency {
    pub bin: usize,
    pub rr: Vec<Vec<f64>>,
    pub ii: Vec<Vec<f64>>,
    pub ri: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NoiseCorrelations {
    pub channels: Vec<ChannelId>,
    pub frequencies: Vec<NoiseFrequency>,
}

impl NoiseCorrelations {
    pub fn index_of_channel(&self, channel: ChannelId) -> Option<usize> {
        self.channels.iter().position(|&candidate| candidate == channel)
    }

    pub fn frequency(&self, bin: usize) -> Option<&NoiseFrequency> {
        self.frequencies.iter().find(|entry| entry.bin == bin)
    }

    pub fn validate(&self) -> RefitResult<()> {
        let dimension = self.channels.len();
        for entry in &self.frequencies {
            for (name, matrix) in [("rr", &entry.rr), ("ii", &entry.ii), ("ri", &entry.ri)] {
                let square =
                    matrix.len() == dimension && matrix.iter().all(|row| row.len() == dimension);
                if !square {
                    return Err(RefitError::configuration(
                        "CONFIG.NOISE_SHAPE",
                        format!(
                            "noise matrix {name} at bin {} is not {dimension}x{dimension}",
                            entry.bin
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

pub fn load_noise_correlations(path: impl AsRef<Path>) -> RefitResult<NoiseCorrelations> {
    let correlations: NoiseCorrelations = load_json_document(path)
        .map_err(|error| error.into_refit_error("CONFIG.NOISE_ARTIFACT"))?;
    correlations.validate()?;
    Ok(correlations)
}

/// Live channels of an event in ascending order: u-wires and APD gangs that
/// are neither suppressed nor bad and carry a waveform.
pub fn select_channels(event: &Event, channel_map: &ChannelMap) -> Vec<ChannelId> {
    (0..NUMBER_READOUT_CHANNELS)
        .filter(|&channel| {
            matches!(
                ChannelKind::of_channel(channel),
                ChannelKind::UWire | ChannelKind::ApdGang
            )
        })
        .filter(|&channel| channel_map.is_usable(channel))
        .filter(|&channel| event.waveform(channel).is_some())
        .collect()
}

/// Per-frequency noise blocks for the current channel set, each stored
/// column-major so it can be handed straight to a GEMM.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NoiseBlockStore {
    channels: Vec<ChannelId>,
    first_apd: usize,
    window: Option<FrequencyWindow>,
    blocks: Vec<Vec<f64>>,
}

impl NoiseBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the blocks when `channels` or `window` differ from the cached
    /// ones. Returns whether a rebuild happened.
    pub fn refresh(
        &mut self,
        channels: Vec<ChannelId>,
        window: FrequencyWindow,
        correlations: &NoiseCorrelations,
    ) -> RefitResult<bool> {
        if self.window == Some(window) && self.channels == channels {
            return Ok(false);
        }
        *self = Self::from_correlations(channels, window, correlations)?;
        debug!(
            channels = self.channels.len(),
            first_apd = self.first_apd,
            bins = window.bin_count(),
            "rebuilt noise blocks"
        );
        Ok(true)
    }

    pub fn from_correlations(
        channels: Vec<ChannelId>,
        window: FrequencyWindow,
        correlations: &NoiseCorrelations,
    ) -> RefitResult<Self> {
        let noise_indices = channels
            .iter()
            .map(|&channel| {
                correlations.index_of_channel(channel).ok_or_else(|| {
                    RefitError::configuration(
                        "CONFIG.NOISE_CHANNEL",
                        format!("noise artifact has no entry for channel {channel}"),
                    )
                })
            })
            .collect::<RefitResult<Vec<_>>>()?;

        let count = channels.len();
        let mut blocks = Vec::with_capacity(window.bin_count());
        for bin in window.min..=window.max {
            let entry = correlations.frequency(bin).ok_or_else(|| {
                RefitError::configuration(
                    "CONFIG.NOISE_FREQUENCY",
                    format!("noise artifact has no entry for bin {bin}"),
                )
            })?;

            if bin == window.max {
                let mut block = vec![0.0; count * count];
                for (col, &n1) in noise_indices.iter().enumerate() {
                    for (row, &n2) in noise_indices.iter().enumerate() {
                        block[col * count + row] = entry.rr[n2][n1];
                    }
                }
                blocks.push(block);
                continue;
            }

            let dim = 2 * count;
            let mut block = vec![0.0; dim * dim];
            for (col, &n1) in noise_indices.iter().enumerate() {
                let real_col = 2 * col * dim;
                let imag_col = (2 * col + 1) * dim;
                for (row, &n2) in noise_indices.iter().enumerate() {
                    block[real_col + 2 * row] = entry.rr[n2][n1];
                    block[real_col + 2 * row + 1] = entry.ri[n1][n2];
                    block[imag_col + 2 * row] = entry.ri[n2][n1];
                    block[imag_col + 2 * row + 1] = entry.ii[n2][n1];
                }
            }
            blocks.push(block);
        }

        Ok(Self::assemble(channels, window, blocks))
    }

    /// Builds a store from ready-made column-major blocks.
    pub fn from_blocks(
        channels: Vec<ChannelId>,
        window: FrequencyWindow,
        blocks: Vec<Vec<f64>>,
    ) -> RefitResult<Self> {
        if blocks.len() != window.bin_count() {
            return Err(RefitError::invariant_violation(
                "INVARIANT.NOISE_BLOCKS",
                format!(
                    "expected {} noise blocks, got {}",
                    window.bin_count(),
                    blocks.len()
                ),
            ));
        }
        let count = channels.len();
        for (offset, block) in blocks.iter().enumerate() {
            let dim = if window.is_terminal_offset(offset) {
                count
            } else {
                2 * count
            };
            if block.len() != dim * dim {
                return Err(RefitError::invariant_violation(
                    "INVARIANT.NOISE_BLOCKS",
                    format!(
                        "noise block {offset} has {} entries, expected {}",
                        block.len(),
                        dim * dim
                    ),
                ));
            }
        }
        Ok(Self::assemble(channels, window, blocks))
    }

    fn assemble(channels: Vec<ChannelId>, window: FrequencyWindow, blocks: Vec<Vec<f64>>) -> Self {
        let first_apd = channels
            .iter()
            .position(|&channel| ChannelKind::of_channel(channel) == ChannelKind::ApdGang)
            .unwrap_or(channels.len());
        Self {
            channels,
            first_apd,
            window: Some(window),
            blocks,
        }
    }

    pub fn channels(&self) -> &[ChannelId] {
        &self.channels
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn first_apd(&self) -> usize {
        self.first_apd
    }

    pub fn apd_range(&self) -> Range<usize> {
        self.first_apd..self.channels.len()
    }

    pub fn window(&self) -> Option<FrequencyWindow> {
        self.window
    }

    pub fn channel_index(&self, channel: ChannelId) -> Option<usize> {
        self.channels.iter().position(|&candidate| candidate == channel)
    }

    /// Column-major block for frequency offset `offset`.
    pub fn block(&self, offset: usize) -> &[f64] {
        &self.blocks[offset]
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn block_dim(&self, offset: usize) -> usize {
        if offset + 1 == self.blocks.len() {
            self.channels.len()
        } else {
            2 * self.channels.len()
        }
    }

    /// Diagonal entry for the real coefficient of `channel_index` at `offset`.
    pub fn real_diagonal(&self, offset: usize, channel_index: usize) -> f64 {
        let dim = self.block_dim(offset);
        let stride = dim / self.channels.len();
        let row = stride * channel_index;
        self.blocks[offset][row * dim + row]
    }

    /// Diagonal entry for the imaginary coefficient; `None` at the terminal
    /// offset.
    pub fn imaginary_diagonal(&self, offset: usize, channel_index: usize) -> Option<f64> {
        if offset + 1 == self.blocks.len() {
            return None;
        }
        let dim = self.block_dim(offset);
        let row = 2 * channel_index + 1;
        Some(self.blocks[offset][row * dim + row])
    }
}
