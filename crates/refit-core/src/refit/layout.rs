//! Row layout of one solution column, shared by the assembler, the operator,
//! the solver and the projection.
//!
//! A column holds, for every frequency offset `f` in `0..=span`, the
//! coefficients of every channel interleaved as (real, imag) pairs, except at
//! the terminal offset where only the real part exists. The wire Lagrange
//! multipliers follow, and the light multiplier is the final row.

use crate::common::FrequencyWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnLayout {
    channels: usize,
    span: usize,
    wire_signals: usize,
}

impl ColumnLayout {
    pub const fn new(channels: usize, span: usize, wire_signals: usize) -> Self {
        Self {
            channels,
            span,
            wire_signals,
        }
    }

    pub const fn for_window(channels: usize, window: FrequencyWindow, wire_signals: usize) -> Self {
        Self::new(channels, window.span(), wire_signals)
    }

    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// `fMax - fMin`; the terminal frequency offset.
    pub const fn span(&self) -> usize {
        self.span
    }

    pub const fn wire_signals(&self) -> usize {
        self.wire_signals
    }

    /// Number of right-hand sides: one per wire signal plus the light signal.
    pub const fn solution_count(&self) -> usize {
        self.wire_signals + 1
    }

    pub const fn noise_len(&self) -> usize {
        2 * self.channels * self.span + self.channels
    }

    pub const fn column_len(&self) -> usize {
        self.noise_len() + self.wire_signals + 1
    }

    pub const fn bundle_len(&self) -> usize {
        self.column_len() * self.solution_count()
    }

    pub const fn is_terminal(&self, offset: usize) -> bool {
        offset == self.span
    }

    pub const fn has_imaginary(&self, offset: usize) -> bool {
        !self.is_terminal(offset)
    }

    /// First row of frequency offset `offset`.
    pub const fn frequency_start(&self, offset: usize) -> usize {
        2 * self.channels * offset
    }

    pub const fn block_dim(&self, offset: usize) -> usize {
        if self.is_terminal(offset) {
            self.channels
        } else {
            2 * self.channels
        }
    }

    /// Row of the real coefficient of `channel_index` at `offset`; the
    /// imaginary coefficient, when present, is the next row.
    pub const fn coefficient_row(&self, offset: usize, channel_index: usize) -> usize {
        let stride = if self.is_terminal(offset) { 1 } else { 2 };
        self.frequency_start(offset) + channel_index * stride
    }

    pub const fn wire_lagrange_row(&self, wire: usize) -> usize {
        self.noise_len() + wire
    }

    pub const fn light_lagrange_row(&self) -> usize {
        self.column_len() - 1
    }

    /// Lagrange row carrying the unit constraint of solution column `column`.
    pub const fn constraint_row(&self, column: usize) -> usize {
        self.noise_len() + column
    }

    pub const fn column_start(&self, column: usize) -> usize {
        column * self.column_len()
    }
}
