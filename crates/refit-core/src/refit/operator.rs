//! Matrix-free application of the refit system to a bundle of solution
//! columns. The noise blocks go through one GEMM per frequency covering every
//! column at once; the Poisson term and the Lagrange couplings are added on
//! top without ever being materialized.

use super::assembler::RefitSystem;
use super::layout::ColumnLayout;
use super::noise::NoiseBlockStore;
use crate::domain::{RefitError, RefitResult};
use crate::numerics::{Gemm, Layout, Transpose};
use std::cell::Cell;
use std::time::{Duration, Instant};

/// A symmetric linear map on column bundles laid out by [`ColumnLayout`].
pub trait LinearOperator {
    fn layout(&self) -> ColumnLayout;

    /// Overwrites `output` with `A * input`. Both slices hold
    /// `layout().bundle_len()` values, column after column.
    fn apply_into(&self, input: &[f64], output: &mut [f64]);

    fn apply(&self, input: &[f64]) -> Vec<f64> {
        let mut output = vec![0.0; input.len()];
        self.apply_into(input, &mut output);
        output
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OperatorTimings {
    pub applications: usize,
    pub total: Duration,
    pub noise_gemm: Duration,
}

pub struct RefitOperator<'a> {
    store: &'a NoiseBlockStore,
    system: &'a RefitSystem,
    gemm: &'a dyn Gemm,
    timings: Cell<OperatorTimings>,
}

impl<'a> RefitOperator<'a> {
    pub fn new(
        store: &'a NoiseBlockStore,
        system: &'a RefitSystem,
        gemm: &'a dyn Gemm,
    ) -> RefitResult<Self> {
        let layout = system.layout();
        if store.channel_count() != layout.channels()
            || store.block_count() != layout.span() + 1
            || store.first_apd() != system.first_apd()
        {
            return Err(RefitError::invariant_violation(
                "INVARIANT.LAYOUT",
                format!(
                    "noise store ({} channels, {} blocks) does not match system layout \
                     ({} channels, {} bins)",
                    store.channel_count(),
                    store.block_count(),
                    layout.channels(),
                    layout.span() + 1
                ),
            ));
        }
        Ok(Self {
            store,
            system,
            gemm,
            timings: Cell::new(OperatorTimings::default()),
        })
    }

    pub fn timings(&self) -> OperatorTimings {
        self.timings.get()
    }

    fn multiply_noise(&self, input: &[f64], output: &mut [f64]) {
        let layout = self.system.layout();
        let stride = layout.column_len();
        for offset in 0..=layout.span() {
            let dim = layout.block_dim(offset);
            let start = layout.frequency_start(offset);
            self.gemm.dgemm(
                Layout::ColMajor,
                Transpose::No,
                Transpose::No,
                dim,
                layout.solution_count(),
                dim,
                1.0,
                self.store.block(offset),
                dim,
                &input[start..],
                stride,
                1.0,
                &mut output[start..],
                stride,
            );
        }
    }

    /// `out_k += factor_k * <L, in_k> * L` on every APD gang.
    fn add_poisson(&self, input: &[f64], output: &mut [f64]) {
        let layout = self.system.layout();
        let light = self.system.light_template();
        for channel in self.system.apd_indices() {
            let factor = self.system.poisson_factor(channel);
            if factor == 0.0 {
                continue;
            }
            for column in 0..layout.solution_count() {
                let base = layout.column_start(column);
                let mut projection = 0.0;
                for offset in 0..=layout.span() {
                    let row = base + layout.coefficient_row(offset, channel);
                    projection += light[2 * offset] * input[row];
                    if layout.has_imaginary(offset) {
                        projection += light[2 * offset + 1] * input[row + 1];
                    }
                }
                let weight = factor * projection;
                for offset in 0..=layout.span() {
                    let row = base + layout.coefficient_row(offset, channel);
                    output[row] += weight * light[2 * offset];
                    if layout.has_imaginary(offset) {
                        output[row + 1] += weight * light[2 * offset + 1];
                    }
                }
            }
        }
    }

    fn add_wire_coupling(&self, input: &[f64], output: &mut [f64]) {
        let layout = self.system.layout();
        for (wire, model) in self.system.wires().iter().enumerate() {
            for entry in &model.templates {
                for column in 0..layout.solution_count() {
                    let base = layout.column_start(column);
                    let multiplier = base + layout.wire_lagrange_row(wire);
                    couple(
                        layout,
                        &entry.template,
                        entry.channel_index,
                        base,
                        multiplier,
                        input,
                        output,
                    );
                }
            }
        }
    }

    fn add_light_coupling(&self, input: &[f64], output: &mut [f64]) {
        let layout = self.system.layout();
        let light = self.system.light_template();
        for channel in self.system.apd_indices() {
            for column in 0..layout.solution_count() {
                let base = layout.column_start(column);
                let multiplier = base + layout.light_lagrange_row();
                couple(layout, light, channel, base, multiplier, input, output);
            }
        }
    }
}

/// Adds the symmetric pair of constraint entries tying `template` on
/// `channel` to the multiplier row.
fn couple(
    layout: ColumnLayout,
    template: &[f64],
    channel: usize,
    base: usize,
    multiplier: usize,
    input: &[f64],
    output: &mut [f64],
) {
    for offset in 0..=layout.span() {
        let row = base + layout.coefficient_row(offset, channel);
        output[row] += template[2 * offset] * input[multiplier];
        output[multiplier] += template[2 * offset] * input[row];
        if layout.has_imaginary(offset) {
            output[row + 1] += template[2 * offset + 1] * input[multiplier];
            output[multiplier] += template[2 * offset + 1] * input[row + 1];
        }
    }
}

impl LinearOperator for RefitOperator<'_> {
    fn layout(&self) -> ColumnLayout {
        self.system.layout()
    }

    fn apply_into(&self, input: &[f64], output: &mut [f64]) {
        let started = Instant::now();
        output.fill(0.0);

        self.multiply_noise(input, output);
        let noise_gemm = started.elapsed();

        self.add_poisson(input, output);
        self.add_wire_coupling(input, output);
        self.add_light_coupling(input, output);

        let mut timings = self.timings.get();
        timings.applications += 1;
        timings.noise_gemm += noise_gemm;
        timings.total += started.elapsed();
        self.timings.set(timings);
    }
}
