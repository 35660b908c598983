//! Per-event system assembly: cluster selection, expected light yield,
//! channel resolution of the wire templates, Poisson weights and the initial
//! guess.

use super::layout::ColumnLayout;
use super::noise::NoiseBlockStore;
use super::templates::WireModel;
use crate::calibration::{LightmapSet, apd_photon_gain};
use crate::common::constants::{
    FIDUCIAL_HALF_EXTENT_MM, MIN_EXPECTED_YIELD_ADC, MIN_PURITY_CORRECTED_ENERGY_KEV,
    THORIUM_PEAK_KEV,
};
use crate::domain::{ChannelId, Event, RefitError, RefitResult};
use tracing::warn;

/// Charge clusters of scintillation cluster `scintillation` that lie inside
/// the fiducial cube and carry at least 1 keV.
pub fn full_clusters(event: &Event, scintillation: usize) -> Vec<usize> {
    event.scintillation_clusters[scintillation]
        .charge_clusters
        .iter()
        .copied()
        .filter(|&index| {
            let cluster = &event.charge_clusters[index];
            cluster.x.abs() <= FIDUCIAL_HALF_EXTENT_MM
                && cluster.y.abs() <= FIDUCIAL_HALF_EXTENT_MM
                && cluster.z.abs() <= FIDUCIAL_HALF_EXTENT_MM
                && cluster.purity_corrected_energy >= MIN_PURITY_CORRECTED_ENERGY_KEV
        })
        .collect()
}

/// Expected peak-minus-baseline response of each live APD gang, per keV,
/// at the thorium scale.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedYield {
    /// Total purity-corrected energy of the full clusters.
    pub expected_energy_kev: f64,
    /// One entry per APD gang, aligned with [`NoiseBlockStore::apd_range`].
    pub per_gang: Vec<f64>,
}

impl ExpectedYield {
    pub fn has_yield(&self) -> bool {
        self.per_gang
            .iter()
            .any(|&expected| expected > MIN_EXPECTED_YIELD_ADC)
    }

    pub fn sum_of_squares(&self) -> f64 {
        self.per_gang.iter().map(|value| value * value).sum()
    }
}

pub fn expected_yield(
    event: &Event,
    clusters: &[usize],
    store: &NoiseBlockStore,
    lightmaps: &LightmapSet,
    unix_time: f64,
) -> RefitResult<ExpectedYield> {
    let gangs = &store.channels()[store.apd_range()];
    let mut per_gang = vec![0.0; gangs.len()];
    let mut expected_energy_kev = 0.0;

    for &index in clusters {
        let cluster = &event.charge_clusters[index];
        expected_energy_kev += cluster.purity_corrected_energy;
        for (slot, &gang) in per_gang.iter_mut().zip(gangs) {
            let maps = gang_maps(lightmaps, gang)?;
            let time_dependence = maps.gainmap.evaluate(unix_time);
            let light = maps.lightmap.interpolate(cluster.x, cluster.y, cluster.z);
            *slot += light * time_dependence * cluster.purity_corrected_energy;
        }
    }
    for slot in &mut per_gang {
        *slot /= expected_energy_kev;
    }

    Ok(ExpectedYield {
        expected_energy_kev,
        per_gang,
    })
}

/// Photon-to-ADC gain of every live APD gang at `unix_time`.
pub fn photon_gains(
    store: &NoiseBlockStore,
    lightmaps: &LightmapSet,
    unix_time: f64,
) -> RefitResult<Vec<f64>> {
    store.channels()[store.apd_range()]
        .iter()
        .map(|&gang| {
            let maps = gang_maps(lightmaps, gang)?;
            let gain = apd_photon_gain(gang, &maps.gainmap, unix_time);
            if gain == 0.0 {
                warn!(gang, "APD gang has no laser gain; Poisson term suppressed");
            }
            Ok(gain)
        })
        .collect()
}

/// Weight of the Poisson rank-one term on each APD gang.
pub fn poisson_factors(expected: &ExpectedYield, photon_gains: &[f64]) -> Vec<f64> {
    let energy_scale = expected.expected_energy_kev / THORIUM_PEAK_KEV;
    expected
        .per_gang
        .iter()
        .zip(photon_gains)
        .map(|(&expected_yield, &gain)| energy_scale * gain * expected_yield)
        .collect()
}

fn gang_maps(
    lightmaps: &LightmapSet,
    gang: ChannelId,
) -> RefitResult<&crate::calibration::ApdGangMaps> {
    lightmaps.gang(gang).ok_or_else(|| {
        RefitError::configuration(
            "CONFIG.LIGHTMAP_GANG",
            format!("lightmap artifact has no maps for live gang {gang}"),
        )
    })
}

/// Wire template bound to a position in the channel set.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelTemplate {
    pub channel_index: usize,
    pub template: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedWireModel {
    /// Index into [`Event::uwire_signals`].
    pub signal: usize,
    pub deposit_index: usize,
    pub deposit_gain: f64,
    /// Sorted by channel; the deposit channel is always present.
    pub templates: Vec<ChannelTemplate>,
}

impl ResolvedWireModel {
    pub fn deposit_template(&self) -> &[f64] {
        self.templates
            .iter()
            .find(|entry| entry.channel_index == self.deposit_index)
            .map_or(&[], |entry| entry.template.as_slice())
    }
}

pub fn resolve_wire_models(
    models: &[WireModel],
    store: &NoiseBlockStore,
) -> RefitResult<Vec<ResolvedWireModel>> {
    let locate = |channel: ChannelId| {
        store.channel_index(channel).ok_or_else(|| {
            RefitError::invariant_violation(
                "INVARIANT.CHANNEL_INDEX",
                format!("wire template channel {channel} is not in the live channel set"),
            )
        })
    };

    models
        .iter()
        .map(|model| {
            let templates = model
                .templates
                .iter()
                .map(|(&channel, template)| {
                    Ok(ChannelTemplate {
                        channel_index: locate(channel)?,
                        template: template.clone(),
                    })
                })
                .collect::<RefitResult<Vec<_>>>()?;
            Ok(ResolvedWireModel {
                signal: model.signal,
                deposit_index: locate(model.channel)?,
                deposit_gain: model.deposit_gain,
                templates,
            })
        })
        .collect()
}

/// Everything the operator needs besides the noise blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct RefitSystem {
    layout: ColumnLayout,
    first_apd: usize,
    light_template: Vec<f64>,
    wires: Vec<ResolvedWireModel>,
    expected_yield: Vec<f64>,
    poisson_factors: Vec<f64>,
}

impl RefitSystem {
    pub fn new(
        store: &NoiseBlockStore,
        light_template: Vec<f64>,
        wires: Vec<ResolvedWireModel>,
        expected_yield: Vec<f64>,
        poisson_factors: Vec<f64>,
    ) -> RefitResult<Self> {
        let span = store.block_count().checked_sub(1).ok_or_else(|| {
            RefitError::invariant_violation("INVARIANT.LAYOUT", "noise store holds no blocks")
        })?;
        let layout = ColumnLayout::new(store.channel_count(), span, wires.len());
        let template_len = 2 * span + 1;
        let gangs = store.apd_range().len();

        let wire_templates_fit = wires.iter().all(|wire| {
            wire.templates.iter().all(|entry| {
                entry.template.len() == template_len && entry.channel_index < layout.channels()
            })
        });
        if light_template.len() != template_len
            || !wire_templates_fit
            || expected_yield.len() != gangs
            || poisson_factors.len() != gangs
        {
            return Err(RefitError::invariant_violation(
                "INVARIANT.LAYOUT",
                format!(
                    "system inputs do not match {} channels over {} bins",
                    layout.channels(),
                    span + 1
                ),
            ));
        }

        Ok(Self {
            layout,
            first_apd: store.first_apd(),
            light_template,
            wires,
            expected_yield,
            poisson_factors,
        })
    }

    pub fn layout(&self) -> ColumnLayout {
        self.layout
    }

    pub fn first_apd(&self) -> usize {
        self.first_apd
    }

    pub fn apd_indices(&self) -> std::ops::Range<usize> {
        self.first_apd..self.layout.channels()
    }

    pub fn light_template(&self) -> &[f64] {
        &self.light_template
    }

    pub fn wires(&self) -> &[ResolvedWireModel] {
        &self.wires
    }

    pub fn expected_yield(&self) -> &[f64] {
        &self.expected_yield
    }

    /// Poisson weight of APD channel index `channel_index`.
    pub fn poisson_factor(&self, channel_index: usize) -> f64 {
        self.poisson_factors[channel_index - self.first_apd]
    }
}

/// Closed-form starting point for the solver: each wire column puts its
/// deposit template on the deposit channel, whitened by the noise diagonal;
/// the light column spreads the light template over the gangs in proportion to
/// their expected yield. Multipliers start at zero.
pub fn initial_guess(system: &RefitSystem, store: &NoiseBlockStore) -> Vec<f64> {
    let layout = system.layout();
    let mut guess = vec![0.0; layout.bundle_len()];

    for (column, wire) in system.wires().iter().enumerate() {
        let template = wire.deposit_template();
        let channel = wire.deposit_index;
        let mut inverse_noise_sum = 0.0;
        for offset in 0..=layout.span() {
            inverse_noise_sum += store.real_diagonal(offset, channel).powi(-2);
            if let Some(imaginary) = store.imaginary_diagonal(offset, channel) {
                inverse_noise_sum += imaginary.powi(-2);
            }
        }
        let normalization = dot(template, template) * inverse_noise_sum;

        let start = layout.column_start(column);
        for offset in 0..=layout.span() {
            let row = start + layout.coefficient_row(offset, channel);
            let real_noise = store.real_diagonal(offset, channel);
            guess[row] = template[2 * offset] / (real_noise * real_noise * normalization);
            if let Some(imaginary_noise) = store.imaginary_diagonal(offset, channel) {
                guess[row + 1] =
                    template[2 * offset + 1] / (imaginary_noise * imaginary_noise * normalization);
            }
        }
    }

    let light = system.light_template();
    let light_norm = dot(light, light);
    let yield_norm: f64 = system.expected_yield().iter().map(|value| value * value).sum();
    let start = layout.column_start(layout.wire_signals());
    for (gang, channel) in system.apd_indices().enumerate() {
        let leading = system.expected_yield()[gang] / (yield_norm * light_norm);
        for offset in 0..=layout.span() {
            let row = start + layout.coefficient_row(offset, channel);
            guess[row] = leading * light[2 * offset];
            if layout.has_imaginary(offset) {
                guess[row + 1] = leading * light[2 * offset + 1];
            }
        }
    }

    guess
}

fn dot(lhs: &[f64], rhs: &[f64]) -> f64 {
    lhs.iter().zip(rhs).map(|(a, b)| a * b).sum()
}
