//! Frequency-domain signal templates: the scintillation pulse on the APD gangs
//! and the shaped charge response on a u-wire and its induction neighbors.

use crate::calibration::ConditionsProvider;
use crate::common::constants::{
    LIGHT_OVERSAMPLING, SAMPLE_TIME_HIGH_BANDWIDTH_NS, SAMPLE_TIME_NS, WAVEFORM_LENGTH,
    WIRE_DEPOSIT_TIME_NS,
};
use crate::common::{FrequencyWindow, load_json_document};
use crate::domain::{ChannelId, ChannelKind, Event, EventHeader, RefitError, RefitResult};
use crate::numerics::{TransferFunction, WaveformFft, interleave_window};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub struct LightTemplateBuilder {
    window: FrequencyWindow,
    transfer: TransferFunction,
    gain: f64,
    fft: WaveformFft,
}

impl LightTemplateBuilder {
    pub fn new(window: FrequencyWindow) -> Self {
        let transfer = TransferFunction::light_shaping();
        let gain = transfer.gain(Self::fine_sample_period_ns());
        Self {
            window,
            transfer,
            gain,
            fft: WaveformFft::new(WAVEFORM_LENGTH),
        }
    }

    fn fine_sample_period_ns() -> f64 {
        SAMPLE_TIME_NS / LIGHT_OVERSAMPLING as f64
    }

    /// Shaped unit step at `time_ns`, sampled at the native rate, with
    /// peak-minus-baseline 1.
    pub fn time_domain(&self, time_ns: f64) -> Vec<f64> {
        let fine_period = Self::fine_sample_period_ns();
        let fine_len = WAVEFORM_LENGTH * LIGHT_OVERSAMPLING;
        let onset = ((time_ns / fine_period).floor().max(0.0) as usize).min(fine_len);

        let mut step = vec![0.0; fine_len];
        step[onset..].fill(1.0);
        let shaped = self.transfer.transform(&step, fine_period);

        shaped
            .iter()
            .step_by(LIGHT_OVERSAMPLING)
            .map(|value| value / self.gain)
            .collect()
    }

    /// Interleaved template over the frequency window.
    pub fn build(&self, time_ns: f64) -> Vec<f64> {
        let spectrum = self.fft.forward(&self.time_domain(time_ns));
        interleave_window(&spectrum, self.window)
    }
}

/// Unshaped current on the collecting wire and the mean of its two neighbors,
/// sampled at the high-bandwidth period with the deposit at 256 us.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UnshapedWireResponse {
    #[serde(default = "default_response_sample_period_ns")]
    pub sample_period_ns: f64,
    pub deposit: Vec<f64>,
    pub induction: Vec<f64>,
}

fn default_response_sample_period_ns() -> f64 {
    SAMPLE_TIME_HIGH_BANDWIDTH_NS
}

impl UnshapedWireResponse {
    /// Scales both waveforms by the deposit maximum.
    pub fn normalized(mut self) -> RefitResult<Self> {
        let peak = self.deposit.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !peak.is_finite() || peak <= 0.0 {
            return Err(RefitError::configuration(
                "CONFIG.WIRE_RESPONSE",
                format!("deposit waveform needs a positive finite maximum, got {peak}"),
            ));
        }
        if !self.sample_period_ns.is_finite() || self.sample_period_ns <= 0.0 {
            return Err(RefitError::configuration(
                "CONFIG.WIRE_RESPONSE",
                format!(
                    "sample period must be positive, got {}",
                    self.sample_period_ns
                ),
            ));
        }
        for value in self.deposit.iter_mut().chain(self.induction.iter_mut()) {
            *value /= peak;
        }
        Ok(self)
    }
}

pub fn load_wire_response(path: impl AsRef<Path>) -> RefitResult<UnshapedWireResponse> {
    let response: UnshapedWireResponse = load_json_document(path)
        .map_err(|error| error.into_refit_error("CONFIG.WIRE_RESPONSE"))?;
    response.normalized()
}

/// Shapes `unshaped`, divides by `gain`, and places it on the native grid so a
/// signal at `time_ns` lines up with the deposit.
pub fn build_wire_template(
    unshaped: &[f64],
    sample_period_ns: f64,
    transfer: &TransferFunction,
    gain: f64,
    time_ns: f64,
    window: FrequencyWindow,
    fft: &WaveformFft,
) -> Vec<f64> {
    let shaped = transfer.transform(unshaped, sample_period_ns);
    let mut resampled = vec![0.0; WAVEFORM_LENGTH];
    for (sample, slot) in resampled.iter_mut().enumerate() {
        let relative_time = SAMPLE_TIME_NS * sample as f64 - time_ns;
        // Truncation toward zero, as the digitizer grid is indexed.
        let index = ((WIRE_DEPOSIT_TIME_NS + relative_time) / sample_period_ns) as i64;
        if index >= 0 && (index as usize) < shaped.len() {
            *slot = shaped[index as usize] / gain;
        }
    }
    interleave_window(&fft.forward(&resampled), window)
}

/// Templates of one u-wire signal, keyed by channel.
#[derive(Debug, Clone, PartialEq)]
pub struct WireModel {
    /// Index into [`Event::uwire_signals`].
    pub signal: usize,
    pub channel: ChannelId,
    /// Database gain of the deposit channel.
    pub deposit_gain: f64,
    pub templates: BTreeMap<ChannelId, Vec<f64>>,
}

impl WireModel {
    pub fn deposit_template(&self) -> Option<&[f64]> {
        self.templates.get(&self.channel).map(Vec::as_slice)
    }
}

/// Distinct collection signals attached to `clusters`, in signal-index order.
pub fn collection_signals(event: &Event, clusters: &[usize]) -> Vec<usize> {
    let mut signals = BTreeSet::new();
    for &cluster in clusters {
        for &signal in &event.charge_clusters[cluster].uwire_signals {
            if !event.uwire_signals[signal].is_induction {
                signals.insert(signal);
            }
        }
    }
    signals.into_iter().collect()
}

pub fn build_wire_models(
    event: &Event,
    signals: &[usize],
    response: &UnshapedWireResponse,
    conditions: &dyn ConditionsProvider,
    window: FrequencyWindow,
    fft: &WaveformFft,
) -> RefitResult<Vec<WireModel>> {
    let header = &event.header;
    let mut models = Vec::with_capacity(signals.len());
    for &signal_index in signals {
        let signal = &event.uwire_signals[signal_index];
        let deposit_transfer = transfer_for(conditions, header, signal.channel)?;
        let deposit_gain = gain_for(conditions, header, signal.channel)?;
        let shaping_gain = deposit_transfer.gain(response.sample_period_ns);

        let mut templates = BTreeMap::new();
        templates.insert(
            signal.channel,
            build_wire_template(
                &response.deposit,
                response.sample_period_ns,
                deposit_transfer,
                shaping_gain,
                signal.time,
                window,
                fft,
            ),
        );

        for neighbor in [i32::from(signal.channel) - 1, i32::from(signal.channel) + 1] {
            if ChannelKind::of(neighbor) != ChannelKind::UWire {
                continue;
            }
            // UWire classification bounds the value to 0..152.
            let neighbor = neighbor as ChannelId;
            let transfer = transfer_for(conditions, header, neighbor)?;
            let neighbor_gain = gain_for(conditions, header, neighbor)?;
            templates.insert(
                neighbor,
                build_wire_template(
                    &response.induction,
                    response.sample_period_ns,
                    transfer,
                    shaping_gain * neighbor_gain / deposit_gain,
                    signal.time,
                    window,
                    fft,
                ),
            );
        }

        models.push(WireModel {
            signal: signal_index,
            channel: signal.channel,
            deposit_gain,
            templates,
        });
    }
    Ok(models)
}

fn transfer_for<'a>(
    conditions: &'a dyn ConditionsProvider,
    header: &EventHeader,
    channel: ChannelId,
) -> RefitResult<&'a TransferFunction> {
    conditions.transfer_function(header, channel).ok_or_else(|| {
        RefitError::missing_calibration(
            "CALIB.TRANSFER_FUNCTION",
            format!("no electronics shaping for channel {channel}"),
        )
    })
}

fn gain_for(
    conditions: &dyn ConditionsProvider,
    header: &EventHeader,
    channel: ChannelId,
) -> RefitResult<f64> {
    conditions.uwire_gain(header, channel).ok_or_else(|| {
        RefitError::missing_calibration(
            "CALIB.UWIRE_GAIN",
            format!("no u-wire gain for channel {channel}"),
        )
    })
}
