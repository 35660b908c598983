//! Projection of the solved filters onto the raw waveforms and conversion of
//! the resulting amplitudes to energies.

use super::layout::ColumnLayout;
use crate::common::FrequencyWindow;
use crate::common::constants::{
    ADC_COUNTS, ADC_FULL_SCALE_ELECTRONS_WIRE, REFERENCE_UWIRE_GAIN, THORIUM_PEAK_KEV,
    W_VALUE_LXE_KEV_PER_ELECTRON,
};
use crate::domain::{ChannelId, Event, RefitError, RefitResult};
use crate::numerics::{WaveformFft, interleave_window};

/// Interleaved spectra of the raw waveforms of `channels`, restricted to
/// `window`.
pub fn waveform_spectra(
    event: &Event,
    channels: &[ChannelId],
    window: FrequencyWindow,
    fft: &WaveformFft,
) -> RefitResult<Vec<Vec<f64>>> {
    channels
        .iter()
        .map(|&channel| {
            let waveform = event.waveform(channel).ok_or_else(|| {
                RefitError::invariant_violation(
                    "INVARIANT.WAVEFORM",
                    format!("event {} has no waveform on live channel {channel}", event.id),
                )
            })?;
            Ok(interleave_window(&fft.forward(waveform), window))
        })
        .collect()
}

/// One amplitude per solution column: the inner product of the column's
/// coefficients with the waveform spectra.
pub fn project_amplitudes(layout: ColumnLayout, solution: &[f64], spectra: &[Vec<f64>]) -> Vec<f64> {
    (0..layout.solution_count())
        .map(|column| {
            let base = layout.column_start(column);
            let mut amplitude = 0.0;
            for offset in 0..=layout.span() {
                for (channel, spectrum) in spectra.iter().enumerate() {
                    let row = base + layout.coefficient_row(offset, channel);
                    amplitude += solution[row] * spectrum[2 * offset];
                    if layout.has_imaginary(offset) {
                        amplitude += solution[row + 1] * spectrum[2 * offset + 1];
                    }
                }
            }
            amplitude
        })
        .collect()
}

/// Collected charge in keV for a u-wire amplitude in ADC counts.
pub fn wire_energy_kev(amplitude: f64, uwire_gain: f64) -> f64 {
    amplitude * (uwire_gain / REFERENCE_UWIRE_GAIN) * ADC_FULL_SCALE_ELECTRONS_WIRE
        * W_VALUE_LXE_KEV_PER_ELECTRON
        / ADC_COUNTS
}

/// Cluster energy from the sum of its wire energies, corrected for electron
/// attachment during the drift and for grid transparency.
pub fn cluster_energy_kev(
    wire_energy_sum: f64,
    drift_time_ns: f64,
    electron_lifetime_ns: f64,
    grid_correction: f64,
) -> f64 {
    wire_energy_sum * (drift_time_ns / electron_lifetime_ns).exp() * grid_correction
}

pub fn scintillation_energy_kev(amplitude: f64) -> f64 {
    amplitude * THORIUM_PEAK_KEV
}

#[cfg(test)]
mod tests {
    use super::{
        cluster_energy_kev, project_amplitudes, scintillation_energy_kev, waveform_spectra,
        wire_energy_kev,
    };
    use crate::common::FrequencyWindow;
    use crate::domain::{Event, RefitErrorCategory};
    use crate::numerics::WaveformFft;
    use crate::refit::layout::ColumnLayout;

    #[test]
    fn projection_skips_terminal_imaginary_part() {
        // Two channels, bins offsets 0 and 1 (terminal), one wire column.
        let layout = ColumnLayout::new(2, 1, 1);
        let mut solution = vec![0.0; layout.bundle_len()];
        solution[layout.coefficient_row(0, 1)] = 2.0;
        solution[layout.coefficient_row(0, 1) + 1] = -1.0;
        solution[layout.coefficient_row(1, 0)] = 0.5;
        let light = layout.column_start(1);
        solution[light + layout.coefficient_row(1, 1)] = 3.0;
        // Multiplier rows must not contribute.
        solution[layout.wire_lagrange_row(0)] = 100.0;

        let spectra = vec![vec![1.0, 1.0, 4.0], vec![5.0, 7.0, 11.0]];
        let amplitudes = project_amplitudes(layout, &solution, &spectra);
        assert_eq!(amplitudes, vec![2.0 * 5.0 - 7.0 + 0.5 * 4.0, 3.0 * 11.0]);
    }

    #[test]
    fn wire_energy_at_reference_gain() {
        let expected = 1_228_800.0 * 15.6e-3 / 4096.0;
        assert!((wire_energy_kev(1.0, 300.0) - expected).abs() < 1.0e-12);
        assert!((wire_energy_kev(2.0, 150.0) - expected).abs() < 1.0e-12);
    }

    #[test]
    fn cluster_energy_grows_with_drift_time() {
        assert_eq!(cluster_energy_kev(100.0, 0.0, 3.0e6, 1.0), 100.0);
        let corrected = cluster_energy_kev(100.0, 3.0e6, 3.0e6, 1.02);
        assert!((corrected - 100.0 * std::f64::consts::E * 1.02).abs() < 1.0e-9);
    }

    #[test]
    fn scintillation_amplitude_is_in_thorium_units() {
        assert_eq!(scintillation_energy_kev(0.5), 1307.5);
    }

    #[test]
    fn spectra_follow_channel_order_and_window() {
        let mut event = Event::default();
        event.waveforms.insert(3, vec![1.0; 8]);
        let mut alternating = vec![0.0; 8];
        alternating.iter_mut().step_by(2).for_each(|value| *value = 1.0);
        event.waveforms.insert(4, alternating);

        let fft = WaveformFft::new(8);
        let window = FrequencyWindow { min: 1, max: 4 };
        let spectra = waveform_spectra(&event, &[4, 3], window, &fft).expect("spectra");
        assert_eq!(spectra.len(), 2);
        assert_eq!(spectra[0].len(), 7);
        // 1, 0, 1, 0, ... only has DC and Nyquist content.
        assert!((spectra[0][6] - 4.0).abs() < 1.0e-12);
        assert!(spectra[1].iter().all(|value| value.abs() < 1.0e-12));

        let error = waveform_spectra(&event, &[5], window, &fft).expect_err("no waveform");
        assert_eq!(error.category(), RefitErrorCategory::InvariantViolation);
    }
}
