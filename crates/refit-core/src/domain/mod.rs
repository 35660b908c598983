pub mod errors;

pub use errors::{RefitError, RefitErrorCategory, RefitResult};

use crate::common::constants::{NCHANNEL_PER_WIREPLANE, NUMBER_READOUT_CHANNELS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Readout channel identifier (0..226).
pub type ChannelId = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    UWire,
    VWire,
    ApdGang,
    Unknown,
}

impl ChannelKind {
    /// Wire planes are laid out U, V, U, V with 38 channels each, followed by
    /// the APD gangs. Takes a signed channel so that `channel - 1` at the
    /// lower edge classifies as unknown.
    pub const fn of(channel: i32) -> Self {
        let per_plane = NCHANNEL_PER_WIREPLANE as i32;
        if channel < 0 {
            Self::Unknown
        } else if channel < per_plane {
            Self::UWire
        } else if channel < 2 * per_plane {
            Self::VWire
        } else if channel < 3 * per_plane {
            Self::UWire
        } else if channel < 4 * per_plane {
            Self::VWire
        } else if channel < NUMBER_READOUT_CHANNELS as i32 {
            Self::ApdGang
        } else {
            Self::Unknown
        }
    }

    pub const fn of_channel(channel: ChannelId) -> Self {
        Self::of(channel as i32)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UWire => "u-wire",
            Self::VWire => "v-wire",
            Self::ApdGang => "apd-gang",
            Self::Unknown => "unknown",
        }
    }
}

impl Display for ChannelKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorHalf {
    Tpc1,
    Tpc2,
}

impl DetectorHalf {
    pub fn for_z(z: f64) -> Self {
        if z > 0.0 { Self::Tpc1 } else { Self::Tpc2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EventHeader {
    /// Header sample count; full-length traces report 2047.
    pub sample_count: usize,
    pub trigger_seconds: u64,
    #[serde(default)]
    pub trigger_microseconds: u32,
}

impl EventHeader {
    pub fn unix_time(&self) -> f64 {
        self.trigger_seconds as f64 + f64::from(self.trigger_microseconds) / 1.0e6
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UWireSignal {
    pub channel: ChannelId,
    /// Signal time in ns.
    pub time: f64,
    #[serde(default)]
    pub is_induction: bool,
    #[serde(default)]
    pub denoised_energy: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChargeCluster {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Drift time in ns.
    pub drift_time: f64,
    pub purity_corrected_energy: f64,
    /// Indices into [`Event::uwire_signals`].
    #[serde(default)]
    pub uwire_signals: Vec<usize>,
    #[serde(default)]
    pub denoised_energy: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScintillationCluster {
    /// Scintillation time in ns.
    pub time: f64,
    /// Indices into [`Event::charge_clusters`].
    #[serde(default)]
    pub charge_clusters: Vec<usize>,
    #[serde(default)]
    pub denoised_energy: f64,
}

/// One triggered event with its preliminary reconstruction. Clusters refer to
/// each other by index so the engine only ever borrows from the event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: u64,
    pub header: EventHeader,
    #[serde(default)]
    pub waveforms: BTreeMap<ChannelId, Vec<f64>>,
    #[serde(default)]
    pub uwire_signals: Vec<UWireSignal>,
    #[serde(default)]
    pub charge_clusters: Vec<ChargeCluster>,
    #[serde(default)]
    pub scintillation_clusters: Vec<ScintillationCluster>,
}

impl Event {
    pub fn waveform(&self, channel: ChannelId) -> Option<&[f64]> {
        self.waveforms.get(&channel).map(Vec::as_slice)
    }

    pub fn reset_denoised(&mut self) {
        for signal in &mut self.uwire_signals {
            signal.denoised_energy = 0.0;
        }
        for cluster in &mut self.charge_clusters {
            cluster.denoised_energy = 0.0;
        }
        for scint in &mut self.scintillation_clusters {
            scint.denoised_energy = 0.0;
        }
    }

    /// Checks that every cross-reference points inside the event.
    pub fn validate_links(&self) -> RefitResult<()> {
        for (scint_index, scint) in self.scintillation_clusters.iter().enumerate() {
            if let Some(&bad) = scint
                .charge_clusters
                .iter()
                .find(|&&index| index >= self.charge_clusters.len())
            {
                return Err(RefitError::invariant_violation(
                    "INVARIANT.EVENT_LINKS",
                    format!(
                        "event {} scintillation cluster {} references charge cluster {} of {}",
                        self.id,
                        scint_index,
                        bad,
                        self.charge_clusters.len()
                    ),
                ));
            }
        }
        for (cluster_index, cluster) in self.charge_clusters.iter().enumerate() {
            if let Some(&bad) = cluster
                .uwire_signals
                .iter()
                .find(|&&index| index >= self.uwire_signals.len())
            {
                return Err(RefitError::invariant_violation(
                    "INVARIANT.EVENT_LINKS",
                    format!(
                        "event {} charge cluster {} references u-wire signal {} of {}",
                        self.id,
                        cluster_index,
                        bad,
                        self.uwire_signals.len()
                    ),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ChannelKind, ChargeCluster, DetectorHalf, Event, EventHeader, RefitErrorCategory};

    #[test]
    fn channel_kind_follows_plane_layout() {
        assert_eq!(ChannelKind::of(-1), ChannelKind::Unknown);
        assert_eq!(ChannelKind::of(0), ChannelKind::UWire);
        assert_eq!(ChannelKind::of(37), ChannelKind::UWire);
        assert_eq!(ChannelKind::of(38), ChannelKind::VWire);
        assert_eq!(ChannelKind::of(75), ChannelKind::VWire);
        assert_eq!(ChannelKind::of(76), ChannelKind::UWire);
        assert_eq!(ChannelKind::of(113), ChannelKind::UWire);
        assert_eq!(ChannelKind::of(114), ChannelKind::VWire);
        assert_eq!(ChannelKind::of(152), ChannelKind::ApdGang);
        assert_eq!(ChannelKind::of(225), ChannelKind::ApdGang);
        assert_eq!(ChannelKind::of(226), ChannelKind::Unknown);
    }

    #[test]
    fn unix_time_combines_seconds_and_microseconds() {
        let header = EventHeader {
            sample_count: 2047,
            trigger_seconds: 1_355_409_118,
            trigger_microseconds: 254_096,
        };
        assert!((header.unix_time() - 1_355_409_118.254_096).abs() < 1.0e-6);
    }

    #[test]
    fn detector_half_is_chosen_by_sign_of_z() {
        assert_eq!(DetectorHalf::for_z(12.0), DetectorHalf::Tpc1);
        assert_eq!(DetectorHalf::for_z(0.0), DetectorHalf::Tpc2);
        assert_eq!(DetectorHalf::for_z(-3.0), DetectorHalf::Tpc2);
    }

    #[test]
    fn validate_links_rejects_dangling_signal_index() {
        let event = Event {
            charge_clusters: vec![ChargeCluster {
                uwire_signals: vec![3],
                ..ChargeCluster::default()
            }],
            ..Event::default()
        };
        let error = event.validate_links().expect_err("dangling index should fail");
        assert_eq!(error.category(), RefitErrorCategory::InvariantViolation);
    }
}
