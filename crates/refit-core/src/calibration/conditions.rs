//! Detector conditions looked up per event: channel map, electronics shaping,
//! u-wire gains, electron lifetime and grid correction.

use crate::common::load_json_document;
use crate::domain::{ChannelId, ChargeCluster, DetectorHalf, EventHeader, RefitError, RefitResult};
use crate::numerics::TransferFunction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct ChannelMap {
    /// Channels the DAQ suppressed for this run.
    #[serde(default)]
    pub suppressed: BTreeSet<ChannelId>,
    /// Channels flagged as not good.
    #[serde(default)]
    pub bad: BTreeSet<ChannelId>,
}

impl ChannelMap {
    pub fn is_usable(&self, channel: ChannelId) -> bool {
        !self.suppressed.contains(&channel) && !self.bad.contains(&channel)
    }
}

/// Calibration source consulted by the engine. Every lookup may be absent for
/// a given event; the engine turns an absence into a dropped event.
pub trait ConditionsProvider {
    fn channel_map(&self, header: &EventHeader) -> Option<&ChannelMap>;

    fn transfer_function(&self, header: &EventHeader, channel: ChannelId)
    -> Option<&TransferFunction>;

    fn uwire_gain(&self, header: &EventHeader, channel: ChannelId) -> Option<f64>;

    /// Electron lifetime in ns.
    fn electron_lifetime(&self, header: &EventHeader, half: DetectorHalf) -> Option<f64>;

    /// Multiplicative grid-transparency correction for `cluster`.
    fn grid_correction(&self, header: &EventHeader, cluster: &ChargeCluster) -> Option<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ElectronLifetimes {
    pub tpc1_ns: f64,
    pub tpc2_ns: f64,
}

impl ElectronLifetimes {
    pub fn for_half(&self, half: DetectorHalf) -> f64 {
        match half {
            DetectorHalf::Tpc1 => self.tpc1_ns,
            DetectorHalf::Tpc2 => self.tpc2_ns,
        }
    }
}

/// Run-independent conditions read from a single JSON document.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct StaticConditions {
    #[serde(default)]
    pub channel_map: Option<ChannelMap>,
    #[serde(default)]
    pub default_transfer_function: Option<TransferFunction>,
    #[serde(default)]
    pub transfer_functions: BTreeMap<ChannelId, TransferFunction>,
    #[serde(default)]
    pub default_uwire_gain: Option<f64>,
    #[serde(default)]
    pub uwire_gains: BTreeMap<ChannelId, f64>,
    #[serde(default)]
    pub electron_lifetime: Option<ElectronLifetimes>,
    #[serde(default)]
    pub grid_correction: Option<f64>,
}

impl StaticConditions {
    pub fn validate(&self) -> RefitResult<()> {
        let transfer_functions = self
            .default_transfer_function
            .iter()
            .chain(self.transfer_functions.values());
        for transfer in transfer_functions {
            if !transfer.is_well_formed() {
                return Err(RefitError::configuration(
                    "CONFIG.CONDITIONS_SHAPING",
                    "shaping time constants must be positive and finite",
                ));
            }
        }
        let gains = self.default_uwire_gain.iter().chain(self.uwire_gains.values());
        for &gain in gains {
            if !gain.is_finite() || gain <= 0.0 {
                return Err(RefitError::configuration(
                    "CONFIG.CONDITIONS_GAIN",
                    format!("u-wire gain must be positive and finite, got {gain}"),
                ));
            }
        }
        Ok(())
    }
}

impl ConditionsProvider for StaticConditions {
    fn channel_map(&self, _header: &EventHeader) -> Option<&ChannelMap> {
        self.channel_map.as_ref()
    }

    fn transfer_function(
        &self,
        _header: &EventHeader,
        channel: ChannelId,
    ) -> Option<&TransferFunction> {
        self.transfer_functions
            .get(&channel)
            .or(self.default_transfer_function.as_ref())
    }

    fn uwire_gain(&self, _header: &EventHeader, channel: ChannelId) -> Option<f64> {
        self.uwire_gains
            .get(&channel)
            .copied()
            .or(self.default_uwire_gain)
    }

    fn electron_lifetime(&self, _header: &EventHeader, half: DetectorHalf) -> Option<f64> {
        self.electron_lifetime
            .map(|lifetimes| lifetimes.for_half(half))
    }

    fn grid_correction(&self, _header: &EventHeader, _cluster: &ChargeCluster) -> Option<f64> {
        self.grid_correction
    }
}

pub fn load_static_conditions(path: impl AsRef<Path>) -> RefitResult<StaticConditions> {
    let conditions: StaticConditions = load_json_document(path)
        .map_err(|error| error.into_refit_error("CONFIG.CONDITIONS"))?;
    conditions.validate()?;
    Ok(conditions)
}

#[cfg(test)]
mod tests {
    use super::{ChannelMap, ConditionsProvider, StaticConditions, load_static_conditions};
    use crate::domain::{ChargeCluster, DetectorHalf, EventHeader, RefitErrorCategory};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn channel_map_excludes_suppressed_and_bad_channels() {
        let map = ChannelMap {
            suppressed: [3].into_iter().collect(),
            bad: [7].into_iter().collect(),
        };
        assert!(map.is_usable(0));
        assert!(!map.is_usable(3));
        assert!(!map.is_usable(7));
    }

    #[test]
    fn per_channel_entries_override_defaults() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("conditions.json");
        fs::write(
            &path,
            r#"{
                "channel_map": { "bad": [5] },
                "default_transfer_function": { "stages": [ { "kind": "integration", "tau_ns": 3000.0 } ] },
                "transfer_functions": { "12": { "stages": [] } },
                "default_uwire_gain": 300.0,
                "uwire_gains": { "12": 330.0 },
                "electron_lifetime": { "tpc1_ns": 3.0e6, "tpc2_ns": 4.0e6 },
                "grid_correction": 1.05
            }"#,
        )
        .expect("write conditions");

        let conditions = load_static_conditions(&path).expect("conditions should load");
        let header = EventHeader::default();
        assert_eq!(conditions.uwire_gain(&header, 12), Some(330.0));
        assert_eq!(conditions.uwire_gain(&header, 13), Some(300.0));
        assert!(
            conditions
                .transfer_function(&header, 12)
                .expect("channel 12")
                .stages()
                .is_empty()
        );
        assert_eq!(
            conditions
                .transfer_function(&header, 13)
                .expect("default")
                .stages()
                .len(),
            1
        );
        assert_eq!(
            conditions.electron_lifetime(&header, DetectorHalf::Tpc2),
            Some(4.0e6)
        );
        assert_eq!(
            conditions.grid_correction(&header, &ChargeCluster::default()),
            Some(1.05)
        );
        assert!(!conditions.channel_map(&header).expect("map").is_usable(5));
    }

    #[test]
    fn absent_entries_stay_absent() {
        let conditions = StaticConditions::default();
        let header = EventHeader::default();
        assert!(conditions.channel_map(&header).is_none());
        assert!(conditions.transfer_function(&header, 0).is_none());
        assert_eq!(conditions.uwire_gain(&header, 0), None);
        assert_eq!(conditions.electron_lifetime(&header, DetectorHalf::Tpc1), None);
    }

    #[test]
    fn non_positive_gain_is_rejected() {
        let conditions = StaticConditions {
            default_uwire_gain: Some(0.0),
            ..StaticConditions::default()
        };
        let error = conditions.validate().expect_err("zero gain");
        assert_eq!(error.category(), RefitErrorCategory::Configuration);
    }
}
