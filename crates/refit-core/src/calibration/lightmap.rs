use crate::common::load_json_document;
use crate::domain::{ChannelId, ChannelKind, RefitError, RefitResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Uniformly binned histogram axis.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct HistogramAxis {
    pub low: f64,
    pub high: f64,
    pub bins: usize,
}

impl HistogramAxis {
    pub fn width(&self) -> f64 {
        (self.high - self.low) / self.bins as f64
    }

    pub fn center(&self, bin: usize) -> f64 {
        self.low + (bin as f64 + 0.5) * self.width()
    }

    pub fn first_center(&self) -> f64 {
        self.center(0)
    }

    pub fn last_center(&self) -> f64 {
        self.center(self.bins.saturating_sub(1))
    }

    /// Lower bin index and fractional offset toward the next center, or `None`
    /// outside `[first_center, last_center)`.
    fn bracket(&self, coordinate: f64) -> Option<(usize, f64)> {
        if !(self.first_center() <= coordinate && coordinate < self.last_center()) {
            return None;
        }
        let width = self.width();
        let scaled = (coordinate - self.first_center()) / width;
        let lower = (scaled.floor() as usize).min(self.bins - 2);
        let fraction = (coordinate - self.center(lower)) / width;
        Some((lower, fraction))
    }

    fn is_valid(&self) -> bool {
        self.bins > 0 && self.low.is_finite() && self.high.is_finite() && self.high > self.low
    }
}

/// Position-dependent light yield of one APD gang. `values` is flattened with
/// x fastest: `values[(iz * ny + iy) * nx + ix]`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LightMap {
    pub x: HistogramAxis,
    pub y: HistogramAxis,
    pub z: HistogramAxis,
    pub values: Vec<f64>,
}

impl LightMap {
    fn value(&self, ix: usize, iy: usize, iz: usize) -> f64 {
        self.values[(iz * self.y.bins + iy) * self.x.bins + ix]
    }

    /// Trilinear interpolation between bin centers; zero when any coordinate
    /// lies outside the span of centers.
    pub fn interpolate(&self, x: f64, y: f64, z: f64) -> f64 {
        let (Some((ix, tx)), Some((iy, ty)), Some((iz, tz))) =
            (self.x.bracket(x), self.y.bracket(y), self.z.bracket(z))
        else {
            return 0.0;
        };

        let mut result = 0.0;
        for (dz, wz) in [(0, 1.0 - tz), (1, tz)] {
            for (dy, wy) in [(0, 1.0 - ty), (1, ty)] {
                for (dx, wx) in [(0, 1.0 - tx), (1, tx)] {
                    result += wx * wy * wz * self.value(ix + dx, iy + dy, iz + dz);
                }
            }
        }
        result
    }

    fn validate(&self, gang: ChannelId) -> RefitResult<()> {
        if !(self.x.is_valid() && self.y.is_valid() && self.z.is_valid()) {
            return Err(RefitError::configuration(
                "CONFIG.LIGHTMAP_AXES",
                format!("lightmap for gang {gang} has an empty or inverted axis"),
            ));
        }
        let expected = self.x.bins * self.y.bins * self.z.bins;
        if self.values.len() != expected {
            return Err(RefitError::configuration(
                "CONFIG.LIGHTMAP_VALUES",
                format!(
                    "lightmap for gang {gang} has {} values, expected {expected}",
                    self.values.len()
                ),
            ));
        }
        Ok(())
    }
}

/// Time dependence of one APD gang's yield, evaluated piecewise-linearly with
/// linear extrapolation past either end.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GainMap {
    pub times: Vec<f64>,
    pub values: Vec<f64>,
}

impl GainMap {
    pub fn evaluate(&self, time: f64) -> f64 {
        match self.times.len() {
            0 => 0.0,
            1 => self.values[0],
            len => {
                let upper = self
                    .times
                    .partition_point(|&sample| sample <= time)
                    .clamp(1, len - 1);
                let lower = upper - 1;
                let (t0, t1) = (self.times[lower], self.times[upper]);
                let (v0, v1) = (self.values[lower], self.values[upper]);
                v0 + (time - t0) * (v1 - v0) / (t1 - t0)
            }
        }
    }

    fn validate(&self, gang: ChannelId) -> RefitResult<()> {
        if self.times.is_empty() || self.times.len() != self.values.len() {
            return Err(RefitError::configuration(
                "CONFIG.GAINMAP_POINTS",
                format!(
                    "gainmap for gang {gang} needs matching non-empty times/values, got {}/{}",
                    self.times.len(),
                    self.values.len()
                ),
            ));
        }
        if !self.times.windows(2).all(|pair| pair[0] < pair[1]) {
            return Err(RefitError::configuration(
                "CONFIG.GAINMAP_POINTS",
                format!("gainmap for gang {gang} times must be strictly increasing"),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ApdGangMaps {
    pub gang: ChannelId,
    pub lightmap: LightMap,
    pub gainmap: GainMap,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
struct LightmapDocument {
    gangs: Vec<ApdGangMaps>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LightmapSet {
    gangs: BTreeMap<ChannelId, ApdGangMaps>,
}

impl LightmapSet {
    pub fn from_gangs(gangs: impl IntoIterator<Item = ApdGangMaps>) -> RefitResult<Self> {
        let mut by_gang = BTreeMap::new();
        for maps in gangs {
            if ChannelKind::of_channel(maps.gang) != ChannelKind::ApdGang {
                return Err(RefitError::configuration(
                    "CONFIG.LIGHTMAP_GANG",
                    format!("lightmap entry for channel {} is not an APD gang", maps.gang),
                ));
            }
            maps.lightmap.validate(maps.gang)?;
            maps.gainmap.validate(maps.gang)?;
            if by_gang.insert(maps.gang, maps).is_some() {
                return Err(RefitError::configuration(
                    "CONFIG.LIGHTMAP_GANG",
                    "lightmap lists a gang more than once",
                ));
            }
        }
        Ok(Self { gangs: by_gang })
    }

    pub fn gang(&self, gang: ChannelId) -> Option<&ApdGangMaps> {
        self.gangs.get(&gang)
    }

    pub fn gangs(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.gangs.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.gangs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gangs.is_empty()
    }
}

pub fn load_lightmap_set(path: impl AsRef<Path>) -> RefitResult<LightmapSet> {
    let document: LightmapDocument = load_json_document(path)
        .map_err(|error| error.into_refit_error("CONFIG.LIGHTMAP_ARTIFACT"))?;
    LightmapSet::from_gangs(document.gangs)
}
