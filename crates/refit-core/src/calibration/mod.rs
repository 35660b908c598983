pub mod apd_gain;
pub mod conditions;
pub mod lightmap;

pub use apd_gain::{apd_photon_gain, laser_gain};
pub use conditions::{
    ChannelMap, ConditionsProvider, ElectronLifetimes, StaticConditions, load_static_conditions,
};
pub use lightmap::{ApdGangMaps, GainMap, HistogramAxis, LightMap, LightmapSet, load_lightmap_set};
