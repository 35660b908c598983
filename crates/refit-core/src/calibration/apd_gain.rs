//! Photon-to-ADC gain of the APD gangs, used to weight the Poisson term.

use super::lightmap::GainMap;
use crate::common::constants::{
    ADC_COUNTS, ADC_FULL_SCALE_VOLTS, APD_GAINMAP_REFERENCE_TIME, APD_PAIRS_PER_PHOTON,
    APD_PREAMP_VOLTS_PER_ELECTRON, APD_SHAPER_GAIN,
};
use crate::domain::ChannelId;

/// Laser-run (4540) gains per gang. Gangs 163, 178, 191 and 205 were bad in
/// that run and are absent.
const LASER_GAINS: [(ChannelId, f64); 70] = [
    (152, 201.230438146),
    (153, 178.750438779),
    (154, 194.228589338),
    (155, 183.33801615),
    (156, 218.485999976),
    (157, 222.139259152),
    (158, 169.982559736),
    (159, 140.385120552),
    (160, 137.602725389),
    (161, 197.78183714),
    (162, 155.478773762),
    (164, 175.875067527),
    (165, 160.014408865),
    (166, 183.408055613),
    (167, 189.600819126),
    (168, 160.339214431),
    (169, 168.547991045),
    (170, 182.670039836),
    (171, 205.567802982),
    (172, 195.87450621),
    (173, 224.956647122),
    (174, 232.062359991),
    (175, 241.822881767),
    (176, 194.740435753),
    (177, 189.867775084),
    (179, 206.755206938),
    (180, 207.822617603),
    (181, 207.501985741),
    (182, 218.213137769),
    (183, 234.369354843),
    (184, 99.908111992),
    (185, 238.381809313),
    (186, 225.118270743),
    (187, 199.078450518),
    (188, 221.863823239),
    (189, 177.032783679),
    (190, 196.787332164),
    (192, 194.923448865),
    (193, 197.027984846),
    (194, 202.757086104),
    (195, 194.432937658),
    (196, 208.992809367),
    (197, 224.762562055),
    (198, 217.696006443),
    (199, 222.380158829),
    (200, 218.358804472),
    (201, 209.573057132),
    (202, 194.684536629),
    (203, 182.543842783),
    (204, 193.469930111),
    (206, 193.627191472),
    (207, 196.073150574),
    (208, 189.597962521),
    (209, 198.824317108),
    (210, 222.747770671),
    (211, 216.928470825),
    (212, 223.437239807),
    (213, 224.316404923),
    (214, 216.26783603),
    (215, 209.612423384),
    (216, 223.041660884),
    (217, 202.642254512),
    (218, 213.904993632),
    (219, 221.988942321),
    (220, 201.427174798),
    (221, 196.689200146),
    (222, 191.457656123),
    (223, 186.183873541),
    (224, 217.033080346),
    (225, 205.858374653),
];

pub fn laser_gain(channel: ChannelId) -> Option<f64> {
    LASER_GAINS
        .binary_search_by_key(&channel, |&(gang, _)| gang)
        .ok()
        .map(|index| LASER_GAINS[index].1)
}

/// ADC counts (peak minus baseline) per photon hitting `channel` at
/// `unix_time`. Gangs without a laser gain yield 0.
pub fn apd_photon_gain(channel: ChannelId, gainmap: &GainMap, unix_time: f64) -> f64 {
    let Some(laser) = laser_gain(channel) else {
        return 0.0;
    };
    let time_dependence =
        gainmap.evaluate(unix_time) / gainmap.evaluate(APD_GAINMAP_REFERENCE_TIME);

    APD_PAIRS_PER_PHOTON
        * laser
        * time_dependence
        * APD_PREAMP_VOLTS_PER_ELECTRON
        * APD_SHAPER_GAIN
        * (ADC_COUNTS / ADC_FULL_SCALE_VOLTS)
}
