pub mod calibration;
pub mod common;
pub mod domain;
pub mod numerics;
pub mod refit;
