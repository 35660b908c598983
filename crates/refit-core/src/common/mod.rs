pub mod config;
pub mod constants;

pub use config::{
    ConfigLoadError, FrequencyWindow, RefitConfig, load_json_document, load_refit_config,
};
