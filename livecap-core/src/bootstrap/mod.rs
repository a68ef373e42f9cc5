//! Process bootstrap: configuration loading and service wiring.

mod config;
mod services;

pub use config::{load_config, LoadOptions};
pub use services::{init_services, Services};
