pub mod appinfo;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod listener;
pub mod live;
pub mod logging;
pub mod parser;
pub mod ratelimit;
pub mod recorder;
pub mod task;
pub mod test_support;

pub use error::{Error, Result};

// Global server start time for uptime calculation
use once_cell::sync::Lazy;
use std::time::Instant;

pub static SERVER_START_TIME: Lazy<Instant> = Lazy::new(Instant::now);
