//! Hierarchical, versioned configuration.
//!
//! The value model ([`model`]) mirrors the YAML document; [`store`] provides
//! the copy-on-write snapshot store with optimistic concurrency; [`resolve`]
//! merges the global ← platform ← room override chain.

mod comments;
mod model;
mod resolve;
mod store;

pub use comments::render_with_comments;
pub use model::{
    AuthenticationConfig, Config, EmailConfig, FeatureConfig, LiveRoom, LogConfig, NotifyConfig,
    OnRecordFinished, OverridableConfig, PlatformConfig, RpcConfig, TelegramConfig,
    VideoSplitStrategies,
};
pub use resolve::{platform_key_from_url, ResolvedConfig};
pub use store::ConfigStore;
