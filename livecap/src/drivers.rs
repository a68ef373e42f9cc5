//! Platform driver registration.
//!
//! Drivers are external collaborators: each one answers `get_info` and
//! `get_stream_infos` for the hosts it claims. This is the single place
//! where driver crates plug their host tables into the process; the core
//! only ever sees the [`DriverRegistry`].

use livecap_core::live::DriverRegistry;

/// Build the host → driver factory table.
///
/// Driver crates register themselves here, e.g.:
///
/// ```ignore
/// registry.register(
///     &["live.bilibili.com"],
///     Arc::new(|ctx| Ok(Arc::new(BilibiliLive::new(ctx)?) as LiveHandle)),
/// );
/// ```
pub fn build_driver_registry(client: reqwest::Client) -> DriverRegistry {
    DriverRegistry::new(client)
}
