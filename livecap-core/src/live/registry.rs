use std::collections::HashMap;
use std::sync::Arc;

use crate::{Error, Result};

use super::{LiveHandle, Options};

/// Everything a driver factory needs to construct a driver for one room.
pub struct DriverContext {
    pub url: reqwest::Url,
    pub options: Options,
    /// Shared pooled HTTP client; drivers must not build their own.
    pub client: reqwest::Client,
}

pub type DriverFactory = Arc<dyn Fn(DriverContext) -> Result<LiveHandle> + Send + Sync>;

/// Host → driver factory table, built once at process start.
///
/// Unknown hosts are rejected at room-add time rather than at poll time.
#[derive(Default)]
pub struct DriverRegistry {
    factories: HashMap<String, DriverFactory>,
    client: Option<reqwest::Client>,
}

impl DriverRegistry {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            factories: HashMap::new(),
            client: Some(client),
        }
    }

    /// Register one factory for each of the given hosts.
    pub fn register(&mut self, hosts: &[&str], factory: DriverFactory) {
        for host in hosts {
            self.factories.insert((*host).to_string(), factory.clone());
        }
    }

    /// Construct a driver for a room URL.
    pub fn create(&self, raw_url: &str, options: Options) -> Result<LiveHandle> {
        let url: reqwest::Url = raw_url
            .parse()
            .map_err(|e| Error::InvalidInput(format!("invalid room url {raw_url}: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidInput(format!("room url has no host: {raw_url}")))?;
        let factory = self
            .factories
            .get(host)
            .ok_or_else(|| Error::InvalidInput(format!("unsupported platform host: {host}")))?;
        let client = self
            .client
            .clone()
            .unwrap_or_default();
        factory(DriverContext {
            url,
            options,
            client,
        })
    }

    #[must_use]
    pub fn supports(&self, raw_url: &str) -> bool {
        raw_url
            .parse::<reqwest::Url>()
            .ok()
            .and_then(|u| u.host_str().map(|h| self.factories.contains_key(h)))
            .unwrap_or(false)
    }

    #[must_use]
    pub fn supported_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.factories.keys().cloned().collect();
        hosts.sort();
        hosts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockLive;

    #[test]
    fn test_unknown_host_rejected() {
        let registry = DriverRegistry::new(reqwest::Client::new());
        match registry.create("https://unknown.example.com/1", Options::default()) {
            Err(err) => assert!(matches!(err, Error::InvalidInput(_))),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[test]
    fn test_registered_host_creates_driver() {
        let mut registry = DriverRegistry::new(reqwest::Client::new());
        registry.register(
            &["live.example.com"],
            Arc::new(|ctx: DriverContext| {
                Ok(Arc::new(MockLive::new(ctx.url.as_str())) as LiveHandle)
            }),
        );
        assert!(registry.supports("https://live.example.com/42"));
        let live = registry
            .create("https://live.example.com/42", Options::default())
            .unwrap();
        assert_eq!(live.raw_url(), "https://live.example.com/42");
    }
}
