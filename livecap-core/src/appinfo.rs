use serde::Serialize;

pub const APP_NAME: &str = "livecap";

/// Build and process information served by `/api/info`.
#[derive(Debug, Clone, Serialize)]
pub struct AppInfo {
    pub app_name: &'static str,
    pub app_version: &'static str,
    pub git_hash: &'static str,
    pub pid: u32,
    pub platform: String,
}

impl AppInfo {
    #[must_use]
    pub fn collect() -> Self {
        Self {
            app_name: APP_NAME,
            app_version: env!("CARGO_PKG_VERSION"),
            git_hash: option_env!("LIVECAP_GIT_HASH").unwrap_or("unknown"),
            pid: std::process::id(),
            platform: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect() {
        let info = AppInfo::collect();
        assert_eq!(info.app_name, "livecap");
        assert!(!info.app_version.is_empty());
        assert!(info.platform.contains('/'));
    }
}
