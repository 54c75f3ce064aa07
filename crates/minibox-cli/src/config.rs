//! CLI settings resolved from the environment.
//!
//! Each resolved value keeps its source string so startup logging can say
//! where a setting came from, including fallbacks after invalid input.

use minibox_activation::{ActivationConfig, DEFAULT_POLL_INTERVAL_MS};
use minibox_api_client::MiniboxClientConfig;

pub const ENV_API_BASE_URL: &str = "MINIBOX_API_BASE_URL";
pub const ENV_ACCESS_TOKEN: &str = "MINIBOX_ACCESS_TOKEN";
pub const ENV_POLL_INTERVAL_MS: &str = "MINIBOX_POLL_INTERVAL_MS";

pub const DEFAULT_API_BASE_URL: &str = "https://api.minibox.dev";
pub const SOURCE_DEFAULT: &str = "default";

/// Settings for one CLI invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliSettings {
    pub base_url: String,
    pub base_url_source: String,
    pub access_token: Option<String>,
    pub poll_interval_ms: u64,
    pub poll_interval_source: String,
}

impl CliSettings {
    #[must_use]
    pub fn client_config(&self) -> MiniboxClientConfig {
        let config = MiniboxClientConfig::new(&self.base_url);
        match &self.access_token {
            Some(token) => config.with_access_token(token),
            None => config,
        }
    }

    /// Activation timing: the poll interval is tunable from the
    /// environment, the wait ceiling and tick rate are not.
    #[must_use]
    pub fn activation_config(&self) -> ActivationConfig {
        ActivationConfig {
            poll_interval_ms: self.poll_interval_ms,
            ..ActivationConfig::default()
        }
    }
}

#[must_use]
pub fn resolve_settings() -> CliSettings {
    let (base_url, base_url_source) = resolve_base_url();
    let (poll_interval_ms, poll_interval_source) = resolve_poll_interval();
    CliSettings {
        base_url,
        base_url_source,
        access_token: env_non_empty(ENV_ACCESS_TOKEN),
        poll_interval_ms,
        poll_interval_source,
    }
}

#[must_use]
pub fn resolve_base_url() -> (String, String) {
    if let Some(base_url) = env_non_empty(ENV_API_BASE_URL) {
        return (base_url, ENV_API_BASE_URL.to_string());
    }
    (
        DEFAULT_API_BASE_URL.to_string(),
        SOURCE_DEFAULT.to_string(),
    )
}

#[must_use]
pub fn resolve_poll_interval() -> (u64, String) {
    if let Some(raw) = env_non_empty(ENV_POLL_INTERVAL_MS) {
        if let Ok(value) = raw.parse::<u64>() {
            if value > 0 {
                return (value, ENV_POLL_INTERVAL_MS.to_string());
            }
        }
        return (
            DEFAULT_POLL_INTERVAL_MS,
            format!("{ENV_POLL_INTERVAL_MS}:invalid({raw})->{DEFAULT_POLL_INTERVAL_MS}"),
        );
    }
    (DEFAULT_POLL_INTERVAL_MS, SOURCE_DEFAULT.to_string())
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
