use serde::Deserialize;

use super::client::RESOURCE;

fn default_enabled() -> bool {
    true
}

fn default_base_url() -> String {
    RESOURCE.to_string()
}

fn default_poll_interval_secs() -> u64 {
    60
}

/// Configuration for the Nature Remo integration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Whether the integration should start
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Personal access token for the cloud API
    pub access_token: String,

    /// API endpoint, overridable for testing against a local stub
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Base polling interval in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in() {
        let config: Config = toml::from_str(r#"access_token = "tok""#).unwrap();
        assert!(config.enabled);
        assert_eq!(config.base_url, RESOURCE);
        assert_eq!(config.poll_interval_secs, 60);
    }

    #[test]
    fn missing_token_is_an_error() {
        assert!(toml::from_str::<Config>("enabled = true").is_err());
    }
}
