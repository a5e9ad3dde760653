use std::env;
use tracing::warn;

pub mod error;
pub mod telehealth;

pub use error::ConfigError;
pub use telehealth::{
    BatchSettings, ModeFloors, MonitorSettings, SessionSettings, TelehealthConfig,
    TierThresholds,
};

/// Endpoints and credentials for the external collaborators
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub record_store_url: String,
    pub record_store_api_key: String,
    pub record_store_auth_token: Option<String>,
    pub network_probe_url: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            record_store_url: env::var("RECORD_STORE_URL")
                .unwrap_or_else(|_| {
                    warn!("RECORD_STORE_URL not set, using empty value");
                    String::new()
                }),
            record_store_api_key: env::var("RECORD_STORE_API_KEY")
                .unwrap_or_else(|_| {
                    warn!("RECORD_STORE_API_KEY not set, using empty value");
                    String::new()
                }),
            record_store_auth_token: env::var("RECORD_STORE_AUTH_TOKEN").ok(),
            network_probe_url: env::var("NETWORK_PROBE_URL")
                .unwrap_or_else(|_| {
                    warn!("NETWORK_PROBE_URL not set, using empty value");
                    String::new()
                }),
        };

        if !config.is_record_store_configured() {
            warn!("Clinical record store not configured - missing environment variables");
        }

        config
    }

    pub fn is_record_store_configured(&self) -> bool {
        !self.record_store_url.is_empty() && !self.record_store_api_key.is_empty()
    }

    pub fn is_probe_configured(&self) -> bool {
        !self.network_probe_url.is_empty()
    }

    /// Fails on the first missing record-store setting
    pub fn validate_record_store(&self) -> Result<(), ConfigError> {
        if self.record_store_url.is_empty() {
            return Err(ConfigError::MissingValue { key: "RECORD_STORE_URL".to_string() });
        }
        if self.record_store_api_key.is_empty() {
            return Err(ConfigError::MissingValue { key: "RECORD_STORE_API_KEY".to_string() });
        }
        Ok(())
    }

    pub fn validate_probe(&self) -> Result<(), ConfigError> {
        if self.network_probe_url.is_empty() {
            return Err(ConfigError::MissingValue { key: "NETWORK_PROBE_URL".to_string() });
        }
        Ok(())
    }

    /// Fails on the first missing endpoint
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_record_store()?;
        self.validate_probe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn configured() -> AppConfig {
        AppConfig {
            record_store_url: "http://localhost:8080/fhir".to_string(),
            record_store_api_key: "test-api-key".to_string(),
            record_store_auth_token: None,
            network_probe_url: "http://localhost:8081".to_string(),
        }
    }

    #[test]
    fn complete_config_validates() {
        assert!(configured().validate().is_ok());
        assert!(configured().is_record_store_configured());
    }

    #[test]
    fn missing_store_url_is_fatal() {
        let mut config = configured();
        config.record_store_url.clear();

        assert!(!config.is_record_store_configured());
        assert_matches!(
            config.validate(),
            Err(ConfigError::MissingValue { key }) if key == "RECORD_STORE_URL"
        );
    }

    #[test]
    fn store_and_link_endpoints_validate_independently() {
        let mut config = configured();
        config.network_probe_url.clear();

        assert!(config.validate_record_store().is_ok());
        assert_matches!(
            config.validate_probe(),
            Err(ConfigError::MissingValue { key }) if key == "NETWORK_PROBE_URL"
        );
        assert_matches!(config.validate(), Err(ConfigError::MissingValue { .. }));

        let mut config = configured();
        config.record_store_api_key.clear();
        assert!(config.validate_probe().is_ok());
        assert_matches!(
            config.validate_record_store(),
            Err(ConfigError::MissingValue { key }) if key == "RECORD_STORE_API_KEY"
        );
    }
}
