//! Serializable ETL configuration.
//!
//! ```toml
//! input_dir = "dados/entrada"
//! output_dir = "dados/saida"
//! create_dirs = true
//!
//! [source]
//! url_template = "https://bvmf.bmfbovespa.com.br/InstDados/SerHist/COTAHIST_D{%d%m%Y}.ZIP"
//! lookback_days = 30
//! skip_weekends = true
//! ```

use crate::error::ConfigError;
use crate::http::{render_url, HttpSettings};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const B3_DAILY_URL_TEMPLATE: &str =
    "https://bvmf.bmfbovespa.com.br/InstDados/SerHist/COTAHIST_D{%d%m%Y}.ZIP";
pub const B3_LISTING_URL: &str =
    "https://www.b3.com.br/pt_br/market-data-e-indices/servicos-de-dados/market-data/historico/mercado-a-vista/cotacoes-historicas/";

/// Longest accepted lookback window, in calendar days (about ten years).
pub const MAX_LOOKBACK_DAYS: u32 = 3650;

/// Construction parameters for an ETL instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EtlConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Create missing input/output directories on construction.
    pub create_dirs: bool,
    pub source: SourceConfig,
}

/// Adapter-specific source settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    /// Date-addressed URL; the `{...}` part is a chrono format.
    pub url_template: String,
    /// Listing page scraped by the discovery adapter.
    pub listing_url: String,
    /// Calendar days, today included, that reconciliation looks back over.
    pub lookback_days: u32,
    /// Do not request Saturdays and Sundays (daily adapter only).
    pub skip_weekends: bool,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("dados/entrada"),
            output_dir: PathBuf::from("dados/saida"),
            create_dirs: true,
            source: SourceConfig::default(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        let http = HttpSettings::default();
        Self {
            url_template: B3_DAILY_URL_TEMPLATE.to_string(),
            listing_url: B3_LISTING_URL.to_string(),
            lookback_days: 30,
            skip_weekends: true,
            timeout_secs: http.timeout.as_secs(),
            user_agent: http.user_agent,
        }
    }
}

impl EtlConfig {
    /// Load a config from a TOML file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.lookback_days == 0 {
            return Err(ConfigError::Invalid("source.lookback_days must be at least 1".into()));
        }
        if self.source.lookback_days > MAX_LOOKBACK_DAYS {
            return Err(ConfigError::Invalid(format!(
                "source.lookback_days must be at most {MAX_LOOKBACK_DAYS}, got {}",
                self.source.lookback_days
            )));
        }
        if self.source.timeout_secs == 0 {
            return Err(ConfigError::Invalid("source.timeout_secs must be at least 1".into()));
        }
        if render_url(&self.source.url_template, NaiveDate::MIN).is_none() {
            return Err(ConfigError::Invalid(format!(
                "source.url_template has no valid {{date format}} placeholder: {}",
                self.source.url_template
            )));
        }
        Ok(())
    }
}

impl SourceConfig {
    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            user_agent: self.user_agent.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EtlConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config = EtlConfig::from_toml_str(
            r#"
            input_dir = "/data/b3/raw"

            [source]
            lookback_days = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.input_dir, PathBuf::from("/data/b3/raw"));
        assert_eq!(config.output_dir, PathBuf::from("dados/saida"));
        assert_eq!(config.source.lookback_days, 10);
        assert_eq!(config.source.url_template, B3_DAILY_URL_TEMPLATE);
        assert!(config.source.skip_weekends);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            EtlConfig::from_toml_str("[source]\nlookback_days = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EtlConfig::from_toml_str("[source]\nurl_template = \"https://example.com/a.zip\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EtlConfig::from_toml_str("[source]\nlookback_days = 4000000000"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EtlConfig::from_toml_str("[source]\nurl_template = \"https://example.com/COTAHIST_D{%Q}.ZIP\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(EtlConfig::from_toml_str(&format!("[source]\nlookback_days = {MAX_LOOKBACK_DAYS}")).is_ok());
        assert!(matches!(
            EtlConfig::from_toml_str("input_dir = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn http_settings_follow_config() {
        let mut config = EtlConfig::default();
        config.source.timeout_secs = 5;
        assert_eq!(config.source.http_settings().timeout, Duration::from_secs(5));
    }
}
