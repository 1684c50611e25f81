// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for STIGQter

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Where the NIST and DISA reference data is fetched from
    #[serde(default)]
    pub sources: SourceConfig,

    /// eMASS report settings
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

/// Reference data locations. Anything that is not an `http(s)://` URL is
/// read from the local filesystem.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourceConfig {
    /// NIST 800-53 rev 4 family listing (HTML)
    #[serde(default = "default_families_url")]
    pub families_url: String,
    /// NIST 800-53 rev 4 controls feed (XML)
    #[serde(default = "default_controls_url")]
    pub controls_url: String,
    /// DISA CCI list (zip)
    #[serde(default = "default_cci_list_url")]
    pub cci_list_url: String,
    /// DISA SRG/STIG library: either the zip itself or the compilations
    /// page linking to it
    #[serde(default = "default_stig_library_url")]
    pub stig_library_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReportConfig {
    /// Name recorded as "Tested By"; falls back to the login name
    #[serde(default)]
    pub tested_by: Option<String>,
    /// chrono format of "Date Tested"
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

// Default value functions
fn default_db_path() -> String { "STIGQter.db".to_string() }
fn default_families_url() -> String {
    "https://nvd.nist.gov/800-53/Rev4".to_string()
}
fn default_controls_url() -> String {
    "https://nvd.nist.gov/static/feeds/xml/sp80053/rev4/800-53-controls.xml".to_string()
}
fn default_cci_list_url() -> String {
    "https://dl.dod.cyber.mil/wp-content/uploads/stigs/zip/u_cci_list.zip".to_string()
}
fn default_stig_library_url() -> String {
    "https://public.cyber.mil/stigs/compilations/".to_string()
}
fn default_user_agent() -> String { format!("STIGQter/{}", env!("CARGO_PKG_VERSION")) }
fn default_timeout() -> u64 { 120 }
fn default_retries() -> u32 { 3 }
fn default_date_format() -> String { "%d-%b-%Y".to_string() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            families_url: default_families_url(),
            controls_url: default_controls_url(),
            cci_list_url: default_cci_list_url(),
            stig_library_url: default_stig_library_url(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout(),
            retries: default_retries(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            tested_by: None,
            date_format: default_date_format(),
        }
    }
}

impl ReportConfig {
    /// The configured tester, else `$USER`, else `$USERNAME`, else `UNKNOWN`
    pub fn tester(&self) -> String {
        self.tested_by
            .clone()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("USERNAME").ok())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "UNKNOWN".to_string())
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::StigqterError::Config(format!("Failed to parse config: {}", e)))?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings that cannot work
    pub fn validate(&self) -> crate::Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(crate::StigqterError::Config("database.path is empty".to_string()));
        }
        for (name, source) in [
            ("families_url", &self.sources.families_url),
            ("controls_url", &self.sources.controls_url),
            ("cci_list_url", &self.sources.cci_list_url),
            ("stig_library_url", &self.sources.stig_library_url),
        ] {
            if source.trim().is_empty() {
                return Err(crate::StigqterError::Config(format!("sources.{} is empty", name)));
            }
        }
        if self.sources.timeout_secs == 0 {
            return Err(crate::StigqterError::Config("sources.timeout_secs must be positive".to_string()));
        }
        if chrono::format::StrftimeItems::new(&self.report.date_format)
            .any(|item| matches!(item, chrono::format::Item::Error))
        {
            return Err(crate::StigqterError::Config(format!(
                "report.date_format \"{}\" is not a valid date format",
                self.report.date_format
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"database": {"path": "/tmp/x.db"}}"#).unwrap();
        assert_eq!(config.database.path, "/tmp/x.db");
        assert_eq!(config.sources.retries, 3);
        assert_eq!(config.report.date_format, "%d-%b-%Y");
        assert!(config.sources.user_agent.starts_with("STIGQter/"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stigqter.json");
        let mut config = AppConfig::default();
        config.report.tested_by = Some("ISSO".to_string());
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.report.tester(), "ISSO");
        assert_eq!(loaded.database.path, "STIGQter.db");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.json")).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.sources.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.report.date_format = "%Q".to_string();
        assert!(config.validate().is_err());
    }
}
