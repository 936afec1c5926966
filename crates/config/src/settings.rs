//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::ConfigError;

/// Runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub persistence: PersistenceSettings,

    #[serde(default)]
    pub crm: CrmSettings,

    #[serde(default)]
    pub domain: DomainPaths,
}

impl Settings {
    /// Load from an optional file plus `APP__`-prefixed environment variables.
    /// Environment wins over the file; both win over defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }

        let settings = builder
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins; empty = no browser origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

/// Language model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// API endpoint base
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    /// Environment variable holding the API key
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl LlmSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key_env: default_llm_api_key_env(),
            model: default_llm_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

/// Persistence settings. `enabled: false` selects the in-memory stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_scylla_hosts")]
    pub scylla_hosts: Vec<String>,
    #[serde(default = "default_keyspace")]
    pub keyspace: String,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u8,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            scylla_hosts: default_scylla_hosts(),
            keyspace: default_keyspace(),
            replication_factor: default_replication_factor(),
        }
    }
}

/// CRM client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmSettings {
    #[serde(default = "default_crm_base_url")]
    pub base_url: String,
    /// Environment variable holding the fallback bearer token
    #[serde(default = "default_crm_token_env")]
    pub default_token_env: String,
    #[serde(default = "default_crm_timeout_secs")]
    pub timeout_secs: u64,
}

impl CrmSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CrmSettings {
    fn default() -> Self {
        Self {
            base_url: default_crm_base_url(),
            default_token_env: default_crm_token_env(),
            timeout_secs: default_crm_timeout_secs(),
        }
    }
}

/// Paths to the domain data files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainPaths {
    #[serde(default = "default_locations_path")]
    pub locations: String,
    #[serde(default = "default_objections_path")]
    pub objections: String,
}

impl Default for DomainPaths {
    fn default() -> Self {
        Self {
            locations: default_locations_path(),
            objections: default_objections_path(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_llm_endpoint() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_llm_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_llm_model() -> String {
    "claude-3-5-haiku-20241022".to_string()
}

fn default_max_tokens() -> usize {
    1024
}

fn default_temperature() -> f32 {
    0.7
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_scylla_hosts() -> Vec<String> {
    vec!["127.0.0.1:9042".to_string()]
}

fn default_keyspace() -> String {
    "admissions_agent".to_string()
}

fn default_replication_factor() -> u8 {
    1
}

fn default_crm_base_url() -> String {
    "https://services.leadconnectorhq.com".to_string()
}

fn default_crm_token_env() -> String {
    "CRM_TOKEN_PUEBLA".to_string()
}

fn default_crm_timeout_secs() -> u64 {
    15
}

fn default_locations_path() -> String {
    "config/locations.yaml".to_string()
}

fn default_objections_path() -> String {
    "config/objections.yaml".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert!(!settings.persistence.enabled);
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.persistence.keyspace, "admissions_agent");
        assert!(settings.llm.endpoint.starts_with("https://"));
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let settings = Settings::load(None).expect("load");
        assert_eq!(settings.crm.base_url, default_crm_base_url());
    }
}
