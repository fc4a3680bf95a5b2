// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

// Platform Configuration Types
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) carrying:
// - security knobs (login strength floor, token TTL and size, secret key)
// - rate limiting of protection attempts
// - referrer handshake settings
// - soft-deletion grace periods
// - server, database and observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::token::{HashAlgorithm, DEFAULT_TOKEN_SIZE, MAX_TOKEN_SIZE};
use crate::domain::travel::MAX_TRIGGER_PASSWORDS;

pub const API_VERSION: &str = "spider/v1";
pub const KIND: &str = "PlatformConfig";

/// Top-level platform configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfigManifest {
    /// API version (must be "spider/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "PlatformConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: PlatformConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformConfigSpec {
    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub referrer: ReferrerConfig,

    #[serde(default)]
    pub deletion: DeletionConfig,

    #[serde(default)]
    pub travel: TravelConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Strength the login gate's protections must reach
    #[serde(default = "default_min_login_strength")]
    pub min_login_strength: u8,

    /// TTL of ephemeral tokens for new components
    #[serde(default = "default_token_ttl", with = "humantime_serde")]
    pub default_token_ttl: Duration,

    /// Random bytes per token (multiple of 3)
    #[serde(default = "default_token_size")]
    pub token_size: usize,

    #[serde(default = "default_token_retry_limit")]
    pub token_retry_limit: u32,

    /// Digest used for the referrer success hash
    #[serde(default = "default_hash_algorithm")]
    pub hash_algorithm: String,

    /// Key salting password hashes. Supports "env:VAR_NAME".
    #[serde(default = "default_secret_key")]
    pub secret_key: String,

    /// Sessions untouched for this long are dropped
    #[serde(default = "default_session_idle_timeout", with = "humantime_serde")]
    pub session_idle_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_attempts_per_minute")]
    pub attempts_per_minute: u32,

    #[serde(default = "default_burst")]
    pub burst: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferrerConfig {
    #[serde(default = "default_referrer_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Allow plain http referrers (loopback is always allowed)
    #[serde(default)]
    pub allow_insecure_http: bool,

    /// Failed handshakes per referrer host and hour before failing fast
    #[serde(default = "default_error_rate_per_hour")]
    pub error_rate_per_hour: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionConfig {
    #[serde(default = "default_grace", with = "humantime_serde")]
    pub component_grace: Duration,

    #[serde(default = "default_grace", with = "humantime_serde")]
    pub content_grace: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelConfig {
    #[serde(default = "default_max_trigger_passwords")]
    pub max_trigger_passwords: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL URL; in-memory storage when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus exporter port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
}

fn default_min_login_strength() -> u8 {
    2
}

fn default_token_ttl() -> Duration {
    Duration::from_secs(7 * 24 * 3600)
}

fn default_token_size() -> usize {
    DEFAULT_TOKEN_SIZE
}

fn default_token_retry_limit() -> u32 {
    1000
}

fn default_hash_algorithm() -> String {
    "sha256".to_string()
}

fn default_secret_key() -> String {
    "env:SPIDER_SECRET_KEY".to_string()
}

fn default_session_idle_timeout() -> Duration {
    Duration::from_secs(12 * 3600)
}

fn default_attempts_per_minute() -> u32 {
    10
}

fn default_burst() -> u32 {
    5
}

fn default_referrer_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_error_rate_per_hour() -> u32 {
    20
}

fn default_grace() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_max_trigger_passwords() -> usize {
    MAX_TRIGGER_PASSWORDS
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_connections() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            min_login_strength: default_min_login_strength(),
            default_token_ttl: default_token_ttl(),
            token_size: default_token_size(),
            token_retry_limit: default_token_retry_limit(),
            hash_algorithm: default_hash_algorithm(),
            secret_key: default_secret_key(),
            session_idle_timeout: default_session_idle_timeout(),
        }
    }
}

impl SecurityConfig {
    /// Resolve `secret_key`, following an `env:` indirection.
    pub fn resolve_secret_key(&self) -> anyhow::Result<String> {
        match self.secret_key.strip_prefix("env:") {
            Some(var) => std::env::var(var)
                .map_err(|_| anyhow::anyhow!("secret key environment variable '{}' is not set", var)),
            None => Ok(self.secret_key.clone()),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            attempts_per_minute: default_attempts_per_minute(),
            burst: default_burst(),
        }
    }
}

impl Default for ReferrerConfig {
    fn default() -> Self {
        Self {
            timeout: default_referrer_timeout(),
            allow_insecure_http: false,
            error_rate_per_hour: default_error_rate_per_hour(),
        }
    }
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            component_grace: default_grace(),
            content_grace: default_grace(),
        }
    }
}

impl Default for TravelConfig {
    fn default() -> Self {
        Self {
            max_trigger_passwords: default_max_trigger_passwords(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics_port: None,
        }
    }
}

impl Default for PlatformConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "spider".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: PlatformConfigSpec::default(),
        }
    }
}

impl PlatformConfigManifest {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. SPIDER_CONFIG_PATH environment variable
    /// 2. ./spider-config.yaml (working directory)
    /// 3. ~/.spider/config.yaml (user home)
    /// 4. /etc/spider/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("SPIDER_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./spider-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".spider").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/spider/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("SPIDER_DATABASE_URL") {
            tracing::info!("Environment override: SPIDER_DATABASE_URL");
            self.spec.database.url = Some(url);
        }

        if let Ok(key) = std::env::var("SPIDER_SECRET_KEY") {
            if !self.spec.security.secret_key.starts_with("env:") {
                tracing::info!("Environment override: SPIDER_SECRET_KEY");
                self.spec.security.secret_key = key;
            }
        }

        if let Ok(val) = std::env::var("SPIDER_MIN_LOGIN_STRENGTH") {
            match val.parse::<u8>() {
                Ok(strength) => {
                    tracing::info!("Environment override: SPIDER_MIN_LOGIN_STRENGTH={}", strength);
                    self.spec.security.min_login_strength = strength;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for SPIDER_MIN_LOGIN_STRENGTH: '{}'. Expected 0-4. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let security = &self.spec.security;
        if security.token_size == 0 || security.token_size % 3 != 0 {
            anyhow::bail!(
                "spec.security.token_size must be a positive multiple of 3, got {}",
                security.token_size
            );
        }
        if security.token_size > MAX_TOKEN_SIZE {
            anyhow::bail!(
                "spec.security.token_size must not exceed {}, got {}",
                MAX_TOKEN_SIZE,
                security.token_size
            );
        }
        if security.min_login_strength > 4 {
            anyhow::bail!(
                "spec.security.min_login_strength must be between 0 and 4, got {}",
                security.min_login_strength
            );
        }
        if security.default_token_ttl.is_zero() {
            anyhow::bail!("spec.security.default_token_ttl cannot be zero");
        }
        if security.token_retry_limit == 0 {
            anyhow::bail!("spec.security.token_retry_limit cannot be zero");
        }
        if HashAlgorithm::parse(&security.hash_algorithm).is_none() {
            anyhow::bail!("Unsupported hash_algorithm: '{}'", security.hash_algorithm);
        }

        if self.spec.rate_limit.attempts_per_minute == 0 {
            anyhow::bail!("spec.rate_limit.attempts_per_minute cannot be zero");
        }

        if self.spec.referrer.timeout.is_zero() {
            anyhow::bail!("spec.referrer.timeout cannot be zero");
        }

        if self.spec.travel.max_trigger_passwords > MAX_TRIGGER_PASSWORDS {
            anyhow::bail!(
                "spec.travel.max_trigger_passwords must not exceed {}",
                MAX_TRIGGER_PASSWORDS
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest_is_valid() {
        let manifest = PlatformConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, KIND);
        assert_eq!(manifest.spec.security.token_size, 30);
        assert_eq!(manifest.spec.security.min_login_strength, 2);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_with_humantime_durations() {
        let yaml = r#"
apiVersion: spider/v1
kind: PlatformConfig
metadata:
  name: test
spec:
  security:
    default_token_ttl: 2h
    token_size: 45
    secret_key: plain-secret
  referrer:
    timeout: 3s
  database:
    url: postgres://localhost/spider
"#;
        let manifest = PlatformConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.spec.security.default_token_ttl, Duration::from_secs(7200));
        assert_eq!(manifest.spec.security.token_size, 45);
        assert_eq!(manifest.spec.referrer.timeout, Duration::from_secs(3));
        assert_eq!(manifest.spec.rate_limit.attempts_per_minute, 10);
        assert_eq!(manifest.spec.security.resolve_secret_key().unwrap(), "plain-secret");
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_token_size() {
        let mut manifest = PlatformConfigManifest::default();
        manifest.spec.security.token_size = 31;
        assert!(manifest.validate().is_err());
        manifest.spec.security.token_size = 93;
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_login_strength_and_ttl() {
        let mut manifest = PlatformConfigManifest::default();
        manifest.spec.security.min_login_strength = 5;
        assert!(manifest.validate().is_err());

        let mut manifest = PlatformConfigManifest::default();
        manifest.spec.security.default_token_ttl = Duration::ZERO;
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let mut manifest = PlatformConfigManifest::default();
        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
    }
}
