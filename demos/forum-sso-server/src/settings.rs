//! Configuration for the forum SSO demo server
//!
//! Values are layered from:
//! - Defaults
//! - A TOML configuration file (config.toml unless given on the command line)
//! - Environment variables with the SSO prefix, e.g. `SSO__SERVER__PORT`
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File};
use forum_identity_oauth2::{ProviderConfig, RequestOverrides, SsoConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, info};
use url::Url;

/// Upper bound for `sso.stash_ttl_seconds` (one day)
const MAX_STASH_TTL_SECONDS: u64 = 86_400;

/// Main configuration struct for the demo server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server configuration
    pub server: ServerSettings,

    /// Flow-wide SSO settings (timeouts, stash TTL, diagnostics)
    pub sso: SsoConfig,

    /// Identity providers
    pub providers: Vec<ProviderSettings>,

    /// Users created on startup
    pub users: Vec<SeedUser>,
}

/// Server network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to bind to (default: 127.0.0.1)
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to bind to (default: 3000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Public base URL that callback URLs are built from
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

/// One provider record plus its integration overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(flatten)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub overrides: RequestOverrides,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedUser {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

// Default value functions
fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_port() -> u16 {
    3000
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: default_base_url(),
        }
    }
}

impl Settings {
    /// Load configuration from an optional config file and the environment
    pub fn load(config_path: &Path) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if config_path.exists() {
            info!("Loading configuration from {}", config_path.display());
            builder = builder.add_source(File::from(config_path));
        } else {
            debug!(
                "No config file found at {}, using defaults",
                config_path.display()
            );
        }

        builder = builder.add_source(
            Environment::with_prefix("SSO")
                .separator("__") // SSO__SERVER__PORT
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let settings: Settings = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        let base_url = Url::parse(&self.server.base_url)
            .with_context(|| format!("Invalid base URL '{}'", self.server.base_url))?;
        if base_url.host_str().is_none() {
            anyhow::bail!("Base URL '{}' has no host", self.server.base_url);
        }

        if self.sso.connect_timeout_seconds == 0 || self.sso.http_timeout_seconds == 0 {
            anyhow::bail!("SSO timeouts must be greater than 0");
        }

        if !(1..=MAX_STASH_TTL_SECONDS).contains(&self.sso.stash_ttl_seconds) {
            anyhow::bail!(
                "SSO stash TTL must be between 1 and {} seconds, got {}",
                MAX_STASH_TTL_SECONDS,
                self.sso.stash_ttl_seconds
            );
        }

        let mut keys = HashSet::new();
        for settings in &self.providers {
            let provider = &settings.provider;
            if !keys.insert(provider.key.as_str()) {
                anyhow::bail!("Provider '{}' is configured more than once", provider.key);
            }
            // Records without credentials are allowed and show up as unconfigured
            if provider.is_configured() {
                provider
                    .validate()
                    .with_context(|| format!("Invalid provider '{}'", provider.key))?;
            }
        }

        let defaults = self
            .providers
            .iter()
            .filter(|settings| settings.provider.is_default)
            .count();
        if defaults > 1 {
            anyhow::bail!("At most one provider can be the default, found {}", defaults);
        }

        Ok(())
    }
}
