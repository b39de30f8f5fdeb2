//! Layered settings for the token manager.
//!
//! Sources, later ones winning:
//! - Built-in defaults
//! - TOML file (`RAS_OAUTH2_CONFIG_FILE`, default `oauth2.toml`) if present
//! - Environment variables with the `RAS_OAUTH2` prefix, `__` separated
//!   (e.g. `RAS_OAUTH2__HTTP_TIMEOUT_SECONDS=10`)

use crate::config::OAuth2Config;
use crate::error::{OAuth2Error, OAuth2Result};
use crate::pkce::PkceMethod;
use crate::presets::{ClientRegistration, config_from_preset};
use ::config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const CONFIG_FILE_VAR: &str = "RAS_OAUTH2_CONFIG_FILE";
const DEFAULT_CONFIG_FILE: &str = "oauth2.toml";
const ENV_PREFIX: &str = "RAS_OAUTH2";

fn default_timeout_seconds() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Per-request timeout of the HTTP client (default: 30)
    #[serde(default = "default_timeout_seconds")]
    pub http_timeout_seconds: u64,

    /// Timeout callers should pass for code exchange and refresh (default: 30)
    #[serde(default = "default_timeout_seconds")]
    pub exchange_timeout_seconds: u64,

    /// Directory for persisted tokens; in-memory storage when unset
    pub token_dir: Option<PathBuf>,

    pub providers: Vec<ProviderSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            http_timeout_seconds: default_timeout_seconds(),
            exchange_timeout_seconds: default_timeout_seconds(),
            token_dir: None,
            providers: Vec::new(),
        }
    }
}

/// One provider entry: either a `preset` plus client registration, or a
/// fully custom server with explicit endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Overrides the preset name; required for custom servers
    pub name: Option<String>,
    pub preset: Option<String>,

    pub client_id: String,
    pub client_secret: Option<String>,
    pub scopes: Option<Vec<String>>,
    pub redirect_uri: Option<String>,
    pub tenant: Option<String>,
    pub resource: Option<String>,

    pub authorization_url: Option<String>,
    pub token_url: Option<String>,
    pub revoke_url: Option<String>,
    pub userinfo_url: Option<String>,
    pub use_pkce: Option<bool>,
    pub pkce_method: Option<PkceMethod>,
}

impl ProviderSettings {
    fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.preset.as_deref())
            .unwrap_or("<unnamed>")
    }

    pub fn to_config(&self) -> OAuth2Result<OAuth2Config> {
        let mut config = match &self.preset {
            Some(preset) => config_from_preset(
                preset,
                ClientRegistration {
                    client_id: self.client_id.clone(),
                    client_secret: self.client_secret.clone(),
                    scopes: self.scopes.clone(),
                    redirect_uri: self.redirect_uri.clone(),
                    tenant: self.tenant.clone(),
                    resource: self.resource.clone(),
                },
            )?,
            None => self.custom_config()?,
        };

        if let Some(name) = &self.name {
            config.provider_name = name.clone();
        }
        if let Some(url) = &self.authorization_url {
            config.authorization_url = url.clone();
        }
        if let Some(url) = &self.token_url {
            config.token_url = url.clone();
        }
        if self.revoke_url.is_some() {
            config.revoke_url = self.revoke_url.clone();
        }
        if self.userinfo_url.is_some() {
            config.userinfo_url = self.userinfo_url.clone();
        }
        if let Some(use_pkce) = self.use_pkce {
            config.use_pkce = use_pkce;
        }
        if let Some(method) = self.pkce_method {
            config.pkce_method = method;
        }

        config.validate()?;
        Ok(config)
    }

    fn custom_config(&self) -> OAuth2Result<OAuth2Config> {
        let missing = |field: &str| {
            OAuth2Error::ConfigError(format!(
                "custom provider '{}' requires {}",
                self.display_name(),
                field
            ))
        };

        let name = self.name.clone().ok_or_else(|| missing("name"))?;
        let authorization_url = self
            .authorization_url
            .clone()
            .ok_or_else(|| missing("authorization_url"))?;
        let token_url = self.token_url.clone().ok_or_else(|| missing("token_url"))?;

        let mut config = OAuth2Config::builder()
            .provider_name(name)
            .authorization_url(authorization_url)
            .token_url(token_url)
            .client_id(self.client_id.clone())
            .maybe_client_secret(self.client_secret.clone())
            .scopes(self.scopes.clone().unwrap_or_default())
            .maybe_resource(self.resource.clone())
            .build();
        if let Some(redirect_uri) = &self.redirect_uri {
            config.redirect_uri = redirect_uri.clone();
        }
        Ok(config)
    }
}

impl Settings {
    /// Load settings from the environment and the optional config file
    pub fn load() -> OAuth2Result<Self> {
        let path = std::env::var(CONFIG_FILE_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load settings with `path` as the config file; a missing file is not an error.
    pub fn load_from(path: &Path) -> OAuth2Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if path.exists() {
            info!("Loading OAuth2 settings from {}", path.display());
            builder = builder.add_source(File::from(path));
        } else {
            debug!("No settings file at {}, using defaults", path.display());
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> OAuth2Result<()> {
        if self.http_timeout_seconds == 0 || self.exchange_timeout_seconds == 0 {
            return Err(OAuth2Error::ConfigError(
                "timeouts must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            let name = provider.display_name().to_ascii_lowercase();
            if !seen.insert(name.clone()) {
                return Err(OAuth2Error::ConfigError(format!(
                    "provider '{name}' is configured more than once"
                )));
            }
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_seconds)
    }
}
