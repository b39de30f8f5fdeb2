//! Endpoint presets for well-known authorization servers.
//!
//! Presets are plain data; [`config_from_preset`] fills a client registration
//! into one of them to produce an [`OAuth2Config`].

use crate::config::{DEFAULT_REDIRECT_URI, OAuth2Config};
use crate::error::{OAuth2Error, OAuth2Result};
use serde::{Deserialize, Serialize};

const TENANT_PLACEHOLDER: &str = "{tenant}";
const DEFAULT_TENANT: &str = "common";

/// When a preset sends PKCE parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkcePolicy {
    Always,
    /// Only when the client has no secret
    PublicClientOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub authorization_url: &'static str,
    pub token_url: &'static str,
    pub revoke_url: Option<&'static str>,
    pub userinfo_url: Option<&'static str>,
    pub default_scopes: &'static [&'static str],
    pub pkce: PkcePolicy,
    pub extra_auth_params: &'static [(&'static str, &'static str)],
}

pub static PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "github",
        authorization_url: "https://github.com/login/oauth/authorize",
        token_url: "https://github.com/login/oauth/access_token",
        revoke_url: None,
        userinfo_url: Some("https://api.github.com/user"),
        default_scopes: &["read:user"],
        pkce: PkcePolicy::PublicClientOnly,
        extra_auth_params: &[],
    },
    ProviderPreset {
        name: "google",
        authorization_url: "https://accounts.google.com/o/oauth2/v2/auth",
        token_url: "https://oauth2.googleapis.com/token",
        revoke_url: Some("https://oauth2.googleapis.com/revoke"),
        userinfo_url: Some("https://openidconnect.googleapis.com/v1/userinfo"),
        default_scopes: &["openid", "profile", "email"],
        pkce: PkcePolicy::Always,
        extra_auth_params: &[("access_type", "offline"), ("prompt", "consent")],
    },
    ProviderPreset {
        name: "azure",
        authorization_url: "https://login.microsoftonline.com/{tenant}/oauth2/v2.0/authorize",
        token_url: "https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token",
        revoke_url: None,
        userinfo_url: Some("https://graph.microsoft.com/v1.0/me"),
        default_scopes: &["openid", "profile", "email", "offline_access"],
        pkce: PkcePolicy::Always,
        extra_auth_params: &[],
    },
];

/// Client-side values an operator supplies for a preset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientRegistration {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Replaces the preset's default scopes when set
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// Azure AD tenant (`common`, `organizations`, `consumers` or a tenant id)
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
}

impl ClientRegistration {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }
}

/// Look up a preset by name, ignoring case
pub fn preset(name: &str) -> Option<&'static ProviderPreset> {
    PRESETS.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

pub fn preset_names() -> impl Iterator<Item = &'static str> {
    PRESETS.iter().map(|p| p.name)
}

/// Fill `registration` into the named preset.
pub fn config_from_preset(name: &str, registration: ClientRegistration) -> OAuth2Result<OAuth2Config> {
    let preset = preset(name).ok_or_else(|| {
        let available: Vec<_> = preset_names().collect();
        OAuth2Error::ConfigError(format!(
            "Unknown OAuth2 provider: {}. Available: {}",
            name,
            available.join(", ")
        ))
    })?;

    let tenant = registration.tenant.as_deref().unwrap_or(DEFAULT_TENANT);
    let fill = |url: &str| url.replace(TENANT_PLACEHOLDER, tenant);

    let client_secret = registration.client_secret.filter(|s| !s.is_empty());
    let use_pkce = match preset.pkce {
        PkcePolicy::Always => true,
        PkcePolicy::PublicClientOnly => client_secret.is_none(),
    };

    let scopes = registration
        .scopes
        .unwrap_or_else(|| preset.default_scopes.iter().map(|s| s.to_string()).collect());

    let config = OAuth2Config::builder()
        .provider_name(preset.name)
        .authorization_url(fill(preset.authorization_url))
        .token_url(fill(preset.token_url))
        .maybe_revoke_url(preset.revoke_url.map(fill))
        .maybe_userinfo_url(preset.userinfo_url.map(fill))
        .client_id(registration.client_id)
        .maybe_client_secret(client_secret)
        .scopes(scopes)
        .redirect_uri(
            registration
                .redirect_uri
                .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string()),
        )
        .use_pkce(use_pkce)
        .maybe_resource(registration.resource)
        .extra_auth_params(
            preset
                .extra_auth_params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
        .build();

    Ok(config)
}
