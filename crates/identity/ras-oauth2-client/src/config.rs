//! OAuth2 provider configuration and request builders.
//!
//! An [`OAuth2Config`] describes one authorization server. Building requests
//! from it never performs I/O: the builders are pure transformations from the
//! config plus per-attempt inputs to a URL or a form body.

use crate::error::{OAuth2Error, OAuth2Result};
use crate::flow::OAuth2Flow;
use crate::pkce::{PkceCodeVerifier, PkceMethod};
use crate::types::{FormParams, TokenRequest};
use bon::Builder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;
use url::Url;

pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/callback";

fn default_redirect_uri() -> String {
    DEFAULT_REDIRECT_URI.to_string()
}

fn default_true() -> bool {
    true
}

/// OAuth2 configuration for a single authorization server
#[derive(Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct OAuth2Config {
    pub provider_name: String,
    pub authorization_url: String,
    pub token_url: String,
    #[serde(default)]
    pub revoke_url: Option<String>,
    #[serde(default)]
    pub userinfo_url: Option<String>,

    /// May be empty for some flows
    #[serde(default)]
    #[builder(default)]
    pub client_id: String,
    /// Present only for confidential clients
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Joined with single spaces when sent
    #[serde(default)]
    #[builder(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_redirect_uri")]
    #[builder(default = default_redirect_uri())]
    pub redirect_uri: String,

    #[serde(default = "default_true")]
    #[builder(default = true)]
    pub use_pkce: bool,
    #[serde(default)]
    #[builder(default)]
    pub pkce_method: PkceMethod,

    /// RFC 8707 resource indicator
    #[serde(default)]
    pub resource: Option<String>,

    #[serde(default)]
    #[builder(default)]
    pub flow: OAuth2Flow,

    #[serde(default)]
    #[builder(default)]
    pub extra_auth_params: BTreeMap<String, String>,
    #[serde(default)]
    #[builder(default)]
    pub extra_token_params: BTreeMap<String, String>,
}

impl OAuth2Config {
    /// Client secret, treating an empty string as absent.
    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref().filter(|s| !s.is_empty())
    }

    pub fn is_public_client(&self) -> bool {
        self.client_secret().is_none()
    }

    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }

    pub fn validate(&self) -> OAuth2Result<()> {
        if self.provider_name.trim().is_empty() {
            return Err(OAuth2Error::ConfigError(
                "provider_name must not be empty".to_string(),
            ));
        }
        for (field, value) in [
            ("authorization_url", &self.authorization_url),
            ("token_url", &self.token_url),
        ] {
            Url::parse(value).map_err(|e| {
                OAuth2Error::ConfigError(format!(
                    "{} for provider '{}' is not a valid URL: {}",
                    field, self.provider_name, e
                ))
            })?;
        }
        if let Some(revoke_url) = &self.revoke_url {
            Url::parse(revoke_url)?;
        }
        Ok(())
    }

    /// Build the authorization endpoint URL the user's browser is sent to.
    ///
    /// `state` is transported as given; generating and binding it to the
    /// pending exchange is the caller's job.
    pub fn build_authorization_request(
        &self,
        state: &str,
        pkce: Option<&PkceCodeVerifier>,
    ) -> OAuth2Result<Url> {
        let mut params = FormParams::new();
        params.set("client_id", self.client_id.as_str());
        params.set("redirect_uri", self.redirect_uri.as_str());
        params.set("response_type", "code");
        params.set("state", state);

        if !self.scopes.is_empty() {
            params.set("scope", self.scope_string());
        }

        if self.use_pkce {
            if let Some(pkce) = pkce {
                params.set("code_challenge", pkce.challenge.as_str());
                params.set("code_challenge_method", pkce.method.as_str());
            }
        }

        if let Some(resource) = &self.resource {
            params.set("resource", resource.as_str());
        }

        params.extend(&self.extra_auth_params);

        let mut url = Url::parse(&self.authorization_url)?;
        url.query_pairs_mut().extend_pairs(params.iter());

        debug!(
            "Built authorization URL for provider {}",
            self.provider_name
        );
        Ok(url)
    }

    /// Form body exchanging an authorization code for tokens.
    pub fn build_token_exchange_request(&self, code: &str, verifier: Option<&str>) -> TokenRequest {
        let mut params = FormParams::new();
        params.set("grant_type", "authorization_code");
        params.set("client_id", self.client_id.as_str());
        params.set("redirect_uri", self.redirect_uri.as_str());
        params.set("code", code);

        if let Some(secret) = self.client_secret() {
            params.set("client_secret", secret);
        }

        if self.use_pkce {
            if let Some(verifier) = verifier {
                params.set("code_verifier", verifier);
            }
        }

        if let Some(resource) = &self.resource {
            params.set("resource", resource.as_str());
        }

        params.extend(&self.extra_token_params);

        TokenRequest {
            url: self.token_url.clone(),
            params,
        }
    }

    /// Form body for a refresh. Never carries PKCE material.
    pub fn build_refresh_request(&self, refresh_token: &str) -> TokenRequest {
        let mut params = FormParams::new();
        params.set("grant_type", "refresh_token");
        params.set("client_id", self.client_id.as_str());
        params.set("refresh_token", refresh_token);

        if let Some(secret) = self.client_secret() {
            params.set("client_secret", secret);
        }

        if let Some(resource) = &self.resource {
            params.set("resource", resource.as_str());
        }

        TokenRequest {
            url: self.token_url.clone(),
            params,
        }
    }

    /// RFC 7009 revocation body, or `None` when the provider has no revoke endpoint.
    pub fn build_revocation_request(&self, token: &str, hint: &str) -> Option<TokenRequest> {
        let url = self.revoke_url.as_ref()?;

        let mut params = FormParams::new();
        params.set("token", token);
        params.set("token_type_hint", hint);
        params.set("client_id", self.client_id.as_str());
        if let Some(secret) = self.client_secret() {
            params.set("client_secret", secret);
        }

        Some(TokenRequest {
            url: url.clone(),
            params,
        })
    }
}

impl fmt::Debug for OAuth2Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Config")
            .field("provider_name", &self.provider_name)
            .field("authorization_url", &self.authorization_url)
            .field("token_url", &self.token_url)
            .field("revoke_url", &self.revoke_url)
            .field("client_id", &self.client_id)
            .field("client_secret_set", &self.client_secret().is_some())
            .field("scopes", &self.scopes)
            .field("redirect_uri", &self.redirect_uri)
            .field("use_pkce", &self.use_pkce)
            .field("pkce_method", &self.pkce_method)
            .field("resource", &self.resource)
            .field("flow", &self.flow)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_config() -> OAuth2Config {
        OAuth2Config::builder()
            .provider_name("test")
            .authorization_url("https://auth.example.com/authorize")
            .token_url("https://auth.example.com/token")
            .client_id("test_client_id")
            .scopes(vec!["read".to_string(), "write".to_string()])
            .build()
    }

    fn query(url: &Url) -> HashMap<String, String> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn test_builder_defaults() {
        let config = test_config();
        assert_eq!(config.redirect_uri, DEFAULT_REDIRECT_URI);
        assert!(config.use_pkce);
        assert_eq!(config.pkce_method, PkceMethod::S256);
        assert_eq!(config.flow, OAuth2Flow::AuthorizationCode);
        assert!(config.client_secret.is_none());
        assert!(config.is_public_client());
    }

    #[test]
    fn test_authorization_url_basic() {
        let config = test_config();
        let url = config.build_authorization_request("state123", None).unwrap();
        assert_eq!(url.host_str(), Some("auth.example.com"));
        assert_eq!(url.path(), "/authorize");

        let params = query(&url);
        assert_eq!(params["client_id"], "test_client_id");
        assert_eq!(params["redirect_uri"], DEFAULT_REDIRECT_URI);
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["state"], "state123");
        assert_eq!(params["scope"], "read write");
        assert!(!params.contains_key("code_challenge"));
        assert!(!params.contains_key("resource"));
    }

    #[test]
    fn test_authorization_url_omits_empty_scope() {
        let mut config = test_config();
        config.scopes.clear();
        let url = config.build_authorization_request("s", None).unwrap();
        assert!(!query(&url).contains_key("scope"));
    }

    #[test]
    fn test_authorization_url_with_pkce() {
        let config = test_config();
        let pkce = PkceCodeVerifier::generate(64, PkceMethod::S256).unwrap();
        let url = config
            .build_authorization_request("state123", Some(&pkce))
            .unwrap();

        let params = query(&url);
        assert_eq!(params["code_challenge"], pkce.challenge);
        assert_eq!(params["code_challenge_method"], "S256");
        assert!(!url.as_str().contains(&pkce.verifier));
    }

    #[test]
    fn test_authorization_url_pkce_disabled() {
        let mut config = test_config();
        config.use_pkce = false;
        let pkce = PkceCodeVerifier::generate(64, PkceMethod::S256).unwrap();
        let url = config
            .build_authorization_request("state123", Some(&pkce))
            .unwrap();

        let params = query(&url);
        assert!(!params.contains_key("code_challenge"));
        assert!(!params.contains_key("code_challenge_method"));
    }

    #[test]
    fn test_authorization_url_with_resource_and_overrides() {
        let mut config = test_config();
        config.resource = Some("https://api.example.com".to_string());
        config
            .extra_auth_params
            .insert("prompt".to_string(), "consent".to_string());
        config
            .extra_auth_params
            .insert("response_type".to_string(), "code id_token".to_string());

        let url = config.build_authorization_request("s", None).unwrap();
        let params = query(&url);
        assert_eq!(params["resource"], "https://api.example.com");
        assert_eq!(params["prompt"], "consent");
        assert_eq!(params["response_type"], "code id_token");
        assert_eq!(
            url.query_pairs().filter(|(k, _)| k == "response_type").count(),
            1
        );
    }

    #[test]
    fn test_authorization_url_keeps_existing_query() {
        let mut config = test_config();
        config.authorization_url = "https://auth.example.com/authorize?tenant=acme".to_string();
        let url = config.build_authorization_request("s", None).unwrap();
        assert_eq!(query(&url)["tenant"], "acme");
    }

    #[test]
    fn test_token_exchange_public_client() {
        let config = test_config();
        let request = config.build_token_exchange_request("auth_code", Some("verifier"));

        assert_eq!(request.url, "https://auth.example.com/token");
        assert_eq!(request.params.get("grant_type"), Some("authorization_code"));
        assert_eq!(request.params.get("client_id"), Some("test_client_id"));
        assert_eq!(request.params.get("redirect_uri"), Some(DEFAULT_REDIRECT_URI));
        assert_eq!(request.params.get("code"), Some("auth_code"));
        assert_eq!(request.params.get("code_verifier"), Some("verifier"));
        assert!(!request.params.contains_key("client_secret"));
    }

    #[test]
    fn test_token_exchange_confidential_client() {
        let mut config = test_config();
        config.client_secret = Some("s3cret".to_string());
        config.use_pkce = false;
        let request = config.build_token_exchange_request("auth_code", Some("verifier"));

        assert_eq!(request.params.get("client_secret"), Some("s3cret"));
        assert!(!request.params.contains_key("code_verifier"));
    }

    #[test]
    fn test_empty_client_secret_is_absent() {
        let mut config = test_config();
        config.client_secret = Some(String::new());
        let request = config.build_token_exchange_request("code", None);
        assert!(!request.params.contains_key("client_secret"));
        assert!(config.is_public_client());
    }

    #[test]
    fn test_token_exchange_extra_params_override() {
        let mut config = test_config();
        config.resource = Some("https://api.example.com".to_string());
        config
            .extra_token_params
            .insert("redirect_uri".to_string(), "urn:ietf:wg:oauth:2.0:oob".to_string());
        let request = config.build_token_exchange_request("code", None);

        assert_eq!(request.params.get("resource"), Some("https://api.example.com"));
        assert_eq!(
            request.params.get("redirect_uri"),
            Some("urn:ietf:wg:oauth:2.0:oob")
        );
    }

    #[test]
    fn test_refresh_request() {
        let mut config = test_config();
        config.client_secret = Some("s3cret".to_string());
        config.resource = Some("https://api.example.com".to_string());
        config
            .extra_token_params
            .insert("audience".to_string(), "x".to_string());
        let request = config.build_refresh_request("refresh123");

        assert_eq!(request.params.get("grant_type"), Some("refresh_token"));
        assert_eq!(request.params.get("client_id"), Some("test_client_id"));
        assert_eq!(request.params.get("refresh_token"), Some("refresh123"));
        assert_eq!(request.params.get("client_secret"), Some("s3cret"));
        assert_eq!(request.params.get("resource"), Some("https://api.example.com"));
        assert!(!request.params.contains_key("code_verifier"));
        assert!(!request.params.contains_key("redirect_uri"));
        assert!(!request.params.contains_key("audience"));
    }

    #[test]
    fn test_revocation_request() {
        let mut config = test_config();
        assert!(config.build_revocation_request("tok", "access_token").is_none());

        config.revoke_url = Some("https://auth.example.com/revoke".to_string());
        let request = config
            .build_revocation_request("tok", "refresh_token")
            .unwrap();
        assert_eq!(request.url, "https://auth.example.com/revoke");
        assert_eq!(request.params.get("token"), Some("tok"));
        assert_eq!(request.params.get("token_type_hint"), Some("refresh_token"));
    }

    #[test]
    fn test_validate() {
        assert!(test_config().validate().is_ok());

        let mut bad = test_config();
        bad.token_url = "not a url".to_string();
        assert!(matches!(bad.validate(), Err(OAuth2Error::ConfigError(_))));

        let mut unnamed = test_config();
        unnamed.provider_name = " ".to_string();
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let json = r#"{
            "provider_name": "custom",
            "authorization_url": "https://auth.example.com/authorize",
            "token_url": "https://auth.example.com/token",
            "client_id": "abc"
        }"#;
        let config: OAuth2Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.redirect_uri, DEFAULT_REDIRECT_URI);
        assert!(config.use_pkce);
        assert_eq!(config.pkce_method, PkceMethod::S256);
        assert!(config.scopes.is_empty());
    }

    #[test]
    fn test_debug_hides_secret() {
        let mut config = test_config();
        config.client_secret = Some("hunter2".to_string());
        let printed = format!("{config:?}");
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("client_secret_set: true"));
    }
}
