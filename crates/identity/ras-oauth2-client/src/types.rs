//! OAuth2 protocol types.

use serde::{Deserialize, Serialize};

/// Ordered `application/x-www-form-urlencoded` parameters.
///
/// `set` replaces an existing key in place, so provider-specific extras merged
/// last override computed defaults without reordering them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormParams(Vec<(String, String)>);

impl FormParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn extend<'a, I>(&mut self, params: I)
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (key, value) in params {
            self.set(key.as_str(), value.as_str());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn as_slice(&self) -> &[(String, String)] {
        &self.0
    }
}

/// A form-encoded POST to one of the provider's endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub url: String,
    pub params: FormParams,
}

/// Successful token endpoint response (RFC 6749 §5.1)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
}

/// Token endpoint error body (RFC 6749 §5.2)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,
    pub error_description: Option<String>,
    pub error_uri: Option<String>,
}

/// Query parameters captured by the redirect listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCallback {
    #[serde(default)]
    pub code: Option<String>,
    pub state: String,
    pub error: Option<String>,
    pub error_description: Option<String>,
}
