//! Flow selection: maps a flow kind to the request shape it builds.

use crate::config::OAuth2Config;
use crate::error::{OAuth2Error, OAuth2Result};
use crate::types::TokenRequest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported OAuth2 grant families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuth2Flow {
    #[default]
    AuthorizationCode,
    ClientCredentials,
    DeviceCode,
}

/// Per-attempt input to a token endpoint request
#[derive(Debug, Clone, Copy)]
pub enum TokenGrant<'a> {
    AuthorizationCode {
        code: &'a str,
        code_verifier: Option<&'a str>,
    },
    RefreshToken {
        refresh_token: &'a str,
    },
}

impl OAuth2Flow {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuth2Flow::AuthorizationCode => "authorization_code",
            OAuth2Flow::ClientCredentials => "client_credentials",
            OAuth2Flow::DeviceCode => "device_code",
        }
    }

    /// `grant_type` value registered for this flow
    pub fn grant_type(&self) -> &'static str {
        match self {
            OAuth2Flow::AuthorizationCode => "authorization_code",
            OAuth2Flow::ClientCredentials => "client_credentials",
            OAuth2Flow::DeviceCode => "urn:ietf:params:oauth:grant-type:device_code",
        }
    }

    pub fn supports_refresh(&self) -> bool {
        matches!(self, OAuth2Flow::AuthorizationCode)
    }

    /// Build the token endpoint request for `grant` under this flow.
    ///
    /// Only the authorization code flow has a request shape; the others fail
    /// with [`OAuth2Error::UnsupportedFlow`].
    pub fn build_token_request(
        &self,
        config: &OAuth2Config,
        grant: TokenGrant<'_>,
    ) -> OAuth2Result<TokenRequest> {
        match self {
            OAuth2Flow::AuthorizationCode => Ok(match grant {
                TokenGrant::AuthorizationCode {
                    code,
                    code_verifier,
                } => config.build_token_exchange_request(code, code_verifier),
                TokenGrant::RefreshToken { refresh_token } => {
                    config.build_refresh_request(refresh_token)
                }
            }),
            OAuth2Flow::ClientCredentials | OAuth2Flow::DeviceCode => {
                Err(OAuth2Error::UnsupportedFlow(*self))
            }
        }
    }
}

impl fmt::Display for OAuth2Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OAuth2Flow {
    type Err = OAuth2Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "authorization_code" => Ok(OAuth2Flow::AuthorizationCode),
            "client_credentials" => Ok(OAuth2Flow::ClientCredentials),
            "device_code" => Ok(OAuth2Flow::DeviceCode),
            other => Err(OAuth2Error::InvalidParameter(format!(
                "unknown OAuth2 flow '{other}'"
            ))),
        }
    }
}
