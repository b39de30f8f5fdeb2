//! PKCE (RFC 7636) verifier and challenge generation.

use crate::error::{OAuth2Error, OAuth2Result};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

pub const MIN_VERIFIER_LENGTH: usize = 43;
pub const MAX_VERIFIER_LENGTH: usize = 128;
pub const DEFAULT_VERIFIER_LENGTH: usize = 64;

/// Code challenge method sent as `code_challenge_method`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PkceMethod {
    #[default]
    S256,
    #[serde(rename = "plain")]
    Plain,
}

impl PkceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PkceMethod::S256 => "S256",
            PkceMethod::Plain => "plain",
        }
    }

    /// Derive the challenge for `verifier`. Pure: the same verifier always
    /// yields the same challenge.
    pub fn challenge(&self, verifier: &str) -> String {
        match self {
            PkceMethod::Plain => verifier.to_string(),
            PkceMethod::S256 => {
                let digest = Sha256::digest(verifier.as_bytes());
                URL_SAFE_NO_PAD.encode(digest)
            }
        }
    }
}

impl FromStr for PkceMethod {
    type Err = OAuth2Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S256" => Ok(PkceMethod::S256),
            "plain" => Ok(PkceMethod::Plain),
            other => Err(OAuth2Error::UnsupportedMethod(other.to_string())),
        }
    }
}

impl fmt::Display for PkceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn check_length(length: usize) -> OAuth2Result<()> {
    if (MIN_VERIFIER_LENGTH..=MAX_VERIFIER_LENGTH).contains(&length) {
        Ok(())
    } else {
        Err(OAuth2Error::InvalidParameter(format!(
            "code verifier length must be between {MIN_VERIFIER_LENGTH} and {MAX_VERIFIER_LENGTH}, got {length}"
        )))
    }
}

fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

/// Generate a high-entropy code verifier of exactly `length` characters.
///
/// The length is checked before any randomness is drawn.
pub fn generate_code_verifier(length: usize) -> OAuth2Result<String> {
    check_length(length)?;

    let mut bytes = vec![0u8; length];
    OsRng.fill_bytes(&mut bytes);

    let mut verifier = URL_SAFE_NO_PAD.encode(&bytes);
    verifier.truncate(length);
    Ok(verifier)
}

/// Derive the code challenge for `verifier` using `method` (`"S256"` or `"plain"`).
pub fn generate_code_challenge(verifier: &str, method: &str) -> OAuth2Result<String> {
    let method: PkceMethod = method.parse()?;
    Ok(method.challenge(verifier))
}

/// A verifier and its challenge, generated together for one authorization attempt.
///
/// The challenge travels in the authorization redirect; the verifier is only
/// ever sent in the final token exchange body.
#[derive(Clone, PartialEq, Eq)]
pub struct PkceCodeVerifier {
    pub verifier: String,
    pub challenge: String,
    pub method: PkceMethod,
}

impl PkceCodeVerifier {
    pub fn generate(length: usize, method: PkceMethod) -> OAuth2Result<Self> {
        let verifier = generate_code_verifier(length)?;
        let challenge = method.challenge(&verifier);
        Ok(Self {
            verifier,
            challenge,
            method,
        })
    }

    /// Rebuild a pair from a previously issued verifier.
    pub fn from_verifier(verifier: impl Into<String>, method: PkceMethod) -> OAuth2Result<Self> {
        let verifier = verifier.into();
        check_length(verifier.len())?;
        if !verifier.chars().all(is_unreserved) {
            return Err(OAuth2Error::InvalidParameter(
                "code verifier contains characters outside [A-Za-z0-9-._~]".to_string(),
            ));
        }
        let challenge = method.challenge(&verifier);
        Ok(Self {
            verifier,
            challenge,
            method,
        })
    }

    pub fn to_auth_params(&self) -> Vec<(String, String)> {
        vec![
            ("code_challenge".to_string(), self.challenge.clone()),
            (
                "code_challenge_method".to_string(),
                self.method.as_str().to_string(),
            ),
        ]
    }

    pub fn to_token_params(&self) -> Vec<(String, String)> {
        vec![("code_verifier".to_string(), self.verifier.clone())]
    }
}

impl fmt::Debug for PkceCodeVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkceCodeVerifier")
            .field("verifier", &"<redacted>")
            .field("challenge", &self.challenge)
            .field("method", &self.method)
            .finish()
    }
}
