//! Issued OAuth2 tokens and their persisted JSON form.

use crate::error::OAuth2Result;
use crate::types::TokenResponse;
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds subtracted from the expiry to absorb clock skew and request latency.
pub const EXPIRY_BUFFER_SECONDS: i64 = 60;

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Current time at the precision the persisted format can carry.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// An access token with optional refresh token.
///
/// A token is never mutated after issuance; a refresh produces a new value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Token {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    /// Always held at microsecond precision so it survives the JSON form
    #[serde(with = "unix_seconds", default = "now")]
    issued_at: DateTime<Utc>,
}

impl OAuth2Token {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            expires_in: None,
            refresh_token: None,
            scope: None,
            issued_at: now(),
        }
    }

    pub fn with_expires_in(mut self, seconds: u64) -> Self {
        self.expires_in = Some(seconds);
        self
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Set the issuance time, truncated to microseconds.
    pub fn with_issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = issued_at.trunc_subsecs(6);
        self
    }

    /// Build a token from a token endpoint response received now.
    pub fn from_response(response: TokenResponse) -> Self {
        let token_type = response
            .token_type
            .filter(|t| !t.is_empty())
            .unwrap_or_else(default_token_type);

        Self {
            access_token: response.access_token,
            token_type,
            expires_in: response.expires_in,
            refresh_token: response.refresh_token,
            scope: response.scope,
            issued_at: now(),
        }
    }

    /// Keep `previous`'s refresh token when the server did not rotate it.
    pub(crate) fn inherit_refresh_token(mut self, previous: &str) -> Self {
        if self.refresh_token.is_none() {
            self.refresh_token = Some(previous.to_string());
        }
        self
    }

    /// Moment the server considers the token expired, if it expires at all.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let seconds = i64::try_from(self.expires_in?).ok()?;
        self.issued_at
            .checked_add_signed(TimeDelta::try_seconds(seconds)?)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at()
            .and_then(|at| at.checked_sub_signed(TimeDelta::seconds(EXPIRY_BUFFER_SECONDS)))
            .is_some_and(|deadline| now > deadline)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Value for the `Authorization` header, e.g. `Bearer abc123`
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    pub fn to_value(&self) -> OAuth2Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: serde_json::Value) -> OAuth2Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json(&self) -> OAuth2Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> OAuth2Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl fmt::Debug for OAuth2Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Token")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("scope", &self.scope)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// `issued_at` as floating point Unix seconds with microsecond precision.
mod unix_seconds {
    use chrono::{DateTime, TimeDelta, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.timestamp_micros() as f64 / 1_000_000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let seconds = f64::deserialize(deserializer)?;
        if !seconds.is_finite() {
            return Err(de::Error::custom("issued_at must be a finite number"));
        }

        // Split before scaling so the fractional part keeps full precision.
        let whole = seconds.floor();
        let micros = ((seconds - whole) * 1_000_000.0).round() as i64;

        DateTime::from_timestamp(whole as i64, 0)
            .and_then(|t| t.checked_add_signed(TimeDelta::microseconds(micros)))
            .ok_or_else(|| de::Error::custom("issued_at is out of range"))
    }
}
