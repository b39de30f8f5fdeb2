//! OAuth2 Authorization Code client with PKCE and resource indicators.
//!
//! This crate builds authorization, token, refresh and revocation requests for
//! the Authorization Code flow with PKCE (RFC 7636) and resource indicators
//! (RFC 8707), and manages the resulting tokens per (provider, scope set) with
//! single-flight refresh and pluggable persistence.

mod client;
mod config;
mod error;
mod flow;
mod manager;
mod pkce;
mod presets;
mod settings;
mod store;
mod token;
mod transport;
mod types;


pub use client::OAuth2Client;
pub use config::{DEFAULT_REDIRECT_URI, OAuth2Config};
pub use error::{OAuth2Error, OAuth2Result};
pub use flow::{OAuth2Flow, TokenGrant};
pub use manager::{AuthorizationRequest, CacheKey, RevocationOutcome, TokenManager, TokenStatus};
pub use pkce::{
    DEFAULT_VERIFIER_LENGTH, MAX_VERIFIER_LENGTH, MIN_VERIFIER_LENGTH, PkceCodeVerifier, PkceMethod,
    generate_code_challenge, generate_code_verifier,
};
pub use presets::{
    ClientRegistration, PRESETS, PkcePolicy, ProviderPreset, config_from_preset, preset, preset_names,
};
pub use settings::{ProviderSettings, Settings};
pub use store::{FileTokenStore, InMemoryTokenStore, TokenStore};
pub use token::{EXPIRY_BUFFER_SECONDS, OAuth2Token};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};
pub use types::{
    AuthorizationCallback, FormParams, TokenErrorResponse, TokenRequest, TokenResponse,
};
