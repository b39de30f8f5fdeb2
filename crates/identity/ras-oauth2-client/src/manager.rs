//! Token manager: owns the live token per (provider, scope set).
//!
//! Each cache key has its own slot guarded by an async mutex, so operations on
//! different keys never contend. A slot holds two independent pieces of state:
//!
//! - the token: `Empty -> Valid -> Refreshing -> Valid | Empty`
//! - the authorization attempt: `Idle -> Awaiting -> Exchanging -> Idle`
//!
//! Keeping them apart lets a cached token stay usable (and refreshable) while
//! the user is still in the browser, and lets a one-time code be claimed by
//! exactly one exchange.
//!
//! Refreshes are single-flight: the first caller that observes an expired
//! token spawns the refresh and stores a shared handle to it in the slot.
//! Every concurrent caller awaits that same handle and receives the same token
//! or the same error. The refresh runs on its own task, so it completes and
//! settles the slot even if every waiter gives up.

use crate::client::OAuth2Client;
use crate::config::OAuth2Config;
use crate::error::{OAuth2Error, OAuth2Result};
use crate::pkce::{DEFAULT_VERIFIER_LENGTH, PkceCodeVerifier};
use crate::settings::Settings;
use crate::store::{FileTokenStore, InMemoryTokenStore, TokenStore};
use crate::token::OAuth2Token;
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::types::AuthorizationCallback;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

/// Identifies one cached credential: a provider plus the set of scopes granted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    provider: String,
    scopes: BTreeSet<String>,
}

impl CacheKey {
    pub fn new<I, S>(provider: impl Into<String>, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            provider: provider.into().to_ascii_lowercase(),
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn for_config(config: &OAuth2Config) -> Self {
        Self::new(config.provider_name.as_str(), config.scopes.iter().cloned())
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    /// Stable string form used by token stores
    pub fn storage_key(&self) -> String {
        let scopes: Vec<&str> = self.scopes.iter().map(String::as_str).collect();
        format!("{}:{}", self.provider, scopes.join(" "))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Observable state of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Empty,
    Pending,
    Valid,
    Expired,
    Refreshing,
}

/// What the caller sends the user's browser to, plus the PKCE pair generated for it
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub pkce: Option<PkceCodeVerifier>,
}

/// Result of a best-effort revocation. Local state is cleared in every case.
#[derive(Debug, Clone)]
pub enum RevocationOutcome {
    Revoked,
    /// No token cached or no revocation endpoint configured
    Skipped,
    Failed(OAuth2Error),
}

type RefreshFlight = Shared<BoxFuture<'static, OAuth2Result<OAuth2Token>>>;

enum EntryState {
    Empty,
    Valid(OAuth2Token),
    Refreshing {
        prior: OAuth2Token,
        flight: RefreshFlight,
    },
}

/// Progress of the authorization code attempt for a key
enum Authorization {
    Idle,
    /// Redirect issued; waiting for the callback carrying `state`
    Awaiting {
        state: String,
        pkce: Option<PkceCodeVerifier>,
    },
    /// A code has been claimed and its exchange is in flight
    Exchanging,
}

struct Slot {
    state: EntryState,
    authorization: Authorization,
    /// Bumped on every token transition so a late refresh outcome can tell
    /// whether the entry moved on (for example, was revoked) while in flight.
    generation: u64,
}

impl Slot {
    fn transition(&mut self, state: EntryState) {
        self.state = state;
        self.generation = self.generation.wrapping_add(1);
    }

    fn current_token(&self) -> Option<&OAuth2Token> {
        match &self.state {
            EntryState::Valid(token) => Some(token),
            EntryState::Refreshing { prior, .. } => Some(prior),
            EntryState::Empty => None,
        }
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            state: EntryState::Empty,
            authorization: Authorization::Idle,
            generation: 0,
        }
    }
}

type SlotHandle = Arc<Mutex<Slot>>;

enum Next {
    Ready(OAuth2Token),
    Await(RefreshFlight),
    Refresh {
        prior: OAuth2Token,
        refresh_token: String,
    },
    Expired,
    Unauthorized,
}

async fn with_timeout<T>(
    timeout: Duration,
    what: &str,
    fut: impl Future<Output = OAuth2Result<T>>,
) -> OAuth2Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(OAuth2Error::TransportError(format!(
            "{what} timed out after {timeout:?}"
        ))),
    }
}

/// Owns cached tokens and serializes every state change per cache key.
pub struct TokenManager {
    client: OAuth2Client,
    store: Arc<dyn TokenStore>,
    providers: DashMap<String, OAuth2Config>,
    slots: DashMap<CacheKey, SlotHandle>,
}

impl TokenManager {
    pub fn new(transport: Arc<dyn HttpTransport>, store: Arc<dyn TokenStore>) -> Self {
        Self {
            client: OAuth2Client::new(transport),
            store,
            providers: DashMap::new(),
            slots: DashMap::new(),
        }
    }

    /// Wire a manager from loaded settings: reqwest transport, file or
    /// in-memory store, and every configured provider.
    pub fn from_settings(settings: &Settings) -> OAuth2Result<Self> {
        let transport = ReqwestTransport::new(settings.http_timeout())?;
        let store: Arc<dyn TokenStore> = match &settings.token_dir {
            Some(dir) => Arc::new(FileTokenStore::new(dir.clone())),
            None => Arc::new(InMemoryTokenStore::new()),
        };

        let manager = Self::new(Arc::new(transport), store);
        for provider in &settings.providers {
            manager.register_provider(provider.to_config()?)?;
        }
        Ok(manager)
    }

    /// Add or replace a provider configuration
    pub fn register_provider(&self, config: OAuth2Config) -> OAuth2Result<()> {
        config.validate()?;
        let name = config.provider_name.to_ascii_lowercase();
        info!("Registered OAuth2 provider {}", name);
        self.providers.insert(name, config);
        Ok(())
    }

    pub fn provider(&self, name: &str) -> Option<OAuth2Config> {
        self.providers
            .get(&name.to_ascii_lowercase())
            .map(|entry| entry.value().clone())
    }

    /// Provider config with the key's scope set applied
    fn config_for(&self, key: &CacheKey) -> OAuth2Result<OAuth2Config> {
        let mut config = self.provider(key.provider()).ok_or_else(|| {
            OAuth2Error::ConfigError(format!("Provider '{}' not configured", key.provider()))
        })?;
        if !key.scopes().is_empty() {
            config.scopes = key.scopes().iter().cloned().collect();
        }
        Ok(config)
    }

    fn slot(&self, key: &CacheKey) -> SlotHandle {
        self.slots.entry(key.clone()).or_default().value().clone()
    }

    /// Peek at the cached token without I/O
    pub async fn cached(&self, key: &CacheKey) -> Option<OAuth2Token> {
        let slot = self.slots.get(key)?.value().clone();
        let guard = slot.lock().await;
        guard.current_token().cloned()
    }

    /// Token state of the entry; `Pending` only when no token is held and an
    /// authorization attempt is open.
    pub async fn status(&self, key: &CacheKey) -> TokenStatus {
        let Some(slot) = self.slots.get(key).map(|entry| entry.value().clone()) else {
            return TokenStatus::Empty;
        };
        let guard = slot.lock().await;
        match &guard.state {
            EntryState::Empty => match guard.authorization {
                Authorization::Idle => TokenStatus::Empty,
                Authorization::Awaiting { .. } | Authorization::Exchanging => TokenStatus::Pending,
            },
            EntryState::Valid(token) if token.is_expired() => TokenStatus::Expired,
            EntryState::Valid(_) => TokenStatus::Valid,
            EntryState::Refreshing { .. } => TokenStatus::Refreshing,
        }
    }

    /// Return a usable token for `key`, refreshing it when expired.
    ///
    /// An open authorization attempt does not hide a cached token.
    /// Fails with [`OAuth2Error::AuthenticationRequired`] when there is nothing
    /// to refresh; the caller must then run the authorization code flow.
    pub async fn get_or_refresh(&self, key: &CacheKey, timeout: Duration) -> OAuth2Result<OAuth2Token> {
        let config = self.config_for(key)?;
        let slot = self.slot(key);

        let flight = {
            let mut guard = slot.lock().await;

            if matches!(guard.state, EntryState::Empty) {
                if let Some(token) = self.store.load(key).await? {
                    debug!("Loaded stored token for {}", key);
                    guard.transition(EntryState::Valid(token));
                }
            }

            let next = match &guard.state {
                EntryState::Valid(token) if !token.is_expired() => Next::Ready(token.clone()),
                EntryState::Valid(token) => match &token.refresh_token {
                    Some(refresh_token) if config.flow.supports_refresh() => Next::Refresh {
                        prior: token.clone(),
                        refresh_token: refresh_token.clone(),
                    },
                    _ => Next::Expired,
                },
                EntryState::Refreshing { flight, .. } => Next::Await(flight.clone()),
                EntryState::Empty => Next::Unauthorized,
            };

            match next {
                Next::Ready(token) => return Ok(token),
                Next::Await(flight) => flight,
                Next::Refresh {
                    prior,
                    refresh_token,
                } => {
                    let generation = guard.generation.wrapping_add(1);
                    let flight = self.refresh_flight(
                        key.clone(),
                        config,
                        Arc::clone(&slot),
                        generation,
                        prior.clone(),
                        refresh_token,
                        timeout,
                    );
                    guard.transition(EntryState::Refreshing {
                        prior,
                        flight: flight.clone(),
                    });
                    debug!("Started token refresh for {}", key);
                    flight
                }
                Next::Expired => {
                    guard.transition(EntryState::Empty);
                    self.forget_stored(key).await;
                    return Err(OAuth2Error::AuthenticationRequired(key.to_string()));
                }
                Next::Unauthorized => {
                    return Err(OAuth2Error::AuthenticationRequired(key.to_string()));
                }
            }
        };

        flight.await
    }

    /// Spawn the refresh for `key`. The caller installs the returned handle
    /// in the slot while still holding the slot lock, which the task needs
    /// before it can settle the entry.
    #[allow(clippy::too_many_arguments)]
    fn refresh_flight(
        &self,
        key: CacheKey,
        config: OAuth2Config,
        slot: SlotHandle,
        generation: u64,
        prior: OAuth2Token,
        refresh_token: String,
        timeout: Duration,
    ) -> RefreshFlight {
        let client = self.client.clone();
        let store = Arc::clone(&self.store);

        let task = tokio::spawn(async move {
            let outcome = with_timeout(timeout, "token refresh", client.refresh(&config, &refresh_token)).await;

            let mut guard = slot.lock().await;
            if guard.generation != generation {
                debug!("Discarding refresh outcome for {}: entry changed", key);
                return outcome;
            }

            match &outcome {
                Ok(token) => {
                    guard.transition(EntryState::Valid(token.clone()));
                    if let Err(e) = store.save(&key, token).await {
                        warn!("Failed to persist refreshed token for {}: {}", key, e);
                    }
                }
                Err(OAuth2Error::TransportError(e)) => {
                    warn!("Token refresh for {} failed in transport: {}", key, e);
                    guard.transition(EntryState::Valid(prior));
                }
                Err(e) => {
                    warn!("Token refresh for {} rejected: {}", key, e);
                    guard.transition(EntryState::Empty);
                    if let Err(e) = store.remove(&key).await {
                        warn!("Failed to remove stored token for {}: {}", key, e);
                    }
                }
            }

            outcome
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(OAuth2Error::TransportError(format!(
                    "token refresh task failed: {e}"
                )))
            })
        }
        .boxed()
        .shared()
    }

    /// Start an authorization code attempt for `key`.
    ///
    /// Generates the PKCE pair when the provider uses PKCE and remembers it
    /// (with `state`) until the callback arrives. Any cached token stays in
    /// place. A newer attempt replaces an older one.
    pub async fn begin_authorization(&self, key: &CacheKey, state: &str) -> OAuth2Result<AuthorizationRequest> {
        let config = self.config_for(key)?;
        let pkce = if config.use_pkce {
            Some(PkceCodeVerifier::generate(
                DEFAULT_VERIFIER_LENGTH,
                config.pkce_method,
            )?)
        } else {
            None
        };

        let url = config.build_authorization_request(state, pkce.as_ref())?;

        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        guard.authorization = Authorization::Awaiting {
            state: state.to_string(),
            pkce: pkce.clone(),
        };

        info!("Started OAuth2 authorization for {}", key);
        Ok(AuthorizationRequest { url, pkce })
    }

    /// Exchange an authorization code for a token and cache it.
    ///
    /// `pkce` overrides the pair remembered by [`begin_authorization`](Self::begin_authorization).
    /// The pending pair is consumed by this call; a second exchange while one
    /// is in flight fails with [`OAuth2Error::InvalidState`]. On failure or
    /// timeout the cached token is left as it was and the attempt is closed.
    pub async fn complete_authorization(
        &self,
        key: &CacheKey,
        code: &str,
        pkce: Option<&PkceCodeVerifier>,
        timeout: Duration,
    ) -> OAuth2Result<OAuth2Token> {
        let config = self.config_for(key)?;
        let slot = self.slot(key);

        let verifier = {
            let mut guard = slot.lock().await;
            let pending_pkce = match &guard.authorization {
                Authorization::Exchanging => return Err(OAuth2Error::InvalidState),
                Authorization::Awaiting { pkce, .. } => pkce.as_ref(),
                Authorization::Idle => None,
            };
            let verifier = pkce.or(pending_pkce).map(|p| p.verifier.clone());

            if config.use_pkce && verifier.is_none() {
                return Err(OAuth2Error::InvalidParameter(format!(
                    "provider {} requires a PKCE code verifier",
                    config.provider_name
                )));
            }

            guard.authorization = Authorization::Exchanging;
            verifier
        };

        self.exchange(key, &config, &slot, code, verifier, timeout).await
    }

    /// Complete an authorization from the redirect listener's callback,
    /// checking `state` against the pending attempt and claiming it.
    pub async fn handle_callback(
        &self,
        key: &CacheKey,
        callback: AuthorizationCallback,
        timeout: Duration,
    ) -> OAuth2Result<OAuth2Token> {
        if let Some(error) = &callback.error {
            let description = callback
                .error_description
                .as_deref()
                .unwrap_or("No description");
            return Err(OAuth2Error::CallbackError(format!(
                "{}: {}",
                error, description
            )));
        }

        let code = callback
            .code
            .as_deref()
            .ok_or_else(|| OAuth2Error::CallbackError("missing authorization code".to_string()))?;

        let config = self.config_for(key)?;
        let Some(slot) = self.slots.get(key).map(|entry| entry.value().clone()) else {
            return Err(OAuth2Error::InvalidState);
        };

        let verifier = {
            let mut guard = slot.lock().await;
            let verifier = match &guard.authorization {
                Authorization::Awaiting { state, pkce } if *state == callback.state => {
                    pkce.as_ref().map(|p| p.verifier.clone())
                }
                _ => return Err(OAuth2Error::InvalidState),
            };
            guard.authorization = Authorization::Exchanging;
            verifier
        };

        self.exchange(key, &config, &slot, code, verifier, timeout).await
    }

    /// Run a claimed code exchange and settle the slot. The outcome is only
    /// applied if the attempt is still the one in flight.
    async fn exchange(
        &self,
        key: &CacheKey,
        config: &OAuth2Config,
        slot: &SlotHandle,
        code: &str,
        verifier: Option<String>,
        timeout: Duration,
    ) -> OAuth2Result<OAuth2Token> {
        let outcome = with_timeout(
            timeout,
            "authorization code exchange",
            self.client.exchange_code(config, code, verifier.as_deref()),
        )
        .await;

        let mut guard = slot.lock().await;
        let current = matches!(guard.authorization, Authorization::Exchanging);
        if current {
            guard.authorization = Authorization::Idle;
        }

        match outcome {
            Ok(token) if current => {
                guard.transition(EntryState::Valid(token.clone()));
                if let Err(e) = self.store.save(key, &token).await {
                    warn!("Failed to persist token for {}: {}", key, e);
                }
                info!("Completed OAuth2 authorization for {}", key);
                Ok(token)
            }
            Ok(token) => {
                debug!("Discarding exchanged token for {}: attempt superseded", key);
                Ok(token)
            }
            Err(e) => Err(e),
        }
    }

    /// Forget the token for `key` and best-effort revoke it at the provider.
    ///
    /// Local state and the store are cleared before any network call, so the
    /// outcome of the revocation request never affects them. An open
    /// authorization attempt is abandoned as well.
    pub async fn revoke(&self, key: &CacheKey, timeout: Duration) -> OAuth2Result<RevocationOutcome> {
        let config = self.config_for(key)?;
        let slot = self.slot(key);

        let token = {
            let mut guard = slot.lock().await;
            let token = match guard.current_token() {
                Some(token) => Some(token.clone()),
                None => self.store.load(key).await.unwrap_or_else(|e| {
                    warn!("Failed to load stored token for {}: {}", key, e);
                    None
                }),
            };
            guard.transition(EntryState::Empty);
            guard.authorization = Authorization::Idle;
            token
        };
        self.forget_stored(key).await;

        let Some(token) = token else {
            return Ok(RevocationOutcome::Skipped);
        };

        let (value, hint) = match &token.refresh_token {
            Some(refresh_token) => (refresh_token.as_str(), "refresh_token"),
            None => (token.access_token.as_str(), "access_token"),
        };

        let result = with_timeout(timeout, "token revocation", self.client.revoke(&config, value, hint)).await;
        Ok(match result {
            Ok(true) => RevocationOutcome::Revoked,
            Ok(false) => RevocationOutcome::Skipped,
            Err(e) => {
                warn!("Best-effort revocation for {} failed: {}", key, e);
                RevocationOutcome::Failed(e)
            }
        })
    }

    async fn forget_stored(&self, key: &CacheKey) {
        if let Err(e) = self.store.remove(key).await {
            warn!("Failed to remove stored token for {}: {}", key, e);
        }
    }
}
