//! Log in through a provider preset using a loopback redirect listener.
//!
//! ```sh
//! OAUTH2_PROVIDER=github OAUTH2_CLIENT_ID=... cargo run --example loopback_login
//! ```
//!
//! Providers listed in `oauth2.toml` (see `Settings`) are registered as well.

use anyhow::Context;
use axum::{Router, extract::Query, extract::State, response::Html, routing::get};
use ras_oauth2_client::{
    AuthorizationCallback, CacheKey, ClientRegistration, DEFAULT_REDIRECT_URI, Settings, TokenManager,
    config_from_preset,
};
use std::sync::Arc;
use tokio::sync::{Mutex, oneshot};
use tracing::info;
use tracing_subscriber::EnvFilter;

type CallbackSender = Arc<Mutex<Option<oneshot::Sender<AuthorizationCallback>>>>;

async fn callback(
    State(sender): State<CallbackSender>,
    Query(params): Query<AuthorizationCallback>,
) -> Html<&'static str> {
    if let Some(tx) = sender.lock().await.take() {
        let _ = tx.send(params);
    }
    Html("<h1>Login complete</h1><p>You can close this window.</p>")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ras_oauth2_client=debug")),
        )
        .init();

    let settings = Settings::load()?;
    let manager = TokenManager::from_settings(&settings)?;

    let provider = std::env::var("OAUTH2_PROVIDER").unwrap_or_else(|_| "github".to_string());
    let config = match manager.provider(&provider) {
        Some(config) => config,
        None => {
            let registration = ClientRegistration {
                client_secret: std::env::var("OAUTH2_CLIENT_SECRET").ok(),
                ..ClientRegistration::new(
                    std::env::var("OAUTH2_CLIENT_ID").context("OAUTH2_CLIENT_ID is not set")?,
                )
            };
            let config = config_from_preset(&provider, registration)?;
            manager.register_provider(config.clone())?;
            config
        }
    };
    let key = CacheKey::for_config(&config);

    let (tx, rx) = oneshot::channel();
    let app = Router::new()
        .route("/callback", get(callback))
        .with_state(Arc::new(Mutex::new(Some(tx))));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
    info!("Listening for the redirect on {}", DEFAULT_REDIRECT_URI);
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    let state = uuid::Uuid::new_v4().to_string();
    let request = manager.begin_authorization(&key, &state).await?;
    println!("Open this URL in your browser:\n\n  {}\n", request.url);

    let params = rx.await.context("redirect listener stopped")?;
    server.abort();

    let token = manager
        .handle_callback(&key, params, settings.exchange_timeout())
        .await?;
    println!("Logged in to {} ({:?})", config.provider_name, manager.status(&key).await);
    println!("Token expires at: {:?}", token.expires_at());
    println!("Has refresh token: {}", token.refresh_token.is_some());

    Ok(())
}
