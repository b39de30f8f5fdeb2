//! OAuth2 client: sends built requests through the transport and interprets replies.

use crate::config::OAuth2Config;
use crate::error::{OAuth2Error, OAuth2Result};
use crate::flow::TokenGrant;
use crate::token::OAuth2Token;
use crate::transport::{HttpResponse, HttpTransport};
use crate::types::{TokenErrorResponse, TokenRequest, TokenResponse};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Performs one network attempt per call; retries are the caller's decision.
#[derive(Clone)]
pub struct OAuth2Client {
    transport: Arc<dyn HttpTransport>,
}

impl OAuth2Client {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Exchange an authorization code (and PKCE verifier) for tokens
    pub async fn exchange_code(
        &self,
        config: &OAuth2Config,
        code: &str,
        code_verifier: Option<&str>,
    ) -> OAuth2Result<OAuth2Token> {
        let request = config.flow.build_token_request(
            config,
            TokenGrant::AuthorizationCode {
                code,
                code_verifier,
            },
        )?;

        let token = self.request_token(&request).await?;
        info!(
            "Successfully exchanged code for tokens with provider {}",
            config.provider_name
        );
        Ok(token)
    }

    /// Redeem a refresh token for a new access token
    pub async fn refresh(&self, config: &OAuth2Config, refresh_token: &str) -> OAuth2Result<OAuth2Token> {
        let request = config
            .flow
            .build_token_request(config, TokenGrant::RefreshToken { refresh_token })?;

        let token = self
            .request_token(&request)
            .await?
            .inherit_refresh_token(refresh_token);
        info!("Refreshed access token for provider {}", config.provider_name);
        Ok(token)
    }

    /// Revoke `token` at the provider's revocation endpoint (RFC 7009).
    ///
    /// Returns `Ok(false)` when the provider has no revocation endpoint.
    pub async fn revoke(&self, config: &OAuth2Config, token: &str, hint: &str) -> OAuth2Result<bool> {
        let Some(request) = config.build_revocation_request(token, hint) else {
            debug!(
                "Provider {} has no revocation endpoint",
                config.provider_name
            );
            return Ok(false);
        };

        let response = self
            .transport
            .post_form(&request.url, request.params.as_slice())
            .await
            .map_err(|e| OAuth2Error::RevocationFailed(e.to_string()))?;

        if !response.is_success() {
            let (error, _) = describe_error(&response);
            return Err(OAuth2Error::RevocationFailed(format!(
                "status {}: {}",
                response.status, error
            )));
        }

        info!("Revoked {} for provider {}", hint, config.provider_name);
        Ok(true)
    }

    async fn request_token(&self, request: &TokenRequest) -> OAuth2Result<OAuth2Token> {
        debug!("POST {} ({} params)", request.url, request.params.len());
        let response = self
            .transport
            .post_form(&request.url, request.params.as_slice())
            .await?;

        parse_token_response(&response)
    }
}

fn describe_error(response: &HttpResponse) -> (String, Option<String>) {
    match serde_json::from_str::<TokenErrorResponse>(&response.body) {
        Ok(body) => (body.error, body.error_description),
        Err(_) if response.body.trim().is_empty() => ("unknown_error".to_string(), None),
        Err(_) => ("unknown_error".to_string(), Some(response.body.clone())),
    }
}

/// Interpret a token endpoint response.
pub(crate) fn parse_token_response(response: &HttpResponse) -> OAuth2Result<OAuth2Token> {
    if !response.is_success() {
        let (error, description) = describe_error(response);
        error!(
            "Token endpoint rejected request with status {}: {}",
            response.status, error
        );
        return Err(OAuth2Error::TokenExchangeFailed {
            status: response.status,
            error,
            description,
        });
    }

    // Some providers (GitHub) report grant errors with a 200 status.
    if let Ok(body) = serde_json::from_str::<TokenErrorResponse>(&response.body) {
        error!("Token endpoint returned error {}", body.error);
        return Err(OAuth2Error::TokenExchangeFailed {
            status: response.status,
            error: body.error,
            description: body.error_description,
        });
    }

    let token_response: TokenResponse = serde_json::from_str(&response.body)
        .map_err(|e| OAuth2Error::InvalidTokenResponse(e.to_string()))?;

    Ok(OAuth2Token::from_response(token_response))
}
