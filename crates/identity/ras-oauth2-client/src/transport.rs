//! Outbound HTTP transport used for token, refresh and revocation requests.

use crate::error::{OAuth2Error, OAuth2Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderValue};
use std::time::Duration;

/// Raw response from an authorization server endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Injected HTTP client. Implementations perform a single
/// `application/x-www-form-urlencoded` POST and report socket, TLS and
/// timeout failures as [`OAuth2Error::TransportError`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post_form(&self, url: &str, params: &[(String, String)]) -> OAuth2Result<HttpResponse>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> OAuth2Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OAuth2Error::ConfigError(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_form(&self, url: &str, params: &[(String, String)]) -> OAuth2Result<HttpResponse> {
        let response = self
            .client
            .post(url)
            // GitHub answers form-encoded unless asked for JSON
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .form(params)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_post_form_sends_encoded_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(header("accept", "application/json"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("scope=read+write"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let response = transport
            .post_form(
                &format!("{}/token", server.uri()),
                &[("scope".to_string(), "read write".to_string())],
            )
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(response.body, "{}");
    }

    #[tokio::test]
    async fn test_non_success_status_is_not_a_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad"))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let response = transport.post_form(&server.uri(), &[]).await.unwrap();
        assert_eq!(response.status, 400);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_timeout_maps_to_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(Duration::from_millis(50)).unwrap();
        let result = transport.post_form(&server.uri(), &[]).await;
        assert!(matches!(result, Err(OAuth2Error::TransportError(_))));
    }
}
