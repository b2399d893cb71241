//! reqwest-backed token exchange.

use async_trait::async_trait;
use url::Url;

use super::{ExchangeError, TokenExchangeClient, TokenRequest, TokenResponse};
use crate::config::ApiConfiguration;
use crate::model::GrantType;

const TOKEN_PATH: &str = "v3/token";
const SERVICE_NAME: &str = "Walmart Marketplace";

/// Token exchange over HTTPS.
///
/// Sends `POST {base_url}/v3/token` with HTTP basic authentication (client id
/// and client secret) and a form body carrying the grant.
#[derive(Debug, Clone)]
pub struct HttpTokenExchange {
    client: reqwest::Client,
    token_url: Url,
}

impl HttpTokenExchange {
    /// Create an exchange against `base_url`, usually [`API_BASE_URL`](crate::config::API_BASE_URL)
    /// or a sandbox/mock server.
    pub fn with_base_url(base_url: &str) -> Result<Self, ExchangeError> {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, ExchangeError> {
        let mut base = Url::parse(base_url).map_err(|e| ExchangeError::InvalidEndpoint {
            message: format!("invalid token base URL '{}': {}", base_url, e),
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let token_url = base
            .join(TOKEN_PATH)
            .map_err(|e| ExchangeError::InvalidEndpoint {
                message: format!("invalid token URL: {}", e),
            })?;

        Ok(Self { client, token_url })
    }

    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    fn form(request: &TokenRequest) -> Vec<(&'static str, String)> {
        let mut form = vec![("grant_type", request.grant_type.as_str().to_string())];

        match request.grant_type {
            GrantType::AuthorizationCode => {
                if let Some(code) = &request.access_code {
                    form.push(("code", code.expose().to_string()));
                }
                if let Some(redirect) = &request.redirect_url {
                    form.push(("redirect_uri", redirect.clone()));
                }
            }
            GrantType::RefreshToken => {
                if let Some(refresh) = &request.refresh_token {
                    form.push(("refresh_token", refresh.expose().to_string()));
                }
            }
            GrantType::ClientCredentials => {}
        }

        form
    }
}

#[async_trait]
impl TokenExchangeClient for HttpTokenExchange {
    async fn exchange(
        &self,
        config: &ApiConfiguration,
        request: &TokenRequest,
    ) -> Result<TokenResponse, ExchangeError> {
        let secret = config
            .client_secret()
            .ok_or_else(|| ExchangeError::MissingClientSecret {
                client_id: config.client_id().to_string(),
            })?;

        tracing::debug!(
            url = %self.token_url,
            grant_type = %request.grant_type,
            country = %config.country(),
            "calling token endpoint"
        );

        let response = self
            .client
            .post(self.token_url.clone())
            .basic_auth(config.client_id(), Some(secret.expose()))
            .header("Accept", "application/json")
            .header("WM_SVC.NAME", SERVICE_NAME)
            .header("WM_QOS.CORRELATION_ID", uuid::Uuid::new_v4().to_string())
            .form(&Self::form(request))
            .send()
            .await
            .map_err(|e| ExchangeError::Network {
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ExchangeError::Network {
            message: format!("failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "token endpoint rejected exchange");
            return Err(ExchangeError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| ExchangeError::InvalidResponse {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Country;
    use crate::store::Secret;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string_contains, header, header_exists, method, path},
    };

    fn config() -> ApiConfiguration {
        ApiConfiguration::for_token_exchange("client-id", Secret::new("client-secret"), Country::Us)
    }

    #[test]
    fn test_token_url_joins_base() {
        let exchange = HttpTokenExchange::with_base_url("http://localhost:1234").unwrap();
        assert_eq!(exchange.token_url().as_str(), "http://localhost:1234/v3/token");

        let prefixed = HttpTokenExchange::with_base_url("http://localhost:1234/sandbox").unwrap();
        assert_eq!(
            prefixed.token_url().as_str(),
            "http://localhost:1234/sandbox/v3/token"
        );

        assert!(HttpTokenExchange::with_base_url("not a url").is_err());
    }

    #[test]
    fn test_form_by_grant() {
        let mut request = TokenRequest::new(GrantType::AuthorizationCode);
        request.access_code = Some(Secret::new("code"));
        request.redirect_url = Some("https://example.com/cb".to_string());
        request.refresh_token = Some(Secret::new("unused"));

        let form = HttpTokenExchange::form(&request);
        assert!(form.contains(&("code", "code".to_string())));
        assert!(form.contains(&("redirect_uri", "https://example.com/cb".to_string())));
        assert!(!form.iter().any(|(k, _)| *k == "refresh_token"));

        let client = HttpTokenExchange::form(&TokenRequest::new(GrantType::ClientCredentials));
        assert_eq!(client, vec![("grant_type", "client_credentials".to_string())]);
    }

    #[tokio::test]
    async fn test_exchange_client_credentials() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v3/token"))
            .and(header_exists("authorization"))
            .and(header_exists("WM_QOS.CORRELATION_ID"))
            .and(header("accept", "application/json"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok123",
                "token_type": "Bearer",
                "expires_in": 900
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let exchange = HttpTokenExchange::with_base_url(&mock_server.uri()).unwrap();
        let response = exchange
            .exchange(&config(), &TokenRequest::new(GrantType::ClientCredentials))
            .await
            .unwrap();

        assert_eq!(response.access_token.expose(), "tok123");
        assert_eq!(response.expires_in, 900);
        assert!(response.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_exchange_rejected() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v3/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
            .mount(&mock_server)
            .await;

        let exchange = HttpTokenExchange::with_base_url(&mock_server.uri()).unwrap();
        let result = exchange
            .exchange(&config(), &TokenRequest::new(GrantType::ClientCredentials))
            .await;

        match result {
            Err(ExchangeError::Rejected { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid_client");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exchange_invalid_json() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v3/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&mock_server)
            .await;

        let exchange = HttpTokenExchange::with_base_url(&mock_server.uri()).unwrap();
        let result = exchange
            .exchange(&config(), &TokenRequest::new(GrantType::ClientCredentials))
            .await;

        assert!(matches!(result, Err(ExchangeError::InvalidResponse { .. })));
    }

    #[tokio::test]
    async fn test_exchange_requires_client_secret() {
        let exchange = HttpTokenExchange::with_base_url("http://127.0.0.1:9").unwrap();
        let config = ApiConfiguration::new(
            false,
            crate::config::ConfigurationOptions {
                client_id: "client-id".to_string(),
                ..Default::default()
            },
        );

        let result = exchange
            .exchange(&config, &TokenRequest::new(GrantType::ClientCredentials))
            .await;
        assert!(matches!(result, Err(ExchangeError::MissingClientSecret { .. })));
    }
}
