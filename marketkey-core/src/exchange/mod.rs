//! OAuth-style token exchange against the vendor token endpoint.
//!
//! This module provides:
//! - [`TokenRequest`] / [`TokenResponse`] - The exchange payloads
//! - [`TokenExchangeClient`] - Trait the token lifecycle calls into
//! - [`HttpTokenExchange`] - reqwest implementation (with the `http-exchange` feature)
//!
//! The exchange performs no retries of its own; retry policy belongs to the
//! caller.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::ApiConfiguration;
use crate::model::GrantType;
use crate::store::Secret;

#[cfg(feature = "http-exchange")]
mod http;

#[cfg(feature = "http-exchange")]
pub use http::HttpTokenExchange;

/// Error type for token exchange operations.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The token endpoint answered with a non-success status.
    #[error("token endpoint rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// Network error talking to the token endpoint.
    #[error("network error: {message}")]
    Network { message: String },

    /// The response could not be parsed.
    #[error("invalid token response: {message}")]
    InvalidResponse { message: String },

    /// The configured token endpoint URL is not usable.
    #[error("invalid token endpoint: {message}")]
    InvalidEndpoint { message: String },

    /// The exchange did not complete within the configured timeout.
    #[error("token exchange timed out after {after:?}")]
    Timeout { after: Duration },

    /// The configuration lacks the client secret needed to authenticate.
    #[error("client secret missing for client {client_id}")]
    MissingClientSecret { client_id: String },
}

/// Inputs of one exchange.
///
/// Every field other than `grant_type` may be absent; the endpoint is the
/// judge of whether the combination is valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub grant_type: GrantType,

    /// One-time authorization code (`authorization_code` grant).
    pub access_code: Option<Secret>,

    /// Redirect URL registered for the `authorization_code` grant.
    pub redirect_url: Option<String>,

    /// Stored refresh token (`refresh_token` grant).
    pub refresh_token: Option<Secret>,
}

impl TokenRequest {
    pub fn new(grant_type: GrantType) -> Self {
        Self {
            grant_type,
            access_code: None,
            redirect_url: None,
            refresh_token: None,
        }
    }
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: Secret,

    /// Absent or empty when the grant issues no refresh token.
    #[serde(default)]
    pub refresh_token: Option<Secret>,

    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Lifetime of the access token in seconds.
    pub expires_in: i64,
}

/// Performs the token exchange for a credential record.
#[async_trait]
pub trait TokenExchangeClient: Send + Sync {
    /// Exchange the grant in `request` for an access token.
    ///
    /// `config` carries the client id, client secret and country of the
    /// record being authenticated.
    async fn exchange(
        &self,
        config: &ApiConfiguration,
        request: &TokenRequest,
    ) -> Result<TokenResponse, ExchangeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_response_defaults() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token": "tok", "expires_in": 900}"#).unwrap();
        assert_eq!(response.access_token.expose(), "tok");
        assert_eq!(response.token_type, "Bearer");
        assert!(response.refresh_token.is_none());
    }

    #[test]
    fn test_token_response_full() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token": "tok", "refresh_token": "ref", "token_type": "bearer", "expires_in": 3600}"#,
        )
        .unwrap();
        assert_eq!(response.refresh_token.unwrap().expose(), "ref");
        assert_eq!(response.expires_in, 3600);
    }
}
