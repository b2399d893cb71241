//! Domain model types for Marketkey.
//!
//! This module defines the core types used throughout Marketkey:
//! - [`SellerId`] / [`CredentialId`] - Primary keys of the two stored entities
//! - [`Seller`] - The owner of one or more credential records
//! - [`GrantType`] - OAuth-style flow used to obtain an access token
//! - [`Country`] - Marketplace region a credential applies to

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Primary key of a [`Seller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SellerId(u64);

impl SellerId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SellerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SellerId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Primary key of a stored credential record.
///
/// The id also names the record's cache entries, so it must stay stable for
/// the lifetime of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialId(u64);

impl CredentialId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CredentialId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A seller: the party on whose behalf API calls are made.
///
/// Deleting a seller deletes all of its credential records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seller {
    pub id: SellerId,

    /// Optional display label.
    pub name: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// OAuth-style flow used to obtain an access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Exchange a one-time authorization code granted by the seller.
    AuthorizationCode,

    /// Exchange a stored refresh token.
    RefreshToken,

    /// Authenticate with the application's own client id and secret.
    #[default]
    ClientCredentials,
}

impl GrantType {
    /// Wire name of the grant, as sent in the `grant_type` form field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
            Self::ClientCredentials => "client_credentials",
        }
    }

    pub fn all() -> [GrantType; 3] {
        [
            Self::AuthorizationCode,
            Self::RefreshToken,
            Self::ClientCredentials,
        ]
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "authorization_code" => Ok(Self::AuthorizationCode),
            "refresh_token" => Ok(Self::RefreshToken),
            "client_credentials" => Ok(Self::ClientCredentials),
            other => Err(ParseError::UnknownGrantType {
                value: other.to_string(),
            }),
        }
    }
}

/// Marketplace region supported by the vendor APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Country {
    #[default]
    Us,
    Ca,
    Mx,
}

impl Country {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Us => "us",
            Self::Ca => "ca",
            Self::Mx => "mx",
        }
    }

    pub fn all() -> [Country; 3] {
        [Self::Us, Self::Ca, Self::Mx]
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Country {
    type Err = ParseError;

    /// Parses a region code, ignoring case (`"US"` and `"us"` are equal).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "us" => Ok(Self::Us),
            "ca" => Ok(Self::Ca),
            "mx" => Ok(Self::Mx),
            _ => Err(ParseError::UnknownCountry {
                value: s.to_string(),
            }),
        }
    }
}

/// Error parsing one of the closed enumerations.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("unknown grant type '{value}', expected one of authorization_code, refresh_token, client_credentials")]
    UnknownGrantType { value: String },

    #[error("unknown country '{value}', expected one of us, ca, mx")]
    UnknownCountry { value: String },
}
