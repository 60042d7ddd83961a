//! Caller identity collaborators
//!
//! The engine authorizes every caller-facing operation through a
//! [`TokenVerifier`] and decorates output through an [`AccountLookup`].
//! Both are traits so a deployment can plug in its own session service;
//! [`StaticTokenVerifier`] and the [`Database`] account table are the
//! built-in implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::{AuthConfig, StaticTokenConfig};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{Account, AccountId};

/// Identity extracted from a valid token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    /// Account the token belongs to
    pub account_id: AccountId,
    /// Expiry, `None` for tokens that never expire
    pub expires_at: Option<DateTime<Utc>>,
}

/// Trait for verifying caller tokens
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify `token` and return the identity it carries
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthenticated`] for missing, unknown or expired tokens.
    async fn verify(&self, token: &str) -> Result<VerifiedToken>;
}

/// Trait for resolving account display data
#[async_trait]
pub trait AccountLookup: Send + Sync {
    /// Account by ID, `None` when it does not exist
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>>;
}

#[async_trait]
impl AccountLookup for Database {
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        Database::get_account(self, id).await
    }
}

/// Verifier over a fixed list of configured tokens
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: Vec<StaticTokenConfig>,
}

impl StaticTokenVerifier {
    /// Verifier accepting exactly `tokens`
    pub fn new(tokens: Vec<StaticTokenConfig>) -> Self {
        Self { tokens }
    }

    /// Verifier built from the auth section of the configuration
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.tokens.clone())
    }

    /// Accept `token` for `account_id` without expiry
    pub fn with_token(mut self, token: impl Into<String>, account_id: AccountId) -> Self {
        self.tokens.push(StaticTokenConfig {
            token: token.into(),
            account_id,
            expires_at: None,
        });
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedToken> {
        if token.is_empty() {
            return Err(Error::Unauthenticated("missing token".into()));
        }

        // Compare against every entry so the match position does not show in timing
        let mut matched: Option<&StaticTokenConfig> = None;
        for entry in &self.tokens {
            if constant_time_eq(entry.token.as_bytes(), token.as_bytes()) && matched.is_none() {
                matched = Some(entry);
            }
        }

        let Some(entry) = matched else {
            return Err(Error::Unauthenticated("invalid token".into()));
        };
        if let Some(expires_at) = entry.expires_at {
            if expires_at <= Utc::now() {
                return Err(Error::Unauthenticated("token expired".into()));
            }
        }

        Ok(VerifiedToken {
            account_id: entry.account_id,
            expires_at: entry.expires_at,
        })
    }
}

/// Constant-time byte comparison to prevent timing side-channel attacks.
/// Always compares all bytes regardless of where the first mismatch occurs.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
