#![warn(missing_docs)]
//! # portfolio-review-auth
//!
//! ## Purpose
//! Issues and verifies the action-bound security tokens that guard the
//! upload and store endpoints.
//!
//! ## Responsibilities
//! - Derive tokens from a server secret, an action name, and a time tick.
//! - Verify tokens for the current or previous tick in constant time.
//! - Expose a [`TokenVerifier`] seam so the gateway can be tested without a
//!   real secret.
//!
//! ## Data flow
//! Server hands a token to the page via [`TokenAuthority::issue`] -> browser
//! echoes it in each form post -> gateway calls [`TokenVerifier::verify`]
//! before doing any privileged work.
//!
//! ## Ownership and lifetimes
//! The authority owns its secret bytes; tokens are owned strings.
//!
//! ## Error model
//! Construction problems and verification failures are [`AuthError`] values.
//! Verification fails closed: anything but an exact match is rejected.
//!
//! ## Security and privacy notes
//! Tokens and the secret are excluded from `Debug` output.
//!
//! ## Example
//! ```rust
//! use portfolio_review_auth::{TokenAuthority, TokenVerifier, UPLOAD_ACTION};
//!
//! let authority = TokenAuthority::new(b"secret".to_vec(), 60_000).unwrap();
//! let token = authority.issue(UPLOAD_ACTION, 1_000).unwrap();
//! assert!(authority.verify(UPLOAD_ACTION, token.as_str(), 1_500).is_ok());
//! ```

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Action name shared by the analyze and store endpoints.
pub const UPLOAD_ACTION: &str = "portfolio_upload";

/// Hex characters kept from the MAC.
const TOKEN_HEX_LEN: usize = 24;

type HmacSha256 = Hmac<Sha256>;

/// Opaque token handed to the browser.
#[derive(Clone, PartialEq, Eq)]
pub struct SecurityToken(String);

impl SecurityToken {
    /// Borrowed token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Owned token text.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for SecurityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecurityToken(<redacted>)")
    }
}

/// Verifies tokens for one action.
pub trait TokenVerifier: Send + Sync {
    /// Checks `token` for `action` at `now_ms`.
    ///
    /// # Errors
    /// Returns [`AuthError::MissingToken`] for blank input and
    /// [`AuthError::InvalidToken`] for anything that does not match.
    fn verify(&self, action: &str, token: &str, now_ms: u64) -> Result<(), AuthError>;
}

/// HMAC-based token issuer/verifier.
///
/// Time is divided into ticks of half the lifetime. A token issued in tick `n`
/// verifies during ticks `n` and `n + 1`, so its usable life lies between half
/// and the full lifetime.
#[derive(Clone)]
pub struct TokenAuthority {
    secret: Vec<u8>,
    lifetime_ms: u64,
}

impl TokenAuthority {
    /// Creates an authority.
    ///
    /// # Errors
    /// Returns [`AuthError::EmptySecret`] for an empty secret and
    /// [`AuthError::InvalidLifetime`] when `lifetime_ms < 2`.
    pub fn new(secret: Vec<u8>, lifetime_ms: u64) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::EmptySecret);
        }
        if lifetime_ms < 2 {
            return Err(AuthError::InvalidLifetime);
        }

        Ok(Self {
            secret,
            lifetime_ms,
        })
    }

    /// Issues a token for `action` valid from `now_ms`.
    ///
    /// # Errors
    /// Returns [`AuthError::Key`] if the MAC cannot be keyed.
    pub fn issue(&self, action: &str, now_ms: u64) -> Result<SecurityToken, AuthError> {
        self.digest(action, self.tick(now_ms)).map(SecurityToken)
    }

    fn tick(&self, now_ms: u64) -> u64 {
        now_ms / (self.lifetime_ms / 2) + 1
    }

    fn digest(&self, action: &str, tick: u64) -> Result<String, AuthError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| AuthError::Key)?;
        mac.update(action.as_bytes());
        mac.update(b"|");
        mac.update(&tick.to_be_bytes());

        let mut encoded = hex::encode(mac.finalize().into_bytes());
        encoded.truncate(TOKEN_HEX_LEN);
        Ok(encoded)
    }
}

impl TokenVerifier for TokenAuthority {
    fn verify(&self, action: &str, token: &str, now_ms: u64) -> Result<(), AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let current = self.tick(now_ms);
        for tick in [current, current.saturating_sub(1)] {
            let expected = self.digest(action, tick)?;
            if bool::from(expected.as_bytes().ct_eq(token.as_bytes())) {
                return Ok(());
            }
        }

        Err(AuthError::InvalidToken)
    }
}

impl fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("secret", &"<redacted>")
            .field("lifetime_ms", &self.lifetime_ms)
            .finish()
    }
}

/// Errors produced by token issue/verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Secret must not be empty.
    #[error("token secret must be non-empty")]
    EmptySecret,
    /// Lifetime too short to split into ticks.
    #[error("token lifetime must be at least 2ms")]
    InvalidLifetime,
    /// MAC could not be keyed.
    #[error("token key setup failed")]
    Key,
    /// No token supplied.
    #[error("security token is missing")]
    MissingToken,
    /// Token does not match.
    #[error("security token is invalid or expired")]
    InvalidToken,
}
