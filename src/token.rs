//! Session tokens: signed, time-boxed claims binding a username.
//!
//! Tokens are stateless JWTs. Validation fails closed: any decode or
//! signature problem simply reads as "not valid".

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::TokenConfig;
use crate::error::{DriveError, Result};

/// Default token lifetime (10 minutes).
pub const DEFAULT_LIFETIME_SECS: i64 = 10 * 60;

/// Remaining lifetime below which a valid token is reissued (2 minutes).
pub const DEFAULT_REFRESH_WINDOW_SECS: i64 = 2 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
}

/// Signing material for tokens.
pub enum TokenKeys {
    /// HS256 shared secret.
    Hmac(Vec<u8>),
    /// RS256 key pair in PEM form.
    Rsa {
        private_pem: Vec<u8>,
        public_pem: Vec<u8>,
    },
}

impl TokenKeys {
    /// A random HS256 secret. Tokens signed with it die with the process.
    pub fn ephemeral() -> Self {
        let mut secret = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        TokenKeys::Hmac(secret)
    }
}

/// The result of checking a request's token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub username: String,
    /// Token to echo back; a fresh one when the presented token was close to expiry.
    pub token: String,
    pub refreshed: bool,
}

pub struct TokenAuthority {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime_secs: i64,
    refresh_window_secs: i64,
}

impl TokenAuthority {
    pub fn new(keys: TokenKeys, lifetime_secs: i64, refresh_window_secs: i64) -> Result<Self> {
        let (algorithm, encoding, decoding) = match keys {
            TokenKeys::Hmac(secret) => (
                Algorithm::HS256,
                EncodingKey::from_secret(&secret),
                DecodingKey::from_secret(&secret),
            ),
            TokenKeys::Rsa {
                private_pem,
                public_pem,
            } => (
                Algorithm::RS256,
                EncodingKey::from_rsa_pem(&private_pem)?,
                DecodingKey::from_rsa_pem(&public_pem)?,
            ),
        };

        Ok(Self {
            algorithm,
            encoding,
            decoding,
            lifetime_secs,
            refresh_window_secs,
        })
    }

    pub fn from_config(config: &TokenConfig) -> Result<Self> {
        let keys = match (
            &config.secret,
            &config.rsa_private_key_path,
            &config.rsa_public_key_path,
        ) {
            (_, Some(private), Some(public)) => TokenKeys::Rsa {
                private_pem: std::fs::read(private).map_err(|e| {
                    DriveError::Config(format!("read {}: {e}", private.display()))
                })?,
                public_pem: std::fs::read(public).map_err(|e| {
                    DriveError::Config(format!("read {}: {e}", public.display()))
                })?,
            },
            (_, Some(_), None) | (_, None, Some(_)) => {
                return Err(DriveError::Config(
                    "both rsa_private_key_path and rsa_public_key_path are required".into(),
                ));
            }
            (Some(secret), None, None) => TokenKeys::Hmac(secret.as_bytes().to_vec()),
            (None, None, None) => {
                warn!("no token key configured; sessions will not survive a restart");
                TokenKeys::ephemeral()
            }
        };

        Self::new(keys, config.lifetime_secs, config.refresh_window_secs)
    }

    /// Mint a token for `username` expiring `lifetime` from now.
    pub fn issue(&self, username: &str) -> Result<String> {
        self.issue_at(username, now())
    }

    pub fn issue_at(&self, username: &str, now: i64) -> Result<String> {
        let claims = Claims {
            username: username.to_string(),
            exp: now + self.lifetime_secs,
        };
        let token = jsonwebtoken::encode(&Header::new(self.algorithm), &claims, &self.encoding)?;
        debug!(username, exp = claims.exp, "token issued");
        Ok(token)
    }

    /// False for any malformed, badly signed or expired token.
    pub fn validate(&self, token: &str) -> bool {
        self.validate_at(token, now())
    }

    pub fn validate_at(&self, token: &str, now: i64) -> bool {
        self.decode(token).is_ok_and(|claims| claims.exp > now)
    }

    /// True when the remaining lifetime is inside the refresh window.
    pub fn needs_refresh(&self, token: &str) -> bool {
        self.needs_refresh_at(token, now())
    }

    pub fn needs_refresh_at(&self, token: &str, now: i64) -> bool {
        self.decode(token)
            .is_ok_and(|claims| claims.exp - now < self.refresh_window_secs)
    }

    /// Decode the claims of a token. Callers validate first.
    pub fn claims(&self, token: &str) -> Result<Claims> {
        self.decode(token)
    }

    /// Validate a presented token and reissue it when close to expiry.
    pub fn authenticate(&self, token: &str) -> Option<Authenticated> {
        self.authenticate_at(token, now())
    }

    pub fn authenticate_at(&self, token: &str, now: i64) -> Option<Authenticated> {
        let claims = self.decode(token).ok().filter(|claims| claims.exp > now)?;

        if claims.exp - now < self.refresh_window_secs {
            match self.issue_at(&claims.username, now) {
                Ok(fresh) => {
                    return Some(Authenticated {
                        username: claims.username,
                        token: fresh,
                        refreshed: true,
                    });
                }
                Err(e) => warn!(error = %e, "token refresh failed; echoing the old token"),
            }
        }

        Some(Authenticated {
            username: claims.username,
            token: token.to_string(),
            refreshed: false,
        })
    }

    fn decode(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(self.algorithm);
        // Expiry is checked against an explicit clock by the callers.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|_| DriveError::InvalidToken)?;
        Ok(data.claims)
    }
}

fn now() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority() -> TokenAuthority {
        TokenAuthority::new(
            TokenKeys::Hmac(b"test-secret".to_vec()),
            DEFAULT_LIFETIME_SECS,
            DEFAULT_REFRESH_WINDOW_SECS,
        )
        .unwrap()
    }

    #[test]
    fn test_token_lifecycle() {
        let auth = authority();
        let t0 = 1_700_000_000;
        let token = auth.issue_at("alice", t0).unwrap();

        assert!(auth.validate_at(&token, t0));
        assert!(auth.validate_at(&token, t0 + 9 * 60 + 59));
        assert!(!auth.validate_at(&token, t0 + 10 * 60));
        assert!(!auth.validate_at(&token, t0 + 11 * 60));

        // Refresh only inside the final two minutes.
        assert!(!auth.needs_refresh_at(&token, t0));
        assert!(!auth.needs_refresh_at(&token, t0 + 8 * 60));
        assert!(auth.needs_refresh_at(&token, t0 + 8 * 60 + 1));
        assert!(auth.needs_refresh_at(&token, t0 + 9 * 60 + 30));

        let claims = auth.claims(&token).unwrap();
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.exp, t0 + DEFAULT_LIFETIME_SECS);
    }

    #[test]
    fn test_validation_fails_closed() {
        let auth = authority();
        assert!(!auth.validate(""));
        assert!(!auth.validate("not.a.token"));
        assert!(!auth.validate("garbage"));
        assert!(!auth.needs_refresh("garbage"));
        assert!(auth.claims("garbage").is_err());

        let other = TokenAuthority::new(
            TokenKeys::Hmac(b"another-secret".to_vec()),
            DEFAULT_LIFETIME_SECS,
            DEFAULT_REFRESH_WINDOW_SECS,
        )
        .unwrap();
        let foreign = other.issue("mallory").unwrap();
        assert!(!auth.validate(&foreign));
    }

    #[test]
    fn test_authenticate_refreshes_near_expiry() {
        let auth = authority();
        let t0 = 1_700_000_000;
        let token = auth.issue_at("alice", t0).unwrap();

        let fresh = auth.authenticate_at(&token, t0 + 60).unwrap();
        assert!(!fresh.refreshed);
        assert_eq!(fresh.token, token);
        assert_eq!(fresh.username, "alice");

        let late = auth.authenticate_at(&token, t0 + 9 * 60).unwrap();
        assert!(late.refreshed);
        assert_ne!(late.token, token);
        assert_eq!(
            auth.claims(&late.token).unwrap().exp,
            t0 + 9 * 60 + DEFAULT_LIFETIME_SECS
        );

        assert!(auth.authenticate_at(&token, t0 + 10 * 60).is_none());
    }

    #[test]
    fn test_ephemeral_keys_differ() {
        let a = TokenAuthority::new(TokenKeys::ephemeral(), 600, 120).unwrap();
        let b = TokenAuthority::new(TokenKeys::ephemeral(), 600, 120).unwrap();
        let token = a.issue("alice").unwrap();
        assert!(a.validate(&token));
        assert!(!b.validate(&token));
    }
}
