//! Authenticated session derived from an access token.
//!
//! Only the claim set matters here: the token is never verified locally, the
//! backend does that on every request. Expiry is checked lazily against the
//! wall clock whenever the session is read.

use crate::error::{DashboardError, DashboardResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Dashboard role granted by the token's groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Member of `admin` or `administrator`.
    Administrator,
    /// Everyone else.
    User,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Administrator => write!(f, "Administrator"),
            Self::User => write!(f, "User"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
    upn: Option<String>,
    #[serde(default)]
    groups: Vec<String>,
}

/// Access token plus the claims the dashboard reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Bearer token sent to the REST API.
    #[serde(skip_serializing)]
    pub access_token: String,
    /// Absolute expiry in epoch milliseconds.
    pub expiry_epoch_millis: i64,
    /// `sub` claim, or `upn` when `sub` is absent.
    pub subject_id: String,
    /// `groups` claim.
    pub groups: BTreeSet<String>,
}

impl Session {
    /// Build a session from a JWT and its expiry.
    ///
    /// # Errors
    ///
    /// Returns [`DashboardError::Session`] if the payload segment is missing,
    /// not base64url, not JSON, or carries no subject.
    pub fn from_token(access_token: &str, expiry_epoch_millis: i64) -> DashboardResult<Self> {
        let payload = access_token
            .split('.')
            .nth(1)
            .ok_or_else(|| DashboardError::Session("token has no payload segment".into()))?;

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| DashboardError::Session(format!("payload is not base64url: {e}")))?;

        let claims: Claims = serde_json::from_slice(&bytes)
            .map_err(|e| DashboardError::Session(format!("payload is not a claim set: {e}")))?;

        let subject_id = claims
            .sub
            .or(claims.upn)
            .ok_or_else(|| DashboardError::Session("token has neither sub nor upn".into()))?;

        Ok(Self {
            access_token: access_token.to_string(),
            expiry_epoch_millis,
            subject_id,
            groups: claims.groups.into_iter().collect(),
        })
    }

    /// Derived role.
    #[must_use]
    pub fn role(&self) -> Role {
        let admin = self.groups.iter().any(|g| {
            g.eq_ignore_ascii_case("admin") || g.eq_ignore_ascii_case("administrator")
        });
        if admin {
            Role::Administrator
        } else {
            Role::User
        }
    }

    /// Whether the token is past its expiry at `now_millis`.
    #[must_use]
    pub fn is_expired(&self, now_millis: i64) -> bool {
        now_millis > self.expiry_epoch_millis
    }

    /// Same as [`Session::is_expired`] against the current wall clock.
    #[must_use]
    pub fn is_expired_now(&self) -> bool {
        self.is_expired(chrono::Utc::now().timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(claims: &str) -> String {
        format!(
            "eyJhbGciOiJSUzI1NiJ9.{}.signature",
            URL_SAFE_NO_PAD.encode(claims)
        )
    }

    #[test]
    fn test_admin_group_case_insensitive() {
        let s = Session::from_token(&token(r#"{"sub":"u1","groups":["Administrator"]}"#), 0)
            .unwrap();
        assert_eq!(s.subject_id, "u1");
        assert_eq!(s.role(), Role::Administrator);

        let s = Session::from_token(&token(r#"{"sub":"u1","groups":["ADMIN"]}"#), 0).unwrap();
        assert_eq!(s.role(), Role::Administrator);
    }

    #[test]
    fn test_plain_user() {
        let s = Session::from_token(&token(r#"{"upn":"farmer@x","groups":["farmers"]}"#), 0)
            .unwrap();
        assert_eq!(s.subject_id, "farmer@x");
        assert_eq!(s.role(), Role::User);

        let s = Session::from_token(&token(r#"{"sub":"u2"}"#), 0).unwrap();
        assert!(s.groups.is_empty());
        assert_eq!(s.role(), Role::User);
    }

    #[test]
    fn test_expiry_compared_at_read_time() {
        let s = Session::from_token(&token(r#"{"sub":"u1"}"#), 1_000).unwrap();
        assert!(!s.is_expired(1_000));
        assert!(s.is_expired(1_001));
    }

    #[test]
    fn test_malformed_tokens() {
        assert!(matches!(
            Session::from_token("not-a-jwt", 0),
            Err(DashboardError::Session(_))
        ));
        assert!(Session::from_token("a.!!!.c", 0).is_err());
        assert!(Session::from_token(&token(r#"{"groups":[]}"#), 0).is_err());
    }
}
