//! Session held by the auth client

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::AuthUser;

/// Session data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,

    pub refresh_token: String,

    pub token_type: String,

    /// Lifetime in seconds, as issued
    pub expires_in: i64,

    /// Expiry as a unix timestamp
    pub expires_at: Option<i64>,

    pub user: AuthUser,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs() as i64
}

impl Session {
    pub fn new(access_token: String, refresh_token: String, expires_in: i64, user: AuthUser) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: "bearer".to_string(),
            expires_in,
            expires_at: Some(unix_now() + expires_in),
            user,
        }
    }

    /// Check if the session has expired
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => unix_now() >= expires_at,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> AuthUser {
        AuthUser {
            id: "u1".into(),
            email: "ana@escola.br".into(),
            display_name: None,
        }
    }

    #[test]
    fn fresh_session_is_valid() {
        let session = Session::new("a".into(), "r".into(), 3600, user());
        assert!(!session.is_expired());
    }

    #[test]
    fn zero_lifetime_is_expired() {
        let session = Session::new("a".into(), "r".into(), 0, user());
        assert!(session.is_expired());
    }
}
