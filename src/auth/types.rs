//! Types for authentication

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use super::Session;

/// The signed-in identity as the rest of the crate sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    /// Stable user id issued by the identity provider
    pub id: String,

    /// Email address of the account
    pub email: String,

    /// Name reported by the provider (federated sign-in usually has one)
    pub display_name: Option<String>,
}

/// User object returned by the auth API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiUser {
    pub id: String,

    pub email: Option<String>,

    #[serde(default)]
    pub user_metadata: HashMap<String, serde_json::Value>,
}

impl ApiUser {
    /// Convert to an [`AuthUser`], picking a display name from the metadata
    pub fn into_auth_user(self) -> AuthUser {
        let display_name = ["full_name", "name"]
            .iter()
            .filter_map(|key| self.user_metadata.get(*key))
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .find(|s| !s.trim().is_empty());
        AuthUser {
            id: self.id,
            email: self.email.unwrap_or_default(),
            display_name,
        }
    }
}

/// Token response of the auth API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,

    pub refresh_token: String,

    #[serde(default = "default_token_type")]
    pub token_type: String,

    pub expires_in: i64,

    pub user: ApiUser,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl AuthResponse {
    pub fn into_session(self) -> Session {
        Session::new(
            self.access_token,
            self.refresh_token,
            self.expires_in,
            self.user.into_auth_user(),
        )
    }
}

/// Sign-up answers with a session, or only with the user when the account
/// still has to be confirmed by email
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SignUpResponse {
    Session(AuthResponse),
    Pending(ApiUser),
}

/// Federated identity providers accepted by `sign_in_with_id_token`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Apple,
    Facebook,
    Github,
    Microsoft,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Apple => "apple",
            Self::Facebook => "facebook",
            Self::Github => "github",
            Self::Microsoft => "microsoft",
        }
    }
}

/// Shared slot holding the current access token
///
/// The auth client writes it on sign-in/sign-out; HTTP backends read it to
/// authenticate their requests as the signed-in user.
#[derive(Debug, Clone, Default)]
pub struct AccessToken(Arc<RwLock<Option<String>>>);

impl AccessToken {
    pub fn get(&self) -> Option<String> {
        match self.0.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, token: Option<String>) {
        match self.0.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }
}
