//! Identity provider contract and its implementations
//!
//! [`AuthClient`] talks to a GoTrue-compatible auth API over HTTP.
//! [`LocalIdentity`] keeps accounts in memory for tests and demos.

mod memory;
mod session;
mod types;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{info, warn};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::sync::watch;

use crate::config::ClientOptions;
use crate::fetch::{Fetch, FetchError};

pub use memory::LocalIdentity;
pub use session::Session;
pub use types::*;

/// Error type for identity operations
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("not signed in")]
    NotSignedIn,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("auth API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl From<FetchError> for AuthError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Status { status, body } => AuthError::Api {
                status: status.as_u16(),
                message: body,
            },
            FetchError::Http(e) => AuthError::Http(e),
            FetchError::Json(e) => AuthError::Json(e),
            FetchError::Url(e) => AuthError::Url(e),
        }
    }
}

/// Bad credentials come back as 400/401 from the token endpoint
fn credentials_error(err: FetchError) -> AuthError {
    match err {
        FetchError::Status { status, .. }
            if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED =>
        {
            AuthError::InvalidCredentials
        }
        other => other.into(),
    }
}

fn check_credentials(email: &str, password: &str) -> Result<(), AuthError> {
    if email.trim().is_empty() || !email.contains('@') {
        return Err(AuthError::InvalidInput("a valid email is required".into()));
    }
    if password.is_empty() {
        return Err(AuthError::InvalidInput("password cannot be empty".into()));
    }
    Ok(())
}

/// Contract of the identity provider
///
/// `on_auth_change` hands out a watch receiver whose current value is the
/// signed-in user (or `None`), so every listener observes the state at least
/// once when it starts, then every change.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create an account; signs it in when the provider issues a session right away
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, AuthError>;

    /// Sign in with email and password
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthError>;

    /// Sign in with an ID token obtained from a federated provider
    async fn sign_in_with_id_token(
        &self,
        provider: OAuthProvider,
        id_token: &str,
    ) -> Result<AuthUser, AuthError>;

    /// End the current session
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Subscribe to session changes
    fn on_auth_change(&self) -> watch::Receiver<Option<AuthUser>>;

    /// The user currently signed in
    fn current_user(&self) -> Option<AuthUser> {
        let rx = self.on_auth_change();
        let user = rx.borrow().clone();
        user
    }
}

/// Client for a GoTrue-compatible auth API
pub struct AuthClient {
    url: String,
    key: String,
    client: Client,
    options: ClientOptions,
    session: Arc<Mutex<Option<Session>>>,
    token: AccessToken,
    state: watch::Sender<Option<AuthUser>>,
}

impl AuthClient {
    pub fn new(url: &str, key: &str, client: Client, options: ClientOptions) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            client,
            options,
            session: Arc::new(Mutex::new(None)),
            token: AccessToken::default(),
            state,
        }
    }

    fn get_auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.url, path)
    }

    /// Token slot kept in sync with the session, for the HTTP store
    pub fn access_token(&self) -> AccessToken {
        self.token.clone()
    }

    /// Get the current session
    pub fn get_session(&self) -> Option<Session> {
        match self.session.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn store_session(&self, session: Option<Session>) {
        self.token.set(session.as_ref().map(|s| s.access_token.clone()));
        let user = session.as_ref().map(|s| s.user.clone());
        match self.session.lock() {
            Ok(mut guard) => *guard = session,
            Err(poisoned) => *poisoned.into_inner() = session,
        }
        self.state.send_replace(user);
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: &HashMap<&str, &str>,
    ) -> Result<AuthUser, AuthError> {
        let url = self.get_auth_url(&format!("/token?grant_type={}", grant_type));
        let response = Fetch::post(&self.client, &url)
            .header("apikey", &self.key)
            .timeout(self.options.request_timeout)
            .json(body)?
            .execute::<AuthResponse>()
            .await
            .map_err(credentials_error)?;

        let session = response.into_session();
        let user = session.user.clone();
        self.store_session(Some(session));
        info!("signed in {} via {}", user.id, grant_type);
        Ok(user)
    }
}

#[async_trait]
impl IdentityProvider for AuthClient {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        check_credentials(email, password)?;
        let url = self.get_auth_url("/signup");
        let body = HashMap::from([("email", email), ("password", password)]);

        let response = Fetch::post(&self.client, &url)
            .header("apikey", &self.key)
            .timeout(self.options.request_timeout)
            .json(&body)?
            .execute::<SignUpResponse>()
            .await?;

        match response {
            SignUpResponse::Session(auth) => {
                let session = auth.into_session();
                let user = session.user.clone();
                self.store_session(Some(session));
                info!("signed up and signed in {}", user.id);
                Ok(user)
            }
            SignUpResponse::Pending(user) => {
                let user = user.into_auth_user();
                info!("signed up {}, awaiting confirmation", user.id);
                Ok(user)
            }
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        check_credentials(email, password)?;
        let body = HashMap::from([("email", email), ("password", password)]);
        self.token_grant("password", &body).await
    }

    async fn sign_in_with_id_token(
        &self,
        provider: OAuthProvider,
        id_token: &str,
    ) -> Result<AuthUser, AuthError> {
        if id_token.trim().is_empty() {
            return Err(AuthError::InvalidInput("id token cannot be empty".into()));
        }
        let body = HashMap::from([("provider", provider.as_str()), ("id_token", id_token)]);
        self.token_grant("id_token", &body).await
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let token = match self.get_session() {
            Some(session) => session.access_token,
            None => return Err(AuthError::NotSignedIn),
        };

        let result = Fetch::post(&self.client, &self.get_auth_url("/logout"))
            .header("apikey", &self.key)
            .bearer_auth(&token)
            .timeout(self.options.request_timeout)
            .send()
            .await;

        // the local session ends even when the server call fails
        self.store_session(None);
        match result {
            Ok(_) => {
                info!("signed out");
                Ok(())
            }
            Err(e) => {
                warn!("logout request failed: {}", e);
                Err(e.into())
            }
        }
    }

    fn on_auth_change(&self) -> watch::Receiver<Option<AuthUser>> {
        self.state.subscribe()
    }
}
