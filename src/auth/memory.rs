//! In-process identity provider

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use super::{check_credentials, AuthError, AuthUser, IdentityProvider, OAuthProvider};

struct Account {
    user: AuthUser,
    password: Option<String>,
}

#[derive(Default)]
struct Accounts {
    by_email: HashMap<String, Account>,
    federated: HashMap<(OAuthProvider, String), AuthUser>,
}

/// Identity provider keeping accounts in memory
///
/// Sign-up signs the new account in immediately. Federated sign-in only
/// accepts ID tokens registered with [`add_federated_account`](Self::add_federated_account).
#[derive(Clone)]
pub struct LocalIdentity {
    accounts: Arc<Mutex<Accounts>>,
    state: Arc<watch::Sender<Option<AuthUser>>>,
}

impl Default for LocalIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalIdentity {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            accounts: Arc::new(Mutex::new(Accounts::default())),
            state: Arc::new(state),
        }
    }

    /// Register an ID token that signs in as the given federated account
    pub async fn add_federated_account(
        &self,
        provider: OAuthProvider,
        id_token: &str,
        email: &str,
        display_name: Option<&str>,
    ) -> AuthUser {
        let user = AuthUser {
            id: Uuid::new_v4().simple().to_string(),
            email: email.to_string(),
            display_name: display_name.map(str::to_string),
        };
        let mut accounts = self.accounts.lock().await;
        accounts
            .federated
            .insert((provider, id_token.to_string()), user.clone());
        user
    }

    fn set_current(&self, user: Option<AuthUser>) {
        self.state.send_replace(user);
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentity {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        check_credentials(email, password)?;
        let key = email.trim().to_lowercase();
        let mut accounts = self.accounts.lock().await;
        if accounts.by_email.contains_key(&key) {
            return Err(AuthError::InvalidInput(format!(
                "an account for {} already exists",
                email
            )));
        }

        let user = AuthUser {
            id: Uuid::new_v4().simple().to_string(),
            email: email.trim().to_string(),
            display_name: None,
        };
        accounts.by_email.insert(
            key,
            Account {
                user: user.clone(),
                password: Some(password.to_string()),
            },
        );
        drop(accounts);

        info!("created local account {}", user.id);
        self.set_current(Some(user.clone()));
        Ok(user)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        check_credentials(email, password)?;
        let key = email.trim().to_lowercase();
        let user = {
            let accounts = self.accounts.lock().await;
            match accounts.by_email.get(&key) {
                Some(account) if account.password.as_deref() == Some(password) => {
                    account.user.clone()
                }
                _ => return Err(AuthError::InvalidCredentials),
            }
        };
        self.set_current(Some(user.clone()));
        Ok(user)
    }

    async fn sign_in_with_id_token(
        &self,
        provider: OAuthProvider,
        id_token: &str,
    ) -> Result<AuthUser, AuthError> {
        let user = {
            let accounts = self.accounts.lock().await;
            accounts
                .federated
                .get(&(provider, id_token.to_string()))
                .cloned()
                .ok_or(AuthError::InvalidCredentials)?
        };
        info!("signed in {} via {}", user.id, provider.as_str());
        self.set_current(Some(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if self.state.borrow().is_none() {
            return Err(AuthError::NotSignedIn);
        }
        self.set_current(None);
        Ok(())
    }

    fn on_auth_change(&self) -> watch::Receiver<Option<AuthUser>> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_up_signs_in() {
        let identity = LocalIdentity::new();
        let mut changes = identity.on_auth_change();
        assert!(changes.borrow_and_update().is_none());

        let user = identity.sign_up("ana@escola.br", "segredo").await.unwrap();
        changes.changed().await.unwrap();
        assert_eq!(changes.borrow().as_ref(), Some(&user));
        assert_eq!(identity.current_user(), Some(user));
    }

    #[tokio::test]
    async fn duplicate_sign_up_is_rejected() {
        let identity = LocalIdentity::new();
        identity.sign_up("ana@escola.br", "segredo").await.unwrap();
        let again = identity.sign_up("Ana@Escola.br", "outra").await;
        assert!(matches!(again, Err(AuthError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn sign_in_checks_password() {
        let identity = LocalIdentity::new();
        let created = identity.sign_up("ana@escola.br", "segredo").await.unwrap();
        identity.sign_out().await.unwrap();

        assert!(matches!(
            identity.sign_in("ana@escola.br", "errada").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(identity.current_user().is_none());

        let user = identity.sign_in("ana@escola.br", "segredo").await.unwrap();
        assert_eq!(user.id, created.id);
    }

    #[tokio::test]
    async fn federated_sign_in() {
        let identity = LocalIdentity::new();
        let shared = identity.clone();
        let registered = shared
            .add_federated_account(OAuthProvider::Google, "google-token", "bia@gmail.com", Some("Bia Lima"))
            .await;

        let user = identity
            .sign_in_with_id_token(OAuthProvider::Google, "google-token")
            .await
            .unwrap();
        assert_eq!(user, registered);
        assert_eq!(user.display_name.as_deref(), Some("Bia Lima"));

        assert!(matches!(
            identity
                .sign_in_with_id_token(OAuthProvider::Apple, "google-token")
                .await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn sign_out_without_session() {
        let identity = LocalIdentity::new();
        assert!(matches!(identity.sign_out().await, Err(AuthError::NotSignedIn)));
    }
}
