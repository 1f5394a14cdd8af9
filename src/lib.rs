//! Sala Solidária client library
//!
//! Teachers publish projects listing the classroom materials they need,
//! record what has been received, and donors look up the owner's contact
//! details to arrange a delivery.
//!
//! The crate talks to two collaborators through traits: a
//! [`DocumentStore`](store::DocumentStore) and an
//! [`IdentityProvider`](auth::IdentityProvider). [`SalaSolidaria`] wires them
//! to the services and to the session state, and takes the caller from the
//! session for every operation.

pub mod auth;
pub mod config;
pub mod error;
pub mod fetch;
pub mod ledger;
pub mod models;
pub mod profile;
pub mod projects;
pub mod session;
pub mod store;

use std::sync::Arc;

use log::info;
use reqwest::Client;

use crate::auth::{AuthClient, AuthUser, IdentityProvider, OAuthProvider};
use crate::config::{ClientOptions, Config};
use crate::error::{Error, Result};
use crate::ledger::{ItemLedger, ItemSubscription};
use crate::models::{ContactCard, Item, ProfileUpdate, Project, ProjectDraft};
use crate::profile::{ProfileService, PropagationReport};
use crate::projects::{ProjectFilter, ProjectManager};
use crate::session::{SessionSnapshot, SessionState};
use crate::store::{DocumentStore, RestStore};

/// The main entry point for the Sala Solidária client
#[derive(Clone)]
pub struct SalaSolidaria {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    options: ClientOptions,
    projects: ProjectManager,
    ledger: ItemLedger,
    profiles: ProfileService,
    session: SessionState,
}

impl SalaSolidaria {
    /// Connect to a hosted backend: PostgREST for documents, GoTrue for identity
    ///
    /// Must be called inside a tokio runtime, since the session listener is
    /// spawned right away.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use sala_solidaria::{config::Config, SalaSolidaria};
    ///
    /// # async fn run() -> sala_solidaria::error::Result<()> {
    /// let config = Config::new("https://your-project-url.supabase.co", "your-anon-key")?;
    /// let app = SalaSolidaria::connect(config)?;
    /// app.sign_in("ana@escola.br", "segredo").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn connect(config: Config) -> Result<Self> {
        let http_client = Client::builder()
            .build()
            .map_err(|e| Error::config(format!("could not build HTTP client: {}", e)))?;
        let base_url = config.base_url();

        let auth = AuthClient::new(
            &base_url,
            &config.api_key,
            http_client.clone(),
            config.options.clone(),
        );
        let store = RestStore::new(
            &base_url,
            &config.api_key,
            http_client,
            config.options.clone(),
        )
        .with_access_token(auth.access_token());

        info!("connecting to {}", base_url);
        Ok(Self::with_backends(
            Arc::new(store),
            Arc::new(auth),
            config.options,
        ))
    }

    /// Build the client over any store and identity provider
    ///
    /// Must be called inside a tokio runtime.
    pub fn with_backends(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        options: ClientOptions,
    ) -> Self {
        let projects = ProjectManager::new(store.clone(), options.clone());
        let ledger = ItemLedger::new(store.clone());
        let profiles = ProfileService::new(store.clone());
        let session = SessionState::start(identity.clone(), profiles.clone());

        Self {
            store,
            identity,
            options,
            projects,
            ledger,
            profiles,
            session,
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn projects(&self) -> &ProjectManager {
        &self.projects
    }

    pub fn ledger(&self) -> &ItemLedger {
        &self.ledger
    }

    pub fn profiles(&self) -> &ProfileService {
        &self.profiles
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    fn caller(&self) -> Result<AuthUser> {
        self.session.user().ok_or(Error::NotAuthenticated)
    }

    /// Wait for the session to pick up `user` if the provider signed them in
    async fn settle(&self, user: AuthUser) -> AuthUser {
        if self.identity.current_user().as_ref().map(|u| &u.id) == Some(&user.id) {
            self.session.wait_for_user(&user.id).await;
        }
        user
    }

    /// Create an account; the session follows when the provider signs it in
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser> {
        let user = self.identity.sign_up(email, password).await?;
        Ok(self.settle(user).await)
    }

    /// Sign in and wait until the session holds the user and profile
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser> {
        let user = self.identity.sign_in(email, password).await?;
        Ok(self.settle(user).await)
    }

    /// Federated sign-in; a default profile is created on first use
    pub async fn sign_in_with_id_token(
        &self,
        provider: OAuthProvider,
        id_token: &str,
    ) -> Result<AuthUser> {
        let user = self.identity.sign_in_with_id_token(provider, id_token).await?;
        Ok(self.settle(user).await)
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.identity.sign_out().await?;
        self.session.wait_signed_out().await;
        Ok(())
    }

    /// Current session snapshot
    pub fn current_session(&self) -> SessionSnapshot {
        self.session.current()
    }

    /// Projects for the dashboard: every project for admins, otherwise the
    /// caller's own
    pub async fn dashboard_projects(&self) -> Result<Vec<Project>> {
        let snapshot = self.session.current();
        let user_id = snapshot.user_id().ok_or(Error::NotAuthenticated)?;
        let filter = if snapshot.is_admin() {
            ProjectFilter::All
        } else {
            ProjectFilter::ByOwner(user_id.to_string())
        };
        self.projects.list_projects(&filter).await
    }

    /// Every project, newest first, for donors browsing
    pub async fn browse_projects(&self) -> Result<Vec<Project>> {
        self.projects.list_projects(&ProjectFilter::All).await
    }

    pub async fn get_project(&self, project_id: &str) -> Result<Project> {
        self.projects.get_project(project_id).await
    }

    pub async fn create_project(&self, draft: &ProjectDraft) -> Result<Project> {
        let snapshot = self.session.current();
        self.projects
            .create_project(snapshot.user.as_ref(), snapshot.profile.as_ref(), draft)
            .await
    }

    pub async fn update_project(&self, project_id: &str, draft: &ProjectDraft) -> Result<()> {
        let caller = self.caller()?;
        self.projects.update_project(project_id, &caller.id, draft).await
    }

    pub async fn delete_project(&self, project_id: &str) -> Result<()> {
        let snapshot = self.session.current();
        let caller_id = snapshot.user_id().ok_or(Error::NotAuthenticated)?;
        let role = snapshot.profile.as_ref().map(|p| p.role).unwrap_or_default();
        self.projects.delete_project(project_id, caller_id, role).await
    }

    pub async fn add_item(&self, project_id: &str, name: &str, needed: i64) -> Result<Item> {
        let caller = self.caller()?;
        self.ledger.add_item(project_id, &caller.id, name, needed).await
    }

    pub async fn record_received(
        &self,
        project_id: &str,
        item_id: &str,
        amount: i64,
    ) -> Result<Item> {
        let caller = self.caller()?;
        self.ledger
            .record_received(project_id, item_id, &caller.id, amount)
            .await
    }

    pub async fn delete_item(&self, project_id: &str, item_id: &str) -> Result<()> {
        let caller = self.caller()?;
        self.ledger.delete_item(project_id, item_id, &caller.id).await
    }

    /// Live list of a project's items; no sign-in needed
    pub async fn subscribe_items(&self, project_id: &str) -> Result<ItemSubscription> {
        self.ledger.subscribe(project_id).await
    }

    /// Save the caller's profile and propagate it into their projects
    pub async fn save_profile(&self, update: &ProfileUpdate) -> Result<PropagationReport> {
        let caller = self.caller()?;
        let report = self
            .profiles
            .save_profile(&caller.id, &caller.email, update)
            .await?;
        self.session.set_profile(report.profile.clone());
        Ok(report)
    }

    /// Owner contact details for a project
    pub async fn contact_card(&self, project_id: &str) -> Result<ContactCard> {
        self.profiles.contact_card(project_id).await
    }

    /// Stop the session listener
    pub fn shutdown(&self) {
        self.session.shutdown();
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::auth::{AuthUser, IdentityProvider, LocalIdentity, OAuthProvider};
    pub use crate::config::{ClientOptions, Config};
    pub use crate::error::{Error, Result};
    pub use crate::ledger::ItemSubscription;
    pub use crate::models::{ContactCard, Item, ProfileUpdate, Project, ProjectDraft, Role, UserProfile};
    pub use crate::projects::ProjectFilter;
    pub use crate::store::{DocumentStore, MemoryStore};
    pub use crate::SalaSolidaria;
}
