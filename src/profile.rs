//! User profiles and the propagation of owner fields into projects

use std::sync::Arc;

use log::{debug, info, warn};

use crate::auth::AuthUser;
use crate::error::{Error, Result};
use crate::models::{
    ContactCard, OwnerFields, ProfileFields, ProfileUpdate, Project, UserProfile, PROJECTS, USERS,
};
use crate::store::{to_fields, DocumentStore, Query, WriteBatch};

/// Outcome of [`ProfileService::save_profile`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationReport {
    /// The profile as stored after the save
    pub profile: UserProfile,

    /// Projects whose owner name and school were rewritten
    pub updated_projects: Vec<String>,
}

/// Reads and saves profiles
///
/// A profile save rewrites the denormalized `owner_name` and `school` of
/// every project the user owns, in the same batch as the profile itself, so
/// either everything changes or nothing does.
///
/// The owned projects are found by a query run just before the batch is
/// built. A project created by the same user in between is not part of the
/// batch and keeps its old fields; ownership is not re-checked at commit.
#[derive(Clone)]
pub struct ProfileService {
    store: Arc<dyn DocumentStore>,
}

impl ProfileService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Read a profile; `None` when the user has none yet
    pub async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        match self.store.get(USERS, user_id).await {
            Ok(doc) => Ok(Some(doc.decode()?)),
            Err(e) => match Error::from(e) {
                Error::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    /// Read the profile of a signed-in user, creating the default record on
    /// first use
    pub async fn ensure_profile(&self, user: &AuthUser) -> Result<UserProfile> {
        if let Some(profile) = self.get_profile(&user.id).await? {
            return Ok(profile);
        }

        let name = user.display_name.as_deref().unwrap_or_default();
        let profile = UserProfile::new(&user.id, name, &user.email);
        let mut batch = WriteBatch::new();
        batch.merge(USERS, &user.id, to_fields(&profile)?);
        self.store.commit(batch).await?;
        info!("created profile for {}", user.id);
        Ok(profile)
    }

    /// Save name, school and phone, and propagate name and school into every
    /// project the user owns
    pub async fn save_profile(
        &self,
        user_id: &str,
        email: &str,
        update: &ProfileUpdate,
    ) -> Result<PropagationReport> {
        let update = update.validated()?;

        let current = self
            .get_profile(user_id)
            .await?
            .unwrap_or_else(|| UserProfile::new(user_id, &update.name, email));
        let owned = self
            .store
            .query(&Query::new(PROJECTS).eq("owner_id", user_id))
            .await?;

        let mut batch = WriteBatch::new();
        batch.merge(
            USERS,
            user_id,
            to_fields(&ProfileFields {
                name: &update.name,
                school: &update.school,
                email,
                phone: update.phone_change(),
            })?,
        );
        let owner_fields = to_fields(&OwnerFields {
            owner_name: &update.name,
            school: &update.school,
        })?;
        for project in &owned {
            batch.update(PROJECTS, &project.id, owner_fields.clone());
        }

        debug!(
            "saving profile {} with {} project updates",
            user_id,
            owned.len()
        );
        if let Err(e) = self.store.commit(batch).await {
            warn!("profile save for {} failed: {}", user_id, e);
            return Err(e.into());
        }

        let updated_projects: Vec<String> = owned.into_iter().map(|doc| doc.id).collect();
        info!(
            "profile {} saved, {} projects updated",
            user_id,
            updated_projects.len()
        );
        let phone = match update.phone_change() {
            None => current.phone.clone(),
            Some(phone) => phone.map(str::to_string),
        };
        Ok(PropagationReport {
            profile: UserProfile {
                name: update.name,
                school: update.school,
                email: email.to_string(),
                phone,
                ..current
            },
            updated_projects,
        })
    }

    /// Contact details a donor sees for a project
    ///
    /// The owner's profile is preferred; if it is missing or cannot be read,
    /// the project's own copy of the owner fields is used instead.
    pub async fn contact_card(&self, project_id: &str) -> Result<ContactCard> {
        let project: Project = self.store.get(PROJECTS, project_id).await?.decode()?;
        match self.get_profile(&project.owner_id).await {
            Ok(Some(profile)) => Ok(ContactCard::from_profile(&project, &profile)),
            Ok(None) => {
                debug!("owner {} has no profile, using project fields", project.owner_id);
                Ok(ContactCard::from_project(&project))
            }
            Err(e) => {
                warn!("could not read profile {}: {}", project.owner_id, e);
                Ok(ContactCard::from_project(&project))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn user(id: &str, name: Option<&str>) -> AuthUser {
        AuthUser {
            id: id.into(),
            email: format!("{}@escola.br", id),
            display_name: name.map(str::to_string),
        }
    }

    async fn add_project(store: &MemoryStore, owner: &str, school: &str) -> String {
        store
            .add(
                PROJECTS,
                to_fields(&json!({
                    "title": "Projeto",
                    "description": "d",
                    "school": school,
                    "address": "Rua A",
                    "owner_id": owner,
                    "owner_name": "Antigo",
                    "owner_email": format!("{}@escola.br", owner)
                }))
                .unwrap(),
            )
            .await
            .unwrap()
            .id
    }

    async fn school_of(store: &MemoryStore, project_id: &str) -> String {
        let project: Project = store.get(PROJECTS, project_id).await.unwrap().decode().unwrap();
        project.school
    }

    #[tokio::test]
    async fn ensure_profile_creates_once() {
        let store = MemoryStore::new();
        let profiles = ProfileService::new(Arc::new(store.clone()));

        let created = profiles.ensure_profile(&user("u1", Some("Ana"))).await.unwrap();
        assert_eq!(created.name, "Ana");
        assert_eq!(created.school, "");
        assert_eq!(created.role, Role::Standard);

        let again = profiles.ensure_profile(&user("u1", Some("Outro"))).await.unwrap();
        assert_eq!(again.name, "Ana");
        assert_eq!(store.count(USERS).await, 1);

        let anonymous = profiles.ensure_profile(&user("u2", None)).await.unwrap();
        assert_eq!(anonymous.name, "");
    }

    #[tokio::test]
    async fn save_profile_propagates_to_owned_projects() {
        let store = MemoryStore::new();
        let profiles = ProfileService::new(Arc::new(store.clone()));
        profiles.ensure_profile(&user("u1", Some("Ana"))).await.unwrap();
        let p1 = add_project(&store, "u1", "Escola X").await;
        let p2 = add_project(&store, "u1", "Escola X").await;
        let p3 = add_project(&store, "u2", "Escola X").await;

        let report = profiles
            .save_profile(
                "u1",
                "u1@escola.br",
                &ProfileUpdate::new("Ana Souza", "Escola Y").with_phone("11987654321"),
            )
            .await
            .unwrap();

        let mut updated = report.updated_projects.clone();
        updated.sort();
        let mut expected = vec![p1.clone(), p2.clone()];
        expected.sort();
        assert_eq!(updated, expected);
        assert_eq!(report.profile.school, "Escola Y");

        assert_eq!(school_of(&store, &p1).await, "Escola Y");
        assert_eq!(school_of(&store, &p2).await, "Escola Y");
        assert_eq!(school_of(&store, &p3).await, "Escola X");

        let saved = profiles.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(saved.phone.as_deref(), Some("11987654321"));
        assert_eq!(saved, report.profile);
    }

    #[tokio::test]
    async fn save_without_phone_keeps_stored_phone() {
        let store = MemoryStore::new();
        let profiles = ProfileService::new(Arc::new(store.clone()));
        profiles
            .save_profile(
                "u1",
                "u1@escola.br",
                &ProfileUpdate::new("Ana", "Escola X").with_phone("11987654321"),
            )
            .await
            .unwrap();

        let report = profiles
            .save_profile("u1", "u1@escola.br", &ProfileUpdate::new("Ana", "Escola Y"))
            .await
            .unwrap();
        assert_eq!(report.profile.phone.as_deref(), Some("11987654321"));
        let saved = profiles.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(saved.school, "Escola Y");
        assert_eq!(saved.phone.as_deref(), Some("11987654321"));

        let cleared = profiles
            .save_profile("u1", "u1@escola.br", &ProfileUpdate::new("Ana", "Escola Y").clear_phone())
            .await
            .unwrap();
        assert_eq!(cleared.profile.phone, None);
        assert_eq!(profiles.get_profile("u1").await.unwrap().unwrap().phone, None);
    }

    #[tokio::test]
    async fn save_profile_keeps_role() {
        let store = MemoryStore::new();
        store
            .commit({
                let mut batch = WriteBatch::new();
                batch.set(
                    USERS,
                    "admin",
                    to_fields(&json!({ "name": "Root", "school": "", "email": "a@b.c", "role": "admin" }))
                        .unwrap(),
                );
                batch
            })
            .await
            .unwrap();
        let profiles = ProfileService::new(Arc::new(store.clone()));

        let report = profiles
            .save_profile("admin", "a@b.c", &ProfileUpdate::new("Root", "Sede"))
            .await
            .unwrap();
        assert!(report.profile.is_admin());
        assert!(profiles.get_profile("admin").await.unwrap().unwrap().is_admin());
    }

    #[tokio::test]
    async fn save_profile_is_atomic() {
        let store = MemoryStore::new();
        let profiles = ProfileService::new(Arc::new(store.clone()));
        profiles.ensure_profile(&user("u1", Some("Ana"))).await.unwrap();
        let p1 = add_project(&store, "u1", "Escola X").await;

        store.fail_next_batch_after(1).await;
        let result = profiles
            .save_profile("u1", "u1@escola.br", &ProfileUpdate::new("Ana", "Escola Y"))
            .await;
        assert!(matches!(result, Err(Error::StoreUnavailable(_))));

        let profile = profiles.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.school, "");
        assert_eq!(school_of(&store, &p1).await, "Escola X");
    }

    #[tokio::test]
    async fn invalid_update_touches_nothing() {
        let store = MemoryStore::new();
        let profiles = ProfileService::new(Arc::new(store.clone()));
        let result = profiles
            .save_profile("u1", "u1@escola.br", &ProfileUpdate::new("Ana", "X").with_phone("abc"))
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(store.count(USERS).await, 0);
    }

    #[tokio::test]
    async fn contact_card_degrades_to_project_fields() {
        let store = MemoryStore::new();
        let profiles = ProfileService::new(Arc::new(store.clone()));
        let orphan = add_project(&store, "ghost", "Escola X").await;

        let card = profiles.contact_card(&orphan).await.unwrap();
        assert_eq!(card.owner_name, "Antigo");
        assert_eq!(card.email, "ghost@escola.br");
        assert_eq!(card.phone, None);

        profiles.ensure_profile(&user("u1", Some("Ana"))).await.unwrap();
        profiles
            .save_profile("u1", "u1@escola.br", &ProfileUpdate::new("Ana", "Escola Y").with_phone("1133334444"))
            .await
            .unwrap();
        let owned = add_project(&store, "u1", "Escola X").await;
        let card = profiles.contact_card(&owned).await.unwrap();
        assert_eq!(card.owner_name, "Ana");
        assert_eq!(card.school, "Escola Y");
        assert_eq!(card.phone.as_deref(), Some("1133334444"));

        assert!(matches!(
            profiles.contact_card("missing").await,
            Err(Error::NotFound(_))
        ));
    }
}
