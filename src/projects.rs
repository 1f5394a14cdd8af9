//! Project entity manager

use std::sync::Arc;

use log::{info, warn};

use crate::auth::AuthUser;
use crate::config::ClientOptions;
use crate::error::{Error, Result};
use crate::models::{items_collection, NewProject, Project, ProjectDraft, Role, UserProfile, PROJECTS};
use crate::store::{to_fields, DocumentStore, Query, SortOrder, WriteBatch};

/// Which projects [`ProjectManager::list_projects`] returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectFilter {
    /// Every project
    All,
    /// Projects owned by the given user id
    ByOwner(String),
}

/// Creates, edits, lists and deletes projects
///
/// Ownership is checked here against the stored owner id, whatever the store
/// itself permits.
#[derive(Clone)]
pub struct ProjectManager {
    store: Arc<dyn DocumentStore>,
    options: ClientOptions,
}

impl ProjectManager {
    pub fn new(store: Arc<dyn DocumentStore>, options: ClientOptions) -> Self {
        Self { store, options }
    }

    /// Create a project owned by `owner`
    ///
    /// School and owner name are copied from the profile of record, owner
    /// email from the identity.
    pub async fn create_project(
        &self,
        owner: Option<&AuthUser>,
        owner_profile: Option<&UserProfile>,
        draft: &ProjectDraft,
    ) -> Result<Project> {
        let (owner, profile) = match (owner, owner_profile) {
            (Some(owner), Some(profile)) => (owner, profile),
            _ => return Err(Error::NotAuthenticated),
        };
        let draft = draft.validated()?;

        let fields = to_fields(&NewProject {
            draft: &draft,
            school: &profile.school,
            owner_id: &owner.id,
            owner_name: &profile.name,
            owner_email: &owner.email,
        })?;
        let doc = self.store.add(PROJECTS, fields).await?;
        info!("project {} created by {}", doc.id, owner.id);
        Ok(doc.decode()?)
    }

    /// Read one project
    pub async fn get_project(&self, project_id: &str) -> Result<Project> {
        let doc = self.store.get(PROJECTS, project_id).await?;
        Ok(doc.decode()?)
    }

    /// Replace title, description and address; owner only
    pub async fn update_project(
        &self,
        project_id: &str,
        caller_id: &str,
        draft: &ProjectDraft,
    ) -> Result<()> {
        let draft = draft.validated()?;
        let project = self.get_project(project_id).await?;
        if !project.is_owned_by(caller_id) {
            warn!("{} tried to edit project {} owned by {}", caller_id, project_id, project.owner_id);
            return Err(Error::NotOwner);
        }

        self.store
            .update(PROJECTS, project_id, to_fields(&draft)?)
            .await?;
        info!("project {} updated", project_id);
        Ok(())
    }

    /// Delete a project; allowed for its owner and for admins
    ///
    /// The items subcollection is left in place unless
    /// [`ClientOptions::cascade_item_delete`] is set, in which case the
    /// project and all its items go in one batch.
    pub async fn delete_project(
        &self,
        project_id: &str,
        caller_id: &str,
        caller_role: Role,
    ) -> Result<()> {
        let project = self.get_project(project_id).await?;
        if !project.is_owned_by(caller_id) && !caller_role.is_admin() {
            warn!("{} is not allowed to delete project {}", caller_id, project_id);
            return Err(Error::NotAuthorized);
        }

        if self.options.cascade_item_delete {
            let collection = items_collection(project_id);
            let items = self.store.query(&Query::new(&collection)).await?;
            let mut batch = WriteBatch::new();
            for item in &items {
                batch.delete(&collection, &item.id);
            }
            batch.delete(PROJECTS, project_id);
            self.store.commit(batch).await?;
            info!("project {} deleted with {} items", project_id, items.len());
        } else {
            self.store.delete(PROJECTS, project_id).await?;
            info!("project {} deleted", project_id);
        }
        Ok(())
    }

    /// Snapshot of projects, newest first
    pub async fn list_projects(&self, filter: &ProjectFilter) -> Result<Vec<Project>> {
        let mut query = Query::new(PROJECTS).order("created_at", SortOrder::Descending);
        if let ProjectFilter::ByOwner(owner_id) = filter {
            query = query.eq("owner_id", owner_id.as_str());
        }

        let docs = self.store.query(&query).await?;
        let projects = docs
            .iter()
            .map(|doc| doc.decode::<Project>())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(projects)
    }
}
