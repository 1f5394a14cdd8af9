//! Item ledger: per-project needs list with received quantities
//!
//! Every mutation checks that the caller owns the project and that
//! `0 <= received <= needed` still holds afterwards; violating requests are
//! rejected before the store is touched.
//!
//! `record_received` is a read-modify-write without compare-and-swap. Two
//! sessions recording on the same item at once race and the last write wins;
//! the `ExceedsNeeded` check may then have used a stale `received`.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{items_collection, Item, NewItem, Project, PROJECTS};
use crate::store::{
    to_fields, CancelHandle, Document, DocumentStore, Query, SortOrder, StoreError, Subscription,
};

fn decode_item(doc: &Document) -> std::result::Result<Item, StoreError> {
    let item: Item = doc.decode()?;
    item.check_quantities()
        .map_err(|reason| StoreError::malformed(&doc.id, reason))?;
    Ok(item)
}

fn decode_items(docs: &[Document]) -> Result<Vec<Item>> {
    let items = docs
        .iter()
        .map(decode_item)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(items)
}

fn at_least_one(field: &str, value: i64) -> Result<u64> {
    u64::try_from(value)
        .ok()
        .filter(|v| *v >= 1)
        .ok_or_else(|| Error::invalid_input(format!("{} must be at least 1", field)))
}

fn positive(field: &str, value: i64) -> Result<u32> {
    let value = at_least_one(field, value)?;
    u32::try_from(value).map_err(|_| Error::invalid_input(format!("{} is too large", field)))
}

/// Items of one project, in creation order
fn items_query(project_id: &str) -> Query {
    Query::new(&items_collection(project_id)).order("created_at", SortOrder::Ascending)
}

/// Live view of a project's items
///
/// Each emission is the complete list ascending by creation time, ties
/// broken by item id. A failed listener yields one `Err` and then ends, so
/// it cannot be mistaken for an empty list.
#[derive(Debug)]
pub struct ItemSubscription {
    project_id: String,
    inner: Subscription,
}

impl ItemSubscription {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Wait for the next snapshot; `None` once cancelled or ended
    pub async fn next(&mut self) -> Option<Result<Vec<Item>>> {
        let snapshot = self.inner.next().await?;
        Some(match snapshot {
            Ok(docs) => decode_items(&docs),
            Err(e) => {
                warn!("item listener for project {} failed: {}", self.project_id, e);
                Err(e.into())
            }
        })
    }

    /// Snapshot already delivered, without waiting
    pub fn try_next(&mut self) -> Option<Result<Vec<Item>>> {
        let snapshot = self.inner.try_next()?;
        Some(snapshot.map_err(Error::from).and_then(|docs| decode_items(&docs)))
    }

    /// Handle to cancel from another task
    pub fn cancel_handle(&self) -> CancelHandle {
        self.inner.cancel_handle()
    }

    /// Stop receiving snapshots. Calling it again does nothing.
    pub fn cancel(&mut self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }
}

/// Items scoped to projects, mutated only by the project owner
#[derive(Clone)]
pub struct ItemLedger {
    store: Arc<dyn DocumentStore>,
}

impl ItemLedger {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    async fn owned_project(&self, project_id: &str, caller_id: &str) -> Result<Project> {
        let project: Project = self.store.get(PROJECTS, project_id).await?.decode()?;
        if !project.is_owned_by(caller_id) {
            warn!(
                "{} tried to change items of project {} owned by {}",
                caller_id, project_id, project.owner_id
            );
            return Err(Error::NotOwner);
        }
        Ok(project)
    }

    /// Add an item with nothing received yet
    pub async fn add_item(
        &self,
        project_id: &str,
        caller_id: &str,
        name: &str,
        needed: i64,
    ) -> Result<Item> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::invalid_input("item name cannot be empty"));
        }
        let needed = positive("needed quantity", needed)?;
        self.owned_project(project_id, caller_id).await?;

        let fields = to_fields(&NewItem {
            name,
            needed,
            received: 0,
        })?;
        let doc = self.store.add(&items_collection(project_id), fields).await?;
        info!("item {} ({} x{}) added to project {}", doc.id, name, needed, project_id);
        Ok(decode_item(&doc)?)
    }

    /// Record `amount` more units received
    ///
    /// Fails with `ExceedsNeeded`, writing nothing, when the new total would
    /// pass the needed quantity. The amount is never clamped.
    pub async fn record_received(
        &self,
        project_id: &str,
        item_id: &str,
        caller_id: &str,
        amount: i64,
    ) -> Result<Item> {
        let amount = at_least_one("amount", amount)?;
        self.owned_project(project_id, caller_id).await?;

        let collection = items_collection(project_id);
        let mut item = decode_item(&self.store.get(&collection, item_id).await?)?;
        let total = u64::from(item.received).saturating_add(amount);
        if total > u64::from(item.needed) {
            debug!(
                "rejecting {} on item {}: {}/{} received",
                amount, item_id, item.received, item.needed
            );
            return Err(Error::ExceedsNeeded {
                needed: item.needed,
                received: item.received,
                requested: amount,
            });
        }

        // total <= needed, so it fits
        item.received = total as u32;
        let fields = to_fields(&serde_json::json!({ "received": item.received }))?;
        self.store.update(&collection, item_id, fields).await?;
        info!(
            "item {} of project {} now {}/{}",
            item_id, project_id, item.received, item.needed
        );
        Ok(item)
    }

    /// Remove an item
    pub async fn delete_item(&self, project_id: &str, item_id: &str, caller_id: &str) -> Result<()> {
        self.owned_project(project_id, caller_id).await?;
        self.store.delete(&items_collection(project_id), item_id).await?;
        info!("item {} removed from project {}", item_id, project_id);
        Ok(())
    }

    /// One-shot snapshot of a project's items
    pub async fn list_items(&self, project_id: &str) -> Result<Vec<Item>> {
        let docs = self.store.query(&items_query(project_id)).await?;
        decode_items(&docs)
    }

    /// Live view of a project's items; the first snapshot arrives right away
    pub async fn subscribe(&self, project_id: &str) -> Result<ItemSubscription> {
        let inner = self.store.subscribe(&items_query(project_id)).await?;
        debug!("subscription {} on items of {}", inner.id(), project_id);
        Ok(ItemSubscription {
            project_id: project_id.to_string(),
            inner,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    async fn setup() -> (MemoryStore, ItemLedger, String) {
        let store = MemoryStore::new();
        let project = store
            .add(
                PROJECTS,
                to_fields(&json!({
                    "title": "Horta",
                    "description": "Sementes",
                    "school": "Escola X",
                    "address": "Rua A",
                    "owner_id": "u1"
                }))
                .unwrap(),
            )
            .await
            .unwrap();
        let ledger = ItemLedger::new(Arc::new(store.clone()));
        (store, ledger, project.id)
    }

    #[tokio::test]
    async fn add_item_starts_at_zero() {
        let (_, ledger, project) = setup().await;
        let item = ledger.add_item(&project, "u1", " Caderno ", 10).await.unwrap();
        assert_eq!(item.name, "Caderno");
        assert_eq!(item.needed, 10);
        assert_eq!(item.received, 0);
    }

    #[tokio::test]
    async fn add_item_rejects_bad_input_without_writing() {
        let (store, ledger, project) = setup().await;
        for (name, needed) in [("Caderno", 0), ("Caderno", -3), ("  ", 5)] {
            let result = ledger.add_item(&project, "u1", name, needed).await;
            assert!(matches!(result, Err(Error::InvalidInput(_))), "{} {}", name, needed);
        }
        assert_eq!(store.count(&items_collection(&project)).await, 0);
    }

    #[tokio::test]
    async fn record_received_accounting() {
        let (_, ledger, project) = setup().await;
        let item = ledger.add_item(&project, "u1", "Caderno", 10).await.unwrap();

        let item4 = ledger.record_received(&project, &item.id, "u1", 4).await.unwrap();
        assert_eq!(item4.received, 4);

        match ledger.record_received(&project, &item.id, "u1", 7).await {
            Err(Error::ExceedsNeeded {
                needed,
                received,
                requested,
            }) => assert_eq!((needed, received, requested), (10, 4, 7)),
            other => panic!("expected ExceedsNeeded, got {:?}", other),
        }
        assert_eq!(ledger.list_items(&project).await.unwrap()[0].received, 4);

        let full = ledger.record_received(&project, &item.id, "u1", 6).await.unwrap();
        assert_eq!(full.received, 10);
        assert!(full.is_fulfilled());

        let zero = ledger.record_received(&project, &item.id, "u1", 0).await;
        assert!(matches!(zero, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn amount_beyond_u32_exceeds_needed() {
        let (_, ledger, project) = setup().await;
        let item = ledger.add_item(&project, "u1", "Caderno", 10).await.unwrap();

        match ledger.record_received(&project, &item.id, "u1", 5_000_000_000).await {
            Err(Error::ExceedsNeeded { requested, .. }) => assert_eq!(requested, 5_000_000_000),
            other => panic!("expected ExceedsNeeded, got {:?}", other),
        }
        assert!(matches!(
            ledger.record_received(&project, &item.id, "u1", i64::MAX).await,
            Err(Error::ExceedsNeeded { .. })
        ));
        assert!(matches!(
            ledger.record_received(&project, &item.id, "u1", -3).await,
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(ledger.list_items(&project).await.unwrap()[0].received, 0);
    }

    #[tokio::test]
    async fn only_owner_mutates() {
        let (_, ledger, project) = setup().await;
        let item = ledger.add_item(&project, "u1", "Lápis", 5).await.unwrap();

        assert!(matches!(
            ledger.add_item(&project, "u2", "Borracha", 1).await,
            Err(Error::NotOwner)
        ));
        assert!(matches!(
            ledger.record_received(&project, &item.id, "u2", 1).await,
            Err(Error::NotOwner)
        ));
        assert!(matches!(
            ledger.delete_item(&project, &item.id, "u2").await,
            Err(Error::NotOwner)
        ));
        assert_eq!(ledger.list_items(&project).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_item_is_not_found() {
        let (_, ledger, project) = setup().await;
        let result = ledger.record_received(&project, "missing", "u1", 1).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn stored_invariant_violation_is_malformed() {
        let (store, ledger, project) = setup().await;
        store
            .add(
                &items_collection(&project),
                to_fields(&json!({ "name": "Cola", "needed": 2, "received": 3 })).unwrap(),
            )
            .await
            .unwrap();
        let result = ledger.list_items(&project).await;
        assert!(matches!(
            result,
            Err(Error::StoreUnavailable(StoreError::Malformed { .. }))
        ));
    }

    #[tokio::test]
    async fn subscription_follows_changes() {
        let (_, ledger, project) = setup().await;
        let mut sub = ledger.subscribe(&project).await.unwrap();
        assert!(sub.next().await.unwrap().unwrap().is_empty());

        let first = ledger.add_item(&project, "u1", "Caderno", 10).await.unwrap();
        let second = ledger.add_item(&project, "u1", "Lápis", 5).await.unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap().len(), 1);
        let both = sub.next().await.unwrap().unwrap();
        assert_eq!(
            both.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
            [first.id.as_str(), second.id.as_str()]
        );

        ledger.delete_item(&project, &first.id, "u1").await.unwrap();
        let after = sub.next().await.unwrap().unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, second.id);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let (_, ledger, project) = setup().await;
        let mut sub = ledger.subscribe(&project).await.unwrap();
        sub.cancel();
        sub.cancel();
        assert!(sub.is_cancelled());

        ledger.add_item(&project, "u1", "Caderno", 10).await.unwrap();
        assert!(sub.next().await.is_none());
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn listener_failure_is_not_an_empty_list() {
        let (store, ledger, project) = setup().await;
        let mut sub = ledger.subscribe(&project).await.unwrap();
        assert!(sub.next().await.unwrap().unwrap().is_empty());

        store.set_available(false).await;
        assert!(matches!(sub.next().await, Some(Err(Error::StoreUnavailable(_)))));
        assert!(sub.next().await.is_none());
    }
}
