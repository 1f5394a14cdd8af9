//! In-process document store

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use tokio::sync::RwLock;

use super::subscription::{self, SubscriptionSink};
use super::{Document, DocumentStore, Fields, Query, StoreError, Subscription, Write, WriteBatch};

type Collection = BTreeMap<String, Document>;

struct Listener {
    query: Query,
    sink: SubscriptionSink,
}

#[derive(Default)]
struct State {
    collections: BTreeMap<String, Collection>,
    last_timestamp: Option<DateTime<Utc>>,
    listeners: Vec<Listener>,
    batch_fault: Option<usize>,
}

impl State {
    /// Server clock: strictly increasing even when the wall clock is not
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_timestamp = Some(now);
        now
    }

    fn snapshot(&self, query: &Query) -> Vec<Document> {
        match self.collections.get(query.collection()) {
            Some(collection) => query.apply(collection.values()),
            None => Vec::new(),
        }
    }

    fn notify(&mut self, touched: &BTreeSet<String>) {
        let collections = &self.collections;
        self.listeners.retain(|listener| {
            if listener.sink.is_closed() {
                debug!("dropping closed listener {}", listener.sink.id());
                return false;
            }
            if !touched.contains(listener.query.collection()) {
                return true;
            }
            let docs = match collections.get(listener.query.collection()) {
                Some(collection) => listener.query.apply(collection.values()),
                None => Vec::new(),
            };
            listener.sink.emit(Ok(docs))
        });
    }
}

fn apply_write(
    collections: &mut BTreeMap<String, Collection>,
    write: &Write,
    created_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    match write {
        Write::Set {
            collection,
            id,
            fields,
            merge,
        } => {
            let docs = collections.entry(collection.clone()).or_default();
            match docs.get_mut(id) {
                Some(existing) if *merge => {
                    for (k, v) in fields {
                        existing.fields.insert(k.clone(), v.clone());
                    }
                }
                Some(existing) => existing.fields = fields.clone(),
                None => {
                    docs.insert(
                        id.clone(),
                        Document {
                            id: id.clone(),
                            created_at,
                            fields: fields.clone(),
                        },
                    );
                }
            }
        }
        Write::Update {
            collection,
            id,
            fields,
        } => {
            let existing = collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| StoreError::not_found(format!("{}/{}", collection, id)))?;
            for (k, v) in fields {
                existing.fields.insert(k.clone(), v.clone());
            }
        }
        Write::Delete { collection, id } => {
            if let Some(docs) = collections.get_mut(collection) {
                docs.remove(id);
            }
        }
    }
    Ok(())
}

struct Inner {
    state: RwLock<State>,
    available: AtomicBool,
}

/// Document store kept in memory
///
/// Behaves like a networked store as far as the [`DocumentStore`] contract
/// goes: server timestamps, live listeners notified after every committed
/// write, atomic batches. It can also be switched offline or told to fail a
/// batch part-way, which is how the failure paths are exercised in tests.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Take the store offline (or back online)
    ///
    /// Going offline fails every live listener with `StoreError::Unavailable`
    /// and every later call until the store is back.
    pub async fn set_available(&self, available: bool) {
        let was = self.inner.available.swap(available, Ordering::SeqCst);
        if was && !available {
            warn!("memory store going offline");
            let mut state = self.inner.state.write().await;
            for listener in state.listeners.drain(..) {
                listener
                    .sink
                    .emit(Err(StoreError::unavailable("store went offline")));
            }
        }
    }

    /// Make the next batch fail after `writes` of its writes were staged
    pub async fn fail_next_batch_after(&self, writes: usize) {
        self.inner.state.write().await.batch_fault = Some(writes);
    }

    /// Number of documents currently held in `collection`
    pub async fn count(&self, collection: &str) -> usize {
        self.inner
            .state
            .read()
            .await
            .collections
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    /// Number of listeners still attached
    pub async fn listener_count(&self) -> usize {
        let state = self.inner.state.read().await;
        state.listeners.iter().filter(|l| !l.sink.is_closed()).count()
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::unavailable("memory store is offline"))
        }
    }

    async fn commit_writes(&self, writes: &[Write]) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut state = self.inner.state.write().await;
        let fault = state.batch_fault.take();
        let created_at = state.next_timestamp();

        let mut staged = state.collections.clone();
        for (i, write) in writes.iter().enumerate() {
            if fault == Some(i) {
                warn!("injected fault after {} of {} writes", i, writes.len());
                return Err(StoreError::unavailable(format!(
                    "batch aborted after {} writes",
                    i
                )));
            }
            apply_write(&mut staged, write, created_at)?;
        }

        state.collections = staged;
        let touched: BTreeSet<String> = writes.iter().map(|w| w.collection().to_string()).collect();
        state.notify(&touched);
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Document, StoreError> {
        self.ensure_available()?;
        let state = self.inner.state.read().await;
        state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("{}/{}", collection, id)))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.ensure_available()?;
        Ok(self.inner.state.read().await.snapshot(query))
    }

    async fn subscribe(&self, query: &Query) -> Result<Subscription, StoreError> {
        self.ensure_available()?;
        let (sink, subscription) = subscription::channel();
        let mut state = self.inner.state.write().await;
        sink.emit(Ok(state.snapshot(query)));
        debug!(
            "listener {} attached to {}",
            sink.id(),
            query.collection()
        );
        state.listeners.push(Listener {
            query: query.clone(),
            sink,
        });
        Ok(subscription)
    }

    async fn add(&self, collection: &str, fields: Fields) -> Result<Document, StoreError> {
        self.ensure_available()?;
        let mut state = self.inner.state.write().await;
        let doc = Document {
            id: uuid::Uuid::new_v4().simple().to_string(),
            created_at: state.next_timestamp(),
            fields,
        };
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(doc.id.clone(), doc.clone());
        info!("added {}/{}", collection, doc.id);
        state.notify(&BTreeSet::from([collection.to_string()]));
        Ok(doc)
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
        self.commit_writes(&[Write::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
        }])
        .await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.commit_writes(&[Write::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        }])
        .await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        debug!("committing batch of {} writes", batch.len());
        self.commit_writes(batch.writes()).await
    }
}
