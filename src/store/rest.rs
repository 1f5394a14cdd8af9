//! PostgREST-backed document store
//!
//! Each top-level collection is a table. A nested collection
//! `parents/{id}/children` is the table `children` scoped by a
//! `parent_id` column, so `projects/{id}/items` lives in `items` with a
//! `project_id` column. Every table has an `id` primary key and a
//! `created_at` column defaulting to the database clock. Batches are sent to a
//! database function that applies them in one transaction (see the
//! `sala-solidaria-migration` crate).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use super::subscription;
use super::{Document, DocumentStore, Fields, Filter, Query, StoreError, Subscription, Write, WriteBatch};
use crate::auth::AccessToken;
use crate::config::ClientOptions;
use crate::fetch::{Fetch, FetchBuilder, FetchError};

impl From<FetchError> for StoreError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Status { status, body } => StoreError::Rejected {
                status: status.as_u16(),
                message: body,
            },
            FetchError::Http(e) => StoreError::Http(e),
            FetchError::Json(e) => StoreError::Json(e),
            FetchError::Url(e) => StoreError::Url(e),
        }
    }
}

/// Where a collection path lives in the database
#[derive(Debug, Clone, PartialEq)]
struct Table {
    name: String,
    scope: Option<(String, String)>,
}

impl Table {
    fn resolve(collection: &str) -> Result<Self, StoreError> {
        let segments: Vec<&str> = collection.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(StoreError::malformed(collection, "empty path segment"));
        }
        match segments.as_slice() {
            [table] => Ok(Table {
                name: table.to_string(),
                scope: None,
            }),
            [parent, parent_id, table] => Ok(Table {
                name: table.to_string(),
                scope: Some((
                    format!("{}_id", parent.trim_end_matches('s')),
                    parent_id.to_string(),
                )),
            }),
            _ => Err(StoreError::malformed(collection, "unsupported collection path")),
        }
    }

    fn row_fields(&self, mut fields: Fields) -> Fields {
        if let Some((column, value)) = &self.scope {
            fields.insert(column.clone(), Value::String(value.clone()));
        }
        fields
    }

    fn document(&self, row: Value) -> Result<Document, StoreError> {
        let mut fields = match row {
            Value::Object(map) => map,
            other => return Err(StoreError::malformed(&self.name, format!("row is not an object: {}", other))),
        };
        let id = match fields.remove("id") {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(StoreError::malformed(&self.name, "row without id")),
        };
        let created_at: DateTime<Utc> = match fields.remove("created_at") {
            Some(v) => serde_json::from_value(v).map_err(|e| StoreError::malformed(&id, e))?,
            None => return Err(StoreError::malformed(&id, "row without created_at")),
        };
        if let Some((column, _)) = &self.scope {
            fields.remove(column);
        }
        Ok(Document {
            id,
            created_at,
            fields,
        })
    }
}

/// Render a filter in PostgREST's `op.value` syntax
fn filter_param(filter: &Filter) -> String {
    fn literal(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    match &filter.value {
        Value::Null => "is.null".to_string(),
        value => format!("eq.{}", literal(value)),
    }
}

#[derive(Serialize)]
struct RpcWrite<'a> {
    op: &'static str,
    table: &'a str,
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<Fields>,
    merge: bool,
}

#[derive(Serialize)]
struct RpcBody<'a> {
    writes: Vec<RpcWrite<'a>>,
}

/// Document store speaking to a PostgREST endpoint
#[derive(Clone)]
pub struct RestStore {
    base_url: String,
    api_key: String,
    client: Client,
    token: AccessToken,
    options: ClientOptions,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str, client: Client, options: ClientOptions) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
            token: AccessToken::default(),
            options,
        }
    }

    /// Authenticate requests with the signed-in user's token when one is set
    pub fn with_access_token(mut self, token: AccessToken) -> Self {
        self.token = token;
        self
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn request<'a>(&'a self, builder: FetchBuilder<'a>) -> FetchBuilder<'a> {
        let bearer = self.token.get().unwrap_or_else(|| self.api_key.clone());
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&bearer)
            .timeout(self.options.request_timeout)
    }

    fn scoped<'a>(&self, table: &Table, mut builder: FetchBuilder<'a>) -> FetchBuilder<'a> {
        if let Some((column, value)) = &table.scope {
            builder = builder.query_param(column, &format!("eq.{}", value));
        }
        builder
    }

    async fn select(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let table = Table::resolve(query.collection())?;
        let url = self.table_url(&table.name);
        let mut builder = self
            .scoped(&table, self.request(Fetch::get(&self.client, &url)))
            .query_param("select", "*");
        for filter in query.filters() {
            builder = builder.query_param(&filter.field, &filter_param(filter));
        }
        let mut order: Vec<String> = query
            .ordering()
            .iter()
            .map(|o| format!("{}.{}", o.field, o.direction.as_str()))
            .collect();
        order.push("id.asc".to_string());
        builder = builder.query_param("order", &order.join(","));

        let rows: Vec<Value> = builder
            .execute_retrying(self.options.max_retries, self.options.retry_backoff)
            .await?;
        rows.into_iter().map(|row| table.document(row)).collect()
    }

    fn rpc_writes<'a>(tables: &'a [(Table, &'a Write)]) -> Vec<RpcWrite<'a>> {
        tables
            .iter()
            .map(|(table, write)| match write {
                Write::Set { id, fields, merge, .. } => RpcWrite {
                    op: "set",
                    table: &table.name,
                    id,
                    fields: Some(table.row_fields(fields.clone())),
                    merge: *merge,
                },
                Write::Update { id, fields, .. } => RpcWrite {
                    op: "update",
                    table: &table.name,
                    id,
                    fields: Some(fields.clone()),
                    merge: true,
                },
                Write::Delete { id, .. } => RpcWrite {
                    op: "delete",
                    table: &table.name,
                    id,
                    fields: None,
                    merge: false,
                },
            })
            .collect()
    }
}

#[async_trait]
impl DocumentStore for RestStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Document, StoreError> {
        let table = Table::resolve(collection)?;
        let url = self.table_url(&table.name);
        let rows: Vec<Value> = self
            .scoped(&table, self.request(Fetch::get(&self.client, &url)))
            .query_param("select", "*")
            .query_param("id", &format!("eq.{}", id))
            .execute_retrying(self.options.max_retries, self.options.retry_backoff)
            .await?;
        match rows.into_iter().next() {
            Some(row) => table.document(row),
            None => Err(StoreError::not_found(format!("{}/{}", collection, id))),
        }
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.select(query).await
    }

    async fn subscribe(&self, query: &Query) -> Result<Subscription, StoreError> {
        let initial = self.select(query).await?;
        let (sink, subscription) = subscription::channel();
        sink.emit(Ok(initial.clone()));

        let store = self.clone();
        let query = query.clone();
        let interval = self.options.poll_interval;
        debug!("polling {} every {:?} for {}", query.collection(), interval, sink.id());
        tokio::spawn(async move {
            let mut last = initial;
            loop {
                tokio::time::sleep(interval).await;
                if sink.is_closed() {
                    debug!("listener {} closed, stopping poll", sink.id());
                    break;
                }
                match store.select(&query).await {
                    Ok(docs) if docs == last => {}
                    Ok(docs) => {
                        last = docs.clone();
                        if !sink.emit(Ok(docs)) {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("live query on {} failed: {}", query.collection(), e);
                        sink.emit(Err(e));
                        break;
                    }
                }
            }
        });
        Ok(subscription)
    }

    async fn add(&self, collection: &str, fields: Fields) -> Result<Document, StoreError> {
        let table = Table::resolve(collection)?;
        let url = self.table_url(&table.name);
        let rows: Vec<Value> = self
            .request(Fetch::post(&self.client, &url))
            .header("Prefer", "return=representation")
            .json(&table.row_fields(fields))?
            .execute()
            .await?;
        let doc = rows
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::unavailable("insert returned no row"))
            .and_then(|row| table.document(row))?;
        info!("added {}/{}", collection, doc.id);
        Ok(doc)
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
        let table = Table::resolve(collection)?;
        let url = self.table_url(&table.name);
        let rows: Vec<Value> = self
            .scoped(&table, self.request(Fetch::patch(&self.client, &url)))
            .query_param("id", &format!("eq.{}", id))
            .header("Prefer", "return=representation")
            .json(&fields)?
            .execute()
            .await?;
        if rows.is_empty() {
            return Err(StoreError::not_found(format!("{}/{}", collection, id)));
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let table = Table::resolve(collection)?;
        let url = self.table_url(&table.name);
        self.scoped(&table, self.request(Fetch::delete(&self.client, &url)))
            .query_param("id", &format!("eq.{}", id))
            .send()
            .await?;
        Ok(())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let tables = batch
            .writes()
            .iter()
            .map(|w| Table::resolve(w.collection()).map(|t| (t, w)))
            .collect::<Result<Vec<_>, _>>()?;
        let body = RpcBody {
            writes: Self::rpc_writes(&tables),
        };

        let url = format!("{}/rest/v1/rpc/{}", self.base_url, self.options.batch_rpc);
        let result = self
            .request(Fetch::post(&self.client, &url))
            .json(&body)?
            .send()
            .await;
        match result {
            Ok(_) => {
                info!("committed batch of {} writes", batch.len());
                Ok(())
            }
            Err(e) => {
                warn!("batch of {} writes rejected: {}", batch.len(), e);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SortOrder;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> RestStore {
        let options = ClientOptions::default()
            .with_max_retries(0)
            .with_poll_interval(Duration::from_millis(20));
        RestStore::new(&server.uri(), "anon", Client::new(), options)
    }

    fn fields(value: Value) -> Fields {
        crate::store::to_fields(&value).unwrap()
    }

    #[test]
    fn resolves_nested_collections() {
        assert_eq!(
            Table::resolve("projects/p1/items").unwrap(),
            Table {
                name: "items".into(),
                scope: Some(("project_id".into(), "p1".into())),
            }
        );
        assert_eq!(Table::resolve("users").unwrap().scope, None);
        assert!(Table::resolve("projects//items").is_err());
        assert!(Table::resolve("a/b").is_err());
    }

    #[test]
    fn renders_filters() {
        let q = Query::new("projects")
            .eq("owner_id", "u1")
            .eq("needed", 3)
            .eq("phone", Value::Null);
        let rendered: Vec<String> = q.filters().iter().map(filter_param).collect();
        assert_eq!(rendered, vec!["eq.u1", "eq.3", "is.null"]);
    }

    #[tokio::test]
    async fn query_sends_filters_and_order() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/projects"))
            .and(query_param("owner_id", "eq.u1"))
            .and(query_param("order", "created_at.desc,id.asc"))
            .and(header("apikey", "anon"))
            .and(header("Authorization", "Bearer anon"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "p2", "created_at": "2024-03-02T10:00:00Z", "title": "Feira", "owner_id": "u1" },
                { "id": "p1", "created_at": "2024-03-01T10:00:00Z", "title": "Horta", "owner_id": "u1" }
            ])))
            .mount(&mock_server)
            .await;

        let query = Query::new("projects")
            .eq("owner_id", "u1")
            .order("created_at", SortOrder::Descending);
        let docs = store(&mock_server).query(&query).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "p2");
        assert_eq!(docs[0].fields["title"], "Feira");
        assert!(docs[0].fields.get("id").is_none());
    }

    #[tokio::test]
    async fn user_token_replaces_api_key_as_bearer() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/users"))
            .and(header("Authorization", "Bearer user-jwt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "u1", "created_at": "2024-03-01T10:00:00Z", "name": "Ana" }
            ])))
            .mount(&mock_server)
            .await;

        let token = AccessToken::default();
        token.set(Some("user-jwt".to_string()));
        let store = store(&mock_server).with_access_token(token);
        let doc = store.get("users", "u1").await.unwrap();
        assert_eq!(doc.fields["name"], "Ana");
    }

    #[tokio::test]
    async fn get_scopes_nested_items_and_reports_not_found() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/items"))
            .and(query_param("project_id", "eq.p1"))
            .and(query_param("id", "eq.i9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&mock_server)
            .await;

        let result = store(&mock_server).get("projects/p1/items", "i9").await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn add_inserts_scope_column_and_strips_it_back() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/items"))
            .and(header("Prefer", "return=representation"))
            .and(body_json(json!({ "name": "Caderno", "needed": 10, "received": 0, "project_id": "p1" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([
                { "id": "i1", "created_at": "2024-03-01T10:00:00Z", "name": "Caderno", "needed": 10, "received": 0, "project_id": "p1" }
            ])))
            .mount(&mock_server)
            .await;

        let doc = store(&mock_server)
            .add("projects/p1/items", fields(json!({ "name": "Caderno", "needed": 10, "received": 0 })))
            .await
            .unwrap();
        assert_eq!(doc.id, "i1");
        assert!(doc.fields.get("project_id").is_none());
    }

    #[tokio::test]
    async fn update_of_missing_row_is_not_found() {
        let mock_server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/projects"))
            .and(query_param("id", "eq.ghost"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&mock_server)
            .await;

        let result = store(&mock_server)
            .update("projects", "ghost", fields(json!({ "title": "x" })))
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn commit_posts_one_rpc_call() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/commit_batch"))
            .and(body_json(json!({ "writes": [
                { "op": "set", "table": "users", "id": "u1", "fields": { "name": "Ana" }, "merge": true },
                { "op": "update", "table": "projects", "id": "p1", "fields": { "owner_name": "Ana" }, "merge": true },
                { "op": "delete", "table": "items", "id": "i1", "merge": false }
            ]})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut batch = WriteBatch::new();
        batch
            .merge("users", "u1", fields(json!({ "name": "Ana" })))
            .update("projects", "p1", fields(json!({ "owner_name": "Ana" })))
            .delete("projects/p1/items", "i1");
        store(&mock_server).commit(batch).await.unwrap();
    }

    #[tokio::test]
    async fn rejected_commit_surfaces_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/commit_batch"))
            .respond_with(ResponseTemplate::new(409).set_body_string("conflict"))
            .mount(&mock_server)
            .await;

        let mut batch = WriteBatch::new();
        batch.delete("users", "u1");
        match store(&mock_server).commit(batch).await {
            Err(StoreError::Rejected { status, message }) => {
                assert_eq!(status, 409);
                assert_eq!(message, "conflict");
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn subscription_polls_and_emits_changes_only() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "i1", "created_at": "2024-03-01T10:00:00Z", "name": "Cola", "project_id": "p1" }
            ])))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "i1", "created_at": "2024-03-01T10:00:00Z", "name": "Cola", "project_id": "p1" },
                { "id": "i2", "created_at": "2024-03-01T11:00:00Z", "name": "Tinta", "project_id": "p1" }
            ])))
            .mount(&mock_server)
            .await;

        let query = Query::new("projects/p1/items").order("created_at", SortOrder::Ascending);
        let mut sub = store(&mock_server).subscribe(&query).await.unwrap();

        assert_eq!(sub.next().await.unwrap().unwrap().len(), 1);
        // the unchanged second poll is not re-emitted
        assert_eq!(sub.next().await.unwrap().unwrap().len(), 2);

        sub.cancel();
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn subscription_reports_failure_distinctly() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/items"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let mut sub = store(&mock_server)
            .subscribe(&Query::new("projects/p1/items"))
            .await
            .unwrap();
        assert!(matches!(sub.next().await, Some(Ok(items)) if items.is_empty()));
        assert!(matches!(sub.next().await, Some(Err(StoreError::Rejected { status: 500, .. }))));
        assert!(sub.next().await.is_none());
    }
}
