//! HTTP helper shared by the REST store and the auth client

use std::time::Duration;

use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use url::Url;

/// Failure of a single HTTP exchange
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed with status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl FetchError {
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => status.is_server_error(),
            FetchError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Helper for building and executing HTTP requests
#[derive(Clone)]
pub struct FetchBuilder<'a> {
    client: &'a Client,
    url: String,
    method: Method,
    headers: HeaderMap,
    query_params: Vec<(String, String)>,
    body: Option<Vec<u8>>,
    timeout: Option<Duration>,
}

impl<'a> FetchBuilder<'a> {
    pub fn new(client: &'a Client, url: &str, method: Method) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));

        Self {
            client,
            url: url.to_string(),
            method,
            headers,
            query_params: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    /// Add a header; invalid names or values are skipped
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => warn!("skipping invalid header {}", name),
        }
        self
    }

    /// Add bearer token authentication
    pub fn bearer_auth(self, token: &str) -> Self {
        self.header("Authorization", &format!("Bearer {}", token))
    }

    /// Append a query parameter
    pub fn query_param(mut self, key: &str, value: &str) -> Self {
        self.query_params.push((key.to_string(), value.to_string()));
        self
    }

    /// Set a JSON body
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, FetchError> {
        self.body = Some(serde_json::to_vec(body)?);
        Ok(self)
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn build(&self) -> Result<reqwest::RequestBuilder, FetchError> {
        let mut url = Url::parse(&self.url)?;
        if !self.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query_params {
                pairs.append_pair(key, value);
            }
        }

        let mut req = self
            .client
            .request(self.method.clone(), url.as_str())
            .headers(self.headers.clone());
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        if let Some(body) = &self.body {
            req = req.body(body.clone());
        }
        Ok(req)
    }

    /// Send the request and return the response when its status is a success
    pub async fn send(&self) -> Result<Response, FetchError> {
        debug!("{} {}", self.method, self.url);
        let response = self.build()?.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body });
        }
        Ok(response)
    }

    /// Send the request and parse the JSON response
    pub async fn execute<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        let response = self.send().await?;
        Ok(response.json::<T>().await?)
    }

    /// Like [`execute`](Self::execute), retrying transient failures with
    /// exponential backoff. Only use this for idempotent requests.
    pub async fn execute_retrying<T: DeserializeOwned>(
        &self,
        max_retries: u32,
        backoff: Duration,
    ) -> Result<T, FetchError> {
        let mut attempt = 0;
        let mut delay = backoff;
        loop {
            match self.execute::<T>().await {
                Err(e) if e.is_transient() && attempt < max_retries => {
                    attempt += 1;
                    warn!(
                        "{} {} failed ({}), retry {}/{} in {:?}",
                        self.method, self.url, e, attempt, max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                other => return other,
            }
        }
    }
}

/// Helper for creating HTTP requests
pub struct Fetch;

impl Fetch {
    pub fn get<'a>(client: &'a Client, url: &str) -> FetchBuilder<'a> {
        FetchBuilder::new(client, url, Method::GET)
    }

    pub fn post<'a>(client: &'a Client, url: &str) -> FetchBuilder<'a> {
        FetchBuilder::new(client, url, Method::POST)
    }

    pub fn patch<'a>(client: &'a Client, url: &str) -> FetchBuilder<'a> {
        FetchBuilder::new(client, url, Method::PATCH)
    }

    pub fn delete<'a>(client: &'a Client, url: &str) -> FetchBuilder<'a> {
        FetchBuilder::new(client, url, Method::DELETE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn sends_headers_and_query() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/projects"))
            .and(query_param("owner_id", "eq.u1"))
            .and(header("apikey", "anon"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "p1" }])))
            .mount(&mock_server)
            .await;

        let client = Client::new();
        let url = format!("{}/rest/v1/projects", mock_server.uri());
        let rows: Vec<Value> = Fetch::get(&client, &url)
            .header("apikey", "anon")
            .query_param("owner_id", "eq.u1")
            .execute()
            .await
            .unwrap();
        assert_eq!(rows[0]["id"], "p1");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/x"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .mount(&mock_server)
            .await;

        let client = Client::new();
        let result = Fetch::post(&client, &format!("{}/x", mock_server.uri()))
            .send()
            .await;
        match result {
            Err(FetchError::Status { status, body }) => {
                assert_eq!(status, StatusCode::FORBIDDEN);
                assert_eq!(body, "denied");
            }
            other => panic!("expected status error, got {:?}", other.map(|r| r.status())),
        }
    }

    #[tokio::test]
    async fn retries_server_errors_then_gives_up() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = Client::new();
        let result: Result<Value, _> = Fetch::get(&client, &format!("{}/flaky", mock_server.uri()))
            .execute_retrying(2, Duration::from_millis(1))
            .await;
        assert!(matches!(result, Err(FetchError::Status { .. })));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = Client::new();
        let result: Result<Value, _> =
            Fetch::get(&client, &format!("{}/missing", mock_server.uri()))
                .execute_retrying(5, Duration::from_millis(1))
                .await;
        assert!(result.is_err());
    }
}
