//! Elasticsearch client over the REST API
//!
//! # Example
//!
//! ```rust,no_run
//! use easybase_search::client::ElasticsearchClient;
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), easybase_search::SearchError> {
//! let client = ElasticsearchClient::builder()
//!     .url("http://localhost:9200")
//!     .basic_auth("elastic", "changeme")
//!     .timeout(Duration::from_secs(10))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::bulk::{to_ndjson, BulkOperation, BulkResponse};
use crate::error::{SearchError, SearchResult};
use crate::index::SearchIndex;
use crate::mapping::IndexMapping;
use crate::request::{SearchRequest, SearchResponse};

/// Default cluster URL
const DEFAULT_URL: &str = "http://localhost:9200";

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum error body bytes to read (prevent unbounded allocation)
const MAX_ERROR_BODY_BYTES: usize = 4096;

/// Page size for scroll requests in `all_ids`
const SCROLL_PAGE_SIZE: u64 = 1000;

/// Scroll context keep-alive
const SCROLL_KEEP_ALIVE: &str = "1m";

#[derive(Debug, Clone)]
struct BasicAuth {
    username: String,
    password: SecretString,
}

/// Builder for `ElasticsearchClient`
#[derive(Debug, Default)]
pub struct ElasticsearchClientBuilder {
    url: Option<String>,
    auth: Option<BasicAuth>,
    timeout: Option<Duration>,
}

impl ElasticsearchClientBuilder {
    /// Cluster base URL (default: `http://localhost:9200`)
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Basic authentication credentials
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(BasicAuth {
            username: username.into(),
            password: SecretString::from(password.into()),
        });
        self
    }

    /// Basic authentication with a pre-built secret
    pub fn basic_auth_secret(mut self, username: impl Into<String>, password: SecretString) -> Self {
        self.auth = Some(BasicAuth {
            username: username.into(),
            password,
        });
        self
    }

    /// Request timeout (default: 30s)
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the client
    pub fn build(self) -> SearchResult<ElasticsearchClient> {
        let url = self.url.unwrap_or_else(|| DEFAULT_URL.to_string());

        if !url.starts_with("https://") && !url.starts_with("http://") {
            return Err(SearchError::Config(format!(
                "url must start with http:// or https://, got: {url}"
            )));
        }

        if self.auth.is_some()
            && url.starts_with("http://")
            && !url.contains("localhost")
            && !url.contains("127.0.0.1")
        {
            warn!("Elasticsearch url uses plain HTTP; credentials will be sent in cleartext");
        }

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::Config(format!("failed to build HTTP client: {e}")))?;

        let base_url = url.trim_end_matches('/').to_string();
        debug!(url = %base_url, timeout_ms = timeout.as_millis() as u64, "Elasticsearch client initialized");

        Ok(ElasticsearchClient {
            base_url,
            auth: self.auth,
            timeout,
            http,
        })
    }
}

/// Elasticsearch [`SearchIndex`] implementation
pub struct ElasticsearchClient {
    base_url: String,
    auth: Option<BasicAuth>,
    timeout: Duration,
    http: reqwest::Client,
}

impl std::fmt::Debug for ElasticsearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticsearchClient")
            .field("base_url", &self.base_url)
            .field(
                "username",
                &self.auth.as_ref().map(|a| a.username.as_str()),
            )
            .field("password", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct EsErrorResponse {
    error: EsErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EsErrorDetail {
    Structured {
        #[serde(rename = "type")]
        kind: String,
        reason: Option<String>,
    },
    Plain(String),
}

impl ElasticsearchClient {
    /// Create a builder
    pub fn builder() -> ElasticsearchClientBuilder {
        ElasticsearchClientBuilder::default()
    }

    /// Cluster base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match &self.auth {
            Some(auth) => builder.basic_auth(&auth.username, Some(auth.password.expose_secret())),
            None => builder,
        }
    }

    async fn send_json(&self, builder: reqwest::RequestBuilder) -> SearchResult<Value> {
        let resp = builder.send().await?;
        if !resp.status().is_success() {
            return Err(Self::parse_error_response(resp).await);
        }
        Ok(resp.json::<Value>().await?)
    }

    /// Parse an error response from the cluster
    async fn parse_error_response(response: reqwest::Response) -> SearchError {
        let status = response.status().as_u16();

        // Read body with bounded allocation
        let body = match response.bytes().await {
            Ok(b) => {
                let end = b.len().min(MAX_ERROR_BODY_BYTES);
                String::from_utf8_lossy(&b[..end]).to_string()
            }
            Err(_) => String::new(),
        };

        let (kind, message) = match serde_json::from_str::<EsErrorResponse>(&body) {
            Ok(EsErrorResponse {
                error: EsErrorDetail::Structured { kind, reason },
            }) => {
                let message = match reason {
                    Some(reason) => format!("{kind}: {reason}"),
                    None => kind.clone(),
                };
                (kind, message)
            }
            Ok(EsErrorResponse {
                error: EsErrorDetail::Plain(message),
            }) => (String::new(), message),
            Err(_) => (String::new(), body),
        };

        match status {
            401 | 403 => SearchError::Auth(message),
            404 => SearchError::IndexNotFound(message),
            400 if kind == "resource_already_exists_exception" => {
                SearchError::IndexAlreadyExists(message)
            }
            429 | 500..=599 => SearchError::Unavailable(format!("server error ({status}): {message}")),
            _ => SearchError::BadRequest { status, message },
        }
    }

    async fn clear_scroll(&self, scroll_id: &str) {
        let result = self
            .request(reqwest::Method::DELETE, "_search/scroll")
            .json(&json!({ "scroll_id": [scroll_id] }))
            .send()
            .await;
        if let Err(e) = result {
            debug!(error = %e, "Failed to clear scroll context");
        }
    }
}

fn hit_ids(body: &Value) -> Vec<String> {
    body["hits"]["hits"]
        .as_array()
        .map(|hits| {
            hits.iter()
                .filter_map(|h| h["_id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl SearchIndex for ElasticsearchClient {
    fn name(&self) -> &str {
        "elasticsearch"
    }

    async fn create_index(&self, index: &str, mapping: &IndexMapping) -> SearchResult<()> {
        debug!(index = %index, fields = mapping.len(), "Creating index");
        self.send_json(
            self.request(reqwest::Method::PUT, index)
                .json(&mapping.to_body()),
        )
        .await?;
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> SearchResult<()> {
        match self
            .send_json(self.request(reqwest::Method::DELETE, index))
            .await
        {
            Ok(_) | Err(SearchError::IndexNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn index_exists(&self, index: &str) -> SearchResult<bool> {
        let resp = self.request(reqwest::Method::HEAD, index).send().await?;
        match resp.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            _ => Err(Self::parse_error_response(resp).await),
        }
    }

    async fn bulk(&self, index: &str, operations: &[BulkOperation]) -> SearchResult<BulkResponse> {
        if operations.is_empty() {
            return Ok(BulkResponse::default());
        }
        let body = self
            .send_json(
                self.request(reqwest::Method::POST, &format!("{index}/_bulk?refresh=false"))
                    .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                    .body(to_ndjson(operations)),
            )
            .await?;
        let response = BulkResponse::from_elasticsearch(&body);
        debug!(
            index = %index,
            items = response.items.len(),
            failed = response.items.len() - response.succeeded(),
            took_ms = response.took_ms,
            "Bulk request completed"
        );
        Ok(response)
    }

    async fn count(&self, index: &str) -> SearchResult<u64> {
        let body = self
            .send_json(self.request(reqwest::Method::GET, &format!("{index}/_count")))
            .await?;
        body["count"]
            .as_u64()
            .ok_or_else(|| SearchError::Serialization("missing count in _count response".into()))
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> SearchResult<SearchResponse> {
        let query = request.to_body()?;
        let body = self
            .send_json(
                self.request(reqwest::Method::POST, &format!("{index}/_search"))
                    .json(&query),
            )
            .await?;
        Ok(SearchResponse::from_elasticsearch(&body))
    }

    async fn all_ids(&self, index: &str) -> SearchResult<Vec<String>> {
        let mut body = self
            .send_json(
                self.request(
                    reqwest::Method::POST,
                    &format!("{index}/_search?scroll={SCROLL_KEEP_ALIVE}"),
                )
                .json(&json!({
                    "size": SCROLL_PAGE_SIZE,
                    "_source": false,
                    "query": { "match_all": {} },
                    "sort": ["_doc"]
                })),
            )
            .await?;

        let mut ids = Vec::new();
        loop {
            let page = hit_ids(&body);
            let scroll_id = body["_scroll_id"].as_str().map(str::to_string);
            if page.is_empty() {
                if let Some(scroll_id) = scroll_id {
                    self.clear_scroll(&scroll_id).await;
                }
                break;
            }
            ids.extend(page);

            let Some(scroll_id) = scroll_id else { break };
            let next = self
                .send_json(
                    self.request(reqwest::Method::POST, "_search/scroll")
                        .json(&json!({ "scroll": SCROLL_KEEP_ALIVE, "scroll_id": scroll_id })),
                )
                .await;
            match next {
                Ok(next) => body = next,
                Err(e) => {
                    self.clear_scroll(&scroll_id).await;
                    return Err(e);
                }
            }
        }

        Ok(ids)
    }
}
