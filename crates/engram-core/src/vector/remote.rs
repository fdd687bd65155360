//! Remote vector store over HTTP.
//!
//! A REST adapter speaking the qdrant-style collections/points API:
//! `PUT /collections/{name}`, `PUT /collections/{name}/points`,
//! `POST /collections/{name}/points/search`. Every call carries a
//! deadline; timeouts and transport failures surface as typed errors for
//! the fail-soft wrapper to swallow. Entries travel in the point payload
//! so reads reconstruct full [`MemoryEntry`] values without a second
//! lookup.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    EmbeddingGenerator, VectorError, VectorHit, VectorResult, VectorSearchOpts, VectorStore,
};
use crate::memory::MemoryEntry;

/// Deadline for any single store call.
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct CreateCollectionRequest {
    vectors: VectorParams,
}

#[derive(Debug, Serialize)]
struct VectorParams {
    size: usize,
    distance: &'static str,
}

#[derive(Debug, Serialize)]
struct UpsertRequest {
    points: Vec<Point>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Point {
    id: String,
    vector: Vec<f32>,
    payload: PointPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PointPayload {
    entry: MemoryEntry,
    /// Epoch millis, used for recency ordering on the scroll path
    inserted_at: i64,
}

#[derive(Debug, Serialize)]
struct SearchRequest {
    vector: Vec<f32>,
    limit: usize,
    with_payload: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    #[allow(dead_code)]
    id: String,
    score: f32,
    payload: Option<PointPayload>,
}

#[derive(Debug, Serialize)]
struct ScrollRequest {
    limit: usize,
    with_payload: bool,
    order_by: OrderBy,
}

#[derive(Debug, Serialize)]
struct OrderBy {
    key: &'static str,
    direction: &'static str,
}

#[derive(Debug, Deserialize)]
struct ScrollResponse {
    result: ScrollResult,
}

#[derive(Debug, Deserialize)]
struct ScrollResult {
    points: Vec<ScoredPointLoose>,
}

#[derive(Debug, Deserialize)]
struct ScoredPointLoose {
    #[allow(dead_code)]
    id: String,
    payload: Option<PointPayload>,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    result: CountResult,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: usize,
}

// ============================================================================
// STORE
// ============================================================================

/// Remote vector store client.
pub struct RemoteVectorStore {
    base_url: String,
    collection: String,
    token: Option<String>,
    client: reqwest::Client,
    embedder: Arc<dyn EmbeddingGenerator>,
    /// Insertion order mirror so `get_recent` works even when the remote
    /// lacks order-by support
    recent: RwLock<Vec<String>>,
    /// id → entry mirror for `get_recent` reconstruction
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl RemoteVectorStore {
    /// A client for `collection` at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        collection: impl Into<String>,
        token: Option<String>,
        embedder: Arc<dyn EmbeddingGenerator>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            token,
            client: reqwest::Client::new(),
            embedder,
            recent: RwLock::new(Vec::new()),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, suffix)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header("api-key", token),
            None => request,
        }
    }

    async fn send<B: Serialize>(
        &self,
        request: reqwest::RequestBuilder,
        body: &B,
    ) -> VectorResult<reqwest::Response> {
        let response = tokio::time::timeout(
            CALL_TIMEOUT,
            self.authorize(request).json(body).send(),
        )
        .await
        .map_err(|_| VectorError::Timeout)?
        .map_err(|e| VectorError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VectorError::Backend(format!(
                "{} from {}",
                response.status(),
                self.collection
            )));
        }
        Ok(response)
    }

    fn remember(&self, entry: &MemoryEntry) {
        if let Ok(mut recent) = self.recent.write() {
            recent.retain(|id| id != &entry.id);
            recent.push(entry.id.clone());
        }
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(entry.id.clone(), entry.clone());
        }
    }

    fn forget(&self, id: &str) -> bool {
        if let Ok(mut recent) = self.recent.write() {
            recent.retain(|existing| existing != id);
        }
        self.entries
            .write()
            .map(|mut entries| entries.remove(id).is_some())
            .unwrap_or(false)
    }
}

#[async_trait]
impl VectorStore for RemoteVectorStore {
    async fn initialize(&self) -> VectorResult<()> {
        let body = CreateCollectionRequest {
            vectors: VectorParams {
                size: self.embedder.dimensions(),
                distance: "Cosine",
            },
        };
        // Collection may already exist; the backend answers 4xx then,
        // which is fine as long as a subsequent count succeeds.
        match self.send(self.client.put(self.url("")), &body).await {
            Ok(_) => Ok(()),
            Err(VectorError::Backend(_)) => self.count().await.map(|_| ()),
            Err(e) => Err(e),
        }
    }

    async fn insert(&self, entry: &MemoryEntry) -> VectorResult<()> {
        let vector = self.embedder.embed(&entry.content).await?;
        let body = UpsertRequest {
            points: vec![Point {
                id: entry.id.clone(),
                vector,
                payload: PointPayload {
                    entry: entry.clone(),
                    inserted_at: chrono::Utc::now().timestamp_millis(),
                },
            }],
        };
        self.send(self.client.put(self.url("/points")), &body).await?;
        self.remember(entry);
        debug!(memory_id = %entry.id, collection = %self.collection, "remote upsert");
        Ok(())
    }

    async fn search(&self, query: &str, k: usize) -> VectorResult<Vec<VectorHit>> {
        let vector = self.embedder.embed(query).await?;
        let body = SearchRequest {
            vector,
            limit: k,
            with_payload: true,
        };
        let response = self
            .send(self.client.post(self.url("/points/search")), &body)
            .await?;
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| VectorError::Backend(format!("bad search response: {e}")))?;

        Ok(parsed
            .result
            .into_iter()
            .filter_map(|point| {
                point.payload.map(|payload| VectorHit {
                    entry: payload.entry,
                    score: f64::from(point.score),
                })
            })
            .collect())
    }

    async fn get(&self, id: &str) -> VectorResult<Option<MemoryEntry>> {
        // The local mirror answers session reads without a round trip.
        if let Ok(entries) = self.entries.read() {
            if let Some(entry) = entries.get(id) {
                return Ok(Some(entry.clone()));
            }
        }
        let response = self
            .send(
                self.client.post(self.url("/points")),
                &serde_json::json!({ "ids": [id], "with_payload": true }),
            )
            .await?;
        #[derive(Deserialize)]
        struct GetResponse {
            result: Vec<ScoredPointLoose>,
        }
        let parsed: GetResponse = response
            .json()
            .await
            .map_err(|e| VectorError::Backend(format!("bad get response: {e}")))?;
        Ok(parsed
            .result
            .into_iter()
            .next()
            .and_then(|p| p.payload)
            .map(|p| p.entry))
    }

    async fn get_recent(&self, k: usize) -> VectorResult<Vec<MemoryEntry>> {
        // Prefer the session mirror; fall back to a scroll ordered by
        // insertion time for a fresh process.
        let mirrored: Vec<MemoryEntry> = {
            let recent = self
                .recent
                .read()
                .map_err(|_| VectorError::Backend("lock poisoned".to_string()))?;
            let entries = self
                .entries
                .read()
                .map_err(|_| VectorError::Backend("lock poisoned".to_string()))?;
            recent
                .iter()
                .rev()
                .take(k)
                .filter_map(|id| entries.get(id).cloned())
                .collect()
        };
        if !mirrored.is_empty() {
            return Ok(mirrored);
        }

        let body = ScrollRequest {
            limit: k,
            with_payload: true,
            order_by: OrderBy {
                key: "inserted_at",
                direction: "desc",
            },
        };
        let response = self
            .send(self.client.post(self.url("/points/scroll")), &body)
            .await?;
        let parsed: ScrollResponse = response
            .json()
            .await
            .map_err(|e| VectorError::Backend(format!("bad scroll response: {e}")))?;
        Ok(parsed
            .result
            .points
            .into_iter()
            .filter_map(|p| p.payload.map(|payload| payload.entry))
            .collect())
    }

    async fn delete(&self, id: &str) -> VectorResult<bool> {
        self.send(
            self.client.post(self.url("/points/delete")),
            &serde_json::json!({ "points": [id] }),
        )
        .await?;
        Ok(self.forget(id))
    }

    async fn count(&self) -> VectorResult<usize> {
        let response = self
            .send(
                self.client.post(self.url("/points/count")),
                &serde_json::json!({ "exact": true }),
            )
            .await?;
        let parsed: CountResponse = response
            .json()
            .await
            .map_err(|e| VectorError::Backend(format!("bad count response: {e}")))?;
        Ok(parsed.result.count)
    }

    async fn close(&self) -> VectorResult<()> {
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
