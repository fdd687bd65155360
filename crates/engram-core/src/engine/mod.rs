//! Memory Engine Facade
//!
//! Orchestrates add/recall/prune/flush across the four layers, routes
//! content by classification cues, applies feedback, and emits a
//! [`MemoryEvent`] on the broadcast channel after every committed
//! mutation so the coordination server can fan events out to
//! subscribers.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::sync::LazyLock;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::feedback::{FeedbackOutcome, FeedbackSignal, FeedbackTracker, should_prune};
use crate::intent::{QueryIntent, QueryPlan, SearchStrategy, detect_intent, plan_query};
use crate::layers::{
    DayLog, EpisodicEntry, EpisodicFilter, EpisodicLayer, FactualLayer, FlushContext,
    LongTermConfig, LongTermLayer, SemanticLayer, SemanticPattern,
};
use crate::memory::{
    AddInput, AddOutcome, EngineStats, MemoryEntry, MemoryEvent, MemoryLayer, RecallInput,
    RecallResult,
};
use crate::recall::{
    DEFAULT_HIGHLIGHT_THRESHOLD, FusionStrategy, Highlighter, LayerResults, fuse,
};
use crate::surprise::detect_patterns;
use crate::vector::{
    EmbeddingGenerator, FailSoftStore, InMemoryVectorStore, PseudoEmbedder, RemoteVectorStore,
    VectorStore,
};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No memory with that id exists in any layer
    #[error("Memory not found: {0}")]
    NotFound(String),
    /// Caller-supplied input was unusable
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// Factual layer failure
    #[error(transparent)]
    Factual(#[from] crate::layers::FactualError),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;

// ============================================================================
// EXPORT FORMAT
// ============================================================================

/// Full engine snapshot for export/import round trips.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineExport {
    /// Factual layer entries
    pub factual: Vec<MemoryEntry>,
    /// Long-term layer entries
    pub long_term: Vec<MemoryEntry>,
    /// Semantic layer patterns
    pub semantic: Vec<SemanticPattern>,
    /// Episodic layer entries
    pub episodic: Vec<EpisodicEntry>,
}

// ============================================================================
// CONTENT ROUTING
// ============================================================================

/// Sentence-shaped fact: "<subject> is/are/equals <value>" on one line.
static FACT_SHAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[^\n]{1,120}\b(is|are|was|were|equals)\b[^\n]{1,120}$").unwrap()
});

/// Event narrative cues: past-tense actions anchored in time.
static NARRATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(today|yesterday|this (morning|afternoon|week)|we (deployed|shipped|released|met|merged|rolled)|happened|at \d{1,2}(:\d{2})?\s*(am|pm)?\b)",
    )
    .unwrap()
});

/// Classify content into its best-fitting layer.
///
/// Explicit event narratives go episodic, short definition-shaped facts
/// go factual, pattern/reasoning content goes semantic, everything else
/// lands in long-term.
pub fn classify_content(content: &str) -> MemoryLayer {
    let trimmed = content.trim();
    if NARRATIVE_RE.is_match(trimmed) {
        return MemoryLayer::Episodic;
    }
    if trimmed.len() <= 200 && FACT_SHAPE_RE.is_match(trimmed) && detect_patterns(trimmed).is_empty()
    {
        return MemoryLayer::Factual;
    }
    let patterns = detect_patterns(trimmed);
    let pattern_like = patterns.iter().any(|p| {
        use crate::surprise::PatternKind::*;
        matches!(p, Decision | Learning | Architecture | Preference)
    });
    if pattern_like || !crate::layers::extract_reasoning_chain(trimmed).is_empty() {
        return MemoryLayer::Semantic;
    }
    MemoryLayer::LongTerm
}

// ============================================================================
// ENGINE
// ============================================================================

/// Broadcast channel capacity for engine events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Content preview length in events.
const PREVIEW_CHARS: usize = 80;

/// The memory engine facade.
pub struct MemoryEngine {
    config: EngineConfig,
    factual: FactualLayer,
    long_term: LongTermLayer,
    semantic: SemanticLayer,
    episodic: EpisodicLayer,
    feedback: FeedbackTracker,
    highlighter: Highlighter,
    /// Feedback counters for layers whose entries carry no metadata bag
    feedback_overlay: Mutex<HashMap<String, (u32, u32)>>,
    event_tx: broadcast::Sender<MemoryEvent>,
}

impl MemoryEngine {
    /// Open an engine at the configured data dir.
    ///
    /// With a `vector_store_uri` configured (and offline mode off) the
    /// long-term layer talks to the remote store; otherwise the bundled
    /// in-memory store keeps everything local. Either way the pseudo
    /// embedder serves until a real one is injected via
    /// [`Self::open_with_backends`].
    pub fn open(config: EngineConfig) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingGenerator> =
            Arc::new(PseudoEmbedder::new(config.embedding_dimensions));
        let collection = config.collection_for(MemoryLayer::LongTerm);
        let store: Arc<dyn VectorStore> = match (&config.vector_store_uri, config.offline_mode) {
            (Some(uri), false) => Arc::new(RemoteVectorStore::new(
                uri.clone(),
                collection,
                config.vector_store_token.clone(),
                embedder.clone(),
            )),
            _ => Arc::new(InMemoryVectorStore::new(collection, embedder.clone())),
        };
        Self::open_with_backends(config, store, embedder)
    }

    /// Open with injected vector-store and embedding backends.
    ///
    /// The store is wrapped fail-soft: transient backend errors never
    /// surface from the engine.
    pub fn open_with_backends(
        config: EngineConfig,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingGenerator>,
    ) -> Result<Self> {
        let data_dir = config.project_data_dir();
        std::fs::create_dir_all(&data_dir)?;

        let factual = FactualLayer::open(&data_dir.join("factual"), config.hash_table_size)?;
        let semantic = SemanticLayer::open(&data_dir.join("semantic"))?;
        let episodic = EpisodicLayer::open(&data_dir.join("episodic"), &data_dir)?;

        let long_term = LongTermLayer::new(
            Arc::new(FailSoftStore::new(store)),
            LongTermConfig {
                surprise_threshold: config.surprise_threshold,
                filtering_enabled: config.surprise_filtering,
                half_life_days: config.decay_half_life_days,
            },
        );

        let highlighter = Highlighter::new(
            if config.offline_mode {
                None
            } else {
                config.highlight_service_url.clone()
            },
            Some(embedder),
        );

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        info!(data_dir = %data_dir.display(), "memory engine opened");
        Ok(Self {
            config,
            factual,
            long_term,
            semantic,
            episodic,
            feedback: FeedbackTracker::new(),
            highlighter,
            feedback_overlay: Mutex::new(HashMap::new()),
            event_tx,
        })
    }

    /// An ephemeral engine for tests: no disk, offline backends.
    pub fn ephemeral() -> Self {
        let config = EngineConfig {
            offline_mode: true,
            ..EngineConfig::at(std::env::temp_dir())
        };
        let embedder: Arc<dyn EmbeddingGenerator> =
            Arc::new(PseudoEmbedder::new(config.embedding_dimensions));
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new(
            "ephemeral_long_term",
            embedder.clone(),
        ));
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            factual: FactualLayer::open_in_memory(config.hash_table_size)
                .unwrap_or_else(|e| panic!("in-memory factual layer: {e}")),
            long_term: LongTermLayer::new(
                Arc::new(FailSoftStore::new(store)),
                LongTermConfig {
                    surprise_threshold: config.surprise_threshold,
                    filtering_enabled: config.surprise_filtering,
                    half_life_days: config.decay_half_life_days,
                },
            ),
            semantic: SemanticLayer::ephemeral(),
            episodic: EpisodicLayer::ephemeral(),
            feedback: FeedbackTracker::new(),
            highlighter: Highlighter::new(None, Some(embedder)),
            feedback_overlay: Mutex::new(HashMap::new()),
            event_tx,
            config,
        }
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<MemoryEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: MemoryEvent) {
        // No receivers is fine; the channel drops the event.
        let _ = self.event_tx.send(event);
    }

    // ------------------------------------------------------------------
    // Add
    // ------------------------------------------------------------------

    /// Add a memory, routing by content cues unless a layer is given.
    pub async fn add(&self, input: AddInput) -> Result<AddOutcome> {
        if input.content.trim().is_empty() {
            return Err(EngineError::InvalidInput("empty content".to_string()));
        }
        let layer = input.layer.unwrap_or_else(|| classify_content(&input.content));
        let outcome = self.add_to_layer(input, layer).await?;

        if outcome.stored {
            self.emit(MemoryEvent::Added {
                id: outcome.entry.id.clone(),
                layer: outcome.entry.layer,
                content_preview: outcome.entry.content_preview(PREVIEW_CHARS),
                project_id: outcome.entry.metadata.project_id.clone(),
                tags: outcome.entry.metadata.tags.clone(),
                timestamp: outcome.entry.timestamp,
            });
        }
        Ok(outcome)
    }

    /// Add directly to a specific layer, bypassing classification.
    pub async fn add_to_layer(&self, input: AddInput, layer: MemoryLayer) -> Result<AddOutcome> {
        match layer {
            MemoryLayer::Factual => {
                let mut entry = MemoryEntry::new(input.content, MemoryLayer::Factual);
                entry.metadata.tags = input.tags;
                entry.metadata.project_id = input.project_id;
                entry.metadata.session_id = input.session_id;
                entry.metadata.source = input.source;
                self.factual.store(&entry)?;
                Ok(AddOutcome::stored(entry))
            }
            MemoryLayer::LongTerm => {
                let mut entry = MemoryEntry::new(input.content, MemoryLayer::LongTerm);
                entry.metadata.tags = input.tags;
                entry.metadata.project_id = input.project_id;
                entry.metadata.session_id = input.session_id;
                entry.metadata.source = input.source;
                Ok(self.long_term.store(entry).await)
            }
            MemoryLayer::Semantic => {
                let result = self.semantic.store(&input.content);
                let mut entry = result.pattern.to_entry();
                entry.metadata.tags.extend(input.tags);
                entry.metadata.project_id = input.project_id;
                entry.metadata.session_id = input.session_id;
                entry.metadata.source = input.source;
                debug!(merged = result.merged, pattern_id = %entry.id, "semantic store");
                Ok(AddOutcome::stored(entry))
            }
            MemoryLayer::Episodic => {
                let stored = self.episodic.store(
                    &input.content,
                    input.session_id,
                    input.project_id,
                    input.tags,
                    input.source,
                );
                Ok(AddOutcome::stored(stored.to_entry()))
            }
            MemoryLayer::Curated => Err(EngineError::InvalidInput(
                "the curated origin is not storable; append to the notebook instead".to_string(),
            )),
        }
    }

    /// Append a line to the curated notebook.
    pub fn curate(&self, heading: &str, line: &str) {
        self.episodic.notebook().append(heading, line);
    }

    /// Reasoning chain of the semantic pattern best matching `topic`.
    pub fn reasoning_chain(&self, topic: &str) -> Vec<String> {
        self.semantic.reasoning_chain(topic)
    }

    /// Semantic patterns of one type, ranked by importance and decay.
    pub fn patterns_by_type(
        &self,
        pattern_type: crate::layers::PatternType,
        limit: usize,
    ) -> Vec<SemanticPattern> {
        self.semantic.query_by_type(pattern_type, limit)
    }

    // ------------------------------------------------------------------
    // Recall
    // ------------------------------------------------------------------

    /// Classify the query's intent without running a recall.
    pub fn detect_query_intent(&self, query: &str) -> QueryIntent {
        detect_intent(query)
    }

    /// Recall memories for a query: intent routing, concurrent per-layer
    /// queries, RRF fusion, utility reweighting, optional highlighting.
    pub async fn recall(&self, input: RecallInput) -> RecallResult {
        let started = Instant::now();
        if input.query.trim().is_empty() {
            return RecallResult::empty(started.elapsed().as_millis() as u64);
        }

        let plan = plan_query(detect_intent(&input.query));
        let mut lists = self.run_layer_queries(&input, &plan).await;
        self.apply_feedback_overlay(&mut lists);

        let fused = fuse(&lists, FusionStrategy::default(), input.limit);

        // Refresh access metadata for long-term hits after the read path
        // is done with the layer.
        let touched: Vec<String> = fused
            .iter()
            .filter(|m| m.origin == MemoryLayer::LongTerm)
            .map(|m| m.entry.id.clone())
            .collect();
        if !touched.is_empty() {
            self.long_term.touch(&touched).await;
        }

        let (highlighted_sentences, compression_rate) = if input.highlight && !fused.is_empty() {
            let (sentences, compression) = self
                .highlighter
                .highlight(&input.query, &fused, DEFAULT_HIGHLIGHT_THRESHOLD)
                .await;
            (Some(sentences), Some(compression))
        } else {
            (None, None)
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.emit(MemoryEvent::Recalled {
            query: input.query.clone(),
            result_count: fused.len(),
            result_ids: fused.iter().map(|m| m.entry.id.clone()).collect(),
            duration_ms: elapsed_ms,
            timestamp: Utc::now(),
        });

        RecallResult {
            fused_memories: fused,
            highlighted_sentences,
            compression_rate,
            total_query_time_ms: elapsed_ms,
        }
    }

    /// Issue the plan's per-layer queries concurrently.
    async fn run_layer_queries(&self, input: &RecallInput, plan: &QueryPlan) -> Vec<LayerResults> {
        let over_fetch = input.limit.saturating_mul(2).max(1);
        let episodic_filter = EpisodicFilter {
            after: input.after.map(|t| t.date_naive()),
            before: input.before.map(|t| t.date_naive()),
            project_id: input.project_id.clone(),
            tags: input.tags.clone(),
        };

        let futures = plan.layer_queries.iter().map(|layer_query| {
            let query = input.query.clone();
            let filter = episodic_filter.clone();
            async move {
                let hits: Vec<(MemoryEntry, f64)> = match layer_query.layer {
                    MemoryLayer::Factual => self
                        .factual
                        .query(&query, over_fetch)
                        .unwrap_or_default()
                        .into_iter()
                        .map(|h| (h.entry, h.score))
                        .collect(),
                    MemoryLayer::LongTerm => self
                        .long_term
                        .query(&query, over_fetch, input.include_decayed)
                        .await
                        .into_iter()
                        .map(|h| (h.entry, h.effective_score))
                        .collect(),
                    MemoryLayer::Semantic => self
                        .semantic
                        .query(&query, over_fetch)
                        .into_iter()
                        .map(|h| (h.pattern.to_entry(), h.score))
                        .collect(),
                    MemoryLayer::Episodic => {
                        let mut hits: Vec<(MemoryEntry, f64)> = self
                            .episodic
                            .query(&query, &filter, over_fetch)
                            .into_iter()
                            .map(|h| (h.entry, h.score))
                            .collect();
                        if layer_query.strategy == SearchStrategy::Temporal {
                            // Timeline plans rank by recency, not similarity.
                            hits.sort_by(|a, b| b.0.timestamp.cmp(&a.0.timestamp));
                        }
                        hits
                    }
                    MemoryLayer::Curated => Vec::new(),
                };
                LayerResults {
                    layer: layer_query.layer,
                    weight: layer_query.weight,
                    hits,
                }
            }
        });

        futures::future::join_all(futures).await
    }

    /// Stamp overlay feedback counters onto candidates before fusion so
    /// utility reweighting sees them.
    fn apply_feedback_overlay(&self, lists: &mut [LayerResults]) {
        let Ok(overlay) = self.feedback_overlay.lock() else {
            return;
        };
        if overlay.is_empty() {
            return;
        }
        for list in lists.iter_mut() {
            for (entry, _) in list.hits.iter_mut() {
                if let Some((helpful, harmful)) = overlay.get(&entry.id) {
                    entry.metadata.helpful_count = *helpful;
                    entry.metadata.harmful_count = *harmful;
                    entry.metadata.utility_score = Some(entry.metadata.utility());
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Lookup / delete / prune
    // ------------------------------------------------------------------

    /// Fetch a memory by id from whichever layer holds it.
    pub async fn get(&self, id: &str) -> Option<MemoryEntry> {
        if let Ok(Some(entry)) = self.factual.get(id) {
            return Some(entry);
        }
        if let Some(entry) = self.long_term.get(id).await {
            return Some(entry);
        }
        if let Some(pattern) = self.semantic.get(id) {
            return Some(pattern.to_entry());
        }
        self.episodic.get(id).map(|e| e.to_entry())
    }

    /// Delete a memory by id from whichever layer holds it.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let layer = if self.factual.get(id)?.is_some() {
            self.factual.delete(id)?;
            Some(MemoryLayer::Factual)
        } else if self.long_term.get(id).await.is_some() {
            self.long_term.delete(id).await;
            Some(MemoryLayer::LongTerm)
        } else if self.semantic.delete(id) {
            Some(MemoryLayer::Semantic)
        } else if self.episodic.delete(id) {
            Some(MemoryLayer::Episodic)
        } else {
            None
        };

        match layer {
            Some(layer) => {
                self.emit(MemoryEvent::Deleted {
                    id: id.to_string(),
                    layer,
                    timestamp: Utc::now(),
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Prune decayed long-term entries below `decay_threshold`.
    pub async fn prune(&self, decay_threshold: f64) -> usize {
        let removed = self.long_term.prune_decayed(decay_threshold).await;
        if removed > 0 {
            self.emit(MemoryEvent::Pruned {
                layer: MemoryLayer::LongTerm,
                removed,
                timestamp: Utc::now(),
            });
        }
        removed
    }

    /// Prune long-term entries whose utility fell below the threshold.
    pub async fn prune_low_utility(&self, threshold: f64) -> usize {
        let mut removed = 0;
        for entry in self.long_term.export_all().await {
            if should_prune(&entry.metadata, threshold) && self.long_term.delete(&entry.id).await {
                removed += 1;
            }
        }
        if removed > 0 {
            self.emit(MemoryEvent::Pruned {
                layer: MemoryLayer::LongTerm,
                removed,
                timestamp: Utc::now(),
            });
        }
        removed
    }

    // ------------------------------------------------------------------
    // Episodic surface
    // ------------------------------------------------------------------

    /// Flush a session context into pre-compaction episodic entries.
    pub fn flush_pre_compaction(&self, ctx: &FlushContext) -> usize {
        let stored = self.episodic.flush_pre_compaction(ctx);
        for entry in &stored {
            self.emit(MemoryEvent::Added {
                id: entry.id.clone(),
                layer: MemoryLayer::Episodic,
                content_preview: entry.content.chars().take(PREVIEW_CHARS).collect(),
                project_id: entry.project_id.clone(),
                tags: entry.tags.clone(),
                timestamp: entry.timestamp,
            });
        }
        stored.len()
    }

    /// Today's episodic log.
    pub fn today(&self) -> Option<DayLog> {
        self.episodic.today()
    }

    /// Generate (and store) the deterministic summary for a day.
    pub fn summarize_day(&self, date: NaiveDate) -> Option<String> {
        self.episodic.summarize_day(date)
    }

    // ------------------------------------------------------------------
    // Feedback
    // ------------------------------------------------------------------

    /// Record helpful/harmful feedback against a memory.
    ///
    /// Factual and long-term entries persist their counters in metadata;
    /// semantic and episodic ids are tracked in a session overlay applied
    /// at recall time.
    pub async fn record_feedback(
        &self,
        memory_id: &str,
        signal: FeedbackSignal,
        session_id: Option<&str>,
    ) -> Result<FeedbackOutcome> {
        if let Some(mut entry) = self.factual.get(memory_id)? {
            let outcome =
                self.feedback
                    .record(&mut entry.metadata, memory_id, signal, session_id);
            if outcome.applied {
                self.factual.store(&entry)?;
                self.emit_feedback_update(&entry);
            }
            return Ok(outcome);
        }

        if let Some(mut entry) = self.long_term.get(memory_id).await {
            let outcome =
                self.feedback
                    .record(&mut entry.metadata, memory_id, signal, session_id);
            if outcome.applied {
                self.long_term.update(&entry).await;
                self.emit_feedback_update(&entry);
            }
            return Ok(outcome);
        }

        if self.semantic.get(memory_id).is_some() || self.episodic.get(memory_id).is_some() {
            let mut scratch = crate::memory::MemoryMetadata::default();
            if let Ok(overlay) = self.feedback_overlay.lock() {
                if let Some((h, k)) = overlay.get(memory_id) {
                    scratch.helpful_count = *h;
                    scratch.harmful_count = *k;
                }
            }
            let outcome = self
                .feedback
                .record(&mut scratch, memory_id, signal, session_id);
            if outcome.applied {
                if let Ok(mut overlay) = self.feedback_overlay.lock() {
                    overlay.insert(
                        memory_id.to_string(),
                        (scratch.helpful_count, scratch.harmful_count),
                    );
                }
            }
            return Ok(outcome);
        }

        Err(EngineError::NotFound(memory_id.to_string()))
    }

    fn emit_feedback_update(&self, entry: &MemoryEntry) {
        self.emit(MemoryEvent::Updated {
            id: entry.id.clone(),
            layer: entry.layer,
            timestamp: Utc::now(),
        });
    }

    // ------------------------------------------------------------------
    // Stats / export
    // ------------------------------------------------------------------

    /// Per-layer and aggregate counts.
    pub async fn stats(&self) -> EngineStats {
        let factual = self.factual.count().unwrap_or(0);
        let long_term = self.long_term.count().await;
        let semantic = self.semantic.count();
        let episodic = self.episodic.count();
        EngineStats {
            factual,
            long_term,
            semantic,
            episodic,
            curated_sections: self.episodic.notebook().section_count(),
            total: factual + long_term + semantic + episodic,
        }
    }

    /// Snapshot every layer for export.
    pub async fn export(&self) -> EngineExport {
        EngineExport {
            factual: self.factual.export_all().unwrap_or_default(),
            long_term: self.long_term.export_all().await,
            semantic: self.semantic.export_all(),
            episodic: self.episodic.export_all(),
        }
    }

    /// Re-import an export, bypassing the surprise gate.
    pub async fn import(&self, export: EngineExport) -> Result<usize> {
        let mut imported = 0;
        for entry in export.factual {
            self.factual.store(&entry)?;
            imported += 1;
        }
        for entry in export.long_term {
            self.long_term.store_unfiltered(entry).await;
            imported += 1;
        }
        imported += export.semantic.len();
        self.semantic.import(export.semantic);
        imported += export.episodic.len();
        self.episodic.import(export.episodic);
        Ok(imported)
    }
}

// ============================================================================
// TESTS
// ============================================================================
