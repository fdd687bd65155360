//! # Engram Core
//!
//! Layered cognitive memory engine for AI agents:
//!
//! - **Surprise-gated ingestion**: novelty against recent context plus a
//!   tabulated pattern boost decides what is worth keeping
//! - **Four memory layers**: factual (O(1) n-gram lookup), long-term
//!   (decay-aware durable store), semantic (consolidated patterns with
//!   update tiers), episodic (daily logs + curated notebook)
//! - **Adaptive temporal decay**: `2^(-Δ/halfLife)`, slowed by access
//! - **Hybrid recall**: intent-routed per-layer queries fused with
//!   Reciprocal Rank Fusion and utility reweighting
//! - **Answer highlighting**: sidecar → embedding → lexical fallback chain
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use engram_core::{AddInput, EngineConfig, MemoryEngine, RecallInput};
//!
//! let engine = MemoryEngine::open(EngineConfig::default())?;
//!
//! // Ingest an observation
//! let outcome = engine.add(AddInput::content("The API key is sk-test-12345")).await?;
//!
//! // Recall with answer highlighting
//! let mut input = RecallInput::query("What is the API key?");
//! input.highlight = true;
//! let result = engine.recall(input).await;
//! ```
//!
//! ## Feature Flags
//!
//! - `embeddings`: local embedding generation with fastembed; without it
//!   the deterministic pseudo-embedder keeps everything working offline

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod engine;
pub mod feedback;
pub mod hashing;
pub mod intent;
pub mod layers;
pub mod memory;
pub mod recall;
pub mod surprise;
pub mod vector;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Memory types
pub use memory::{
    AddInput, AddOutcome, EngineStats, GHOST_ID_PREFIX, HighlightedSentence, MemoryEntry,
    MemoryEvent, MemoryLayer, MemoryMetadata, MemorySource, RecallInput, RecallResult,
    ScoredMemory,
};

// Engine facade
pub use engine::{EngineError, EngineExport, MemoryEngine, Result, classify_content};

// Configuration
pub use config::{
    DEFAULT_DECAY_HALF_LIFE_DAYS, DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_HASH_TABLE_SIZE,
    DEFAULT_SURPRISE_THRESHOLD, EngineConfig,
};

// Layers
pub use layers::{
    DayLog, EpisodicEntry, EpisodicFilter, EpisodicLayer, FactualLayer, FlushContext,
    LongTermConfig, LongTermLayer, Notebook, PatternType, SemanticLayer, SemanticPattern,
    UpdateFrequency,
};

// Scoring primitives
pub use surprise::{
    PatternKind, SurpriseResult, calculate_decay, calculate_momentum, calculate_surprise,
    pattern_boost, score_importance,
};

// Hashing & similarity
pub use hashing::{
    content_similarity, cosine_similarity, levenshtein_similarity, lsh_signatures, ngrams,
    tokenize,
};

// Intent & routing
pub use intent::{IntentType, QueryIntent, QueryPlan, SearchStrategy, detect_intent, plan_query};

// Recall fusion & highlighting
pub use recall::{FusionStrategy, Highlighter, LayerResults, fuse, utility_weight};

// Feedback
pub use feedback::{
    DEFAULT_UTILITY_PRUNE_THRESHOLD, FeedbackOutcome, FeedbackSignal, FeedbackTracker,
};

// Vector seam
pub use vector::{
    EmbeddingGenerator, FailSoftStore, InMemoryVectorStore, PseudoEmbedder, RemoteVectorStore,
    RerankStrategy, VectorError, VectorHit, VectorSearchOpts, VectorStore,
};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        AddInput, AddOutcome, EngineConfig, EngineError, EngineStats, MemoryEngine, MemoryEntry,
        MemoryEvent, MemoryLayer, RecallInput, RecallResult, Result,
    };

    pub use crate::{FeedbackSignal, IntentType, QueryIntent, SearchStrategy};

    pub use crate::{EmbeddingGenerator, VectorStore};
}
