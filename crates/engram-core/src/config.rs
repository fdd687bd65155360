//! Engine configuration.
//!
//! A plain struct with sensible defaults, a platform data dir via the
//! `directories` crate, and `ENGRAM_*` env-var overrides.

use std::path::PathBuf;

use crate::memory::MemoryLayer;

// ============================================================================
// DEFAULTS
// ============================================================================

/// Default surprise threshold for the long-term gate.
pub const DEFAULT_SURPRISE_THRESHOLD: f64 = 0.3;

/// Default decay half-life in days.
pub const DEFAULT_DECAY_HALF_LIFE_DAYS: f64 = 180.0;

/// Default factual-layer hash table size.
pub const DEFAULT_HASH_TABLE_SIZE: usize = 1_000_000;

/// Default embedding dimensionality (cosine metric).
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1024;

// ============================================================================
// CONFIG
// ============================================================================

/// Configuration for a [`crate::engine::MemoryEngine`] instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root data directory; per-project isolation prefixes this with the
    /// project id.
    pub data_dir: PathBuf,
    /// Project this engine instance serves
    pub project_id: Option<String>,
    /// External vector store endpoint; `None` keeps the in-memory store
    pub vector_store_uri: Option<String>,
    /// Bearer token for the vector store
    pub vector_store_token: Option<String>,
    /// Collection name prefix override; defaults to the project id
    pub collection_name: Option<String>,
    /// Minimum surprise score for a long-term write to persist
    pub surprise_threshold: f64,
    /// Whether the surprise gate is enforced at all
    pub surprise_filtering: bool,
    /// Half-life in days for temporal decay
    pub decay_half_life_days: f64,
    /// Bucket count of the factual n-gram index
    pub hash_table_size: usize,
    /// Skip every external dependency (vector DB, embedder, sidecar)
    pub offline_mode: bool,
    /// Answer-highlighting sidecar base URL, e.g. `http://127.0.0.1:8765`
    pub highlight_service_url: Option<String>,
    /// Embedding dimensionality for the configured collection
    pub embedding_dimensions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            project_id: None,
            vector_store_uri: None,
            vector_store_token: None,
            collection_name: None,
            surprise_threshold: DEFAULT_SURPRISE_THRESHOLD,
            surprise_filtering: true,
            decay_half_life_days: DEFAULT_DECAY_HALF_LIFE_DAYS,
            hash_table_size: DEFAULT_HASH_TABLE_SIZE,
            offline_mode: false,
            highlight_service_url: None,
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

/// Platform-appropriate default data directory.
///
/// Linux: `~/.local/share/engram`, macOS: `~/Library/Application
/// Support/ai.engram.engram`, with a relative-path fallback when no home
/// directory is resolvable.
fn default_data_dir() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("ai", "engram", "engram") {
        return proj_dirs.data_dir().to_path_buf();
    }
    PathBuf::from(".engram")
}

impl EngineConfig {
    /// A config rooted at an explicit data directory.
    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Apply `ENGRAM_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var("ENGRAM_DATA_DIR") {
            if !dir.is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(uri) = std::env::var("ENGRAM_VECTOR_STORE_URI") {
            if !uri.is_empty() {
                self.vector_store_uri = Some(uri);
            }
        }
        if let Ok(token) = std::env::var("ENGRAM_VECTOR_STORE_TOKEN") {
            if !token.is_empty() {
                self.vector_store_token = Some(token);
            }
        }
        if let Ok(threshold) = std::env::var("ENGRAM_SURPRISE_THRESHOLD") {
            if let Ok(value) = threshold.parse::<f64>() {
                self.surprise_threshold = value.clamp(0.0, 1.0);
            }
        }
        if let Ok(half_life) = std::env::var("ENGRAM_DECAY_HALF_LIFE_DAYS") {
            if let Ok(value) = half_life.parse::<f64>() {
                if value > 0.0 {
                    self.decay_half_life_days = value;
                }
            }
        }
        if let Ok(size) = std::env::var("ENGRAM_HASH_TABLE_SIZE") {
            if let Ok(value) = size.parse::<usize>() {
                if value > 0 {
                    self.hash_table_size = value;
                }
            }
        }
        if let Ok(offline) = std::env::var("ENGRAM_OFFLINE") {
            self.offline_mode = matches!(offline.as_str(), "1" | "true" | "yes");
        }
        if let Ok(url) = std::env::var("ENGRAM_HIGHLIGHT_URL") {
            if !url.is_empty() {
                self.highlight_service_url = Some(url);
            }
        }
        self
    }

    /// The effective data dir, with the project prefix applied.
    pub fn project_data_dir(&self) -> PathBuf {
        match &self.project_id {
            Some(project) => self.data_dir.join(project),
            None => self.data_dir.clone(),
        }
    }

    /// Vector-store collection name for a layer: `<prefix>_<layer_tag>`.
    pub fn collection_for(&self, layer: MemoryLayer) -> String {
        let prefix = self
            .collection_name
            .clone()
            .or_else(|| self.project_id.clone())
            .unwrap_or_else(|| "engram".to_string());
        format!("{}_{}", prefix, layer.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!((config.surprise_threshold - 0.3).abs() < 1e-9);
        assert!((config.decay_half_life_days - 180.0).abs() < 1e-9);
        assert_eq!(config.hash_table_size, 1_000_000);
        assert!(config.surprise_filtering);
        assert!(!config.offline_mode);
    }

    #[test]
    fn test_collection_naming() {
        let mut config = EngineConfig::at("/tmp/engram-test");
        config.project_id = Some("acme".to_string());
        assert_eq!(config.collection_for(MemoryLayer::LongTerm), "acme_long_term");
        assert_eq!(
            config.project_data_dir(),
            PathBuf::from("/tmp/engram-test/acme")
        );

        config.collection_name = Some("override".to_string());
        assert_eq!(config.collection_for(MemoryLayer::Factual), "override_factual");
    }
}
