//! Factual Memory Layer (L2)
//!
//! Cheap exact/near-exact lookup of short facts. Contents live in a
//! SQLite-backed keyed store (`factual/facts.db`); an in-memory n-gram
//! hash index (n ∈ {1, 2, 3}) over the reproducible hash family gives
//! O(1) candidate lookup. The index is rebuilt from the store on open, so
//! the two can never drift across a crash.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, RwLock};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::hashing::{levenshtein_similarity, ngram_hashes, tokenize};
use crate::memory::MemoryEntry;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Factual layer error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum FactualError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Lock poisoned
    #[error("Lock poisoned")]
    Poisoned,
}

/// Factual layer result type
pub type Result<T> = std::result::Result<T, FactualError>;

// ============================================================================
// LAYER
// ============================================================================

/// N-gram sizes the index covers.
const NGRAM_SIZES: [usize; 3] = [1, 2, 3];

/// A query hit with its bucket-overlap score.
#[derive(Debug, Clone)]
pub struct FactualHit {
    /// The matched entry
    pub entry: MemoryEntry,
    /// Fraction of the query's buckets the entry shares (0.0 to 1.0)
    pub score: f64,
}

/// The factual layer: SQLite keyed store plus in-memory n-gram index.
pub struct FactualLayer {
    conn: Mutex<Connection>,
    /// bucket → ids whose content hashes into it
    index: RwLock<HashMap<usize, HashSet<String>>>,
    table_size: usize,
}

impl FactualLayer {
    /// Open (or create) the layer at `dir/facts.db` and rebuild the index.
    pub fn open(dir: &Path, table_size: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let conn = Connection::open(dir.join("facts.db"))?;
        Self::configure_connection(&conn)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS facts (
                id TEXT PRIMARY KEY,
                entry TEXT NOT NULL,
                created_at TEXT NOT NULL
            );",
        )?;

        let layer = Self {
            conn: Mutex::new(conn),
            index: RwLock::new(HashMap::new()),
            table_size,
        };
        let rebuilt = layer.rebuild_index()?;
        debug!(entries = rebuilt, "factual index rebuilt");
        Ok(layer)
    }

    /// An ephemeral layer for tests and tooling.
    pub fn open_in_memory(table_size: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS facts (
                id TEXT PRIMARY KEY,
                entry TEXT NOT NULL,
                created_at TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            index: RwLock::new(HashMap::new()),
            table_size,
        })
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )?;
        Ok(())
    }

    /// All bucket hashes for a text, across the three n-gram sizes.
    fn buckets_for(&self, text: &str) -> Vec<usize> {
        let tokens = tokenize(text);
        let mut buckets = Vec::new();
        for n in NGRAM_SIZES {
            buckets.extend(ngram_hashes(&tokens, n, n, self.table_size));
        }
        buckets
    }

    fn rebuild_index(&self) -> Result<usize> {
        let entries = self.export_all()?;
        let mut index = self.index.write().map_err(|_| FactualError::Poisoned)?;
        index.clear();
        for entry in &entries {
            for bucket in self.buckets_for(&entry.content) {
                index.entry(bucket).or_default().insert(entry.id.clone());
            }
        }
        Ok(entries.len())
    }

    /// Store an entry: write-through to SQLite, then index its n-grams.
    pub fn store(&self, entry: &MemoryEntry) -> Result<()> {
        let json = serde_json::to_string(entry)?;
        {
            let conn = self.conn.lock().map_err(|_| FactualError::Poisoned)?;
            conn.execute(
                "INSERT OR REPLACE INTO facts (id, entry, created_at) VALUES (?1, ?2, ?3)",
                params![entry.id, json, entry.timestamp.to_rfc3339()],
            )?;
        }

        let mut index = self.index.write().map_err(|_| FactualError::Poisoned)?;
        for bucket in self.buckets_for(&entry.content) {
            index.entry(bucket).or_default().insert(entry.id.clone());
        }
        Ok(())
    }

    /// Rank stored facts by the fraction of query buckets they share.
    pub fn query(&self, text: &str, limit: usize) -> Result<Vec<FactualHit>> {
        let query_buckets = self.buckets_for(text);
        if query_buckets.is_empty() {
            return Ok(Vec::new());
        }

        let mut shared: HashMap<String, usize> = HashMap::new();
        {
            let index = self.index.read().map_err(|_| FactualError::Poisoned)?;
            for bucket in &query_buckets {
                if let Some(ids) = index.get(bucket) {
                    for id in ids {
                        *shared.entry(id.clone()).or_default() += 1;
                    }
                }
            }
        }

        let total = query_buckets.len() as f64;
        let mut ranked: Vec<(String, f64)> = shared
            .into_iter()
            .map(|(id, count)| (id, count as f64 / total))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(limit);

        // Near-exact refinement: blend in edit-distance similarity so a
        // verbatim fact outranks one that merely shares vocabulary.
        let mut hits = Vec::with_capacity(ranked.len());
        for (id, bucket_score) in ranked {
            if let Some(entry) = self.get(&id)? {
                let edit = levenshtein_similarity(
                    &text.to_lowercase(),
                    &entry.content.to_lowercase(),
                );
                hits.push(FactualHit {
                    score: bucket_score * 0.8 + edit * 0.2,
                    entry,
                });
            }
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        Ok(hits)
    }

    /// Fetch one fact by id; missing ids return `None`.
    pub fn get(&self, id: &str) -> Result<Option<MemoryEntry>> {
        let conn = self.conn.lock().map_err(|_| FactualError::Poisoned)?;
        let json: Option<String> = conn
            .query_row("SELECT entry FROM facts WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Delete by id; returns whether anything was removed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let existing = self.get(id)?;
        let Some(entry) = existing else {
            return Ok(false);
        };

        {
            let conn = self.conn.lock().map_err(|_| FactualError::Poisoned)?;
            conn.execute("DELETE FROM facts WHERE id = ?1", params![id])?;
        }

        let mut index = self.index.write().map_err(|_| FactualError::Poisoned)?;
        for bucket in self.buckets_for(&entry.content) {
            if let Some(ids) = index.get_mut(&bucket) {
                ids.remove(id);
                if ids.is_empty() {
                    index.remove(&bucket);
                }
            }
        }
        Ok(true)
    }

    /// Number of stored facts.
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|_| FactualError::Poisoned)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM facts", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Every stored fact, for export and index rebuilds.
    pub fn export_all(&self) -> Result<Vec<MemoryEntry>> {
        let conn = self.conn.lock().map_err(|_| FactualError::Poisoned)?;
        let mut stmt = conn.prepare("SELECT entry FROM facts ORDER BY created_at ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(serde_json::from_str(&row?)?);
        }
        Ok(entries)
    }
}

// ============================================================================
// TESTS
// ============================================================================
