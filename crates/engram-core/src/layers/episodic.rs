//! Episodic Memory Layer (L5)
//!
//! Daily append-only logs plus the curated notebook. Each day is one JSON
//! file (`episodic/YYYY-MM-DD.json`), written as a whole-file replacement
//! so a crash can never leave a partial day on disk. An id index gives
//! O(1) get/delete and a band index drives LSH candidate lookup across
//! logs. The pre-compaction flush synthesizes entries from a session's
//! decisions, errors, solutions and pattern-bearing insights.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::notebook::{Notebook, NotebookHit};
use crate::hashing::{content_similarity, default_lsh_signatures, jaccard};
use crate::memory::{MemoryEntry, MemoryLayer, MemorySource};
use crate::surprise::{detect_patterns, score_importance};

/// How many recent entries the similarity-scan fallback considers when
/// no LSH band collides with the query.
const SCAN_FALLBACK_WINDOW: usize = 500;

// ============================================================================
// TYPES
// ============================================================================

/// One entry in a day log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodicEntry {
    /// Unique id (UUID v4)
    pub id: String,
    /// Capture instant
    pub timestamp: DateTime<Utc>,
    /// The logged content
    pub content: String,
    /// Capturing session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Owning project
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Tags for categorization and daily summaries
    #[serde(default)]
    pub tags: Vec<String>,
    /// Importance estimate (0.0 to 1.0)
    pub importance: f64,
    /// How the entry entered the log
    #[serde(default)]
    pub source: MemorySource,
}

impl EpisodicEntry {
    /// Render as a memory entry for uniform recall results.
    pub fn to_entry(&self) -> MemoryEntry {
        let mut entry = MemoryEntry::new(self.content.clone(), MemoryLayer::Episodic);
        entry.id = self.id.clone();
        entry.timestamp = self.timestamp;
        entry.metadata.tags = self.tags.clone();
        entry.metadata.session_id = self.session_id.clone();
        entry.metadata.project_id = self.project_id.clone();
        entry.metadata.importance = Some(self.importance);
        entry.metadata.source = self.source;
        entry
    }
}

/// One day of episodic memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayLog {
    /// The day this log covers
    pub date: NaiveDate,
    /// Entries in arrival order
    pub entries: Vec<EpisodicEntry>,
    /// Generated summary, if one was produced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Filters for an episodic query. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EpisodicFilter {
    /// Inclusive start date
    pub after: Option<NaiveDate>,
    /// Inclusive end date
    pub before: Option<NaiveDate>,
    /// Restrict to one project
    pub project_id: Option<String>,
    /// Restrict to entries carrying any of these tags
    pub tags: Vec<String>,
}

/// A scored episodic (or curated) query hit.
#[derive(Debug, Clone)]
pub struct EpisodicHit {
    /// The matched entry; notebook hits carry the `Curated` layer
    pub entry: MemoryEntry,
    /// `similarity × importance` (notebook hits carry their boost)
    pub score: f64,
}

/// Session context handed to the pre-compaction flush.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FlushContext {
    /// Decisions made this session
    #[serde(default)]
    pub decisions: Vec<String>,
    /// Errors encountered
    #[serde(default)]
    pub errors: Vec<String>,
    /// Solutions found
    #[serde(default)]
    pub solutions: Vec<String>,
    /// Free-form insights; only pattern-bearing ones are kept
    #[serde(default)]
    pub important_insights: Vec<String>,
    /// Session being flushed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Owning project
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

// ============================================================================
// LAYER
// ============================================================================

#[derive(Default)]
struct EpisodicState {
    logs: BTreeMap<NaiveDate, DayLog>,
    /// id → (date, index into that day's entries)
    id_index: HashMap<String, (NaiveDate, usize)>,
    /// band key → entry ids
    band_index: HashMap<String, HashSet<String>>,
    /// entry id → its band keys (for O(1) unindex)
    bands_by_entry: HashMap<String, Vec<String>>,
}

impl EpisodicState {
    fn reindex_day(&mut self, date: NaiveDate) {
        // Entry indices shift after a removal; rebuild the day's slots.
        if let Some(log) = self.logs.get(&date) {
            for (idx, entry) in log.entries.iter().enumerate() {
                self.id_index.insert(entry.id.clone(), (date, idx));
            }
        }
    }

    fn index_entry(&mut self, entry: &EpisodicEntry, date: NaiveDate, idx: usize) {
        self.id_index.insert(entry.id.clone(), (date, idx));
        let bands = default_lsh_signatures(&entry.content);
        for band in &bands {
            self.band_index
                .entry(band.clone())
                .or_default()
                .insert(entry.id.clone());
        }
        self.bands_by_entry.insert(entry.id.clone(), bands);
    }

    fn unindex_entry(&mut self, id: &str) {
        self.id_index.remove(id);
        if let Some(bands) = self.bands_by_entry.remove(id) {
            for band in bands {
                if let Some(ids) = self.band_index.get_mut(&band) {
                    ids.remove(id);
                    if ids.is_empty() {
                        self.band_index.remove(&band);
                    }
                }
            }
        }
    }
}

/// The episodic layer.
pub struct EpisodicLayer {
    dir: Option<PathBuf>,
    state: RwLock<EpisodicState>,
    notebook: Notebook,
}

impl EpisodicLayer {
    /// Open the layer at `dir`, loading every existing day file, and the
    /// curated notebook at `notebook_dir/MEMORY.md`.
    pub fn open(dir: &Path, notebook_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mut state = EpisodicState::default();

        for dir_entry in std::fs::read_dir(dir)? {
            let path = dir_entry?.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(date) = stem.parse::<NaiveDate>() else {
                continue;
            };
            match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|json| serde_json::from_str::<DayLog>(&json).map_err(|e| e.to_string()))
            {
                Ok(log) => {
                    state.logs.insert(date, log);
                }
                Err(e) => warn!(?path, "unreadable day log skipped: {e}"),
            }
        }

        let dates: Vec<NaiveDate> = state.logs.keys().copied().collect();
        for date in dates {
            let entries = state.logs[&date].entries.clone();
            for (idx, entry) in entries.iter().enumerate() {
                state.index_entry(entry, date, idx);
            }
        }
        debug!(days = state.logs.len(), "episodic logs loaded");

        Ok(Self {
            dir: Some(dir.to_path_buf()),
            state: RwLock::new(state),
            notebook: Notebook::open(notebook_dir)?,
        })
    }

    /// An ephemeral layer for tests and tooling.
    pub fn ephemeral() -> Self {
        Self {
            dir: None,
            state: RwLock::new(EpisodicState::default()),
            notebook: Notebook::ephemeral(),
        }
    }

    /// The curated notebook.
    pub fn notebook(&self) -> &Notebook {
        &self.notebook
    }

    fn persist_day(&self, log: &DayLog) {
        let Some(dir) = &self.dir else {
            return;
        };
        let path = dir.join(format!("{}.json", log.date));
        let json = match serde_json::to_string_pretty(log) {
            Ok(json) => json,
            Err(e) => {
                warn!(date = %log.date, "day log serialization failed: {e}");
                return;
            }
        };
        // Whole-file replacement via temp-file rename avoids partial writes.
        let tmp = path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp, json).and_then(|()| std::fs::rename(&tmp, &path)) {
            warn!(date = %log.date, "day log write failed: {e}");
        }
    }

    fn store_at(&self, mut entry: EpisodicEntry, date: NaiveDate) -> EpisodicEntry {
        if entry.importance == 0.0 {
            entry.importance = score_importance(&entry.content);
        }
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let log = state.logs.entry(date).or_insert_with(|| DayLog {
            date,
            entries: Vec::new(),
            summary: None,
        });
        log.entries.push(entry.clone());
        let idx = log.entries.len() - 1;
        let snapshot = log.clone();
        state.index_entry(&entry, date, idx);
        self.persist_day(&snapshot);
        entry
    }

    /// Append content to today's log.
    pub fn store(
        &self,
        content: &str,
        session_id: Option<String>,
        project_id: Option<String>,
        tags: Vec<String>,
        source: MemorySource,
    ) -> EpisodicEntry {
        let now = Utc::now();
        let entry = EpisodicEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: now,
            content: content.to_string(),
            session_id,
            project_id,
            tags,
            importance: score_importance(content),
            source,
        };
        self.store_at(entry, now.date_naive())
    }

    /// Synthesize pre-compaction entries from a session context.
    ///
    /// Decisions, errors and solutions are stored verbatim under their
    /// tag; insights are kept only when the pattern families recognize
    /// something in them. Everything lands tagged `pre-compaction` with a
    /// `compaction` source.
    pub fn flush_pre_compaction(&self, ctx: &FlushContext) -> Vec<EpisodicEntry> {
        let mut stored = Vec::new();
        let groups: [(&str, &[String]); 3] = [
            ("decision", &ctx.decisions),
            ("error", &ctx.errors),
            ("solution", &ctx.solutions),
        ];
        for (tag, items) in groups {
            for item in items {
                stored.push(self.store(
                    item,
                    ctx.session_id.clone(),
                    ctx.project_id.clone(),
                    vec!["pre-compaction".to_string(), tag.to_string()],
                    MemorySource::Compaction,
                ));
            }
        }

        for insight in &ctx.important_insights {
            let patterns = detect_patterns(insight);
            if patterns.is_empty() {
                continue;
            }
            let mut tags = vec!["pre-compaction".to_string(), "insight".to_string()];
            tags.extend(patterns.iter().map(|p| p.as_str().to_string()));
            stored.push(self.store(
                insight,
                ctx.session_id.clone(),
                ctx.project_id.clone(),
                tags,
                MemorySource::Compaction,
            ));
        }

        debug!(count = stored.len(), "pre-compaction flush stored entries");
        stored
    }

    fn passes_filter(entry: &EpisodicEntry, date: NaiveDate, filter: &EpisodicFilter) -> bool {
        if filter.after.is_some_and(|after| date < after) {
            return false;
        }
        if filter.before.is_some_and(|before| date > before) {
            return false;
        }
        if let Some(project) = &filter.project_id {
            if entry.project_id.as_deref() != Some(project.as_str()) {
                return false;
            }
        }
        if !filter.tags.is_empty() && !filter.tags.iter().any(|t| entry.tags.contains(t)) {
            return false;
        }
        true
    }

    /// Search logs, scored `similarity × importance`, merged with boosted
    /// notebook matches.
    ///
    /// LSH band candidates are tried first; when no band collides (the
    /// query is not a near-duplicate of anything logged) the most recent
    /// [`SCAN_FALLBACK_WINDOW`] entries are scanned by token similarity
    /// instead.
    pub fn query(&self, text: &str, filter: &EpisodicFilter, limit: usize) -> Vec<EpisodicHit> {
        let query_bands: HashSet<String> = default_lsh_signatures(text).into_iter().collect();
        let state = match self.state.read() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut candidate_ids: HashSet<&String> = HashSet::new();
        for band in &query_bands {
            if let Some(ids) = state.band_index.get(band) {
                candidate_ids.extend(ids);
            }
        }

        let mut hits: Vec<EpisodicHit> = if candidate_ids.is_empty() {
            state
                .logs
                .values()
                .rev()
                .flat_map(|log| log.entries.iter().map(move |e| (log.date, e)))
                .take(SCAN_FALLBACK_WINDOW)
                .filter_map(|(date, entry)| {
                    if !Self::passes_filter(entry, date, filter) {
                        return None;
                    }
                    let similarity = content_similarity(text, &entry.content);
                    if similarity <= 0.0 {
                        return None;
                    }
                    Some(EpisodicHit {
                        entry: entry.to_entry(),
                        score: similarity * entry.importance.max(0.1),
                    })
                })
                .collect()
        } else {
            candidate_ids
                .into_iter()
                .filter_map(|id| {
                    let (date, idx) = state.id_index.get(id)?;
                    let entry = state.logs.get(date)?.entries.get(*idx)?;
                    if !Self::passes_filter(entry, *date, filter) {
                        return None;
                    }
                    let entry_bands: HashSet<String> = state
                        .bands_by_entry
                        .get(id)
                        .map(|b| b.iter().cloned().collect())
                        .unwrap_or_default();
                    let similarity = jaccard(&query_bands, &entry_bands);
                    if similarity <= 0.0 {
                        return None;
                    }
                    Some(EpisodicHit {
                        entry: entry.to_entry(),
                        score: similarity * entry.importance.max(0.1),
                    })
                })
                .collect()
        };

        // Curated notebook matches, boosted, merged in.
        for NotebookHit { section, score } in self.notebook.search(text, limit) {
            let mut entry = MemoryEntry::new(
                format!("## {}\n{}", section.heading, section.body),
                MemoryLayer::Curated,
            );
            entry.id = format!("curated_{}", slug(&section.heading));
            hits.push(EpisodicHit { entry, score });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        hits.truncate(limit);
        hits
    }

    /// Fetch one entry by id, O(1).
    pub fn get(&self, id: &str) -> Option<EpisodicEntry> {
        let state = self.state.read().ok()?;
        let (date, idx) = state.id_index.get(id)?;
        state.logs.get(date)?.entries.get(*idx).cloned()
    }

    /// Delete by id; returns whether anything was removed.
    pub fn delete(&self, id: &str) -> bool {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some((date, idx)) = state.id_index.get(id).copied() else {
            return false;
        };
        let snapshot = {
            let Some(log) = state.logs.get_mut(&date) else {
                return false;
            };
            if idx >= log.entries.len() {
                return false;
            }
            log.entries.remove(idx);
            log.clone()
        };
        state.unindex_entry(id);
        state.reindex_day(date);
        self.persist_day(&snapshot);
        true
    }

    /// Today's log, if anything was stored today.
    pub fn today(&self) -> Option<DayLog> {
        let today = Utc::now().date_naive();
        self.state
            .read()
            .ok()
            .and_then(|state| state.logs.get(&today).cloned())
    }

    /// Deterministic daily summary: entries grouped by the canonical tags.
    ///
    /// Stores the summary on the day log and returns it; `None` when the
    /// day has no entries.
    pub fn summarize_day(&self, date: NaiveDate) -> Option<String> {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let log = state.logs.get_mut(&date)?;
        if log.entries.is_empty() {
            return None;
        }

        let mut summary = format!("# {}\n", date);
        for tag in ["decision", "error", "solution", "learning"] {
            let matching: Vec<&EpisodicEntry> = log
                .entries
                .iter()
                .filter(|e| e.tags.iter().any(|t| t == tag))
                .collect();
            if matching.is_empty() {
                continue;
            }
            summary.push_str(&format!("\n## {} ({})\n", tag, matching.len()));
            for entry in matching {
                summary.push_str(&format!("- {}\n", first_line(&entry.content)));
            }
        }
        let untagged = log
            .entries
            .iter()
            .filter(|e| {
                !e.tags
                    .iter()
                    .any(|t| ["decision", "error", "solution", "learning"].contains(&t.as_str()))
            })
            .count();
        if untagged > 0 {
            summary.push_str(&format!("\n## other ({})\n", untagged));
        }

        log.summary = Some(summary.clone());
        let snapshot = log.clone();
        self.persist_day(&snapshot);
        Some(summary)
    }

    /// Total entries across all days.
    pub fn count(&self) -> usize {
        self.state
            .read()
            .map(|s| s.logs.values().map(|l| l.entries.len()).sum())
            .unwrap_or(0)
    }

    /// Every entry across all days, oldest day first.
    pub fn export_all(&self) -> Vec<EpisodicEntry> {
        self.state
            .read()
            .map(|s| {
                s.logs
                    .values()
                    .flat_map(|l| l.entries.iter().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Re-import entries under their original dates.
    pub fn import(&self, entries: Vec<EpisodicEntry>) {
        for entry in entries {
            let date = entry.timestamp.date_naive();
            self.store_at(entry, date);
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

fn slug(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
