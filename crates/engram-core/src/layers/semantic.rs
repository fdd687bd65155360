//! Semantic Memory Layer (L4)
//!
//! Consolidated patterns with multi-tier update discipline. Each pattern
//! carries an update frequency tier chosen from its importance; merges
//! into an existing pattern only happen through the LSH candidate set at
//! Jaccard ≥ 0.8 and only when the tier's minimum update interval has
//! passed. The layer is two tables: `patterns[id]` owns the data and the
//! band index holds ids only, so no object cycles exist.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::hashing::{default_lsh_signatures, jaccard};
use crate::memory::{MemoryEntry, MemoryLayer};
use crate::surprise::{calculate_decay, score_importance};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Band-set Jaccard at or above which a stored pattern absorbs new content.
const MERGE_SIMILARITY: f64 = 0.8;

/// Minimum query score a candidate must clear.
const QUERY_SCORE_FLOOR: f64 = 0.1;

/// Reasoning chains are capped at this many steps.
const MAX_REASONING_STEPS: usize = 10;

/// Separator used when merged content is appended rather than subsumed.
const MERGE_SEPARATOR: &str = "\n---\n";

// ============================================================================
// UPDATE FREQUENCY TIERS
// ============================================================================

/// How often a pattern may absorb updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateFrequency {
    /// Stable knowledge: long half-life, rare updates
    Slow,
    /// Working knowledge
    Medium,
    /// Volatile knowledge: short half-life, frequent updates
    Fast,
}

impl UpdateFrequency {
    /// Tier from importance: `> 0.7` slow, `> 0.4` medium, else fast.
    pub fn from_importance(importance: f64) -> Self {
        if importance > 0.7 {
            UpdateFrequency::Slow
        } else if importance > 0.4 {
            UpdateFrequency::Medium
        } else {
            UpdateFrequency::Fast
        }
    }

    /// Decay half-life in days.
    pub fn half_life_days(&self) -> f64 {
        match self {
            UpdateFrequency::Slow => 365.0,
            UpdateFrequency::Medium => 90.0,
            UpdateFrequency::Fast => 30.0,
        }
    }

    /// Minimum time between updates to the same pattern.
    pub fn min_update_interval(&self) -> Duration {
        match self {
            UpdateFrequency::Slow => Duration::days(7),
            UpdateFrequency::Medium => Duration::days(1),
            UpdateFrequency::Fast => Duration::hours(1),
        }
    }

    /// Ranking weight.
    pub fn weight(&self) -> f64 {
        match self {
            UpdateFrequency::Slow => 1.0,
            UpdateFrequency::Medium => 0.8,
            UpdateFrequency::Fast => 0.6,
        }
    }
}

// ============================================================================
// PATTERN TYPES
// ============================================================================

/// Classification of a pattern's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    Architecture,
    Debugging,
    Preference,
    Workflow,
    Learning,
    Api,
    Testing,
    #[default]
    General,
}

impl PatternType {
    /// All concrete types, in detection priority order.
    const DETECTION_ORDER: [PatternType; 7] = [
        PatternType::Debugging,
        PatternType::Architecture,
        PatternType::Testing,
        PatternType::Api,
        PatternType::Preference,
        PatternType::Workflow,
        PatternType::Learning,
    ];

    fn regex(&self) -> Option<&'static Regex> {
        static ARCHITECTURE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"\b(architecture|design|structure|component|module|layer|boundary)\b")
                .unwrap()
        });
        static DEBUGGING: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"\b(bug|error|crash|panic|debug(ging)?|stack trace|root cause)\b").unwrap()
        });
        static PREFERENCE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"\b(prefers?|preference|convention|style|always|never)\b").unwrap()
        });
        static WORKFLOW: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"\b(workflow|process|step|procedure|checklist|pipeline)\b").unwrap()
        });
        static LEARNING: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"\b(learned|insight|discovered|realized|turns out)\b").unwrap()
        });
        static API: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"\b(api|endpoint|request|response|sdk|client|rest|rpc)\b").unwrap()
        });
        static TESTING: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"\b(test(s|ing)?|assert|fixture|coverage|mock)\b").unwrap()
        });

        match self {
            PatternType::Architecture => Some(&ARCHITECTURE),
            PatternType::Debugging => Some(&DEBUGGING),
            PatternType::Preference => Some(&PREFERENCE),
            PatternType::Workflow => Some(&WORKFLOW),
            PatternType::Learning => Some(&LEARNING),
            PatternType::Api => Some(&API),
            PatternType::Testing => Some(&TESTING),
            PatternType::General => None,
        }
    }

    /// Classify content; falls back to `General`.
    pub fn detect(content: &str) -> Self {
        let lower = content.to_lowercase();
        for kind in Self::DETECTION_ORDER {
            if let Some(re) = kind.regex() {
                if re.is_match(&lower) {
                    return kind;
                }
            }
        }
        PatternType::General
    }

    /// String name used in queries and summaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Architecture => "architecture",
            PatternType::Debugging => "debugging",
            PatternType::Preference => "preference",
            PatternType::Workflow => "workflow",
            PatternType::Learning => "learning",
            PatternType::Api => "api",
            PatternType::Testing => "testing",
            PatternType::General => "general",
        }
    }
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// REASONING CHAINS
// ============================================================================

static NUMBERED_STEP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*\d+[.)]\s+(.+)$").unwrap());
static CAUSAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(because|therefore|thus|since|hence)\b").unwrap()
});
static CONDITIONAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(if|when)\b.+\b(then|we|use)\b").unwrap());

/// Extract a reasoning chain from content: numbered steps, causal
/// sentences, and conditional clauses, capped at ten steps.
pub fn extract_reasoning_chain(content: &str) -> Vec<String> {
    let mut chain = Vec::new();

    for cap in NUMBERED_STEP_RE.captures_iter(content) {
        chain.push(cap[1].trim().to_string());
    }

    for sentence in content.split(['.', '\n']) {
        let trimmed = sentence.trim();
        if trimmed.is_empty() {
            continue;
        }
        if CAUSAL_RE.is_match(trimmed) || CONDITIONAL_RE.is_match(trimmed) {
            let step = trimmed.to_string();
            if !chain.contains(&step) {
                chain.push(step);
            }
        }
    }

    chain.truncate(MAX_REASONING_STEPS);
    chain
}

// ============================================================================
// PATTERN
// ============================================================================

/// A consolidated semantic pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticPattern {
    /// Unique pattern id (UUID v4)
    pub id: String,
    /// Consolidated content, possibly merged from several stores
    pub content: String,
    /// Update tier selected from importance at creation
    pub frequency: UpdateFrequency,
    /// Times this pattern absorbed an update
    pub update_count: u32,
    /// Last merge instant
    pub last_updated: DateTime<Utc>,
    /// Creation instant
    pub created_at: DateTime<Utc>,
    /// Extracted reasoning steps, capped at ten
    pub reasoning_chain: Vec<String>,
    /// Content classification
    pub pattern_type: PatternType,
    /// Importance estimate (0.0 to 1.0)
    pub importance: f64,
    /// LSH band keys of the current content
    pub lsh_signatures: Vec<String>,
}

impl SemanticPattern {
    fn new(content: &str) -> Self {
        let importance = score_importance(content);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.to_string(),
            frequency: UpdateFrequency::from_importance(importance),
            update_count: 0,
            last_updated: now,
            created_at: now,
            reasoning_chain: extract_reasoning_chain(content),
            pattern_type: PatternType::detect(content),
            importance,
            lsh_signatures: default_lsh_signatures(content),
        }
    }

    /// Current decay under the pattern's own tier half-life.
    pub fn decay(&self, now: DateTime<Utc>) -> f64 {
        calculate_decay(
            self.created_at,
            Some(self.last_updated),
            self.frequency.half_life_days(),
            now,
        )
    }

    /// Render as a memory entry for uniform recall results.
    pub fn to_entry(&self) -> MemoryEntry {
        let mut entry = MemoryEntry::new(self.content.clone(), MemoryLayer::Semantic);
        entry.id = self.id.clone();
        entry.timestamp = self.created_at;
        entry.metadata.importance = Some(self.importance);
        entry.metadata.last_accessed = Some(self.last_updated);
        entry
            .metadata
            .tags
            .push(format!("pattern:{}", self.pattern_type));
        entry
    }
}

/// Outcome of a semantic store: created fresh or merged into an existing
/// pattern.
#[derive(Debug, Clone)]
pub struct SemanticStoreResult {
    /// The resulting pattern
    pub pattern: SemanticPattern,
    /// True when an existing pattern absorbed the content
    pub merged: bool,
}

/// A semantic query hit.
#[derive(Debug, Clone)]
pub struct SemanticHit {
    /// The matched pattern
    pub pattern: SemanticPattern,
    /// `similarity × frequencyWeight × decay × (1 + importance)`
    pub score: f64,
}

// ============================================================================
// LAYER
// ============================================================================

#[derive(Default, Serialize, Deserialize)]
struct SemanticState {
    patterns: HashMap<String, SemanticPattern>,
    #[serde(skip)]
    by_type: HashMap<PatternType, HashSet<String>>,
    #[serde(skip)]
    lsh_index: HashMap<String, HashSet<String>>,
}

impl SemanticState {
    fn index_pattern(&mut self, pattern: &SemanticPattern) {
        self.by_type
            .entry(pattern.pattern_type)
            .or_default()
            .insert(pattern.id.clone());
        for band in &pattern.lsh_signatures {
            self.lsh_index
                .entry(band.clone())
                .or_default()
                .insert(pattern.id.clone());
        }
    }

    fn unindex_pattern(&mut self, pattern: &SemanticPattern) {
        if let Some(ids) = self.by_type.get_mut(&pattern.pattern_type) {
            ids.remove(&pattern.id);
        }
        for band in &pattern.lsh_signatures {
            if let Some(ids) = self.lsh_index.get_mut(band) {
                ids.remove(&pattern.id);
                if ids.is_empty() {
                    self.lsh_index.remove(band);
                }
            }
        }
    }

    fn rebuild_indices(&mut self) {
        self.by_type.clear();
        self.lsh_index.clear();
        let patterns: Vec<SemanticPattern> = self.patterns.values().cloned().collect();
        for pattern in patterns {
            self.index_pattern(&pattern);
        }
    }
}

/// The semantic layer.
pub struct SemanticLayer {
    state: RwLock<SemanticState>,
    snapshot_path: Option<PathBuf>,
}

impl SemanticLayer {
    /// Open the layer, loading `dir/patterns.json` when present.
    pub fn open(dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let snapshot_path = dir.join("patterns.json");
        let mut state = SemanticState::default();
        if snapshot_path.exists() {
            match std::fs::read_to_string(&snapshot_path) {
                Ok(json) => match serde_json::from_str::<SemanticState>(&json) {
                    Ok(loaded) => state = loaded,
                    Err(e) => warn!("semantic snapshot unreadable, starting empty: {e}"),
                },
                Err(e) => warn!("semantic snapshot unreadable, starting empty: {e}"),
            }
        }
        state.rebuild_indices();
        Ok(Self {
            state: RwLock::new(state),
            snapshot_path: Some(snapshot_path),
        })
    }

    /// An ephemeral layer for tests and tooling.
    pub fn ephemeral() -> Self {
        Self {
            state: RwLock::new(SemanticState::default()),
            snapshot_path: None,
        }
    }

    fn persist(&self, state: &SemanticState) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let json = match serde_json::to_string_pretty(state) {
            Ok(json) => json,
            Err(e) => {
                warn!("semantic snapshot serialization failed: {e}");
                return;
            }
        };
        // Whole-file replacement via temp-file rename avoids partial writes.
        let tmp = path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp, json).and_then(|()| std::fs::rename(&tmp, path)) {
            warn!("semantic snapshot write failed: {e}");
        }
    }

    /// Best merge candidate for a band set, if any clears the threshold.
    fn find_merge_target(
        state: &SemanticState,
        bands: &HashSet<String>,
    ) -> Option<(String, f64)> {
        let mut candidate_ids: HashSet<&String> = HashSet::new();
        for band in bands {
            if let Some(ids) = state.lsh_index.get(band) {
                candidate_ids.extend(ids);
            }
        }

        let mut best: Option<(String, f64)> = None;
        for id in candidate_ids {
            let Some(pattern) = state.patterns.get(id) else {
                continue;
            };
            let pattern_bands: HashSet<String> =
                pattern.lsh_signatures.iter().cloned().collect();
            let similarity = jaccard(bands, &pattern_bands);
            if similarity >= MERGE_SIMILARITY
                && best.as_ref().is_none_or(|(_, s)| similarity > *s)
            {
                best = Some((id.clone(), similarity));
            }
        }
        best
    }

    /// Merge `incoming` into existing pattern content.
    ///
    /// If one side subsumes the other the longer side wins; otherwise the
    /// incoming content is appended behind a separator.
    fn merge_content(existing: &str, incoming: &str) -> String {
        if existing.contains(incoming) {
            existing.to_string()
        } else if incoming.contains(existing) {
            incoming.to_string()
        } else {
            format!("{existing}{MERGE_SEPARATOR}{incoming}")
        }
    }

    /// Store content: merge into a near-duplicate pattern when its tier
    /// allows an update now, otherwise create a new pattern.
    pub fn store(&self, content: &str) -> SemanticStoreResult {
        let bands: HashSet<String> = default_lsh_signatures(content).into_iter().collect();
        let now = Utc::now();

        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some((target_id, similarity)) = Self::find_merge_target(&state, &bands) {
            let target = state
                .patterns
                .get(&target_id)
                .filter(|p| now - p.last_updated >= p.frequency.min_update_interval())
                .cloned();
            if let Some(mut pattern) = target {
                state.unindex_pattern(&pattern);

                pattern.content = Self::merge_content(&pattern.content, content);
                for step in extract_reasoning_chain(content) {
                    if !pattern.reasoning_chain.contains(&step) {
                        pattern.reasoning_chain.push(step);
                    }
                }
                pattern.reasoning_chain.truncate(MAX_REASONING_STEPS);
                pattern.importance = score_importance(&pattern.content);
                pattern.lsh_signatures = default_lsh_signatures(&pattern.content);
                pattern.update_count += 1;
                pattern.last_updated = now;

                state.index_pattern(&pattern);
                state.patterns.insert(target_id.clone(), pattern.clone());
                self.persist(&state);
                debug!(pattern_id = %target_id, similarity, "merged into existing pattern");
                return SemanticStoreResult {
                    pattern,
                    merged: true,
                };
            }
        }

        let pattern = SemanticPattern::new(content);
        state.index_pattern(&pattern);
        state.patterns.insert(pattern.id.clone(), pattern.clone());
        self.persist(&state);
        SemanticStoreResult {
            pattern,
            merged: false,
        }
    }

    /// Query, scored `similarity × frequencyWeight × decay × (1 +
    /// importance)`.
    ///
    /// Band-Jaccard over the LSH candidate set is tried first; when no
    /// band collides, every pattern is scanned by token similarity
    /// instead (patterns are consolidated, so the table stays small).
    pub fn query(&self, text: &str, limit: usize) -> Vec<SemanticHit> {
        let bands: HashSet<String> = default_lsh_signatures(text).into_iter().collect();
        let now = Utc::now();
        let state = match self.state.read() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut candidate_ids: HashSet<&String> = HashSet::new();
        for band in &bands {
            if let Some(ids) = state.lsh_index.get(band) {
                candidate_ids.extend(ids);
            }
        }

        let score_pattern = |pattern: &SemanticPattern, similarity: f64| {
            similarity
                * pattern.frequency.weight()
                * pattern.decay(now)
                * (1.0 + pattern.importance)
        };

        let mut hits: Vec<SemanticHit> = if candidate_ids.is_empty() {
            state
                .patterns
                .values()
                .filter_map(|pattern| {
                    let similarity = crate::hashing::content_similarity(text, &pattern.content);
                    let score = score_pattern(pattern, similarity);
                    (score > QUERY_SCORE_FLOOR).then(|| SemanticHit {
                        pattern: pattern.clone(),
                        score,
                    })
                })
                .collect()
        } else {
            candidate_ids
                .into_iter()
                .filter_map(|id| {
                    let pattern = state.patterns.get(id)?;
                    let pattern_bands: HashSet<String> =
                        pattern.lsh_signatures.iter().cloned().collect();
                    let similarity = jaccard(&bands, &pattern_bands);
                    let score = score_pattern(pattern, similarity);
                    (score > QUERY_SCORE_FLOOR).then(|| SemanticHit {
                        pattern: pattern.clone(),
                        score,
                    })
                })
                .collect()
        };

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.pattern.id.cmp(&b.pattern.id))
        });
        hits.truncate(limit);
        hits
    }

    /// Patterns of one type, ranked by `importance × decay`.
    pub fn query_by_type(&self, pattern_type: PatternType, limit: usize) -> Vec<SemanticPattern> {
        let now = Utc::now();
        let state = match self.state.read() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(ids) = state.by_type.get(&pattern_type) else {
            return Vec::new();
        };
        let mut patterns: Vec<(f64, SemanticPattern)> = ids
            .iter()
            .filter_map(|id| state.patterns.get(id))
            .map(|p| (p.importance * p.decay(now), p.clone()))
            .collect();
        patterns.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        patterns.into_iter().take(limit).map(|(_, p)| p).collect()
    }

    /// Reasoning chain of the pattern best matching `topic`.
    pub fn reasoning_chain(&self, topic: &str) -> Vec<String> {
        self.query(topic, 1)
            .into_iter()
            .next()
            .map(|hit| hit.pattern.reasoning_chain)
            .unwrap_or_default()
    }

    /// Fetch one pattern by id.
    pub fn get(&self, id: &str) -> Option<SemanticPattern> {
        self.state
            .read()
            .ok()
            .and_then(|state| state.patterns.get(id).cloned())
    }

    /// Delete by id; returns whether anything was removed.
    pub fn delete(&self, id: &str) -> bool {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(pattern) = state.patterns.remove(id) else {
            return false;
        };
        state.unindex_pattern(&pattern);
        self.persist(&state);
        true
    }

    /// Number of stored patterns.
    pub fn count(&self) -> usize {
        self.state.read().map(|s| s.patterns.len()).unwrap_or(0)
    }

    /// Every pattern, for export.
    pub fn export_all(&self) -> Vec<SemanticPattern> {
        self.state
            .read()
            .map(|s| s.patterns.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Re-import patterns, replacing ids that already exist.
    pub fn import(&self, patterns: Vec<SemanticPattern>) {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        for pattern in patterns {
            state.patterns.insert(pattern.id.clone(), pattern);
        }
        state.rebuild_indices();
        self.persist(&state);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_from_importance() {
        assert_eq!(UpdateFrequency::from_importance(0.9), UpdateFrequency::Slow);
        assert_eq!(UpdateFrequency::from_importance(0.5), UpdateFrequency::Medium);
        assert_eq!(UpdateFrequency::from_importance(0.2), UpdateFrequency::Fast);
    }

    #[test]
    fn test_pattern_type_detection() {
        assert_eq!(
            PatternType::detect("the root cause was a stack trace in the parser"),
            PatternType::Debugging
        );
        assert_eq!(
            PatternType::detect("we split the component into two modules"),
            PatternType::Architecture
        );
        assert_eq!(PatternType::detect("nothing special"), PatternType::General);
    }

    #[test]
    fn test_reasoning_chain_extraction() {
        let content = "Deploy procedure:\n1. run tests\n2. tag the release\n3. push to staging\nWe do this because staging catches config drift.";
        let chain = extract_reasoning_chain(content);
        assert!(chain.len() >= 4);
        assert_eq!(chain[0], "run tests");
        assert!(chain.iter().any(|s| s.contains("because")));
    }

    #[test]
    fn test_reasoning_chain_cap() {
        let content = (1..=15)
            .map(|i| format!("{i}. step number {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(extract_reasoning_chain(&content).len(), MAX_REASONING_STEPS);
    }

    #[test]
    fn test_store_creates_then_merges() {
        let layer = SemanticLayer::ephemeral();
        let first = layer.store("always use connection pooling for postgres clients");
        assert!(!first.merged);

        // Near-identical content within the fast tier's interval creates a
        // second pattern instead of merging (update too soon).
        let second = layer.store("always use connection pooling for postgres clients");
        assert!(!second.merged);
        assert_eq!(layer.count(), 2);
    }

    #[test]
    fn test_merge_when_interval_elapsed() {
        let layer = SemanticLayer::ephemeral();
        let first = layer.store("always use connection pooling for postgres clients");

        // Age the stored pattern past its tier's minimum update interval.
        {
            let mut state = layer.state.write().unwrap();
            let pattern = state.patterns.get_mut(&first.pattern.id).unwrap();
            pattern.last_updated = Utc::now() - Duration::days(30);
        }

        let second = layer.store("always use connection pooling for postgres clients");
        assert!(second.merged);
        assert_eq!(second.pattern.id, first.pattern.id);
        assert_eq!(second.pattern.update_count, 1);
        assert_eq!(layer.count(), 1);
    }

    #[test]
    fn test_merge_appends_distinct_content() {
        assert_eq!(SemanticLayer::merge_content("abc", "abc def"), "abc def");
        assert_eq!(SemanticLayer::merge_content("abc def", "abc"), "abc def");
        let merged = SemanticLayer::merge_content("first half", "second half");
        assert!(merged.contains("first half"));
        assert!(merged.contains(MERGE_SEPARATOR));
    }

    #[test]
    fn test_query_scores_and_floor() {
        let layer = SemanticLayer::ephemeral();
        layer.store("retry transient failures with exponential backoff");
        let hits = layer.query("retry transient failures with exponential backoff", 5);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > QUERY_SCORE_FLOOR);

        assert!(layer.query("entirely unrelated cooking recipe", 5).is_empty());
    }

    #[test]
    fn test_query_by_type() {
        let layer = SemanticLayer::ephemeral();
        layer.store("the bug was a stack trace in the codec");
        layer.store("we prefer tabs in this codebase, always");
        let debugging = layer.query_by_type(PatternType::Debugging, 10);
        assert_eq!(debugging.len(), 1);
        assert!(debugging[0].content.contains("stack trace"));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let layer = SemanticLayer::open(dir.path()).unwrap();
            layer.store("module boundaries follow the data flow").pattern.id
        };
        let reopened = SemanticLayer::open(dir.path()).unwrap();
        assert_eq!(reopened.count(), 1);
        assert!(reopened.get(&id).is_some());
        let hits = reopened.query("module boundaries follow the data flow", 5);
        assert_eq!(hits.len(), 1);
    }
}
