//! Surprise & Decay scoring
//!
//! Novelty against recent context, tabulated pattern boosts, surprise
//! momentum, adaptive temporal decay, and content importance. All pure
//! functions; empty inputs produce defined sentinels (novelty 1 with no
//! priors, momentum 0 on empty history) rather than errors.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::hashing::{default_lsh_signatures, jaccard};
use crate::memory::MemoryEntry;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Pattern boost never exceeds this, regardless of how many families match.
pub const MAX_PATTERN_BOOST: f64 = 0.5;

/// Momentum window: how many recent surprise scores contribute.
pub const MOMENTUM_WINDOW: usize = 5;

/// Momentum decay factor per step away from the newest score.
pub const MOMENTUM_DECAY: f64 = 0.7;

/// Band-Jaccard similarity above which a recent memory counts as similar.
const SIMILAR_MEMORY_THRESHOLD: f64 = 0.5;

// ============================================================================
// PATTERN FAMILIES
// ============================================================================

/// The tabulated content pattern families.
///
/// Each family carries a fixed boost weight; the weights were tuned so a
/// single strong signal (an error report) outweighs a weak one (a style
/// preference).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    /// A decision was made
    Decision,
    /// An error or failure was observed
    Error,
    /// A fix or workaround was found
    Solution,
    /// Something was learned
    Learning,
    /// Structural / design content
    Architecture,
    /// A stated preference or convention
    Preference,
}

impl PatternKind {
    /// All families, in boost-weight order.
    pub const ALL: [PatternKind; 6] = [
        PatternKind::Error,
        PatternKind::Solution,
        PatternKind::Learning,
        PatternKind::Decision,
        PatternKind::Architecture,
        PatternKind::Preference,
    ];

    /// Fixed boost weight for this family.
    pub fn weight(&self) -> f64 {
        match self {
            PatternKind::Decision => 0.20,
            PatternKind::Error => 0.30,
            PatternKind::Solution => 0.25,
            PatternKind::Learning => 0.25,
            PatternKind::Architecture => 0.15,
            PatternKind::Preference => 0.10,
        }
    }

    /// String name used in tags and summaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Decision => "decision",
            PatternKind::Error => "error",
            PatternKind::Solution => "solution",
            PatternKind::Learning => "learning",
            PatternKind::Architecture => "architecture",
            PatternKind::Preference => "preference",
        }
    }

    fn regex(&self) -> &'static Regex {
        static DECISION: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"\b(decided?|decision|chose|choosing|opted|settled on|going with|we (will|should) use)\b").unwrap()
        });
        static ERROR: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"\b(error|exception|failed|failure|crash(ed)?|panic(ked)?|bug|broken|regression)\b").unwrap()
        });
        static SOLUTION: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"\b(fix(ed|es)?|solved?|solution|resolved?|workaround|patched|mitigated)\b").unwrap()
        });
        static LEARNING: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"\b(learned|til|discovered|realized|found out|turns out|insight|takeaway)\b").unwrap()
        });
        static ARCHITECTURE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"\b(architecture|design(ed)?|structure|component|module|layering|refactor(ed|ing)?|interface)\b").unwrap()
        });
        static PREFERENCE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"\b(prefers?|preference|always use|never use|convention|style guide|idiom)\b").unwrap()
        });

        match self {
            PatternKind::Decision => &DECISION,
            PatternKind::Error => &ERROR,
            PatternKind::Solution => &SOLUTION,
            PatternKind::Learning => &LEARNING,
            PatternKind::Architecture => &ARCHITECTURE,
            PatternKind::Preference => &PREFERENCE,
        }
    }

    /// Whether this family matches the (lowercased) content.
    pub fn matches(&self, content: &str) -> bool {
        self.regex().is_match(&content.to_lowercase())
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// All pattern families matching the content.
pub fn detect_patterns(content: &str) -> Vec<PatternKind> {
    let lower = content.to_lowercase();
    PatternKind::ALL
        .iter()
        .copied()
        .filter(|kind| kind.regex().is_match(&lower))
        .collect()
}

/// Sum of matching family weights, capped at [`MAX_PATTERN_BOOST`].
pub fn pattern_boost(content: &str) -> f64 {
    let sum: f64 = detect_patterns(content).iter().map(|k| k.weight()).sum();
    sum.min(MAX_PATTERN_BOOST)
}

// ============================================================================
// SURPRISE
// ============================================================================

/// Outcome of a surprise computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurpriseResult {
    /// Final surprise score, `min(1, novelty + boost)`
    pub score: f64,
    /// Whether the score clears the store threshold
    pub should_store: bool,
    /// `1 - max` band similarity against the recent window
    pub novelty_score: f64,
    /// Pattern-family boost applied on top of novelty
    pub pattern_boost: f64,
    /// Ids of recent memories with band similarity above 0.5
    pub similar_memories: Vec<String>,
}

/// Surprise of `content` against a window of recent memories.
///
/// Novelty is `1 - max` Jaccard similarity between the content's LSH band
/// set and each recent memory's band set; the pattern boost is added on
/// top and the sum clamped to 1. With no priors, novelty is 1.
pub fn calculate_surprise(
    content: &str,
    recent: &[MemoryEntry],
    threshold: f64,
) -> SurpriseResult {
    let bands: HashSet<String> = default_lsh_signatures(content).into_iter().collect();

    let mut max_similarity = 0.0f64;
    let mut similar_memories = Vec::new();
    for memory in recent {
        let memory_bands: HashSet<String> =
            default_lsh_signatures(&memory.content).into_iter().collect();
        let similarity = jaccard(&bands, &memory_bands);
        if similarity > max_similarity {
            max_similarity = similarity;
        }
        if similarity > SIMILAR_MEMORY_THRESHOLD {
            similar_memories.push(memory.id.clone());
        }
    }

    let novelty_score = 1.0 - max_similarity;
    let boost = pattern_boost(content);
    let score = (novelty_score + boost).min(1.0);

    SurpriseResult {
        score,
        should_store: score >= threshold,
        novelty_score,
        pattern_boost: boost,
        similar_memories,
    }
}

// ============================================================================
// MOMENTUM
// ============================================================================

/// Exponentially weighted mean of the last `window` surprise scores.
///
/// The newest score (end of the slice) carries weight 1; each step back
/// multiplies by [`MOMENTUM_DECAY`]. Empty history yields 0.
pub fn calculate_momentum(recent_scores: &[f64], window: usize) -> f64 {
    if recent_scores.is_empty() || window == 0 {
        return 0.0;
    }
    let take = window.min(recent_scores.len());
    let newest_first = recent_scores.iter().rev().take(take);

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    let mut weight = 1.0;
    for score in newest_first {
        weighted_sum += score * weight;
        weight_total += weight;
        weight *= MOMENTUM_DECAY;
    }
    weighted_sum / weight_total
}

// ============================================================================
// DECAY
// ============================================================================

/// Temporal decay factor `2^(-Δ / half_life_days)`.
///
/// Δ is the age in days of the most recent touch: the later of creation
/// and last access. Accessing a memory therefore resets Δ and slows its
/// decay. `half_life_days <= 0` disables decay entirely (factor 1).
pub fn calculate_decay(
    created_at: DateTime<Utc>,
    last_accessed: Option<DateTime<Utc>>,
    half_life_days: f64,
    now: DateTime<Utc>,
) -> f64 {
    if half_life_days <= 0.0 || !half_life_days.is_finite() {
        return 1.0;
    }
    let touched = match last_accessed {
        Some(accessed) => accessed.max(created_at),
        None => created_at,
    };
    let elapsed_ms = (now - touched).num_milliseconds().max(0) as f64;
    let elapsed_days = elapsed_ms / 86_400_000.0;
    (2.0f64).powf(-elapsed_days / half_life_days)
}

// ============================================================================
// IMPORTANCE
// ============================================================================

static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*([-*]|\d+[.)])\s+").unwrap());

/// Content importance in [0, 1].
///
/// Combines length, pattern boost, code fences, bullet/numbered structure,
/// and question marks. Deliberately coarse: the layers use it for
/// frequency-tier selection and tie-breaking, not ranking.
pub fn score_importance(content: &str) -> f64 {
    if content.trim().is_empty() {
        return 0.0;
    }

    let length_factor = (content.chars().count() as f64 / 500.0).min(1.0) * 0.3;
    let boost_factor = pattern_boost(content) / MAX_PATTERN_BOOST * 0.3;
    let code_factor = if content.contains("```") { 0.15 } else { 0.0 };
    let structure_factor = if BULLET_RE.is_match(content) { 0.15 } else { 0.0 };
    let question_factor = if content.contains('?') { 0.1 } else { 0.0 };

    (length_factor + boost_factor + code_factor + structure_factor + question_factor).min(1.0)
}

// ============================================================================
// TESTS
// ============================================================================
