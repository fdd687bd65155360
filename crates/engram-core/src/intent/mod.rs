//! Intent Detection & Query Routing
//!
//! Classifies a recall query into one of seven intents via tabulated
//! regex families, then translates the winning intent into a per-layer
//! query plan (which layers to ask, in what priority, with which search
//! strategy).

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::memory::MemoryLayer;

// ============================================================================
// INTENT TYPES
// ============================================================================

/// Query intent classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    /// Looking up a specific stored fact
    FactualLookup,
    /// Looking for a consolidated pattern or approach
    PatternMatch,
    /// Asking when something happened
    TimelineQuery,
    /// Open-ended browsing; the fallback
    Exploration,
    /// Checking a stated preference or convention
    PreferenceCheck,
    /// Looking up a past error
    ErrorLookup,
    /// Revisiting why a decision was made
    DecisionReview,
}

impl IntentType {
    /// String name used on the wire and in explanations.
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::FactualLookup => "factual_lookup",
            IntentType::PatternMatch => "pattern_match",
            IntentType::TimelineQuery => "timeline_query",
            IntentType::Exploration => "exploration",
            IntentType::PreferenceCheck => "preference_check",
            IntentType::ErrorLookup => "error_lookup",
            IntentType::DecisionReview => "decision_review",
        }
    }
}

impl std::fmt::Display for IntentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a layer should be searched for a given intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    /// N-gram bucket overlap (factual layer)
    Exact,
    /// Similarity against patterns/embeddings
    Semantic,
    /// Time-ordered episodic retrieval
    Temporal,
    /// Dense + sparse fusion
    #[default]
    Hybrid,
}

// ============================================================================
// REGEX FAMILIES
// ============================================================================

struct IntentFamily {
    intent: IntentType,
    base_confidence: f64,
    regexes: &'static [&'static LazyLock<Regex>],
}

macro_rules! intent_regex {
    ($name:ident, $pattern:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($pattern).unwrap());
    };
}

intent_regex!(FACT_WHAT_IS, r"^\s*what\s+(is|are|was)\b");
intent_regex!(FACT_CREDENTIAL, r"\b(api key|password|token|secret|connection string|url|port)\b");
intent_regex!(FACT_DEFINE, r"\b(define|definition|meaning of)\b");
intent_regex!(FACT_HOW_MANY, r"\bhow\s+(much|many)\b");
intent_regex!(FACT_VALUE, r"\b(value|version|number)\s+of\b");

intent_regex!(TIME_WHEN, r"^\s*when\b");
intent_regex!(TIME_RELATIVE, r"\b(yesterday|today|last\s+(week|month|session)|this\s+(week|month))\b");
intent_regex!(TIME_HAPPENED, r"\bwhat\s+happened\b");
intent_regex!(TIME_TIMELINE, r"\b(timeline|history|chronolog)\w*\b");
intent_regex!(TIME_DID_WE, r"\bdid\s+(we|i|you)\b");

intent_regex!(PATTERN_HOW_DO, r"\bhow\s+(do|does|did|should|would)\s+(we|i|you|one)\b");
intent_regex!(PATTERN_WORD, r"\b(pattern|approach|strategy|technique)\b");
intent_regex!(PATTERN_BEST_WAY, r"\b(best|right|usual)\s+way\b");
intent_regex!(PATTERN_TYPICALLY, r"\b(usually|typically|normally|in general)\b");

intent_regex!(PREF_PREFER, r"\bprefer(s|red|ence)?\b");
intent_regex!(PREF_CONVENTION, r"\b(convention|style|standard|idiom)\b");
intent_regex!(PREF_SHOULD_USE, r"\bshould\s+(i|we)\s+use\b");
intent_regex!(PREF_WHICH, r"\bwhich\s+(one|library|crate|tool|option)\b");

intent_regex!(ERROR_WORD, r"\b(error|exception|failure|failed|crash|panic|bug)\b");
intent_regex!(ERROR_WHY_FAIL, r"\bwhy\s+(is|does|did|was).*\b(fail|break|crash|error)");
intent_regex!(ERROR_FIX, r"\b(fix|fixed|resolve|resolved|workaround)\b");
intent_regex!(ERROR_WRONG, r"\bwhat\s+went\s+wrong\b");

intent_regex!(DECISION_WHY_WE, r"\bwhy\s+(did|do)\s+(we|i)\b");
intent_regex!(DECISION_WORD, r"\b(decision|decided|chose|chosen|rationale|reasoning)\b");
intent_regex!(DECISION_TRADEOFF, r"\btrade-?offs?\b");

static FAMILIES: &[IntentFamily] = &[
    IntentFamily {
        intent: IntentType::FactualLookup,
        base_confidence: 0.9,
        regexes: &[
            &FACT_WHAT_IS,
            &FACT_CREDENTIAL,
            &FACT_DEFINE,
            &FACT_HOW_MANY,
            &FACT_VALUE,
        ],
    },
    IntentFamily {
        intent: IntentType::TimelineQuery,
        base_confidence: 0.85,
        regexes: &[
            &TIME_WHEN,
            &TIME_RELATIVE,
            &TIME_HAPPENED,
            &TIME_TIMELINE,
            &TIME_DID_WE,
        ],
    },
    IntentFamily {
        intent: IntentType::ErrorLookup,
        base_confidence: 0.85,
        regexes: &[&ERROR_WORD, &ERROR_WHY_FAIL, &ERROR_FIX, &ERROR_WRONG],
    },
    IntentFamily {
        intent: IntentType::PatternMatch,
        base_confidence: 0.8,
        regexes: &[
            &PATTERN_HOW_DO,
            &PATTERN_WORD,
            &PATTERN_BEST_WAY,
            &PATTERN_TYPICALLY,
        ],
    },
    IntentFamily {
        intent: IntentType::PreferenceCheck,
        base_confidence: 0.8,
        regexes: &[&PREF_PREFER, &PREF_CONVENTION, &PREF_SHOULD_USE, &PREF_WHICH],
    },
    IntentFamily {
        intent: IntentType::DecisionReview,
        base_confidence: 0.8,
        regexes: &[&DECISION_WHY_WE, &DECISION_WORD, &DECISION_TRADEOFF],
    },
];

/// Confidence assigned to the exploration fallback.
const EXPLORATION_CONFIDENCE: f64 = 0.6;

// ============================================================================
// DETECTED INTENT
// ============================================================================

/// The outcome of intent detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryIntent {
    /// Winning intent
    #[serde(rename = "type")]
    pub intent_type: IntentType,
    /// `base × (0.8 + 0.2 × matchFraction)`
    pub confidence: f64,
    /// Layers worth querying, priority first
    pub suggested_layers: Vec<MemoryLayer>,
    /// The layer to trust most
    pub priority_layer: MemoryLayer,
    /// How the priority layer should be searched
    pub search_strategy: SearchStrategy,
    /// Human-readable reasoning
    pub explanation: String,
}

/// Classify a query.
///
/// Each family's confidence is `base × (0.8 + 0.2 × matched/total)`; the
/// highest-confidence family with at least one match wins. No matches at
/// all falls back to `exploration` at 0.6.
pub fn detect_intent(query: &str) -> QueryIntent {
    let lower = query.to_lowercase();

    let mut best: Option<(IntentType, f64, usize)> = None;
    for family in FAMILIES {
        let matched = family
            .regexes
            .iter()
            .filter(|re| re.is_match(&lower))
            .count();
        if matched == 0 {
            continue;
        }
        let fraction = matched as f64 / family.regexes.len() as f64;
        let confidence = family.base_confidence * (0.8 + 0.2 * fraction);
        if best.as_ref().is_none_or(|(_, c, _)| confidence > *c) {
            best = Some((family.intent, confidence, matched));
        }
    }

    match best {
        Some((intent, confidence, matched)) => {
            let (suggested_layers, priority_layer, search_strategy) = layer_plan(intent);
            QueryIntent {
                intent_type: intent,
                confidence,
                suggested_layers,
                priority_layer,
                search_strategy,
                explanation: format!(
                    "{} cue(s) matched the {} family; searching {} first with the {:?} strategy",
                    matched,
                    intent,
                    priority_layer,
                    search_strategy
                ),
            }
        }
        None => {
            let (suggested_layers, priority_layer, search_strategy) =
                layer_plan(IntentType::Exploration);
            QueryIntent {
                intent_type: IntentType::Exploration,
                confidence: EXPLORATION_CONFIDENCE,
                suggested_layers,
                priority_layer,
                search_strategy,
                explanation: "no intent cues matched; exploring all layers".to_string(),
            }
        }
    }
}

/// Layer plan per intent: (suggested layers priority-first, priority,
/// strategy).
fn layer_plan(intent: IntentType) -> (Vec<MemoryLayer>, MemoryLayer, SearchStrategy) {
    use MemoryLayer::*;
    match intent {
        IntentType::FactualLookup => (vec![Factual, LongTerm], Factual, SearchStrategy::Exact),
        IntentType::PatternMatch => (vec![Semantic, LongTerm], Semantic, SearchStrategy::Semantic),
        IntentType::TimelineQuery => (
            vec![Episodic, LongTerm],
            Episodic,
            SearchStrategy::Temporal,
        ),
        IntentType::Exploration => (
            vec![Factual, LongTerm, Semantic, Episodic],
            LongTerm,
            SearchStrategy::Hybrid,
        ),
        IntentType::PreferenceCheck => (
            vec![Semantic, Episodic, LongTerm],
            Semantic,
            SearchStrategy::Semantic,
        ),
        IntentType::ErrorLookup => (
            vec![LongTerm, Episodic, Semantic],
            LongTerm,
            SearchStrategy::Hybrid,
        ),
        IntentType::DecisionReview => (
            vec![Episodic, Semantic, LongTerm],
            Episodic,
            SearchStrategy::Hybrid,
        ),
    }
}

// ============================================================================
// QUERY PLAN
// ============================================================================

/// Per-layer slice of a recall plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerQuery {
    /// Layer to query
    pub layer: MemoryLayer,
    /// Strategy the layer should use
    pub strategy: SearchStrategy,
    /// Fusion weight under the weighted strategy
    pub weight: f64,
}

/// The full recall plan derived from an intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    /// Detected intent the plan was derived from
    pub intent: QueryIntent,
    /// One slice per suggested layer, priority first
    pub layer_queries: Vec<LayerQuery>,
}

/// Weight of the priority layer under weighted fusion.
const PRIORITY_WEIGHT: f64 = 1.0;
/// Weight of every other suggested layer.
const SECONDARY_WEIGHT: f64 = 0.8;

/// Translate a detected intent into per-layer queries.
pub fn plan_query(intent: QueryIntent) -> QueryPlan {
    let layer_queries = intent
        .suggested_layers
        .iter()
        .map(|&layer| LayerQuery {
            layer,
            strategy: if layer == intent.priority_layer {
                intent.search_strategy
            } else {
                SearchStrategy::Hybrid
            },
            weight: if layer == intent.priority_layer {
                PRIORITY_WEIGHT
            } else {
                SECONDARY_WEIGHT
            },
        })
        .collect();
    QueryPlan {
        intent,
        layer_queries,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeline_query_detection() {
        let intent = detect_intent("When did we deploy v2.0?");
        assert_eq!(intent.intent_type, IntentType::TimelineQuery);
        assert_eq!(intent.priority_layer, MemoryLayer::Episodic);
        assert_eq!(intent.search_strategy, SearchStrategy::Temporal);
        assert!(intent.confidence >= 0.7, "confidence {}", intent.confidence);
    }

    #[test]
    fn test_factual_lookup_detection() {
        let intent = detect_intent("What is the API key?");
        assert_eq!(intent.intent_type, IntentType::FactualLookup);
        assert_eq!(intent.priority_layer, MemoryLayer::Factual);
        assert_eq!(intent.search_strategy, SearchStrategy::Exact);
    }

    #[test]
    fn test_error_lookup_detection() {
        let intent = detect_intent("why did the deploy fail with that error");
        assert_eq!(intent.intent_type, IntentType::ErrorLookup);
    }

    #[test]
    fn test_preference_detection() {
        let intent = detect_intent("which crate do we prefer for serialization");
        assert_eq!(intent.intent_type, IntentType::PreferenceCheck);
        assert_eq!(intent.priority_layer, MemoryLayer::Semantic);
    }

    #[test]
    fn test_exploration_fallback() {
        let intent = detect_intent("zebra umbrella cadence");
        assert_eq!(intent.intent_type, IntentType::Exploration);
        assert!((intent.confidence - 0.6).abs() < 1e-9);
        assert_eq!(intent.suggested_layers.len(), 4);
    }

    #[test]
    fn test_confidence_grows_with_matches() {
        let one = detect_intent("when was that?");
        let two = detect_intent("when did we change this last week?");
        assert_eq!(one.intent_type, IntentType::TimelineQuery);
        assert_eq!(two.intent_type, IntentType::TimelineQuery);
        assert!(two.confidence > one.confidence);
    }

    #[test]
    fn test_plan_assigns_weights() {
        let plan = plan_query(detect_intent("When did we deploy v2.0?"));
        assert_eq!(plan.layer_queries[0].layer, MemoryLayer::Episodic);
        assert!((plan.layer_queries[0].weight - 1.0).abs() < 1e-9);
        assert_eq!(plan.layer_queries[0].strategy, SearchStrategy::Temporal);
        assert!(plan.layer_queries[1..].iter().all(|q| q.weight < 1.0));
    }
}
