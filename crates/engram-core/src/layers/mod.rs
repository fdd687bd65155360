//! Memory layers.
//!
//! Four substores with distinct retention and retrieval semantics, plus
//! the curated notebook the episodic layer owns:
//!
//! - [`FactualLayer`]: O(1) n-gram lookup of short facts (L2)
//! - [`LongTermLayer`]: surprise-gated durable store with decay (L3)
//! - [`SemanticLayer`]: consolidated patterns with update tiers (L4)
//! - [`EpisodicLayer`]: daily logs and the curated notebook (L5)

mod episodic;
mod factual;
mod long_term;
mod notebook;
mod semantic;

pub use episodic::{
    DayLog, EpisodicEntry, EpisodicFilter, EpisodicHit, EpisodicLayer, FlushContext,
};
pub use factual::{FactualError, FactualHit, FactualLayer};
pub use long_term::{LongTermConfig, LongTermHit, LongTermLayer};
pub use notebook::{NOTEBOOK_BOOST, Notebook, NotebookHit, NotebookSection};
pub use semantic::{
    PatternType, SemanticHit, SemanticLayer, SemanticPattern, SemanticStoreResult,
    UpdateFrequency, extract_reasoning_chain,
};
