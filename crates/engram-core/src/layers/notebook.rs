//! Curated notebook.
//!
//! A human-editable Markdown file (`MEMORY.md`) the episodic layer
//! searches with a relevance boost. Sections are addressable by heading;
//! programmatic writes only ever append lines, never rewrite what a human
//! wrote.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::warn;

use crate::hashing::content_similarity;

/// Search boost applied to notebook matches over plain episodic entries.
pub const NOTEBOOK_BOOST: f64 = 1.5;

/// One heading-addressed section of the notebook.
#[derive(Debug, Clone, PartialEq)]
pub struct NotebookSection {
    /// Heading text without the leading `#` markers
    pub heading: String,
    /// Body lines under the heading
    pub body: String,
}

/// A scored notebook match.
#[derive(Debug, Clone)]
pub struct NotebookHit {
    /// The matched section
    pub section: NotebookSection,
    /// Boosted similarity score
    pub score: f64,
}

/// The curated notebook, backed by a Markdown file.
pub struct Notebook {
    path: Option<PathBuf>,
    sections: RwLock<Vec<NotebookSection>>,
}

impl Notebook {
    /// Open `dir/MEMORY.md`, parsing any existing sections.
    pub fn open(dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("MEMORY.md");
        let sections = if path.exists() {
            parse_markdown(&std::fs::read_to_string(&path)?)
        } else {
            Vec::new()
        };
        Ok(Self {
            path: Some(path),
            sections: RwLock::new(sections),
        })
    }

    /// An ephemeral notebook for tests.
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            sections: RwLock::new(Vec::new()),
        }
    }

    /// Append a line under `heading`, creating the section on first use.
    pub fn append(&self, heading: &str, line: &str) {
        let mut sections = match self.sections.write() {
            Ok(sections) => sections,
            Err(poisoned) => poisoned.into_inner(),
        };
        match sections.iter_mut().find(|s| s.heading == heading) {
            Some(section) => {
                if !section.body.is_empty() {
                    section.body.push('\n');
                }
                section.body.push_str(line);
            }
            None => sections.push(NotebookSection {
                heading: heading.to_string(),
                body: line.to_string(),
            }),
        }
        self.persist(&sections);
    }

    /// Fetch one section by heading.
    pub fn section(&self, heading: &str) -> Option<NotebookSection> {
        self.sections
            .read()
            .ok()
            .and_then(|s| s.iter().find(|s| s.heading == heading).cloned())
    }

    /// All sections, in file order.
    pub fn sections(&self) -> Vec<NotebookSection> {
        self.sections.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Number of sections.
    pub fn section_count(&self) -> usize {
        self.sections.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Search sections by token similarity, boosted by [`NOTEBOOK_BOOST`].
    pub fn search(&self, query: &str, limit: usize) -> Vec<NotebookHit> {
        let sections = match self.sections.read() {
            Ok(sections) => sections,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut hits: Vec<NotebookHit> = sections
            .iter()
            .filter_map(|section| {
                let text = format!("{}\n{}", section.heading, section.body);
                let similarity = content_similarity(query, &text);
                if similarity > 0.0 {
                    Some(NotebookHit {
                        section: section.clone(),
                        score: similarity * NOTEBOOK_BOOST,
                    })
                } else {
                    None
                }
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.section.heading.cmp(&b.section.heading))
        });
        hits.truncate(limit);
        hits
    }

    fn persist(&self, sections: &[NotebookSection]) {
        let Some(path) = &self.path else {
            return;
        };
        let mut out = String::new();
        for section in sections {
            out.push_str("## ");
            out.push_str(&section.heading);
            out.push_str("\n\n");
            out.push_str(&section.body);
            out.push_str("\n\n");
        }
        let tmp = path.with_extension("md.tmp");
        if let Err(e) = std::fs::write(&tmp, out).and_then(|()| std::fs::rename(&tmp, path)) {
            warn!("notebook write failed: {e}");
        }
    }
}

/// Parse a Markdown document into heading-addressed sections.
///
/// Any heading level addresses a section; preamble text before the first
/// heading lands in an unnamed section.
fn parse_markdown(text: &str) -> Vec<NotebookSection> {
    let mut sections = Vec::new();
    let mut heading = String::new();
    let mut body: Vec<&str> = Vec::new();

    let flush =
        |sections: &mut Vec<NotebookSection>, heading: &str, body: &mut Vec<&str>| {
            let text = body.join("\n").trim().to_string();
            if !heading.is_empty() || !text.is_empty() {
                sections.push(NotebookSection {
                    heading: heading.to_string(),
                    body: text,
                });
            }
            body.clear();
        };

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix('#') {
            flush(&mut sections, &heading, &mut body);
            heading = rest.trim_start_matches('#').trim().to_string();
        } else {
            body.push(line);
        }
    }
    flush(&mut sections, &heading, &mut body);
    sections
}

// ============================================================================
// TESTS
// ============================================================================
