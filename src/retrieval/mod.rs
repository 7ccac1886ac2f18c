//! Retrieval providers
//!
//! Optional knowledge lookups the agent loop attaches to prompts from the
//! second iteration on. Provider failures are the caller's to swallow.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PilotError, Result};

/// One ranked knowledge match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeMatch {
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<String>>,
}

#[async_trait]
pub trait RetrievalProvider: Send + Sync {
    /// Up to `limit` matches for `subject`, best first.
    async fn search(&self, subject: &str, limit: usize) -> Result<Vec<KnowledgeMatch>>;
}

/// Provider that never matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetrieval;

#[async_trait]
impl RetrievalProvider for NoRetrieval {
    async fn search(&self, _subject: &str, _limit: usize) -> Result<Vec<KnowledgeMatch>> {
        Ok(Vec::new())
    }
}

/// Knowledge base entry as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub commands: Option<Vec<String>>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// In-memory provider ranking entries by keyword, title and content hits.
#[derive(Debug, Clone, Default)]
pub struct KeywordRetrieval {
    entries: Vec<KnowledgeEntry>,
}

impl KeywordRetrieval {
    pub fn new(entries: Vec<KnowledgeEntry>) -> Self {
        Self { entries }
    }

    /// Load a YAML list of entries.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
            .map_err(|e| PilotError::Config(format!("Invalid knowledge file {}: {}", path.display(), e)))
    }

    pub fn from_yaml_str(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        let entries: Vec<KnowledgeEntry> = serde_yaml::from_str(content)?;
        Ok(Self::new(entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn score(entry: &KnowledgeEntry, subject: &str) -> u32 {
        let mut score = 0;
        if entry.keywords.iter().any(|k| k.to_lowercase() == subject) {
            score += 3;
        }
        if entry.title.to_lowercase().contains(subject) {
            score += 2;
        }
        if entry.content.to_lowercase().contains(subject) {
            score += 1;
        }
        score
    }
}

#[async_trait]
impl RetrievalProvider for KeywordRetrieval {
    async fn search(&self, subject: &str, limit: usize) -> Result<Vec<KnowledgeMatch>> {
        let subject = subject.trim().to_lowercase();
        if subject.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(u32, &KnowledgeEntry)> = self
            .entries
            .iter()
            .map(|e| (Self::score(e, &subject), e))
            .filter(|(score, _)| *score > 0)
            .collect();
        // stable: ties keep file order
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, e)| KnowledgeMatch {
                title: e.title.clone(),
                content: e.content.clone(),
                commands: e.commands.clone(),
            })
            .collect())
    }
}
