//! Evidence retriever contract and the bounded search gate.
//!
//! Three interchangeable adapters (biomedical, scholarly, neural web) plug in
//! behind [`EvidenceRetriever`]. The evidence stage wraps every adapter call
//! in a [`SearchGate`] permit so at most `max` searches are in flight at once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::constants::MAX_CONCURRENT_SEARCHES;
use crate::core::error::Result;

/// Which family of retrieval service produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrieverKind {
    /// Biomedical article search
    Biomedical,
    /// Scholarly literature search
    Scholarly,
    /// Neural web search
    NeuralWeb,
}

impl RetrieverKind {
    /// Stable string form used in metrics and node metadata.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Biomedical => "biomedical",
            Self::Scholarly => "scholarly",
            Self::NeuralWeb => "neural_web",
        }
    }
}

/// One retrieved article or web result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    /// Title of the article or page
    pub title: String,
    /// Abstract, snippet, or highlight text
    pub snippet: String,
    /// Canonical URL
    pub url: String,
    /// DOI when the source reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    /// Author names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    /// Publication date string as reported by the source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<String>,
    /// Source-specific relevance score
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Citation count when the source reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cited_by_count: Option<u64>,
}

impl ArticleRecord {
    /// Title and snippet joined for text classification.
    #[must_use]
    pub fn combined_text(&self) -> String {
        if self.snippet.is_empty() {
            self.title.clone()
        } else {
            format!("{}. {}", self.title, self.snippet)
        }
    }
}

/// A pluggable article/web search adapter.
///
/// Adapters are constructed once per evidence stage; a failed construction is
/// non-fatal unless all adapters fail. Each `search` call is self-contained
/// and carries its own deadlines.
#[async_trait]
pub trait EvidenceRetriever: Send + Sync {
    /// Adapter name for logging and source attribution.
    fn name(&self) -> &'static str;

    /// Which retrieval family this adapter belongs to.
    fn kind(&self) -> RetrieverKind;

    /// Run a search, returning at most `limit` records.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ArticleRecord>>;

    /// Release any held resources. Idempotent.
    async fn close(&self) {}
}

/// Bounded concurrency over adapter calls: at most `max` permits outstanding.
#[derive(Debug, Clone)]
pub struct SearchGate {
    semaphore: Arc<Semaphore>,
    max: usize,
}

impl SearchGate {
    /// Gate with `max` concurrent searches.
    #[must_use]
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// The configured bound.
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max
    }

    /// Permits currently available.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a slot. The permit releases on drop, so every exit path of an
    /// adapter call pairs acquire/release.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        // The semaphore is never closed, so acquisition only fails if it were.
        #[allow(clippy::expect_used)]
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("search gate semaphore closed")
    }
}

impl Default for SearchGate {
    fn default() -> Self {
        Self::new(MAX_CONCURRENT_SEARCHES)
    }
}
