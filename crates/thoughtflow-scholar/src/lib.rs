//! # Semantic Scholar Retriever
//!
//! Scholarly literature search over the Semantic Scholar Graph API. Works
//! without a key at a shared rate limit; an API key raises the limit.
//!
//! Schema drift in the API response is tolerated: a payload without the
//! expected `data` array is logged as a warning and treated as an empty
//! result set rather than an error.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use thoughtflow::retriever::EvidenceRetriever;
//! use thoughtflow_scholar::ScholarRetriever;
//!
//! # tokio_test::block_on(async {
//! let retriever = ScholarRetriever::new();
//! let papers = retriever.search("graph neural networks", 5).await.unwrap();
//! println!("found {} papers", papers.len());
//! # });
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use thoughtflow::constants::{DEFAULT_HTTP_CONNECT_TIMEOUT, DEFAULT_HTTP_REQUEST_TIMEOUT};
use thoughtflow::core::error::{Error, Result};
use thoughtflow::retriever::{ArticleRecord, EvidenceRetriever, RetrieverKind};

const SEARCH_BASE_URL: &str = "https://api.semanticscholar.org/graph/v1/paper/search";
const SEARCH_FIELDS: &str = "title,abstract,url,externalIds,authors,year,citationCount";

fn create_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(DEFAULT_HTTP_REQUEST_TIMEOUT)
        .connect_timeout(DEFAULT_HTTP_CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// One paper as returned by the Graph API.
#[derive(Debug, Clone, Deserialize)]
struct ScholarPaper {
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    url: Option<String>,
    year: Option<i32>,
    #[serde(rename = "citationCount")]
    citation_count: Option<u64>,
    #[serde(default)]
    authors: Vec<ScholarAuthor>,
    #[serde(rename = "externalIds", default)]
    external_ids: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct ScholarAuthor {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScholarSearchResponse {
    #[serde(default)]
    data: Option<Vec<ScholarPaper>>,
}

/// Scholarly retriever over the Semantic Scholar Graph API.
#[derive(Debug, Clone)]
pub struct ScholarRetriever {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ScholarRetriever {
    /// Retriever against the public endpoint without a key.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: create_http_client(),
            base_url: SEARCH_BASE_URL.to_string(),
            api_key: None,
        }
    }

    /// Set an API key for the higher rate limit.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Override the endpoint base URL (used by the HTTP tests).
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn to_record(paper: ScholarPaper) -> ArticleRecord {
        let doi = paper
            .external_ids
            .as_ref()
            .and_then(|ids| ids.get("DOI"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        ArticleRecord {
            title: paper.title.unwrap_or_else(|| "(untitled)".to_string()),
            snippet: paper.abstract_text.unwrap_or_default(),
            url: paper.url.unwrap_or_default(),
            doi,
            authors: paper.authors.into_iter().filter_map(|a| a.name).collect(),
            publication_date: paper.year.map(|y| y.to_string()),
            score: None,
            cited_by_count: paper.citation_count,
        }
    }
}

impl Default for ScholarRetriever {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EvidenceRetriever for ScholarRetriever {
    fn name(&self) -> &'static str {
        "Semantic Scholar"
    }

    fn kind(&self) -> RetrieverKind {
        RetrieverKind::Scholarly
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ArticleRecord>> {
        if query.trim().is_empty() {
            return Err(Error::invalid_input("search query cannot be empty"));
        }

        let limit = limit.clamp(1, 100).to_string();
        let mut request = self.client.get(&self.base_url).query(&[
            ("query", query),
            ("limit", limit.as_str()),
            ("fields", SEARCH_FIELDS),
        ]);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::adapter(format!("Semantic Scholar request failed: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::adapter(format!(
                "Semantic Scholar API error ({status})"
            )));
        }

        let parsed: ScholarSearchResponse = response
            .json()
            .await
            .map_err(|e| Error::adapter(format!("Failed to parse Semantic Scholar response: {e}")))?;

        // Schema drift is a warning, not an error.
        let Some(papers) = parsed.data else {
            warn!("Semantic Scholar response had no 'data' array; treating as empty");
            return Ok(Vec::new());
        };
        Ok(papers.into_iter().map(Self::to_record).collect())
    }
}
