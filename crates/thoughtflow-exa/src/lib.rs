//! # Exa Neural Web Retriever
//!
//! Exa is a search engine built for AI applications, combining
//! embeddings-based (neural) and keyword search over high-quality web
//! content. ThoughtFlow uses it as the neural web leg of evidence gathering.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use thoughtflow::retriever::EvidenceRetriever;
//! use thoughtflow_exa::ExaRetriever;
//!
//! # tokio_test::block_on(async {
//! let retriever = ExaRetriever::new("your-api-key");
//! let results = retriever.search("latest work on tumor microbiomes", 5).await.unwrap();
//! println!("found {} results", results.len());
//! # });
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use thoughtflow::constants::{DEFAULT_HTTP_CONNECT_TIMEOUT, DEFAULT_HTTP_REQUEST_TIMEOUT};
use thoughtflow::core::error::{Error, Result};
use thoughtflow::retriever::{ArticleRecord, EvidenceRetriever, RetrieverKind};

const SEARCH_URL: &str = "https://api.exa.ai/search";

fn create_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(DEFAULT_HTTP_REQUEST_TIMEOUT)
        .connect_timeout(DEFAULT_HTTP_CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Search type for the Exa API.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    /// Keyword-based search
    Keyword,
    /// Embeddings-based search
    #[default]
    Neural,
    /// Let Exa pick the method
    Auto,
}

#[derive(Debug, Serialize)]
struct ExaSearchRequest<'a> {
    query: &'a str,
    r#type: SearchType,
    #[serde(rename = "numResults")]
    num_results: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<&'a str>,
    contents: ExaContents,
}

#[derive(Debug, Serialize)]
struct ExaContents {
    highlights: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct ExaResult {
    title: Option<String>,
    url: String,
    #[serde(rename = "publishedDate")]
    published_date: Option<String>,
    author: Option<String>,
    text: Option<String>,
    highlights: Option<Vec<String>>,
    summary: Option<String>,
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ExaSearchResponse {
    #[serde(default)]
    results: Vec<ExaResult>,
}

/// Neural web retriever over the Exa search API.
pub struct ExaRetriever {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    search_type: SearchType,
    category: Option<String>,
}

impl ExaRetriever {
    /// Retriever with neural search against the public endpoint.
    ///
    /// # Arguments
    ///
    /// * `api_key` - your Exa API key
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: create_http_client(),
            base_url: SEARCH_URL.to_string(),
            api_key: api_key.into(),
            search_type: SearchType::Neural,
            category: None,
        }
    }

    /// Set the search type.
    #[must_use]
    pub fn search_type(mut self, search_type: SearchType) -> Self {
        self.search_type = search_type;
        self
    }

    /// Restrict results to a category (e.g. "research paper", "news").
    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Override the endpoint URL (used by the HTTP tests).
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn to_record(result: ExaResult) -> ArticleRecord {
        // prefer the highlight, then summary, then raw text
        let snippet = result
            .highlights
            .as_ref()
            .and_then(|h| h.first().cloned())
            .or(result.summary)
            .or(result.text)
            .unwrap_or_default();
        ArticleRecord {
            title: result.title.unwrap_or_else(|| "(untitled)".to_string()),
            snippet,
            url: result.url,
            doi: None,
            authors: result.author.into_iter().collect(),
            publication_date: result.published_date,
            score: result.score,
            cited_by_count: None,
        }
    }
}

#[async_trait]
impl EvidenceRetriever for ExaRetriever {
    fn name(&self) -> &'static str {
        "Exa"
    }

    fn kind(&self) -> RetrieverKind {
        RetrieverKind::NeuralWeb
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ArticleRecord>> {
        if query.trim().is_empty() {
            return Err(Error::invalid_input("search query cannot be empty"));
        }

        let request = ExaSearchRequest {
            query,
            r#type: self.search_type.clone(),
            num_results: limit.clamp(1, 100) as u32,
            category: self.category.as_deref(),
            contents: ExaContents { highlights: true },
        };

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::adapter(format!("Exa API request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            return Err(Error::adapter(format!("Exa API error ({status}): {body}")));
        }

        let parsed: ExaSearchResponse = response
            .json()
            .await
            .map_err(|e| Error::adapter(format!("Failed to parse Exa response: {e}")))?;
        Ok(parsed.results.into_iter().map(Self::to_record).collect())
    }
}
