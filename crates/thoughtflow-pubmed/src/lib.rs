//! PubMed biomedical evidence retriever for ThoughtFlow
//!
//! Searches medical and scientific literature through the PubMed database
//! using the NCBI E-utilities API, in two steps:
//! - **`ESearch`**: retrieves the UIDs matching a query (JSON)
//! - **`EFetch`**: fetches article details for those UIDs (XML)
//!
//! Without an API key NCBI allows 3 requests/second; with one, 10/second.
//! Bulk or systematic retrieval is prohibited by NCBI's terms.
//!
//! # Example
//!
//! ```rust,no_run
//! use thoughtflow::retriever::EvidenceRetriever;
//! use thoughtflow_pubmed::PubMedRetriever;
//!
//! # async fn example() -> thoughtflow::core::Result<()> {
//! let retriever = PubMedRetriever::new();
//! let articles = retriever.search("CRISPR gene editing", 3).await?;
//! for article in articles {
//!     println!("{} ({})", article.title, article.url);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # References
//!
//! - [NCBI E-utilities Documentation](https://www.ncbi.nlm.nih.gov/books/NBK25501/)
//! - [PubMed](https://pubmed.ncbi.nlm.nih.gov/)

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use thoughtflow::constants::{DEFAULT_HTTP_CONNECT_TIMEOUT, DEFAULT_HTTP_REQUEST_TIMEOUT};
use thoughtflow::core::error::{Error, Result};
use thoughtflow::retriever::{ArticleRecord, EvidenceRetriever, RetrieverKind};

const ESEARCH_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
const EFETCH_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi";

fn create_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(DEFAULT_HTTP_REQUEST_TIMEOUT)
        .connect_timeout(DEFAULT_HTTP_CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Biomedical article retriever over the NCBI E-utilities API.
#[derive(Debug, Clone)]
pub struct PubMedRetriever {
    client: reqwest::Client,
    /// Base URL override for the search endpoint (tests)
    esearch_url: String,
    /// Base URL override for the fetch endpoint (tests)
    efetch_url: String,
    database: String,
    sort_by: Option<String>,
    api_key: Option<String>,
}

impl PubMedRetriever {
    /// Retriever with default settings against the public endpoints.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: create_http_client(),
            esearch_url: ESEARCH_BASE_URL.to_string(),
            efetch_url: EFETCH_BASE_URL.to_string(),
            database: "pubmed".to_string(),
            sort_by: None,
            api_key: None,
        }
    }

    /// Set the database to search (default: "pubmed").
    #[must_use]
    pub fn database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    /// Set the sort order ("relevance", "`pub_date`", "author", "journal").
    #[must_use]
    pub fn sort_by(mut self, sort: impl Into<String>) -> Self {
        self.sort_by = Some(sort.into());
        self
    }

    /// Set an API key for the higher rate limit.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Override both endpoint base URLs (used by the HTTP tests).
    #[must_use]
    pub fn endpoints(mut self, esearch: impl Into<String>, efetch: impl Into<String>) -> Self {
        self.esearch_url = esearch.into();
        self.efetch_url = efetch.into();
        self
    }

    async fn search_ids(&self, query: &str, limit: usize) -> Result<Vec<String>> {
        let limit = limit.to_string();
        let mut params = vec![
            ("db", self.database.as_str()),
            ("term", query),
            ("retmax", limit.as_str()),
            ("retmode", "json"),
        ];
        if let Some(sort) = &self.sort_by {
            params.push(("sort", sort.as_str()));
        }
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.as_str()));
        }

        let response = self
            .client
            .get(&self.esearch_url)
            .query(&params)
            .send()
            .await
            .map_err(|e| Error::adapter(format!("ESearch request failed: {e}")))?;
        let parsed: ESearchResponse = response
            .json()
            .await
            .map_err(|e| Error::adapter(format!("Failed to parse ESearch response: {e}")))?;
        Ok(parsed.esearchresult.idlist)
    }

    async fn fetch_articles(&self, ids: &[String]) -> Result<Vec<ArticleRecord>> {
        let joined = ids.join(",");
        let mut params = vec![
            ("db", self.database.as_str()),
            ("id", joined.as_str()),
            ("retmode", "xml"),
            ("rettype", "abstract"),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.as_str()));
        }

        let response = self
            .client
            .get(&self.efetch_url)
            .query(&params)
            .send()
            .await
            .map_err(|e| Error::adapter(format!("EFetch request failed: {e}")))?;
        let xml = response
            .text()
            .await
            .map_err(|e| Error::adapter(format!("Failed to read EFetch response: {e}")))?;
        parse_efetch_xml(&xml)
    }
}

impl Default for PubMedRetriever {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EvidenceRetriever for PubMedRetriever {
    fn name(&self) -> &'static str {
        "PubMed"
    }

    fn kind(&self) -> RetrieverKind {
        RetrieverKind::Biomedical
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ArticleRecord>> {
        if query.trim().is_empty() {
            return Err(Error::invalid_input("search query cannot be empty"));
        }
        let ids = self.search_ids(query, limit).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = ids.len(), "fetching article details");
        self.fetch_articles(&ids).await
    }
}

#[derive(Debug, Deserialize)]
struct ESearchResponse {
    esearchresult: ESearchResult,
}

#[derive(Debug, Deserialize)]
struct ESearchResult {
    #[serde(default)]
    idlist: Vec<String>,
}

/// Parse an EFetch XML payload into article records.
fn parse_efetch_xml(xml: &str) -> Result<Vec<ArticleRecord>> {
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut articles = Vec::new();
    let mut pmid = String::new();
    let mut current: Option<ArticleRecord> = None;
    let mut element = String::new();
    let mut id_type = String::new();
    let mut in_abstract = false;
    let mut abstract_parts: Vec<String> = Vec::new();
    let mut in_authors = false;
    let mut author_parts: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "ELocationID" || name == "ArticleId" {
                    id_type = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"EIdType" || a.key.as_ref() == b"IdType")
                        .map(|a| String::from_utf8_lossy(&a.value).to_string())
                        .unwrap_or_default();
                }
                match name.as_str() {
                    "PubmedArticle" => {
                        pmid.clear();
                        current = Some(ArticleRecord::default());
                    }
                    "Abstract" => {
                        in_abstract = true;
                        abstract_parts.clear();
                    }
                    "AuthorList" => in_authors = true,
                    "Author" if in_authors => author_parts.clear(),
                    _ => {}
                }
                element = name;
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "PubmedArticle" => {
                        if let Some(mut article) = current.take() {
                            if !pmid.is_empty() {
                                article.url =
                                    format!("https://pubmed.ncbi.nlm.nih.gov/{pmid}/");
                            }
                            articles.push(article);
                        }
                    }
                    "Abstract" => {
                        in_abstract = false;
                        if let Some(article) = current.as_mut() {
                            article.snippet = abstract_parts.join(" ");
                        }
                    }
                    "AuthorList" => in_authors = false,
                    "Author" => {
                        if in_authors && !author_parts.is_empty() {
                            if let Some(article) = current.as_mut() {
                                article.authors.push(author_parts.join(" "));
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default().trim().to_string();
                if text.is_empty() {
                    continue;
                }
                let Some(article) = current.as_mut() else {
                    continue;
                };
                match element.as_str() {
                    "PMID" if pmid.is_empty() => pmid = text,
                    "ArticleTitle" => article.title = text,
                    "Year" if article.publication_date.is_none() => {
                        article.publication_date = Some(text);
                    }
                    "AbstractText" if in_abstract => abstract_parts.push(text),
                    "ELocationID" | "ArticleId" if id_type == "doi" && article.doi.is_none() => {
                        article.doi = Some(text);
                    }
                    "LastName" if in_authors => author_parts.insert(0, text),
                    "ForeName" | "Initials" if in_authors && author_parts.len() < 2 => {
                        author_parts.push(text);
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::adapter(format!(
                    "XML parsing error at position {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(articles)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const SAMPLE_XML: &str = r#"<?xml version="1.0" ?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation>
      <PMID Version="1">12345678</PMID>
      <Article>
        <ArticleTitle>Microbiome diversity and tumor progression</ArticleTitle>
        <ELocationID EIdType="doi" ValidYN="Y">10.1000/mb.2024.01</ELocationID>
        <Abstract>
          <AbstractText>Background text.</AbstractText>
          <AbstractText>Results text.</AbstractText>
        </Abstract>
        <AuthorList>
          <Author>
            <LastName>Okafor</LastName>
            <ForeName>Adaeze</ForeName>
          </Author>
          <Author>
            <LastName>Lindqvist</LastName>
            <Initials>S</Initials>
          </Author>
        </AuthorList>
        <Journal>
          <JournalIssue>
            <PubDate><Year>2024</Year></PubDate>
          </JournalIssue>
        </Journal>
      </Article>
    </MedlineCitation>
  </PubmedArticle>
</PubmedArticleSet>"#;

    #[test]
    fn test_builder_settings() {
        let retriever = PubMedRetriever::new()
            .database("pmc")
            .sort_by("pub_date")
            .api_key("k");
        assert_eq!(retriever.database, "pmc");
        assert_eq!(retriever.sort_by.as_deref(), Some("pub_date"));
        assert_eq!(retriever.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_retriever_identity() {
        let retriever = PubMedRetriever::new();
        assert_eq!(retriever.name(), "PubMed");
        assert_eq!(retriever.kind(), RetrieverKind::Biomedical);
    }

    #[test]
    fn test_parse_sample_xml() {
        let articles = parse_efetch_xml(SAMPLE_XML).unwrap();
        assert_eq!(articles.len(), 1);
        let article = &articles[0];
        assert_eq!(article.title, "Microbiome diversity and tumor progression");
        assert_eq!(article.snippet, "Background text. Results text.");
        assert_eq!(article.url, "https://pubmed.ncbi.nlm.nih.gov/12345678/");
        assert_eq!(article.doi.as_deref(), Some("10.1000/mb.2024.01"));
        assert_eq!(
            article.authors,
            vec!["Okafor Adaeze".to_string(), "Lindqvist S".to_string()]
        );
        assert_eq!(article.publication_date.as_deref(), Some("2024"));
    }

    #[test]
    fn test_parse_empty_set() {
        let articles = parse_efetch_xml("<PubmedArticleSet></PubmedArticleSet>").unwrap();
        assert!(articles.is_empty());
    }

    #[test]
    fn test_parse_malformed_xml_is_adapter_error() {
        let result = parse_efetch_xml("<PubmedArticle><Unclosed></PubmedArticle>");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let retriever = PubMedRetriever::new();
        let err = retriever.search("   ", 3).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_search_against_mock_endpoints() {
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/esearch"))
            .and(query_param("term", "microbiome"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "esearchresult": {"idlist": ["12345678"]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/efetch"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE_XML))
            .mount(&server)
            .await;

        let retriever = PubMedRetriever::new().endpoints(
            format!("{}/esearch", server.uri()),
            format!("{}/efetch", server.uri()),
        );
        let articles = retriever.search("microbiome", 2).await.unwrap();
        assert_eq!(articles.len(), 1);
        assert!(articles[0].url.contains("12345678"));
    }

    #[tokio::test]
    async fn test_no_ids_short_circuits_fetch() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/esearch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "esearchresult": {"idlist": []}
            })))
            .mount(&server)
            .await;

        let retriever = PubMedRetriever::new().endpoints(
            format!("{}/esearch", server.uri()),
            format!("{}/efetch", server.uri()),
        );
        let articles = retriever.search("nothing", 2).await.unwrap();
        assert!(articles.is_empty());
    }
}
