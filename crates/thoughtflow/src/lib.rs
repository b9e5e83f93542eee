//! # ThoughtFlow
//!
//! Graph-of-thoughts research pipeline: a natural-language query drives eight
//! reasoning stages over a labelled property graph. The pipeline decomposes
//! the query into dimensions, generates testable hypotheses, gathers external
//! evidence through pluggable retrievers under bounded concurrency, updates
//! confidence with Bayesian likelihood ratios, prunes and merges the graph,
//! extracts the regions worth reporting, composes a cited answer, and audits
//! itself into a final four-component confidence vector.
//!
//! ## Architecture
//!
//! - [`core`]: errors, confidence vectors, the graph data model, sessions
//! - [`config`]: YAML settings with environment overrides
//! - [`bayes`] / [`stats`]: confidence mathematics
//! - [`repository`]: the graph store contract ([`thoughtflow-neo4j`] implements it)
//! - [`retriever`]: the evidence retriever contract (`-pubmed`, `-scholar`,
//!   `-exa` implement it)
//! - [`stage`] / [`stages`]: the stage kernel and the eight stages
//! - [`checkpoint`] / [`orchestrator`]: sequencing, retries, rollback
//! - [`analytics`]: in-memory graph analytics for the direct-query path
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use thoughtflow::config::Settings;
//! use thoughtflow::orchestrator::PipelineOrchestrator;
//! use thoughtflow::repository::GraphRepository;
//! use thoughtflow::retriever::EvidenceRetriever;
//! use thoughtflow::stages::build_pipeline;
//!
//! # async fn example(
//! #     repo: Arc<dyn GraphRepository>,
//! #     retrievers: Vec<Arc<dyn EvidenceRetriever>>,
//! # ) -> thoughtflow::core::Result<()> {
//! let settings = Arc::new(Settings::from_env());
//! settings.validate()?;
//!
//! let stages = build_pipeline(&settings, &repo, retrievers)?;
//! let orchestrator = PipelineOrchestrator::new(stages, repo);
//! let session = orchestrator
//!     .process_query("How does microbiome diversity affect cancer progression?", None)
//!     .await?;
//! println!("{}", session.final_answer);
//! # Ok(())
//! # }
//! ```
//!
//! [`thoughtflow-neo4j`]: https://docs.rs/thoughtflow-neo4j

pub mod analytics;
pub mod bayes;
pub mod checkpoint;
pub mod config;
pub mod constants;
pub mod core;
pub mod orchestrator;
pub mod repository;
pub mod retriever;
pub mod stage;
pub mod stages;
pub mod stats;

pub use self::core::{ConfidenceVector, Error, GraphEdge, GraphNode, Result, Session};
pub use orchestrator::PipelineOrchestrator;
pub use repository::{GraphRepository, QueryMode};
pub use retriever::{ArticleRecord, EvidenceRetriever, RetrieverKind};
pub use stage::{Stage, StageOutput};
