//! Wire the full pipeline against real collaborators and run one query.
//!
//! Requires a Neo4j instance with APOC and (optionally) API keys:
//!
//! ```sh
//! export THOUGHTFLOW_NEO4J_URI=bolt://localhost:7687
//! export THOUGHTFLOW_NEO4J_USER=neo4j
//! export THOUGHTFLOW_NEO4J_PASSWORD=...
//! export EXA_API_KEY=...             # optional; Exa is skipped without it
//! export SEMANTIC_SCHOLAR_API_KEY=...# optional
//! cargo run --example research_pipeline -- "your research question"
//! ```

use std::sync::Arc;

use thoughtflow::config::Settings;
use thoughtflow::orchestrator::PipelineOrchestrator;
use thoughtflow::repository::GraphRepository;
use thoughtflow::retriever::EvidenceRetriever;
use thoughtflow::stages::build_pipeline;
use thoughtflow_exa::ExaRetriever;
use thoughtflow_neo4j::Neo4jRepository;
use thoughtflow_pubmed::PubMedRetriever;
use thoughtflow_scholar::ScholarRetriever;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let query = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "How does microbiome diversity affect cancer progression?".to_string());

    let settings = Arc::new(Settings::from_env());
    settings.validate()?;

    let repo: Arc<dyn GraphRepository> =
        Arc::new(Neo4jRepository::from_settings(&settings.store).await?);

    // Individual adapter construction failures are tolerated; the pipeline
    // only needs one working retriever.
    let mut retrievers: Vec<Arc<dyn EvidenceRetriever>> = vec![Arc::new(PubMedRetriever::new())];
    let mut scholar = ScholarRetriever::new();
    if let Ok(key) = std::env::var("SEMANTIC_SCHOLAR_API_KEY") {
        scholar = scholar.api_key(key);
    }
    retrievers.push(Arc::new(scholar));
    match std::env::var("EXA_API_KEY") {
        Ok(key) => retrievers.push(Arc::new(ExaRetriever::new(key))),
        Err(_) => eprintln!("EXA_API_KEY not set; skipping the neural web retriever"),
    }

    let stages = build_pipeline(&settings, &repo, retrievers)?;
    let orchestrator = PipelineOrchestrator::new(stages, repo);

    let session = orchestrator.process_query(&query, None).await?;

    println!("\n{}\n", session.final_answer);
    println!("final confidence: {}", session.final_confidence_vector);
    for entry in &session.stage_outputs_trace {
        println!(
            "  {}. {} ({} ms): {}",
            entry.stage_number, entry.stage_name, entry.duration_ms, entry.summary
        );
    }

    orchestrator.shutdown().await;
    Ok(())
}
