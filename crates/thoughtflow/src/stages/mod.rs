//! The eight reasoning stages and their shared support code.

pub mod composition;
pub mod decomposition;
pub mod evidence;
pub mod extraction;
pub mod graph_ops;
pub mod hypothesis;
pub mod initialization;
pub mod pruning;
pub mod reflection;
pub mod similarity;
pub mod testing;

use std::sync::Arc;

use crate::config::Settings;
use crate::core::error::{Error, Result};
use crate::repository::GraphRepository;
use crate::retriever::EvidenceRetriever;
use crate::stage::Stage;

pub use composition::{ComposedOutput, CompositionStage};
pub use decomposition::DecompositionStage;
pub use evidence::EvidenceStage;
pub use extraction::{ExtractedSubgraphData, SubgraphExtractionStage};
pub use hypothesis::HypothesisStage;
pub use initialization::InitializationStage;
pub use pruning::PruningMergingStage;
pub use reflection::{AuditRecord, AuditStatus, ReflectionStage};

/// Build the pipeline from the configured stage list.
///
/// Registration is data-driven by name; the stage set itself is fixed at
/// build time. Disabled entries are skipped. The retrievers are handed to the
/// evidence stage, whose construction fails when none are available.
pub fn build_pipeline(
    settings: &Arc<Settings>,
    repo: &Arc<dyn GraphRepository>,
    retrievers: Vec<Arc<dyn EvidenceRetriever>>,
) -> Result<Vec<Arc<dyn Stage>>> {
    let mut stages: Vec<Arc<dyn Stage>> = Vec::new();
    for entry in settings.pipeline_or_default() {
        if !entry.enabled {
            tracing::debug!(stage = %entry.name, "skipping disabled stage");
            continue;
        }
        let stage: Arc<dyn Stage> = match entry.name.as_str() {
            "initialization" => Arc::new(InitializationStage::new(
                Arc::clone(repo),
                Arc::clone(settings),
            )),
            "decomposition" => Arc::new(DecompositionStage::new(
                Arc::clone(repo),
                Arc::clone(settings),
            )),
            "hypothesis" => Arc::new(HypothesisStage::new(
                Arc::clone(repo),
                Arc::clone(settings),
            )),
            "evidence" => Arc::new(EvidenceStage::new(
                Arc::clone(repo),
                Arc::clone(settings),
                retrievers.clone(),
            )?),
            "pruning_merging" => Arc::new(PruningMergingStage::new(
                Arc::clone(repo),
                Arc::clone(settings),
            )),
            "subgraph_extraction" => Arc::new(SubgraphExtractionStage::new(
                Arc::clone(repo),
                Arc::clone(settings),
            )),
            "composition" => Arc::new(CompositionStage::new(
                Arc::clone(repo),
                Arc::clone(settings),
            )),
            "reflection" => Arc::new(ReflectionStage::new(
                Arc::clone(repo),
                Arc::clone(settings),
            )),
            other => {
                return Err(Error::Configuration(format!(
                    "unknown pipeline stage '{other}'"
                )));
            }
        };
        stages.push(stage);
    }
    Ok(stages)
}
