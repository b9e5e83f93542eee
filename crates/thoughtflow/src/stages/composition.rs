//! Composition stage: turn extracted subgraphs into a cited report.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use crate::config::Settings;
use crate::core::error::Result;
use crate::core::session::Session;
use crate::repository::GraphRepository;
use crate::stage::{Stage, StageOutput};

const STAGE_NAME: &str = "composition";
const KEY_NODE_TYPES: [&str; 3] = ["HYPOTHESIS", "EVIDENCE", "INTERDISCIPLINARY_BRIDGE"];
const KEY_NODE_LIMIT: usize = 3;
const KEY_NODE_THRESHOLD: f64 = 0.6;

/// One section of the composed report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposedSection {
    /// Section title
    pub title: String,
    /// Rendered content
    pub content: String,
    /// Which subgraph the section summarizes
    pub referenced_subgraph: String,
    /// Ids of the claims cited in this section
    pub key_node_ids: Vec<String>,
}

/// A citation record; ids are `Node-<nodeId>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Citation id
    pub id: String,
    /// The cited node's label
    pub label: String,
    /// Where the underlying content came from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_description: Option<String>,
    /// DOI when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
}

/// The composed report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposedOutput {
    /// Report title
    pub title: String,
    /// Leading summary paragraph
    pub executive_summary: String,
    /// One section per non-empty subgraph
    pub sections: Vec<ComposedSection>,
    /// Deduplicated citations
    pub citations: Vec<Citation>,
    /// Formatted reasoning-trace appendix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_trace_appendix_summary: Option<String>,
}

struct KeyNode {
    id: String,
    label: String,
    avg_confidence: f64,
    impact: f64,
    source_description: Option<String>,
    doi: Option<String>,
}

/// Composes the final report from the extracted subgraphs.
pub struct CompositionStage {
    #[allow(dead_code)]
    repo: Arc<dyn GraphRepository>,
    #[allow(dead_code)]
    settings: Arc<Settings>,
}

impl CompositionStage {
    /// Build the stage.
    #[must_use]
    pub fn new(repo: Arc<dyn GraphRepository>, settings: Arc<Settings>) -> Self {
        Self { repo, settings }
    }

    fn node_avg_confidence(props: &Value) -> f64 {
        if let Some(avg) = props.get("confidence_overall_avg").and_then(Value::as_f64) {
            return avg;
        }
        let components: Vec<f64> = [
            "confidence_empirical_support",
            "confidence_theoretical_basis",
            "confidence_methodological_rigor",
            "confidence_consensus_alignment",
        ]
        .iter()
        .filter_map(|key| props.get(*key).and_then(Value::as_f64))
        .collect();
        if components.len() == 4 {
            components.iter().sum::<f64>() / 4.0
        } else {
            0.0
        }
    }

    fn key_nodes(subgraph: &Value) -> Vec<KeyNode> {
        let mut nodes: Vec<KeyNode> = subgraph["nodes"]
            .as_array()
            .map(|nodes| {
                nodes
                    .iter()
                    .filter_map(|record| {
                        let labels: Vec<&str> = record["labels"]
                            .as_array()?
                            .iter()
                            .filter_map(Value::as_str)
                            .collect();
                        if !labels.iter().any(|l| KEY_NODE_TYPES.contains(l)) {
                            return None;
                        }
                        let props = record.get("props")?;
                        let avg_confidence = Self::node_avg_confidence(props);
                        let impact = props
                            .get("metadata_impact_score")
                            .and_then(Value::as_f64)
                            .unwrap_or(0.0);
                        if avg_confidence <= KEY_NODE_THRESHOLD && impact <= KEY_NODE_THRESHOLD {
                            return None;
                        }
                        Some(KeyNode {
                            id: record["id"].as_str()?.to_string(),
                            label: props
                                .get("label")
                                .and_then(Value::as_str)
                                .unwrap_or("(unlabelled)")
                                .to_string(),
                            avg_confidence,
                            impact,
                            source_description: props
                                .get("metadata_source_description")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                            doi: props
                                .get("metadata_doi")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        nodes.sort_by(|a, b| {
            b.impact
                .partial_cmp(&a.impact)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.avg_confidence
                        .partial_cmp(&a.avg_confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.id.cmp(&b.id))
        });
        nodes.truncate(KEY_NODE_LIMIT);
        nodes
    }

    fn trace_appendix(session: &Session) -> Option<String> {
        if session.stage_outputs_trace.is_empty() {
            return None;
        }
        let lines: Vec<String> = session
            .stage_outputs_trace
            .iter()
            .map(|entry| {
                let mut line = format!(
                    "Stage {} ({}): {} [{} ms]",
                    entry.stage_number, entry.stage_name, entry.summary, entry.duration_ms
                );
                if let Some(error) = &entry.error {
                    line.push_str(&format!("; error: {error}"));
                }
                line
            })
            .collect();
        Some(lines.join("\n"))
    }

    fn render_answer(output: &ComposedOutput) -> String {
        let mut text = format!("{}\n\n{}\n", output.title, output.executive_summary);
        for section in &output.sections {
            text.push_str(&format!("\n## {}\n{}\n", section.title, section.content));
        }
        if !output.citations.is_empty() {
            text.push_str("\nCitations:\n");
            for citation in &output.citations {
                text.push_str(&format!("[{}] {}\n", citation.id, citation.label));
            }
        }
        text
    }
}

#[async_trait]
impl Stage for CompositionStage {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    async fn execute(&self, session: &mut Session) -> Result<StageOutput> {
        let subgraphs: Vec<Value> = session
            .stage_slot("subgraph_extraction")
            .and_then(|slot| slot.get("subgraphs"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut sections = Vec::new();
        let mut citations: Vec<Citation> = Vec::new();
        let mut seen_citations: HashSet<String> = HashSet::new();

        for subgraph in &subgraphs {
            let name = subgraph["name"].as_str().unwrap_or("subgraph").to_string();
            let key_nodes = Self::key_nodes(subgraph);
            if key_nodes.is_empty() {
                continue;
            }

            let mut content = String::new();
            let mut key_node_ids = Vec::new();
            for node in &key_nodes {
                content.push_str(&format!(
                    "- {} (confidence {:.2}, impact {:.2}) [Node-{}]\n",
                    node.label, node.avg_confidence, node.impact, node.id
                ));
                key_node_ids.push(node.id.clone());

                let citation_id = format!("Node-{}", node.id);
                if seen_citations.insert(citation_id.clone()) {
                    citations.push(Citation {
                        id: citation_id,
                        label: node.label.clone(),
                        source_description: node.source_description.clone(),
                        doi: node.doi.clone(),
                    });
                }
            }

            sections.push(ComposedSection {
                title: format!("Findings: {}", name.replace('_', " ")),
                content,
                referenced_subgraph: name,
                key_node_ids,
            });
        }

        let executive_summary = if sections.is_empty() {
            format!(
                "The analysis of '{}' did not surface claims above the reporting thresholds.",
                session.query
            )
        } else {
            format!(
                "Analysis of '{}' surfaced {} key claims across {} graph regions, \
                 with {} distinct citations.",
                session.query,
                sections.iter().map(|s| s.key_node_ids.len()).sum::<usize>(),
                sections.len(),
                citations.len()
            )
        };

        let composed = ComposedOutput {
            title: format!("Research synthesis: {}", session.query),
            executive_summary,
            sections,
            citations,
            reasoning_trace_appendix_summary: Self::trace_appendix(session),
        };

        session.final_answer = Self::render_answer(&composed);
        info!(
            sections = composed.sections.len(),
            citations = composed.citations.len(),
            "composed final report"
        );

        Ok(StageOutput::success(format!(
            "Composed report with {} sections and {} citations",
            composed.sections.len(),
            composed.citations.len()
        ))
        .with_slot(
            STAGE_NAME,
            json!({
                "composed_output": serde_json::to_value(&composed)?,
            }),
        )
        .with_metrics(json!({
            "sections": composed.sections.len(),
            "citations": composed.citations.len(),
        })))
    }
}
