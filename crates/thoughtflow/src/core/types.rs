//! Graph data model: node/edge types, metadata, and store-form flattening.
//!
//! Node and edge kinds are closed sets, represented as exhaustive enums so a
//! new variant forces every match site to be revisited. Property maps headed
//! for the store are pre-flattened: scalars stay inline, arrays and objects
//! are JSON-stringified under `metadata_`-prefixed keys, and timestamps are
//! ISO-8601 strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::core::confidence::ConfidenceVector;
use crate::core::error::{Error, Result};

/// Closed set of node kinds in the reasoning graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    /// Canonical node for the query under analysis; unique per verbatim query
    Root,
    /// Restatement of the task produced during initialization
    TaskUnderstanding,
    /// A facet of the query produced by decomposition
    DecompositionDimension,
    /// A testable proposition bound to a dimension
    Hypothesis,
    /// An external record attached to a hypothesis
    Evidence,
    /// A marked knowledge gap awaiting evidence
    PlaceholderGap,
    /// Synthesized link between two domain-tagged nodes
    InterdisciplinaryBridge,
    /// A follow-up question emitted by reflection
    ResearchQuestion,
    /// Reified group co-owning a hypothesis and several evidence items
    HyperedgeCenter,
}

impl NodeType {
    /// The store label for this kind.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Root => "ROOT",
            Self::TaskUnderstanding => "TASK_UNDERSTANDING",
            Self::DecompositionDimension => "DECOMPOSITION_DIMENSION",
            Self::Hypothesis => "HYPOTHESIS",
            Self::Evidence => "EVIDENCE",
            Self::PlaceholderGap => "PLACEHOLDER_GAP",
            Self::InterdisciplinaryBridge => "INTERDISCIPLINARY_BRIDGE",
            Self::ResearchQuestion => "RESEARCH_QUESTION",
            Self::HyperedgeCenter => "HYPEREDGE_CENTER",
        }
    }

    /// Parse a store label back into a kind.
    pub fn parse(label: &str) -> Result<Self> {
        match label {
            "ROOT" => Ok(Self::Root),
            "TASK_UNDERSTANDING" => Ok(Self::TaskUnderstanding),
            "DECOMPOSITION_DIMENSION" => Ok(Self::DecompositionDimension),
            "HYPOTHESIS" => Ok(Self::Hypothesis),
            "EVIDENCE" => Ok(Self::Evidence),
            "PLACEHOLDER_GAP" => Ok(Self::PlaceholderGap),
            "INTERDISCIPLINARY_BRIDGE" => Ok(Self::InterdisciplinaryBridge),
            "RESEARCH_QUESTION" => Ok(Self::ResearchQuestion),
            "HYPEREDGE_CENTER" => Ok(Self::HyperedgeCenter),
            other => Err(Error::invalid_input(format!("unknown node label '{other}'"))),
        }
    }

    /// All kinds, for allow-list construction.
    #[must_use]
    pub fn all() -> &'static [NodeType] {
        &[
            Self::Root,
            Self::TaskUnderstanding,
            Self::DecompositionDimension,
            Self::Hypothesis,
            Self::Evidence,
            Self::PlaceholderGap,
            Self::InterdisciplinaryBridge,
            Self::ResearchQuestion,
            Self::HyperedgeCenter,
        ]
    }
}

/// Closed set of typed relations between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    /// Dimension decomposes the root
    DecompositionOf,
    /// Dimension generates a hypothesis
    GeneratesHypothesis,
    /// Evidence supports a hypothesis
    Supportive,
    /// Evidence contradicts a hypothesis
    Contradictory,
    /// Bridge node's source endpoint link
    IbnSourceLink,
    /// Bridge node's target endpoint link
    IbnTargetLink,
    /// Hyperedge center to member
    HasMember,
    /// Causal relation
    Causes,
    /// Temporal ordering relation
    TemporalPrecedes,
}

impl EdgeType {
    /// The store relationship type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DecompositionOf => "DECOMPOSITION_OF",
            Self::GeneratesHypothesis => "GENERATES_HYPOTHESIS",
            Self::Supportive => "SUPPORTIVE",
            Self::Contradictory => "CONTRADICTORY",
            Self::IbnSourceLink => "IBN_SOURCE_LINK",
            Self::IbnTargetLink => "IBN_TARGET_LINK",
            Self::HasMember => "HAS_MEMBER",
            Self::Causes => "CAUSES",
            Self::TemporalPrecedes => "TEMPORAL_PRECEDES",
        }
    }

    /// Parse a store relationship type.
    pub fn parse(rel_type: &str) -> Result<Self> {
        match rel_type {
            "DECOMPOSITION_OF" => Ok(Self::DecompositionOf),
            "GENERATES_HYPOTHESIS" => Ok(Self::GeneratesHypothesis),
            "SUPPORTIVE" => Ok(Self::Supportive),
            "CONTRADICTORY" => Ok(Self::Contradictory),
            "IBN_SOURCE_LINK" => Ok(Self::IbnSourceLink),
            "IBN_TARGET_LINK" => Ok(Self::IbnTargetLink),
            "HAS_MEMBER" => Ok(Self::HasMember),
            "CAUSES" => Ok(Self::Causes),
            "TEMPORAL_PRECEDES" => Ok(Self::TemporalPrecedes),
            other => Err(Error::invalid_input(format!(
                "unknown relationship type '{other}'"
            ))),
        }
    }

    /// Allow-list of relationship type strings accepted by the write path.
    #[must_use]
    pub fn allow_list() -> &'static [&'static str] {
        &[
            "DECOMPOSITION_OF",
            "GENERATES_HYPOTHESIS",
            "SUPPORTIVE",
            "CONTRADICTORY",
            "IBN_SOURCE_LINK",
            "IBN_TARGET_LINK",
            "HAS_MEMBER",
            "CAUSES",
            "TEMPORAL_PRECEDES",
        ]
    }
}

/// Epistemic standing of a node's claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EpistemicStatus {
    /// Taken as given without evidence
    Assumption,
    /// Proposed, not yet tested
    Hypothesis,
    /// Evidence on balance supports it
    EvidenceSupported,
    /// Evidence on balance contradicts it
    EvidenceContradicted,
    /// Derived from other nodes
    Inferred,
    /// No standing recorded
    #[default]
    Unknown,
}

impl EpistemicStatus {
    /// Store string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assumption => "ASSUMPTION",
            Self::Hypothesis => "HYPOTHESIS",
            Self::EvidenceSupported => "EVIDENCE_SUPPORTED",
            Self::EvidenceContradicted => "EVIDENCE_CONTRADICTED",
            Self::Inferred => "INFERRED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parse the store string form; unknown strings map to `Unknown`.
    #[must_use]
    pub fn parse(status: &str) -> Self {
        match status {
            "ASSUMPTION" => Self::Assumption,
            "HYPOTHESIS" => Self::Hypothesis,
            "EVIDENCE_SUPPORTED" => Self::EvidenceSupported,
            "EVIDENCE_CONTRADICTED" => Self::EvidenceContradicted,
            "INFERRED" => Self::Inferred,
            _ => Self::Unknown,
        }
    }
}

/// Execution plan attached to a hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan kind, drawn from the configured plan types
    pub plan_type: String,
    /// Normalized cost estimate in [0.2, 0.8]
    pub estimated_cost: f64,
    /// Duration estimate in [1, 5] (arbitrary units)
    pub estimated_duration: f64,
    /// Resources the plan needs
    pub required_resources: Vec<String>,
    /// Search query to run when gathering evidence for this plan
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

/// Conditions under which a hypothesis would be rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FalsificationCriteria {
    /// Summary of what would falsify the hypothesis
    pub description: String,
    /// Concrete testable conditions
    pub testable_conditions: Vec<String>,
}

/// Severity of a flagged bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BiasSeverity {
    /// Worth noting, unlikely to change conclusions
    Low,
    /// May materially skew conclusions
    Medium,
}

/// A potential bias attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasFlag {
    /// Bias kind (e.g. "confirmation_bias")
    pub bias_type: String,
    /// Short description of the concern
    pub description: String,
    /// How damaging the bias could be
    pub severity: BiasSeverity,
}

/// Statistical power payload carried by evidence nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalPower {
    /// Power estimate in [0, 1]
    pub value: f64,
    /// How the estimate was obtained
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

impl StatisticalPower {
    /// Build with the value clamped into [0, 1].
    #[must_use]
    pub fn new(value: f64) -> Self {
        Self {
            value: value.clamp(0.0, 1.0),
            method: None,
        }
    }
}

/// One entry of a node's revision history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionRecord {
    /// When the change happened
    pub timestamp: DateTime<Utc>,
    /// What changed
    pub change: String,
}

/// Metadata carried by every node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Longer free-text description
    pub description: Option<String>,
    /// The verbatim query this node was created under
    pub query_context: Option<String>,
    /// Where the node's content came from
    pub source_description: Option<String>,
    /// Epistemic standing
    pub epistemic_status: EpistemicStatus,
    /// Disciplinary tags; persisted comma-joined
    pub disciplinary_tags: Vec<String>,
    /// Layer the node belongs to
    pub layer_id: Option<String>,
    /// Ranking/pruning scalar in [0, 1]
    pub impact_score: f64,
    /// Whether the node marks a knowledge gap
    pub is_knowledge_gap: bool,
    /// DOI of the underlying publication, if any
    pub doi: Option<String>,
    /// Authors of the underlying publication
    pub authors: Vec<String>,
    /// Publication date string as reported by the source
    pub publication_date: Option<String>,
    /// Ordered history of changes
    pub revision_history: Vec<RevisionRecord>,
    /// Plan payload (hypotheses)
    pub plan: Option<Plan>,
    /// Falsifiability payload (hypotheses)
    pub falsification_criteria: Option<FalsificationCriteria>,
    /// Bias flags (hypotheses)
    pub bias_flags: Vec<BiasFlag>,
    /// Statistical power payload (evidence)
    pub statistical_power: Option<StatisticalPower>,
}

impl NodeMetadata {
    /// Tags as a sorted, comma-joined store string.
    #[must_use]
    pub fn tags_wire(&self) -> String {
        let mut tags = self.disciplinary_tags.clone();
        tags.sort();
        tags.dedup();
        tags.join(",")
    }

    /// Parse a comma-joined tag string.
    #[must_use]
    pub fn tags_from_wire(wire: &str) -> Vec<String> {
        wire.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// A node of the reasoning graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Opaque unique id
    pub id: String,
    /// Human-readable label
    pub label: String,
    /// Node kind
    pub node_type: NodeType,
    /// Four-component confidence
    pub confidence: ConfidenceVector,
    /// Structured metadata
    pub metadata: NodeMetadata,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl GraphNode {
    /// Build a node with a fresh UUID and current timestamps.
    #[must_use]
    pub fn new(node_type: NodeType, label: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            node_type,
            confidence: ConfidenceVector::default(),
            metadata: NodeMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Flatten to the store property map.
    ///
    /// Scalars inline; arrays/objects JSON-stringified; timestamps ISO-8601.
    /// Structured metadata lands under `metadata_`-prefixed keys.
    #[must_use]
    pub fn to_store_properties(&self) -> Map<String, Value> {
        let mut props = Map::new();
        props.insert("id".to_string(), json!(self.id));
        props.insert("label".to_string(), json!(self.label));
        props.insert(
            "confidence_empirical_support".to_string(),
            json!(self.confidence.empirical_support),
        );
        props.insert(
            "confidence_theoretical_basis".to_string(),
            json!(self.confidence.theoretical_basis),
        );
        props.insert(
            "confidence_methodological_rigor".to_string(),
            json!(self.confidence.methodological_rigor),
        );
        props.insert(
            "confidence_consensus_alignment".to_string(),
            json!(self.confidence.consensus_alignment),
        );
        props.insert(
            "confidence_overall_avg".to_string(),
            json!(self.confidence.average()),
        );
        props.insert("created_at".to_string(), json!(self.created_at.to_rfc3339()));
        props.insert("updated_at".to_string(), json!(self.updated_at.to_rfc3339()));

        let m = &self.metadata;
        if let Some(d) = &m.description {
            props.insert("metadata_description".to_string(), json!(d));
        }
        if let Some(q) = &m.query_context {
            props.insert("metadata_query_context".to_string(), json!(q));
        }
        if let Some(s) = &m.source_description {
            props.insert("metadata_source_description".to_string(), json!(s));
        }
        props.insert(
            "metadata_epistemic_status".to_string(),
            json!(m.epistemic_status.as_str()),
        );
        props.insert(
            "metadata_disciplinary_tags".to_string(),
            json!(m.tags_wire()),
        );
        if let Some(layer) = &m.layer_id {
            props.insert("metadata_layer_id".to_string(), json!(layer));
        }
        props.insert("metadata_impact_score".to_string(), json!(m.impact_score));
        props.insert(
            "metadata_is_knowledge_gap".to_string(),
            json!(m.is_knowledge_gap),
        );
        if let Some(doi) = &m.doi {
            props.insert("metadata_doi".to_string(), json!(doi));
        }
        if !m.authors.is_empty() {
            props.insert(
                "metadata_authors".to_string(),
                json_string_or_null(&m.authors),
            );
        }
        if let Some(date) = &m.publication_date {
            props.insert("metadata_publication_date".to_string(), json!(date));
        }
        if !m.revision_history.is_empty() {
            props.insert(
                "metadata_revision_history".to_string(),
                json_string_or_null(&m.revision_history),
            );
        }
        if let Some(plan) = &m.plan {
            props.insert("metadata_plan".to_string(), json_string_or_null(plan));
        }
        if let Some(fc) = &m.falsification_criteria {
            props.insert(
                "metadata_falsification_criteria".to_string(),
                json_string_or_null(fc),
            );
        }
        if !m.bias_flags.is_empty() {
            props.insert(
                "metadata_bias_flags".to_string(),
                json_string_or_null(&m.bias_flags),
            );
        }
        if let Some(power) = &m.statistical_power {
            props.insert(
                "metadata_statistical_power".to_string(),
                json_string_or_null(power),
            );
        }
        props
    }

    /// Rebuild a node from a store record: a flattened property map plus the
    /// labels returned alongside it. The generic `Node` label is ignored; the
    /// first recognized type label wins.
    pub fn from_store_record(props: &Map<String, Value>, labels: &[String]) -> Result<Self> {
        let node_type = labels
            .iter()
            .filter(|l| l.as_str() != "Node")
            .find_map(|l| NodeType::parse(l).ok())
            .ok_or_else(|| Error::invalid_input("record has no recognized type label"))?;

        let id = prop_str(props, "id")
            .ok_or_else(|| Error::invalid_input("record is missing 'id'"))?;
        let label = prop_str(props, "label").unwrap_or_default();

        let confidence = ConfidenceVector::new(
            prop_f64(props, "confidence_empirical_support").unwrap_or(0.5),
            prop_f64(props, "confidence_theoretical_basis").unwrap_or(0.5),
            prop_f64(props, "confidence_methodological_rigor").unwrap_or(0.5),
            prop_f64(props, "confidence_consensus_alignment").unwrap_or(0.5),
        );

        let mut metadata = NodeMetadata {
            description: prop_str(props, "metadata_description"),
            query_context: prop_str(props, "metadata_query_context"),
            source_description: prop_str(props, "metadata_source_description"),
            epistemic_status: EpistemicStatus::parse(
                &prop_str(props, "metadata_epistemic_status").unwrap_or_default(),
            ),
            disciplinary_tags: NodeMetadata::tags_from_wire(
                &prop_str(props, "metadata_disciplinary_tags").unwrap_or_default(),
            ),
            layer_id: prop_str(props, "metadata_layer_id"),
            impact_score: prop_f64(props, "metadata_impact_score").unwrap_or(0.0),
            is_knowledge_gap: props
                .get("metadata_is_knowledge_gap")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            doi: prop_str(props, "metadata_doi"),
            authors: prop_json(props, "metadata_authors").unwrap_or_default(),
            publication_date: prop_str(props, "metadata_publication_date"),
            revision_history: prop_json(props, "metadata_revision_history").unwrap_or_default(),
            plan: prop_json(props, "metadata_plan"),
            falsification_criteria: prop_json(props, "metadata_falsification_criteria"),
            bias_flags: prop_json(props, "metadata_bias_flags").unwrap_or_default(),
            statistical_power: prop_json(props, "metadata_statistical_power"),
        };
        metadata.disciplinary_tags.sort();
        metadata.disciplinary_tags.dedup();

        let created_at = prop_time(props, "created_at");
        let updated_at = prop_time(props, "updated_at");

        Ok(Self {
            id,
            label,
            node_type,
            confidence,
            metadata,
            created_at,
            updated_at,
        })
    }
}

/// A typed relation between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Opaque unique id
    pub id: String,
    /// Id of the source node
    pub source_id: String,
    /// Id of the target node
    pub target_id: String,
    /// Relation kind
    pub edge_type: EdgeType,
    /// Scalar confidence in [0, 1]
    pub confidence: f64,
    /// Free-text description
    pub description: Option<String>,
    /// Optional weight for analytics
    pub weight: Option<f64>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl GraphEdge {
    /// Build an edge with a fresh UUID and current timestamp.
    #[must_use]
    pub fn new(
        edge_type: EdgeType,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            edge_type,
            confidence: confidence.clamp(0.0, 1.0),
            description: None,
            weight: None,
            created_at: Utc::now(),
        }
    }

    /// Flatten to the store property map (endpoints are matched separately).
    #[must_use]
    pub fn to_store_properties(&self) -> Map<String, Value> {
        let mut props = Map::new();
        props.insert("id".to_string(), json!(self.id));
        props.insert("confidence".to_string(), json!(self.confidence));
        if let Some(d) = &self.description {
            props.insert("description".to_string(), json!(d));
        }
        if let Some(w) = self.weight {
            props.insert("weight".to_string(), json!(w));
        }
        props.insert("created_at".to_string(), json!(self.created_at.to_rfc3339()));
        props
    }
}

fn json_string_or_null<T: Serialize>(value: &T) -> Value {
    serde_json::to_string(value).map_or(Value::Null, Value::String)
}

fn prop_str(props: &Map<String, Value>, key: &str) -> Option<String> {
    props.get(key).and_then(Value::as_str).map(str::to_string)
}

fn prop_f64(props: &Map<String, Value>, key: &str) -> Option<f64> {
    props.get(key).and_then(Value::as_f64)
}

fn prop_time(props: &Map<String, Value>, key: &str) -> DateTime<Utc> {
    props
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map_or_else(Utc::now, |dt| dt.with_timezone(&Utc))
}

fn prop_json<T: serde::de::DeserializeOwned>(props: &Map<String, Value>, key: &str) -> Option<T> {
    props
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| serde_json::from_str(s).ok())
}
