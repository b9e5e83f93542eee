//! Test support: an in-memory [`GraphRepository`] that emulates the store
//! semantics the stages rely on, plus canned retrieval adapters.
//!
//! The mock recognizes the query shapes the stages issue (upsert batches,
//! criterion seeds, subgraph expansion, pruning writes) and evaluates them
//! against an in-memory node/edge table. It enforces the same write policy as
//! a real repository, so a stage that issues a destructive query outside the
//! pruning path fails in tests too.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::core::error::{Error, Result};
use crate::repository::{
    validate_query_policy, GraphRepository, QueryMode, Statement, WritePolicy,
};
use crate::retriever::{ArticleRecord, EvidenceRetriever, RetrieverKind};

/// A node row held by the mock store.
#[derive(Debug, Clone)]
pub struct StoredNode {
    /// Flattened properties, exactly as written
    pub props: Map<String, Value>,
    /// Labels including the generic `Node`
    pub labels: BTreeSet<String>,
}

/// An edge row held by the mock store.
#[derive(Debug, Clone)]
pub struct StoredEdge {
    /// Edge id property
    pub id: String,
    /// Relationship type
    pub edge_type: String,
    /// Source node id
    pub source_id: String,
    /// Target node id
    pub target_id: String,
    /// Flattened properties
    pub props: Map<String, Value>,
}

#[derive(Default)]
struct MockState {
    nodes: BTreeMap<String, StoredNode>,
    edges: Vec<StoredEdge>,
    write_count: usize,
    fail_message: Option<String>,
}

/// In-memory repository emulating the store contract.
#[derive(Default)]
pub struct MockRepo {
    state: Mutex<MockState>,
}

#[allow(clippy::unwrap_used)]
impl MockRepo {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next repository call fail with a transient store error.
    pub fn fail_next(&self, message: &str) {
        self.state.lock().unwrap().fail_message = Some(message.to_string());
    }

    /// How many mutating statements have been executed.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.state.lock().unwrap().write_count
    }

    /// Fetch a stored node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<StoredNode> {
        self.state.lock().unwrap().nodes.get(id).cloned()
    }

    /// All nodes carrying a label.
    #[must_use]
    pub fn nodes_with_label(&self, label: &str) -> Vec<StoredNode> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .values()
            .filter(|n| n.labels.contains(label))
            .cloned()
            .collect()
    }

    /// All edges of a relationship type.
    #[must_use]
    pub fn edges_of_type(&self, edge_type: &str) -> Vec<StoredEdge> {
        self.state
            .lock()
            .unwrap()
            .edges
            .iter()
            .filter(|e| e.edge_type == edge_type)
            .cloned()
            .collect()
    }

    fn take_failure(&self) -> Option<Error> {
        self.state
            .lock()
            .unwrap()
            .fail_message
            .take()
            .map(Error::store)
    }

    #[allow(clippy::too_many_lines)]
    fn dispatch(&self, query: &str, params: &Map<String, Value>) -> Result<Vec<Map<String, Value>>> {
        let mut state = self.state.lock().unwrap();

        // --- node upsert batch -------------------------------------------
        if query.contains("MERGE (n:Node {id: row.id})") {
            state.write_count += 1;
            let rows = params.get("rows").and_then(Value::as_array).cloned().unwrap_or_default();
            let mut out = Vec::new();
            for row in rows {
                let id = row["id"].as_str().unwrap_or_default().to_string();
                let props = row["props"].as_object().cloned().unwrap_or_default();
                let type_label = row["type_label"].as_str().unwrap_or_default().to_string();
                let entry = state.nodes.entry(id.clone()).or_insert_with(|| StoredNode {
                    props: Map::new(),
                    labels: BTreeSet::from(["Node".to_string()]),
                });
                for (k, v) in props {
                    entry.props.insert(k, v);
                }
                entry.labels.insert(type_label);
                out.push(Map::from_iter([("id".to_string(), json!(id))]));
            }
            return Ok(out);
        }

        // --- edge upsert batch -------------------------------------------
        if query.contains("MERGE (a)-[r:") {
            state.write_count += 1;
            let rel_type = Regex::new(r"\[r:([A-Z_]+) ")
                .unwrap()
                .captures(query)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            let rows = params.get("rows").and_then(Value::as_array).cloned().unwrap_or_default();
            let mut out = Vec::new();
            for row in rows {
                let id = row["id"].as_str().unwrap_or_default().to_string();
                let source = row["source_id"].as_str().unwrap_or_default().to_string();
                let target = row["target_id"].as_str().unwrap_or_default().to_string();
                if !state.nodes.contains_key(&source) || !state.nodes.contains_key(&target) {
                    continue; // MATCH on a missing endpoint drops the row
                }
                let props = row["props"].as_object().cloned().unwrap_or_default();
                if let Some(existing) = state.edges.iter_mut().find(|e| e.id == id) {
                    existing.props = props;
                } else {
                    state.edges.push(StoredEdge {
                        id: id.clone(),
                        edge_type: rel_type.clone(),
                        source_id: source,
                        target_id: target,
                        props,
                    });
                }
                out.push(Map::from_iter([("id".to_string(), json!(id))]));
            }
            return Ok(out);
        }

        // --- root lookup by verbatim query -------------------------------
        if query.contains("n.metadata_query_context = $query") {
            let wanted = params.get("query").and_then(Value::as_str).unwrap_or_default();
            let found = state
                .nodes
                .values()
                .find(|n| {
                    n.labels.contains("ROOT")
                        && n.props.get("metadata_query_context").and_then(Value::as_str)
                            == Some(wanted)
                })
                .map(node_record);
            return Ok(found.into_iter().collect());
        }

        // --- root tag update ---------------------------------------------
        if query.contains("SET n.metadata_disciplinary_tags = $tags") {
            state.write_count += 1;
            let id = params.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
            let tags = params.get("tags").cloned().unwrap_or(Value::Null);
            let now = params.get("now").cloned().unwrap_or(Value::Null);
            if let Some(node) = state.nodes.get_mut(&id) {
                node.props.insert("metadata_disciplinary_tags".to_string(), tags);
                node.props.insert("updated_at".to_string(), now);
            }
            return Ok(Vec::new());
        }

        // --- evidence: hypothesis candidate selection --------------------
        if query.contains("NOT h.id IN $processed") {
            let ids: HashSet<&str> = str_set(params.get("ids"));
            let processed: HashSet<&str> = str_set(params.get("processed"));
            let mut candidates: Vec<&StoredNode> = state
                .nodes
                .iter()
                .filter(|(id, n)| {
                    n.labels.contains("HYPOTHESIS")
                        && ids.contains(id.as_str())
                        && !processed.contains(id.as_str())
                })
                .map(|(_, n)| n)
                .collect();
            candidates.sort_by(|a, b| {
                let impact = |n: &StoredNode| prop_f64(n, "metadata_impact_score");
                let empirical = |n: &StoredNode| prop_f64(n, "confidence_empirical_support");
                impact(b)
                    .partial_cmp(&impact(a))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        empirical(a)
                            .partial_cmp(&empirical(b))
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
            });
            return Ok(candidates.into_iter().take(10).map(node_record).collect());
        }

        // --- confidence write-back / merge SET ---------------------------
        if query.contains("SET n.confidence_empirical_support = $empirical")
            || query.contains("SET n1.confidence_empirical_support = $empirical")
        {
            state.write_count += 1;
            let key = if params.contains_key("keep_id") { "keep_id" } else { "id" };
            let id = params.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
            if let Some(node) = state.nodes.get_mut(&id) {
                for (param, prop) in [
                    ("empirical", "confidence_empirical_support"),
                    ("theoretical", "confidence_theoretical_basis"),
                    ("methodological", "confidence_methodological_rigor"),
                    ("consensus", "confidence_consensus_alignment"),
                    ("overall", "confidence_overall_avg"),
                    ("status", "metadata_epistemic_status"),
                    ("label", "label"),
                    ("now", "updated_at"),
                ] {
                    if let Some(value) = params.get(param) {
                        node.props.insert(prop.to_string(), value.clone());
                    }
                }
            }
            return Ok(Vec::new());
        }

        // --- pruning: combined node prune --------------------------------
        if query.contains("DETACH DELETE n\nRETURN count(*) AS pruned_nodes")
            || (query.contains("DETACH DELETE n") && query.contains("pruned_nodes"))
        {
            state.write_count += 1;
            let conf_threshold = params
                .get("confidence_threshold")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            let impact_threshold = params
                .get("impact_threshold")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);

            let degree: BTreeMap<String, usize> = {
                let mut d: BTreeMap<String, usize> = BTreeMap::new();
                for edge in &state.edges {
                    *d.entry(edge.source_id.clone()).or_default() += 1;
                    *d.entry(edge.target_id.clone()).or_default() += 1;
                }
                d
            };

            let victims: Vec<String> = state
                .nodes
                .iter()
                .filter(|(id, n)| {
                    if n.labels.contains("ROOT") || n.labels.contains("DECOMPOSITION_DIMENSION") {
                        return false;
                    }
                    let weak_type = ["HYPOTHESIS", "EVIDENCE", "INTERDISCIPLINARY_BRIDGE"]
                        .iter()
                        .any(|l| n.labels.contains(*l));
                    let min_conf = [
                        "confidence_empirical_support",
                        "confidence_theoretical_basis",
                        "confidence_methodological_rigor",
                        "confidence_consensus_alignment",
                    ]
                    .iter()
                    .map(|k| prop_f64(n, k))
                    .fold(f64::INFINITY, f64::min);
                    let weak = weak_type
                        && min_conf < conf_threshold
                        && prop_f64(n, "metadata_impact_score") < impact_threshold;
                    let isolated = degree.get(id.as_str()).copied().unwrap_or(0) == 0;
                    weak || isolated
                })
                .map(|(id, _)| id.clone())
                .collect();

            for id in &victims {
                state.nodes.remove(id);
                state.edges.retain(|e| e.source_id != *id && e.target_id != *id);
            }
            return Ok(vec![Map::from_iter([(
                "pruned_nodes".to_string(),
                json!(victims.len()),
            )])]);
        }

        // --- pruning: edge prune -----------------------------------------
        if query.contains("$edge_threshold") {
            state.write_count += 1;
            let threshold = params
                .get("edge_threshold")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            let before = state.edges.len();
            state.edges.retain(|e| {
                e.props
                    .get("confidence")
                    .and_then(Value::as_f64)
                    .unwrap_or(1.0)
                    >= threshold
            });
            let pruned = before - state.edges.len();
            return Ok(vec![Map::from_iter([(
                "pruned_edges".to_string(),
                json!(pruned),
            )])]);
        }

        // --- pruning: merge candidate read -------------------------------
        if query.contains("(n:HYPOTHESIS OR n:EVIDENCE)") && query.contains("properties(n)") {
            let records = state
                .nodes
                .values()
                .filter(|n| {
                    (n.labels.contains("HYPOTHESIS") || n.labels.contains("EVIDENCE"))
                        && !n.labels.contains("ROOT")
                        && !n.labels.contains("DECOMPOSITION_DIMENSION")
                })
                .map(node_record)
                .collect();
            return Ok(records);
        }

        // --- pruning: relationship copy (merge) --------------------------
        if query.contains("apoc.merge.relationship") {
            state.write_count += 1;
            let keep = params.get("keep_id").and_then(Value::as_str).unwrap_or_default().to_string();
            let drop = params.get("drop_id").and_then(Value::as_str).unwrap_or_default().to_string();
            let outbound = query.contains("(n2:Node {id: $drop_id})-[r]->(m:Node)");

            let to_copy: Vec<StoredEdge> = state
                .edges
                .iter()
                .filter(|e| {
                    if outbound {
                        e.source_id == drop && e.target_id != keep
                    } else {
                        e.target_id == drop && e.source_id != keep
                    }
                })
                .cloned()
                .collect();
            let mut copied = 0;
            for edge in to_copy {
                let (new_source, new_target) = if outbound {
                    (keep.clone(), edge.target_id.clone())
                } else {
                    (edge.source_id.clone(), keep.clone())
                };
                let exists = state.edges.iter().any(|e| {
                    e.source_id == new_source
                        && e.target_id == new_target
                        && e.edge_type == edge.edge_type
                });
                if !exists {
                    state.edges.push(StoredEdge {
                        id: format!("{}-merged", edge.id),
                        edge_type: edge.edge_type.clone(),
                        source_id: new_source,
                        target_id: new_target,
                        props: edge.props.clone(),
                    });
                    copied += 1;
                }
            }
            return Ok(vec![Map::from_iter([("copied".to_string(), json!(copied))])]);
        }

        // --- pruning: drop single node -----------------------------------
        if query.contains("DETACH DELETE n2") {
            state.write_count += 1;
            let drop = params.get("drop_id").and_then(Value::as_str).unwrap_or_default().to_string();
            state.nodes.remove(&drop);
            state.edges.retain(|e| e.source_id != drop && e.target_id != drop);
            return Ok(Vec::new());
        }

        // --- counts ------------------------------------------------------
        if query.contains("count(n) AS remaining_nodes") {
            return Ok(vec![Map::from_iter([(
                "remaining_nodes".to_string(),
                json!(state.nodes.len()),
            )])]);
        }
        if query.contains("count(r) AS remaining_edges") {
            return Ok(vec![Map::from_iter([(
                "remaining_edges".to_string(),
                json!(state.edges.len()),
            )])]);
        }

        // --- extraction: subgraph expansion ------------------------------
        if query.contains("apoc.path.subgraphNodes") {
            let seeds: Vec<String> = str_set(params.get("seed_ids"))
                .into_iter()
                .map(str::to_string)
                .collect();
            let depth = params.get("max_level").and_then(Value::as_u64).unwrap_or(1) as usize;

            let mut visited: BTreeSet<String> = BTreeSet::new();
            let mut frontier: VecDeque<(String, usize)> =
                seeds.into_iter().map(|s| (s, 0)).collect();
            while let Some((id, level)) = frontier.pop_front() {
                if !state.nodes.contains_key(&id) || !visited.insert(id.clone()) {
                    continue;
                }
                if level >= depth {
                    continue;
                }
                for edge in &state.edges {
                    if edge.source_id == id {
                        frontier.push_back((edge.target_id.clone(), level + 1));
                    }
                    if edge.target_id == id {
                        frontier.push_back((edge.source_id.clone(), level + 1));
                    }
                }
            }

            let records = visited
                .iter()
                .filter_map(|id| {
                    state.nodes.get(id).map(|n| {
                        Map::from_iter([
                            ("id".to_string(), json!(id)),
                            (
                                "labels".to_string(),
                                json!(n.labels.iter().cloned().collect::<Vec<_>>()),
                            ),
                            ("props".to_string(), Value::Object(n.props.clone())),
                        ])
                    })
                })
                .collect();
            return Ok(records);
        }

        // --- extraction: induced edges -----------------------------------
        if query.contains("a.id IN $node_ids AND b.id IN $node_ids") {
            let ids: HashSet<&str> = str_set(params.get("node_ids"));
            let records = state
                .edges
                .iter()
                .filter(|e| ids.contains(e.source_id.as_str()) && ids.contains(e.target_id.as_str()))
                .map(|e| {
                    Map::from_iter([
                        ("id".to_string(), json!(e.id)),
                        ("type".to_string(), json!(e.edge_type)),
                        ("start".to_string(), json!(e.source_id)),
                        ("end".to_string(), json!(e.target_id)),
                        ("props".to_string(), Value::Object(e.props.clone())),
                    ])
                })
                .collect();
            return Ok(records);
        }

        // --- extraction: criterion seed query ----------------------------
        if query.contains("RETURN n.id AS id LIMIT") {
            let clause = query
                .split("WHERE ")
                .nth(1)
                .and_then(|rest| rest.split(" RETURN").next())
                .unwrap_or("");
            let records = state
                .nodes
                .iter()
                .filter(|(_, n)| eval_criterion_clause(clause, params, n))
                .take(100)
                .map(|(id, _)| Map::from_iter([("id".to_string(), json!(id))]))
                .collect();
            return Ok(records);
        }

        // --- analytics loads ----------------------------------------------
        if query.contains("RETURN n.id AS id") {
            let records = state
                .nodes
                .keys()
                .map(|id| Map::from_iter([("id".to_string(), json!(id))]))
                .collect();
            return Ok(records);
        }
        if query.contains("a.id AS start, b.id AS end") {
            let records = state
                .edges
                .iter()
                .map(|e| {
                    Map::from_iter([
                        ("start".to_string(), json!(e.source_id)),
                        ("end".to_string(), json!(e.target_id)),
                        (
                            "weight".to_string(),
                            json!(e
                                .props
                                .get("confidence")
                                .and_then(Value::as_f64)
                                .unwrap_or(1.0)),
                        ),
                    ])
                })
                .collect();
            return Ok(records);
        }

        // --- generic reads ------------------------------------------------
        if query.contains("n.id IN $ids") && query.contains("properties(n)") {
            let ids: HashSet<&str> = str_set(params.get("ids"));
            let records = state
                .nodes
                .iter()
                .filter(|(id, _)| ids.contains(id.as_str()))
                .map(|(_, n)| node_record(n))
                .collect();
            return Ok(records);
        }
        if query.contains("(n:Node {id: $id})") && query.contains("properties(n)") {
            let id = params.get("id").and_then(Value::as_str).unwrap_or_default();
            return Ok(state.nodes.get(id).map(node_record).into_iter().collect());
        }

        Err(Error::store(format!("mock repo cannot interpret query: {query}")))
    }
}

fn node_record(node: &StoredNode) -> Map<String, Value> {
    Map::from_iter([
        ("props".to_string(), Value::Object(node.props.clone())),
        (
            "labels".to_string(),
            json!(node.labels.iter().cloned().collect::<Vec<_>>()),
        ),
    ])
}

fn prop_f64(node: &StoredNode, key: &str) -> f64 {
    node.props.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn str_set(value: Option<&Value>) -> HashSet<&str> {
    value
        .and_then(Value::as_array)
        .map(|xs| xs.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Evaluate a criterion-built WHERE clause against a stored node.
fn eval_criterion_clause(clause: &str, params: &Map<String, Value>, node: &StoredNode) -> bool {
    if clause.trim().is_empty() {
        return true;
    }
    for condition in clause.split(" AND ") {
        let condition = condition.trim();
        let ok = if condition.contains("$min_avg_confidence") {
            prop_f64(node, "confidence_overall_avg")
                >= params
                    .get("min_avg_confidence")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0)
        } else if condition.contains("$min_impact_score") {
            prop_f64(node, "metadata_impact_score")
                >= params
                    .get("min_impact_score")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0)
        } else if condition.starts_with("(n:") {
            condition
                .trim_start_matches("(n:")
                .trim_end_matches(')')
                .split(" OR n:")
                .any(|label| node.labels.contains(label.trim()))
        } else if condition.contains("$required_tag_") || condition.contains("$forbidden_tag_") {
            let forbidden = condition.starts_with("NOT ");
            let key = Regex::new(r"\$((?:required|forbidden)_tag_\d+)")
                .ok()
                .and_then(|re| re.captures(condition))
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());
            let tag = key
                .and_then(|k| params.get(&k).and_then(Value::as_str).map(str::to_string))
                .unwrap_or_default();
            let tags = node
                .props
                .get("metadata_disciplinary_tags")
                .and_then(Value::as_str)
                .unwrap_or("");
            let contains = tags.contains(&tag);
            if forbidden {
                !contains
            } else {
                contains
            }
        } else if condition.contains("$layer_ids") {
            let layers = str_set(params.get("layer_ids"));
            node.props
                .get("metadata_layer_id")
                .and_then(Value::as_str)
                .is_some_and(|layer| layers.contains(layer))
        } else if condition.contains("$is_knowledge_gap") {
            let wanted = params
                .get("is_knowledge_gap")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            node.props
                .get("metadata_is_knowledge_gap")
                .and_then(Value::as_bool)
                .unwrap_or(false)
                == wanted
        } else {
            false
        };
        if !ok {
            return false;
        }
    }
    true
}

#[async_trait]
impl GraphRepository for MockRepo {
    async fn execute_query(
        &self,
        query: &str,
        params: Map<String, Value>,
        _mode: QueryMode,
    ) -> Result<Vec<Map<String, Value>>> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        validate_query_policy(query, WritePolicy::Standard)?;
        self.dispatch(query, &params)
    }

    async fn execute_pruning_write(
        &self,
        query: &str,
        params: Map<String, Value>,
    ) -> Result<Vec<Map<String, Value>>> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        validate_query_policy(query, WritePolicy::PruningWrites)?;
        self.dispatch(query, &params)
    }

    async fn execute_in_transaction(
        &self,
        statements: Vec<Statement>,
        _mode: QueryMode,
    ) -> Result<Vec<Vec<Map<String, Value>>>> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            validate_query_policy(&statement.query, WritePolicy::Standard)?;
            results.push(self.dispatch(&statement.query, &statement.params)?);
        }
        Ok(results)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// A retriever returning a fixed record set.
pub struct StaticRetriever {
    kind: RetrieverKind,
    name: &'static str,
    articles: Vec<ArticleRecord>,
    closed: AtomicBool,
}

impl StaticRetriever {
    /// Build with canned articles.
    #[must_use]
    pub fn new(kind: RetrieverKind, name: &'static str, articles: Vec<ArticleRecord>) -> Self {
        Self {
            kind,
            name,
            articles,
            closed: AtomicBool::new(false),
        }
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EvidenceRetriever for StaticRetriever {
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> RetrieverKind {
        self.kind
    }

    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<ArticleRecord>> {
        Ok(self.articles.iter().take(limit).cloned().collect())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A retriever whose every search fails.
pub struct FailingRetriever {
    kind: RetrieverKind,
    name: &'static str,
}

impl FailingRetriever {
    /// Build the failing adapter.
    #[must_use]
    pub fn new(kind: RetrieverKind, name: &'static str) -> Self {
        Self { kind, name }
    }
}

#[async_trait]
impl EvidenceRetriever for FailingRetriever {
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> RetrieverKind {
        self.kind
    }

    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<ArticleRecord>> {
        Err(Error::adapter("search backend unavailable"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_rejects_unpermitted_deletes() {
        let repo = MockRepo::new();
        let result = repo
            .execute_query("MATCH (n) DETACH DELETE n", Map::new(), QueryMode::Write)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_mock_fails_once_then_recovers() {
        let repo = MockRepo::new();
        repo.fail_next("boom");
        assert!(repo
            .execute_query(
                "MATCH (n:Node {id: $id}) RETURN properties(n) AS props, labels(n) AS labels",
                Map::new(),
                QueryMode::Read,
            )
            .await
            .is_err());
        assert!(repo
            .execute_query(
                "MATCH (n:Node {id: $id}) RETURN properties(n) AS props, labels(n) AS labels",
                Map::new(),
                QueryMode::Read,
            )
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unknown_query_is_an_error() {
        let repo = MockRepo::new();
        let result = repo
            .execute_query("MATCH (x:Widget) RETURN x", Map::new(), QueryMode::Read)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_static_retriever_respects_limit_and_close() {
        let retriever = StaticRetriever::new(
            RetrieverKind::Scholarly,
            "static",
            vec![ArticleRecord::default(), ArticleRecord::default()],
        );
        assert_eq!(retriever.search("q", 1).await.unwrap().len(), 1);
        assert!(!retriever.is_closed());
        retriever.close().await;
        assert!(retriever.is_closed());
    }
}
