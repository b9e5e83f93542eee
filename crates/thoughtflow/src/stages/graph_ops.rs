//! Shared store operations for the stages: batched upserts and typed reads.
//!
//! All entity writes are idempotent upserts keyed by `id`. Node batches run as
//! a single UNWIND, then the type label is applied through the store's
//! label-add procedure so every node carries both the generic `Node` label and
//! its compound label. Relationship batches run as a second pass, grouped by
//! relationship type because types cannot be parameterized; each group's type
//! is validated against the closed edge-type allow-list before it is inlined.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::core::error::{Error, Result};
use crate::core::types::{GraphEdge, GraphNode};
use crate::repository::{validate_relationship_type, GraphRepository, QueryMode, Statement};

const UPSERT_NODES_QUERY: &str = "\
UNWIND $rows AS row
MERGE (n:Node {id: row.id})
SET n += row.props
WITH n, row
CALL apoc.create.addLabels(n, [row.type_label]) YIELD node
RETURN node.id AS id";

/// Upsert a batch of nodes in one UNWIND statement.
pub async fn upsert_nodes(repo: &dyn GraphRepository, nodes: &[GraphNode]) -> Result<Vec<String>> {
    if nodes.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<Value> = nodes
        .iter()
        .map(|node| {
            json!({
                "id": node.id,
                "props": Value::Object(node.to_store_properties()),
                "type_label": node.node_type.label(),
            })
        })
        .collect();

    let mut params = Map::new();
    params.insert("rows".to_string(), Value::Array(rows));

    let records = repo
        .execute_query(UPSERT_NODES_QUERY, params, QueryMode::Write)
        .await?;
    Ok(records
        .iter()
        .filter_map(|r| r.get("id").and_then(Value::as_str).map(str::to_string))
        .collect())
}

/// Upsert a batch of edges, grouped by relationship type, in one transaction.
///
/// Endpoints are matched by id; the node batch that created them must have
/// completed first.
pub async fn upsert_edges(repo: &dyn GraphRepository, edges: &[GraphEdge]) -> Result<usize> {
    if edges.is_empty() {
        return Ok(0);
    }

    let mut grouped: BTreeMap<&'static str, Vec<&GraphEdge>> = BTreeMap::new();
    for edge in edges {
        grouped.entry(edge.edge_type.as_str()).or_default().push(edge);
    }

    let mut statements = Vec::new();
    for (rel_type, group) in grouped {
        validate_relationship_type(rel_type)?;
        let rows: Vec<Value> = group
            .iter()
            .map(|edge| {
                json!({
                    "id": edge.id,
                    "source_id": edge.source_id,
                    "target_id": edge.target_id,
                    "props": Value::Object(edge.to_store_properties()),
                })
            })
            .collect();

        let query = format!(
            "UNWIND $rows AS row\n\
             MATCH (a:Node {{id: row.source_id}})\n\
             MATCH (b:Node {{id: row.target_id}})\n\
             MERGE (a)-[r:{rel_type} {{id: row.id}}]->(b)\n\
             SET r += row.props\n\
             RETURN r.id AS id"
        );
        let mut params = Map::new();
        params.insert("rows".to_string(), Value::Array(rows));
        statements.push(Statement::new(query, params));
    }

    repo.execute_in_transaction(statements, QueryMode::Write)
        .await?;
    Ok(edges.len())
}

/// Fetch one node by id; `Ok(None)` when it does not exist.
pub async fn fetch_node(repo: &dyn GraphRepository, id: &str) -> Result<Option<GraphNode>> {
    let mut params = Map::new();
    params.insert("id".to_string(), json!(id));
    let records = repo
        .execute_query(
            "MATCH (n:Node {id: $id}) RETURN properties(n) AS props, labels(n) AS labels",
            params,
            QueryMode::Read,
        )
        .await?;
    records.first().map(node_from_record).transpose()
}

/// Fetch several nodes by id; missing ids are silently absent.
pub async fn fetch_nodes(repo: &dyn GraphRepository, ids: &[String]) -> Result<Vec<GraphNode>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut params = Map::new();
    params.insert("ids".to_string(), json!(ids));
    let records = repo
        .execute_query(
            "MATCH (n:Node) WHERE n.id IN $ids \
             RETURN properties(n) AS props, labels(n) AS labels",
            params,
            QueryMode::Read,
        )
        .await?;
    records.iter().map(node_from_record).collect()
}

/// Decode a `{props, labels}` record into a [`GraphNode`].
pub fn node_from_record(record: &Map<String, Value>) -> Result<GraphNode> {
    let props = record
        .get("props")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::store("node record is missing 'props'"))?;
    let labels: Vec<String> = record
        .get("labels")
        .and_then(Value::as_array)
        .map(|ls| {
            ls.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    GraphNode::from_store_record(props, &labels)
}
