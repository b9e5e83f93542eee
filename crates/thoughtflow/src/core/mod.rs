//! Core vocabulary shared by every stage and adapter: errors, confidence
//! vectors, the graph data model, and the per-query session record.

pub mod confidence;
pub mod error;
pub mod session;
pub mod types;

pub use confidence::ConfidenceVector;
pub use error::{Error, Result};
pub use session::{Session, TraceRecord};
pub use types::{
    BiasFlag, BiasSeverity, EdgeType, EpistemicStatus, FalsificationCriteria, GraphEdge,
    GraphNode, NodeMetadata, NodeType, Plan, RevisionRecord, StatisticalPower,
};
