//! Settings for the pipeline: store connection, app surface, pipeline stage
//! list, and the operational defaults every stage falls back to.
//!
//! Settings load from a YAML document, then environment overrides
//! (`THOUGHTFLOW_*`) are applied on top. Validation is mode-aware: in
//! production a missing or weak store password is fatal; in development the
//! defaults are tolerated.

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};

/// How strictly to validate required settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Defaults tolerated, secrets optional
    #[default]
    Development,
    /// Missing required settings are fatal at startup
    Production,
}

/// Graph store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Bolt URI of the store
    pub uri: String,
    /// Store user
    pub user: String,
    /// Store password; never logged
    pub password: String,
    /// Database name
    pub database: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
            database: "neo4j".to_string(),
        }
    }
}

/// Application surface settings consumed by embedders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Log filter directive
    pub log_level: String,
    /// CSV of allowed origins, or `*`
    pub cors_allowed_origins: String,
    /// Optional bearer token for the embedding surface
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            log_level: "info".to_string(),
            cors_allowed_origins: "*".to_string(),
            auth_token: None,
        }
    }
}

/// One entry of the ordered pipeline stage list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEntry {
    /// Registered stage name
    pub name: String,
    /// Disabled stages are skipped without a trace entry
    pub enabled: bool,
    /// Module path, informational (the stage set is fixed at build time)
    pub module_path: String,
}

/// Bounds for per-dimension hypothesis generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HypothesesPerDimension {
    /// Inclusive lower bound
    pub min: u32,
    /// Inclusive upper bound
    pub max: u32,
}

impl Default for HypothesesPerDimension {
    fn default() -> Self {
        Self { min: 2, max: 4 }
    }
}

/// Operational defaults the stages fall back to when a session carries no
/// override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsSettings {
    /// Root node confidence at creation
    pub initial_confidence: [f64; 4],
    /// Layer id assigned to the root when no override is given
    pub initial_layer: String,
    /// Tags applied when the caller supplies none
    pub default_disciplinary_tags: Vec<String>,
    /// Decomposition dimensions used when no override is given
    pub default_decomposition_dimensions: Vec<String>,
    /// Plan types hypotheses draw from
    pub default_plan_types: Vec<String>,
    /// Hypothesis count bounds per dimension
    pub hypotheses_per_dimension: HypothesesPerDimension,
    /// New hypothesis confidence
    pub hypothesis_confidence: [f64; 4],
    /// New dimension confidence
    pub dimension_confidence: [f64; 4],
    /// Evidence stage outer-loop bound
    pub evidence_max_iterations: u32,
    /// Label similarity floor for interdisciplinary bridges
    pub ibn_similarity_threshold: f64,
    /// Minimum member count (hypothesis + evidence) for a hyperedge
    pub min_nodes_for_hyperedge: usize,
    /// Prune nodes whose min confidence component is below this...
    pub pruning_confidence_threshold: f64,
    /// ...and whose impact score is below this
    pub pruning_impact_threshold: f64,
    /// Prune edges below this confidence
    pub pruning_edge_confidence_threshold: f64,
    /// Merge node pairs at or above this similarity
    pub merging_semantic_overlap_threshold: f64,
    /// Extraction criterion floor: average confidence
    pub subgraph_min_confidence_threshold: f64,
    /// Extraction criterion floor: impact
    pub subgraph_min_impact_threshold: f64,
    /// "High confidence" cutoff used by extraction and reflection
    pub high_confidence_threshold: f64,
    /// "High impact" cutoff used by extraction and reflection
    pub high_impact_threshold: f64,
    /// Depth of neighbor expansion around extraction seeds
    pub include_neighbors_depth: usize,
    /// Reflection: required share of falsifiable hypotheses
    pub min_falsifiable_hypothesis_ratio: f64,
    /// Reflection: tolerated count of high-severity bias nodes
    pub max_high_severity_bias_nodes: usize,
    /// Reflection: required share of adequately powered evidence
    pub min_powered_evidence_ratio: f64,
    /// Reflection: starting point for the final confidence vector
    pub reflection_baseline_confidence: [f64; 4],
}

impl Default for DefaultsSettings {
    fn default() -> Self {
        Self {
            initial_confidence: [0.8, 0.8, 0.8, 0.8],
            initial_layer: "0".to_string(),
            default_disciplinary_tags: vec![
                "science".to_string(),
                "research_methodology".to_string(),
            ],
            default_decomposition_dimensions: vec![
                "Scope".to_string(),
                "Objectives".to_string(),
                "Constraints".to_string(),
                "Data Needs".to_string(),
                "Use Cases".to_string(),
                "Potential Biases".to_string(),
                "Knowledge Gaps".to_string(),
            ],
            default_plan_types: vec![
                "literature_review".to_string(),
                "experimental_design".to_string(),
                "data_analysis".to_string(),
                "simulation".to_string(),
            ],
            hypotheses_per_dimension: HypothesesPerDimension::default(),
            hypothesis_confidence: [0.5, 0.5, 0.5, 0.5],
            dimension_confidence: [0.8, 0.8, 0.8, 0.8],
            evidence_max_iterations: 5,
            ibn_similarity_threshold: 0.5,
            min_nodes_for_hyperedge: 2,
            pruning_confidence_threshold: 0.2,
            pruning_impact_threshold: 0.2,
            pruning_edge_confidence_threshold: 0.3,
            merging_semantic_overlap_threshold: 0.8,
            subgraph_min_confidence_threshold: 0.6,
            subgraph_min_impact_threshold: 0.5,
            high_confidence_threshold: 0.7,
            high_impact_threshold: 0.7,
            include_neighbors_depth: 1,
            min_falsifiable_hypothesis_ratio: 0.6,
            max_high_severity_bias_nodes: 0,
            min_powered_evidence_ratio: 0.5,
            reflection_baseline_confidence: [0.5, 0.5, 0.5, 0.5],
        }
    }
}

/// Full settings document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Validation strictness
    pub run_mode: RunMode,
    /// Graph store connection
    pub store: StoreSettings,
    /// App surface
    pub app: AppSettings,
    /// Ordered stage list; empty means the built-in default pipeline
    pub pipeline: Vec<StageEntry>,
    /// Operational defaults
    pub defaults: DefaultsSettings,
}

impl Settings {
    /// Parse a YAML settings document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yml::from_str(yaml)
            .map_err(|e| Error::Configuration(format!("failed to parse settings: {e}")))
    }

    /// Load defaults, then apply environment overrides.
    #[must_use]
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_env_overrides();
        settings
    }

    /// Apply `THOUGHTFLOW_*` environment overrides on top of this document.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("THOUGHTFLOW_RUN_MODE") {
            if v.eq_ignore_ascii_case("production") {
                self.run_mode = RunMode::Production;
            } else if v.eq_ignore_ascii_case("development") {
                self.run_mode = RunMode::Development;
            }
        }
        if let Ok(v) = std::env::var("THOUGHTFLOW_NEO4J_URI") {
            self.store.uri = v;
        }
        if let Ok(v) = std::env::var("THOUGHTFLOW_NEO4J_USER") {
            self.store.user = v;
        }
        if let Ok(v) = std::env::var("THOUGHTFLOW_NEO4J_PASSWORD") {
            self.store.password = v;
        }
        if let Ok(v) = std::env::var("THOUGHTFLOW_NEO4J_DATABASE") {
            self.store.database = v;
        }
        if let Ok(v) = std::env::var("THOUGHTFLOW_APP_HOST") {
            self.app.host = v;
        }
        if let Ok(v) = std::env::var("THOUGHTFLOW_APP_PORT") {
            if let Ok(port) = v.parse() {
                self.app.port = port;
            }
        }
        if let Ok(v) = std::env::var("THOUGHTFLOW_LOG_LEVEL") {
            self.app.log_level = v;
        }
        if let Ok(v) = std::env::var("THOUGHTFLOW_AUTH_TOKEN") {
            self.app.auth_token = Some(v);
        }
    }

    /// The configured pipeline, or the built-in default order when empty.
    #[must_use]
    pub fn pipeline_or_default(&self) -> Vec<StageEntry> {
        if !self.pipeline.is_empty() {
            return self.pipeline.clone();
        }
        crate::stage::DEFAULT_STAGE_ORDER
            .iter()
            .map(|name| StageEntry {
                name: (*name).to_string(),
                enabled: true,
                module_path: format!("thoughtflow::stages::{name}"),
            })
            .collect()
    }

    /// Validate the document. Mode-aware: production requires a real password.
    pub fn validate(&self) -> Result<()> {
        if self.app.port == 0 {
            return Err(Error::Configuration("app.port must be non-zero".to_string()));
        }
        if self.store.uri.trim().is_empty() {
            return Err(Error::Configuration("store.uri must be set".to_string()));
        }

        let password_ok = self.store.password.len() >= 8
            && !self.store.password.eq_ignore_ascii_case("password");
        if !password_ok {
            match self.run_mode {
                RunMode::Production => {
                    return Err(Error::Configuration(
                        "store.password must be at least 8 characters and not the literal \
                         'password' in production"
                            .to_string(),
                    ));
                }
                RunMode::Development => {
                    tracing::warn!("store.password is weak or unset; tolerated in development");
                }
            }
        }

        for (name, vector) in [
            ("initial_confidence", &self.defaults.initial_confidence),
            ("hypothesis_confidence", &self.defaults.hypothesis_confidence),
            ("dimension_confidence", &self.defaults.dimension_confidence),
            (
                "reflection_baseline_confidence",
                &self.defaults.reflection_baseline_confidence,
            ),
        ] {
            if vector.iter().any(|c| !(0.0..=1.0).contains(c)) {
                return Err(Error::Configuration(format!(
                    "defaults.{name} components must be in [0, 1]"
                )));
            }
        }

        let hpd = self.defaults.hypotheses_per_dimension;
        if hpd.min == 0 || hpd.min > hpd.max {
            return Err(Error::Configuration(
                "defaults.hypotheses_per_dimension requires 1 <= min <= max".to_string(),
            ));
        }

        for (name, value) in [
            ("ibn_similarity_threshold", self.defaults.ibn_similarity_threshold),
            (
                "pruning_confidence_threshold",
                self.defaults.pruning_confidence_threshold,
            ),
            ("pruning_impact_threshold", self.defaults.pruning_impact_threshold),
            (
                "pruning_edge_confidence_threshold",
                self.defaults.pruning_edge_confidence_threshold,
            ),
            (
                "merging_semantic_overlap_threshold",
                self.defaults.merging_semantic_overlap_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Configuration(format!(
                    "defaults.{name} must be in [0, 1]"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate_in_development() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_production_rejects_empty_password() {
        let settings = Settings {
            run_mode: RunMode::Production,
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("password"));
    }

    #[test]
    fn test_production_rejects_literal_password() {
        let mut settings = Settings {
            run_mode: RunMode::Production,
            ..Default::default()
        };
        settings.store.password = "PassWord".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_production_accepts_strong_password() {
        let mut settings = Settings {
            run_mode: RunMode::Production,
            ..Default::default()
        };
        settings.store.password = "s0mething-long".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = r"
run_mode: production
store:
  uri: bolt://graph:7687
  user: svc
  password: correct-horse
  database: research
defaults:
  evidence_max_iterations: 3
";
        let settings = Settings::from_yaml_str(yaml).unwrap();
        assert_eq!(settings.run_mode, RunMode::Production);
        assert_eq!(settings.store.uri, "bolt://graph:7687");
        assert_eq!(settings.defaults.evidence_max_iterations, 3);
        // Unspecified defaults survive
        assert_eq!(settings.defaults.min_nodes_for_hyperedge, 2);
    }

    #[test]
    fn test_yaml_parse_error_is_configuration() {
        let err = Settings::from_yaml_str("store: [not a map").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_invalid_confidence_vector_rejected() {
        let mut settings = Settings::default();
        settings.defaults.initial_confidence = [0.8, 0.8, 1.5, 0.8];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_hypothesis_bounds_rejected_when_inverted() {
        let mut settings = Settings::default();
        settings.defaults.hypotheses_per_dimension = HypothesesPerDimension { min: 5, max: 2 };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_default_pipeline_has_eight_stages() {
        let pipeline = Settings::default().pipeline_or_default();
        assert_eq!(pipeline.len(), 8);
        assert!(pipeline.iter().all(|s| s.enabled));
        assert_eq!(pipeline[0].name, "initialization");
        assert_eq!(pipeline[7].name, "reflection");
    }

    #[test]
    fn test_explicit_pipeline_wins() {
        let mut settings = Settings::default();
        settings.pipeline = vec![StageEntry {
            name: "initialization".to_string(),
            enabled: true,
            module_path: "thoughtflow::stages::initialization".to_string(),
        }];
        assert_eq!(settings.pipeline_or_default().len(), 1);
    }
}
