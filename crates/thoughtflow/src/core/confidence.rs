//! Four-component confidence vectors.
//!
//! Every node carries an independent confidence along four axes: empirical
//! support, theoretical basis, methodological rigor, and consensus alignment.
//! Components are clamped to [0, 1] on every write; none is derived from
//! another. The wire form is the comma-joined string `"e,t,m,c"`.

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};

/// Independent confidence components attached to a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceVector {
    /// Strength of direct empirical evidence
    pub empirical_support: f64,
    /// Grounding in established theory
    pub theoretical_basis: f64,
    /// Quality of the methods behind the claim
    pub methodological_rigor: f64,
    /// Agreement with the broader field
    pub consensus_alignment: f64,
}

impl ConfidenceVector {
    /// Build a vector, clamping each component into [0, 1].
    #[must_use]
    pub fn new(empirical: f64, theoretical: f64, methodological: f64, consensus: f64) -> Self {
        Self {
            empirical_support: clamp01(empirical),
            theoretical_basis: clamp01(theoretical),
            methodological_rigor: clamp01(methodological),
            consensus_alignment: clamp01(consensus),
        }
    }

    /// Uniform vector with every component set to `value`.
    #[must_use]
    pub fn uniform(value: f64) -> Self {
        Self::new(value, value, value, value)
    }

    /// Build from a 4-element slice; fails on any other length.
    pub fn from_components(components: &[f64]) -> Result<Self> {
        match components {
            [e, t, m, c] => Ok(Self::new(*e, *t, *m, *c)),
            other => Err(Error::invalid_input(format!(
                "confidence vector must have exactly 4 components, got {}",
                other.len()
            ))),
        }
    }

    /// The components in declaration order.
    #[must_use]
    pub fn components(&self) -> [f64; 4] {
        [
            self.empirical_support,
            self.theoretical_basis,
            self.methodological_rigor,
            self.consensus_alignment,
        ]
    }

    /// Mean of the four components.
    #[must_use]
    pub fn average(&self) -> f64 {
        self.components().iter().sum::<f64>() / 4.0
    }

    /// Smallest component; drives pruning decisions.
    #[must_use]
    pub fn min_component(&self) -> f64 {
        self.components().iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Mean squared deviation of the components from `center`.
    ///
    /// Used by the evidence stage to prefer hypotheses whose confidence is
    /// still uncertain (spread around the midpoint).
    #[must_use]
    pub fn variance_around(&self, center: f64) -> f64 {
        self.components()
            .iter()
            .map(|c| (c - center).powi(2))
            .sum::<f64>()
            / 4.0
    }

    /// Component-wise mean of two vectors (merge semantics).
    #[must_use]
    pub fn midpoint(&self, other: &Self) -> Self {
        Self::new(
            (self.empirical_support + other.empirical_support) / 2.0,
            (self.theoretical_basis + other.theoretical_basis) / 2.0,
            (self.methodological_rigor + other.methodological_rigor) / 2.0,
            (self.consensus_alignment + other.consensus_alignment) / 2.0,
        )
    }

    /// Re-clamp every component; identity unless a caller mutated fields directly.
    #[must_use]
    pub fn clamped(&self) -> Self {
        Self::new(
            self.empirical_support,
            self.theoretical_basis,
            self.methodological_rigor,
            self.consensus_alignment,
        )
    }

    /// Serialize to the `"e,t,m,c"` wire form. Components always carry a
    /// decimal point (`0.0`, not `0`).
    #[must_use]
    pub fn to_wire(&self) -> String {
        let [e, t, m, c] = self.components();
        format!("{e:?},{t:?},{m:?},{c:?}")
    }

    /// Parse the `"e,t,m,c"` wire form; requires exactly four numbers.
    pub fn from_wire(wire: &str) -> Result<Self> {
        let parts: Vec<f64> = wire
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<f64>()
                    .map_err(|e| Error::invalid_input(format!("bad confidence component '{p}': {e}")))
            })
            .collect::<Result<_>>()?;
        Self::from_components(&parts)
    }
}

impl Default for ConfidenceVector {
    fn default() -> Self {
        Self::uniform(0.5)
    }
}

pub(crate) fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_clamps_components() {
        let v = ConfidenceVector::new(1.5, -0.2, 0.5, 2.0);
        assert_eq!(v.empirical_support, 1.0);
        assert_eq!(v.theoretical_basis, 0.0);
        assert_eq!(v.methodological_rigor, 0.5);
        assert_eq!(v.consensus_alignment, 1.0);
    }

    #[test]
    fn test_nan_clamps_to_zero() {
        let v = ConfidenceVector::new(f64::NAN, 0.5, 0.5, 0.5);
        assert_eq!(v.empirical_support, 0.0);
    }

    #[test]
    fn test_wire_round_trip() {
        let v = ConfidenceVector::new(0.8, 0.7, 0.6, 0.5);
        let parsed = ConfidenceVector::from_wire(&v.to_wire()).unwrap();
        assert_eq!(v, parsed);
    }

    #[test]
    fn test_wire_keeps_decimal_point_at_zero() {
        assert_eq!(ConfidenceVector::uniform(0.0).to_wire(), "0.0,0.0,0.0,0.0");
        assert_eq!(ConfidenceVector::uniform(1.0).to_wire(), "1.0,1.0,1.0,1.0");
    }

    #[test]
    fn test_from_wire_rejects_wrong_arity() {
        assert!(ConfidenceVector::from_wire("0.5,0.5,0.5").is_err());
        assert!(ConfidenceVector::from_wire("0.5,0.5,0.5,0.5,0.5").is_err());
    }

    #[test]
    fn test_from_wire_rejects_garbage() {
        assert!(ConfidenceVector::from_wire("a,b,c,d").is_err());
    }

    #[test]
    fn test_from_wire_clamps() {
        let v = ConfidenceVector::from_wire("1.2,-0.1,0.5,0.5").unwrap();
        assert_eq!(v.empirical_support, 1.0);
        assert_eq!(v.theoretical_basis, 0.0);
    }

    #[test]
    fn test_average_and_min() {
        let v = ConfidenceVector::new(0.2, 0.4, 0.6, 0.8);
        assert!((v.average() - 0.5).abs() < 1e-12);
        assert_eq!(v.min_component(), 0.2);
    }

    #[test]
    fn test_variance_around_center() {
        let flat = ConfidenceVector::uniform(0.5);
        assert_eq!(flat.variance_around(0.5), 0.0);

        let spread = ConfidenceVector::new(0.0, 1.0, 0.0, 1.0);
        assert!(spread.variance_around(0.5) > 0.2);
    }

    #[test]
    fn test_midpoint() {
        let a = ConfidenceVector::new(0.2, 0.2, 0.2, 0.2);
        let b = ConfidenceVector::new(0.8, 0.8, 0.8, 0.8);
        assert_eq!(a.midpoint(&b), ConfidenceVector::uniform(0.5));
    }

    #[test]
    fn test_default_is_midscale() {
        assert_eq!(ConfidenceVector::default(), ConfidenceVector::uniform(0.5));
    }
}
