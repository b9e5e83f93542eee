//! Bayesian confidence updates.
//!
//! Evidence moves the `empirical_support` component of a confidence vector
//! through a likelihood-ratio update on its odds; the other three components
//! receive small additive adjustments scaled by evidence strength. Zero-strength
//! evidence is a no-op by construction.

use serde::{Deserialize, Serialize};

use crate::core::confidence::{clamp01, ConfidenceVector};

/// Kind of evidence, determining the base likelihood ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    /// Controlled experiment
    Experimental,
    /// Observational study
    Observational,
    /// Theoretical argument
    Theoretical,
    /// Expert judgement
    ExpertOpinion,
    /// Unspecified empirical source
    #[default]
    Empirical,
}

impl EvidenceType {
    /// Parse a loose string form; unknown kinds fall back to `Empirical`.
    #[must_use]
    pub fn parse(kind: &str) -> Self {
        match kind.trim().to_lowercase().as_str() {
            "experimental" => Self::Experimental,
            "observational" => Self::Observational,
            "theoretical" => Self::Theoretical,
            "expert_opinion" | "expert" => Self::ExpertOpinion,
            _ => Self::Empirical,
        }
    }

    /// Base likelihood ratio in the supportive direction for evidence of
    /// strength `s`.
    #[must_use]
    pub fn base_likelihood_ratio(&self, s: f64) -> f64 {
        match self {
            Self::Experimental => 2.0 + 8.0 * s,
            Self::Observational => 1.5 + 4.0 * s,
            Self::Theoretical => 1.2 + 2.0 * s,
            Self::ExpertOpinion => 1.1 + 1.5 * s,
            Self::Empirical => 1.5 + 3.0 * s,
        }
    }
}

/// Outcome of one Bayesian confidence update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BayesianUpdate {
    /// Updated confidence vector
    pub posterior: ConfidenceVector,
    /// Natural log of the applied likelihood ratio
    pub log_likelihood: f64,
    /// Posterior odds of the empirical component
    pub posterior_odds: f64,
    /// Binary KL divergence between posterior and prior empirical support
    pub information_gain: f64,
}

/// Update a confidence vector with one piece of evidence.
///
/// `evidence_strength` is clamped into [0, 1]; `sample_size` is floored at 1.
/// Contradicting evidence inverts the likelihood ratio, so the same strength
/// moves the posterior symmetrically in odds space.
#[must_use]
pub fn update_confidence(
    prior: &ConfidenceVector,
    evidence_strength: f64,
    supports: bool,
    evidence_type: EvidenceType,
    sample_size: u64,
) -> BayesianUpdate {
    let s = clamp01(evidence_strength);
    let n = sample_size.max(1);

    let prior_p = prior.empirical_support.clamp(0.001, 0.999);
    let prior_odds = prior_p / (1.0 - prior_p);

    // Zero-strength evidence carries no information.
    let ratio = if s == 0.0 {
        1.0
    } else {
        let amplifier = 1.0 + 0.2 * ((n as f64) + 1.0).log10();
        let base = evidence_type.base_likelihood_ratio(s) * amplifier;
        if supports {
            base
        } else {
            1.0 / base
        }
    };

    let posterior_odds = prior_odds * ratio;
    let posterior_p = posterior_odds / (1.0 + posterior_odds);

    let theoretical_bump = if evidence_type == EvidenceType::Theoretical {
        0.3
    } else {
        0.1
    };
    let methodological_bump =
        s * (((n as f64) + 1.0).ln() / 1000f64.ln()).min(1.0) * 0.2;
    let consensus_bump = if supports { 0.15 * s } else { -0.15 * s };

    let posterior = ConfidenceVector::new(
        posterior_p,
        prior.theoretical_basis + s * theoretical_bump,
        prior.methodological_rigor + methodological_bump,
        prior.consensus_alignment + consensus_bump,
    );

    BayesianUpdate {
        posterior,
        log_likelihood: ratio.ln(),
        posterior_odds,
        information_gain: binary_kl(posterior_p, prior_p),
    }
}

/// Binary KL divergence D(p ‖ q) in nats, with both arguments clamped away
/// from the degenerate endpoints.
#[must_use]
pub fn binary_kl(p: f64, q: f64) -> f64 {
    let p = p.clamp(0.001, 0.999);
    let q = q.clamp(0.001, 0.999);
    p * (p / q).ln() + (1.0 - p) * ((1.0 - p) / (1.0 - q)).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn midscale() -> ConfidenceVector {
        ConfidenceVector::uniform(0.5)
    }

    #[test]
    fn test_supportive_experimental_update() {
        // Scenario pinned by the processor contract: prior 0.5, strength 0.8,
        // experimental, n=1 moves empirical support strictly into (0.5, 1).
        let update = update_confidence(&midscale(), 0.8, true, EvidenceType::Experimental, 1);
        assert!(update.posterior.empirical_support > 0.5);
        assert!(update.posterior.empirical_support < 1.0);
        assert!(update.log_likelihood > 0.0);
    }

    #[test]
    fn test_contradictory_experimental_update() {
        let update = update_confidence(&midscale(), 0.8, false, EvidenceType::Experimental, 1);
        assert!(update.posterior.empirical_support < 0.5);
        assert!(update.posterior.empirical_support > 0.0);
        assert!(update.log_likelihood < 0.0);
    }

    #[test]
    fn test_support_and_contradiction_are_symmetric_in_odds() {
        let up = update_confidence(&midscale(), 0.6, true, EvidenceType::Observational, 10);
        let down = update_confidence(&midscale(), 0.6, false, EvidenceType::Observational, 10);
        // prior odds are 1, so the posterior odds must be reciprocal
        assert!((up.posterior_odds * down.posterior_odds - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_strength_is_no_information() {
        let prior = ConfidenceVector::new(0.7, 0.6, 0.5, 0.4);
        let update = update_confidence(&prior, 0.0, true, EvidenceType::Experimental, 500);
        assert!((update.posterior.empirical_support - 0.7).abs() < 1e-9);
        assert_eq!(update.posterior.theoretical_basis, prior.theoretical_basis);
        assert_eq!(
            update.posterior.methodological_rigor,
            prior.methodological_rigor
        );
        assert_eq!(
            update.posterior.consensus_alignment,
            prior.consensus_alignment
        );
        assert!((update.log_likelihood).abs() < 1e-12);
        assert!(update.information_gain < 1e-9);
    }

    #[test]
    fn test_monotone_in_strength() {
        let weak = update_confidence(&midscale(), 0.2, true, EvidenceType::Empirical, 1);
        let strong = update_confidence(&midscale(), 0.9, true, EvidenceType::Empirical, 1);
        assert!(strong.posterior.empirical_support > weak.posterior.empirical_support);
    }

    #[test]
    fn test_sample_size_amplifies() {
        let small = update_confidence(&midscale(), 0.5, true, EvidenceType::Observational, 1);
        let large = update_confidence(&midscale(), 0.5, true, EvidenceType::Observational, 1000);
        assert!(large.posterior.empirical_support > small.posterior.empirical_support);
        assert!(large.posterior.methodological_rigor > small.posterior.methodological_rigor);
    }

    #[test]
    fn test_evidence_type_ordering_at_equal_strength() {
        let s = 0.5;
        let lr = |t: EvidenceType| t.base_likelihood_ratio(s);
        assert!(lr(EvidenceType::Experimental) > lr(EvidenceType::Observational));
        assert!(lr(EvidenceType::Observational) > lr(EvidenceType::Theoretical));
        assert!(lr(EvidenceType::Theoretical) > lr(EvidenceType::ExpertOpinion));
    }

    #[test]
    fn test_theoretical_evidence_bumps_theoretical_basis_more() {
        let theo = update_confidence(&midscale(), 0.5, true, EvidenceType::Theoretical, 1);
        let emp = update_confidence(&midscale(), 0.5, true, EvidenceType::Empirical, 1);
        assert!(theo.posterior.theoretical_basis > emp.posterior.theoretical_basis);
    }

    #[test]
    fn test_contradiction_lowers_consensus() {
        let update = update_confidence(&midscale(), 0.5, false, EvidenceType::Empirical, 1);
        assert!(update.posterior.consensus_alignment < 0.5);
    }

    #[test]
    fn test_posterior_components_stay_clamped() {
        let high = ConfidenceVector::new(0.99, 0.99, 0.99, 0.99);
        let update = update_confidence(&high, 1.0, true, EvidenceType::Experimental, 100_000);
        for c in update.posterior.components() {
            assert!((0.0..=1.0).contains(&c));
        }
    }

    #[test]
    fn test_extreme_prior_does_not_saturate() {
        let sure = ConfidenceVector::new(1.0, 0.5, 0.5, 0.5);
        let update = update_confidence(&sure, 0.9, false, EvidenceType::Experimental, 10);
        // prior is clamped to 0.999 before the odds update, so contradiction
        // still moves it
        assert!(update.posterior.empirical_support < 0.999);
    }

    #[test]
    fn test_information_gain_positive_when_moved() {
        let update = update_confidence(&midscale(), 0.8, true, EvidenceType::Experimental, 1);
        assert!(update.information_gain > 0.0);
    }

    #[test]
    fn test_evidence_type_parse() {
        assert_eq!(EvidenceType::parse("Experimental"), EvidenceType::Experimental);
        assert_eq!(EvidenceType::parse("expert"), EvidenceType::ExpertOpinion);
        assert_eq!(EvidenceType::parse("expert_opinion"), EvidenceType::ExpertOpinion);
        assert_eq!(EvidenceType::parse("???"), EvidenceType::Empirical);
    }

    #[test]
    fn test_binary_kl_zero_at_equal() {
        assert!(binary_kl(0.4, 0.4).abs() < 1e-12);
        assert!(binary_kl(0.9, 0.1) > 0.0);
    }
}
