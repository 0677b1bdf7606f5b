use chrono::Duration;

use crate::conflict::ResolutionRule;
use crate::constraint::Constraint;
use crate::store::StoreConfig;

/// Outcome of the auto-resolution chain for one mutex pair.
#[derive(Debug, Clone, PartialEq)]
pub enum MutexDecision {
    /// The incoming constraint displaces the stored one.
    KeepIncoming {
        /// Rule that fired.
        rule: ResolutionRule,
        /// Reason recorded in the resolution log.
        reason: String,
    },

    /// The stored constraint wins on confidence; the incoming one is dropped.
    KeepExisting,

    /// No rule fired.
    Unresolved,
}

/// Apply the ordered auto-resolution chain to a mutex pair.
///
/// Rules are evaluated in fixed order and the first match wins:
/// recency, strength dominance, confidence margin. The recency gap is
/// `incoming - existing` taken literally, so an incoming write stamped
/// before the stored one always falls inside the window.
#[must_use]
pub fn decide(config: &StoreConfig, existing: &Constraint, incoming: &Constraint) -> MutexDecision {
    let gap: Duration = incoming.timestamp - existing.timestamp;
    if gap < config.recency_window {
        return MutexDecision::KeepIncoming {
            rule: ResolutionRule::Recency,
            reason: format!(
                "Recency rule: user correction within {}s",
                config.recency_window.num_seconds()
            ),
        };
    }

    if incoming.strength > existing.strength {
        return MutexDecision::KeepIncoming {
            rule: ResolutionRule::StrengthDominance,
            reason: "Mandatory constraint overrides recommended".to_string(),
        };
    }

    let delta = incoming.confidence - existing.confidence;
    if delta.abs() > config.confidence_margin {
        if delta > 0.0 {
            return MutexDecision::KeepIncoming {
                rule: ResolutionRule::ConfidenceMargin,
                reason: format!(
                    "Higher confidence: {:.2} vs {:.2}",
                    incoming.confidence, existing.confidence
                ),
            };
        }
        return MutexDecision::KeepExisting;
    }

    MutexDecision::Unresolved
}
