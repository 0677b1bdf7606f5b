//! Conflict types for tracking contradictions between constraints.
//!
//! Conflicts are explicit objects, not hidden errors. A settled mutex
//! becomes a [`Resolution`] in the store's append-only log. A conflict
//! found by graph analysis becomes a [`ConflictPath`]. Anything that needs
//! a caller decision is reported as a [`ConflictDescriptor`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constraint::{Constraint, ConstraintId};
use crate::error::Rejection;

/// Unique identifier for a resolution log entry.
///
/// Merging the same remote log twice appends entries with identical ids,
/// so duplicates stay detectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolutionId(Uuid);

impl ResolutionId {
    /// Creates a new random resolution ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ResolutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResolutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which rule settled a mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionRule {
    /// The newer write arrived inside the recency window (self-correction).
    Recency,
    /// A mandatory constraint displaced a recommended one.
    StrengthDominance,
    /// Confidence gap above the margin.
    ConfidenceMargin,
    /// Decided outside the store (user answer, resolver agent).
    External,
}

impl fmt::Display for ResolutionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recency => write!(f, "recency"),
            Self::StrengthDominance => write!(f, "strength_dominance"),
            Self::ConfidenceMargin => write!(f, "confidence_margin"),
            Self::External => write!(f, "external"),
        }
    }
}

/// A settled mutex. Never mutated once logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Log entry identifier.
    #[serde(default)]
    pub id: ResolutionId,

    /// Kind of conflict that was settled. Always `"mutex"` for store entries.
    pub conflict_type: String,

    /// The constraint that was present first.
    pub constraint_a: ConstraintId,

    /// The constraint that arrived second.
    pub constraint_b: ConstraintId,

    /// The survivor.
    pub chosen: ConstraintId,

    /// Rule that fired.
    pub rule: ResolutionRule,

    /// Human-readable reason.
    pub reason: String,

    /// When the resolution was recorded.
    pub timestamp: DateTime<Utc>,

    /// False for external decisions.
    pub auto_resolved: bool,
}

impl Resolution {
    /// Creates a mutex resolution.
    #[must_use]
    pub fn mutex(
        constraint_a: ConstraintId,
        constraint_b: ConstraintId,
        chosen: ConstraintId,
        rule: ResolutionRule,
        reason: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ResolutionId::new(),
            conflict_type: "mutex".to_string(),
            constraint_a,
            constraint_b,
            chosen,
            auto_resolved: rule != ResolutionRule::External,
            rule,
            reason: reason.into(),
            timestamp,
        }
    }

    /// Returns the constraint the resolution removed.
    #[must_use]
    pub fn loser(&self) -> &ConstraintId {
        if self.chosen == self.constraint_a {
            &self.constraint_b
        } else {
            &self.constraint_a
        }
    }

    /// Returns true if the resolution names `id` on either side.
    #[must_use]
    pub fn involves(&self, id: &ConstraintId) -> bool {
        &self.constraint_a == id || &self.constraint_b == id
    }
}

/// Category of a conflict found by graph analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// A new id is mutex with one already accumulated.
    DirectMutex,
    /// Requirement closures collide on a mutex pair.
    TransitiveConflict,
    /// Physical space cannot hold the accumulated I/O.
    SpaceViolation,
    /// Space is tight but feasible.
    SpaceWarning,
    /// Power cap below what the accumulated components draw.
    PowerViolation,
}

impl ConflictKind {
    /// Returns true for kinds that should block auto-acceptance.
    #[must_use]
    pub const fn is_violation(self) -> bool {
        !matches!(self, Self::SpaceWarning)
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectMutex => write!(f, "direct_mutex"),
            Self::TransitiveConflict => write!(f, "transitive_conflict"),
            Self::SpaceViolation => write!(f, "space_violation"),
            Self::SpaceWarning => write!(f, "space_warning"),
            Self::PowerViolation => write!(f, "power_violation"),
        }
    }
}

/// A conflict discovered by graph traversal. Detection result only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictPath {
    /// What kind of conflict this is.
    pub conflict_type: ConflictKind,

    /// Constraints taking part.
    pub participants: Vec<ConstraintId>,

    /// The prefix of the scanned sequence (or active set) that exposed it.
    pub path: Vec<ConstraintId>,

    /// Severity in [0.0, 1.0].
    pub severity: f32,

    /// Human-readable explanation.
    pub explanation: String,

    /// Suggestions for the caller.
    pub resolution_hints: Vec<String>,
}

impl ConflictPath {
    /// Creates a path with no hints.
    #[must_use]
    pub fn new(
        conflict_type: ConflictKind,
        participants: Vec<ConstraintId>,
        path: Vec<ConstraintId>,
        severity: f32,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            conflict_type,
            participants,
            path,
            severity: severity.clamp(0.0, 1.0),
            explanation: explanation.into(),
            resolution_hints: Vec::new(),
        }
    }

    /// Adds resolution hints.
    #[must_use]
    pub fn with_hints<I, S>(mut self, hints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resolution_hints.extend(hints.into_iter().map(Into::into));
        self
    }

    /// Returns true if `id` takes part in the conflict.
    #[must_use]
    pub fn involves(&self, id: &ConstraintId) -> bool {
        self.participants.contains(id)
    }
}

/// A conflict reported to the caller as needing a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictDescriptor {
    /// The store refused a mutex write and no rule settled it.
    UnresolvedMutex {
        /// The rejected proposal.
        constraint: ConstraintId,
        /// The constraint already in the store.
        partner: ConstraintId,
        /// Agent that proposed `constraint`.
        agent: String,
        /// Rejection message.
        message: String,
        /// The refused write, kept so a user choice in its favour can
        /// still apply it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        proposal: Option<Box<Constraint>>,
    },

    /// Graph analysis found an accumulation conflict.
    Progressive {
        /// The detected path.
        path: ConflictPath,
    },
}

impl ConflictDescriptor {
    /// Builds a descriptor from a store rejection. Only unresolved mutexes
    /// qualify. `proposal` is the write the store refused.
    #[must_use]
    pub fn from_rejection(
        rejection: &Rejection,
        agent: &str,
        proposal: Option<&Constraint>,
    ) -> Option<Self> {
        match rejection {
            Rejection::UnresolvedMutex { id, partner } => Some(Self::UnresolvedMutex {
                constraint: id.clone(),
                partner: partner.clone(),
                agent: agent.to_string(),
                message: rejection.to_string(),
                proposal: proposal
                    .filter(|c| &c.id == id)
                    .map(|c| Box::new(c.clone())),
            }),
            Rejection::Stale { .. } | Rejection::LowerConfidence { .. } => None,
        }
    }

    /// Returns the two constraints a binary question should offer, if any.
    #[must_use]
    pub fn choice(&self) -> Option<(&ConstraintId, &ConstraintId)> {
        match self {
            Self::UnresolvedMutex {
                constraint,
                partner,
                ..
            } => Some((partner, constraint)),
            Self::Progressive { path } => match path.participants.as_slice() {
                [first, .., last] => Some((first, last)),
                _ => None,
            },
        }
    }

    /// The refused write behind an unresolved mutex, if it was kept.
    #[must_use]
    pub fn proposal(&self) -> Option<&Constraint> {
        match self {
            Self::UnresolvedMutex { proposal, .. } => proposal.as_deref(),
            Self::Progressive { .. } => None,
        }
    }

    /// Returns true if `other` reports the same decision: the same mutex
    /// pair, or the same kind of accumulation conflict over the same
    /// constraints.
    #[must_use]
    pub fn same_conflict(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::UnresolvedMutex {
                    constraint,
                    partner,
                    ..
                },
                Self::UnresolvedMutex { .. },
            ) => other.concerns(constraint, partner),
            (Self::Progressive { path: a }, Self::Progressive { path: b }) => {
                a.conflict_type == b.conflict_type && a.participants == b.participants
            }
            _ => false,
        }
    }

    /// Every constraint the conflict names.
    #[must_use]
    pub fn participants(&self) -> Vec<&ConstraintId> {
        match self {
            Self::UnresolvedMutex {
                constraint,
                partner,
                ..
            } => vec![partner, constraint],
            Self::Progressive { path } => path.participants.iter().collect(),
        }
    }

    /// Returns true if settling the pair `(a, b)` answers this conflict.
    #[must_use]
    pub fn concerns(&self, a: &ConstraintId, b: &ConstraintId) -> bool {
        match self {
            Self::UnresolvedMutex {
                constraint,
                partner,
                ..
            } => {
                (constraint == a && partner == b) || (constraint == b && partner == a)
            }
            Self::Progressive { path } => path.involves(a) && path.involves(b),
        }
    }
}

impl fmt::Display for ConflictDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedMutex {
                constraint,
                partner,
                ..
            } => write!(f, "unresolved_mutex({partner} vs {constraint})"),
            Self::Progressive { path } => {
                write!(f, "{}({})", path.conflict_type, path.explanation)
            }
        }
    }
}
