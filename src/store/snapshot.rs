use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conflict::Resolution;
use crate::constraint::{Constraint, ConstraintId, Strength, UseCaseId};
use crate::error::Rejection;
use crate::store::tracker::{self, VoteCells};

/// Immutable read view of a store.
///
/// Produced by copying store state under the lock. Never shares memory with
/// the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Mean vote per use case.
    pub use_cases: BTreeMap<UseCaseId, f32>,

    /// Live constraints by id.
    pub constraints: BTreeMap<ConstraintId, Constraint>,

    /// Live constraint ids in insertion order.
    pub order: Vec<ConstraintId>,

    /// Resolution log at the time of the snapshot.
    pub resolutions: Vec<Resolution>,

    /// Time of the last mutation.
    pub timestamp: DateTime<Utc>,

    /// Store version at the time of the snapshot.
    pub version: u64,
}

impl StateSnapshot {
    /// An empty snapshot at version 0.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            use_cases: BTreeMap::new(),
            constraints: BTreeMap::new(),
            order: Vec::new(),
            resolutions: Vec::new(),
            timestamp: Utc::now(),
            version: 0,
        }
    }

    /// Looks up a live constraint.
    #[must_use]
    pub fn constraint(&self, id: &ConstraintId) -> Option<&Constraint> {
        self.constraints.get(id)
    }

    /// Returns true if `id` is live.
    #[must_use]
    pub fn contains(&self, id: &ConstraintId) -> bool {
        self.constraints.contains_key(id)
    }

    /// Number of live constraints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    /// Returns true if no constraint is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Number of live constraints with the given strength.
    #[must_use]
    pub fn count_with_strength(&self, strength: Strength) -> usize {
        self.constraints
            .values()
            .filter(|c| c.strength == strength)
            .count()
    }

    /// Top `n` use cases by mean vote.
    #[must_use]
    pub fn top_use_cases(&self, n: usize) -> Vec<(UseCaseId, f32)> {
        tracker::rank(self.use_cases.clone(), n)
    }

    /// Highest mean vote across use cases, 0.0 when there are none.
    #[must_use]
    pub fn best_use_case_confidence(&self) -> f32 {
        self.use_cases.values().copied().fold(0.0, f32::max)
    }
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// A remote state handed to [`ConstraintStore::merge`](crate::store::ConstraintStore::merge).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialState {
    /// Remote vote cells.
    #[serde(default)]
    pub use_cases: VoteCells,

    /// Remote constraints, applied through `add` in order.
    #[serde(default)]
    pub constraints: Vec<Constraint>,

    /// Remote resolutions, appended verbatim.
    #[serde(default)]
    pub resolutions: Vec<Resolution>,
}

/// What a merge did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Remote constraints that were accepted.
    pub merged_constraints: usize,

    /// Vote cells that went up.
    pub merged_use_cases: usize,

    /// Accepted remote constraints that displaced a mutex partner.
    pub conflicts_resolved: usize,

    /// Unresolved mutex rejections raised while merging.
    pub unresolved: Vec<Rejection>,
}

/// Successful outcome of [`ConstraintStore::add`](crate::store::ConstraintStore::add).
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    /// The id was absent.
    Inserted,

    /// LWW replaced an older write with the same id.
    Replaced,

    /// A mutex partner was displaced by the auto-resolution chain.
    AutoResolved(Resolution),
}

impl AddOutcome {
    /// Returns the resolution recorded by this add, if any.
    #[must_use]
    pub const fn resolution(&self) -> Option<&Resolution> {
        match self {
            Self::AutoResolved(r) => Some(r),
            Self::Inserted | Self::Replaced => None,
        }
    }
}

/// Store counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMetrics {
    /// Current version.
    pub version: u64,
    /// Live constraints.
    pub total_constraints: usize,
    /// Resolution log length.
    pub total_resolutions: usize,
    /// Share of logged resolutions that were automatic.
    pub auto_resolution_rate: f64,
    /// Merges applied.
    pub merge_count: u64,
    /// Mutex partners encountered by `add`.
    pub conflict_count: u64,
    /// First 8 hex digits of a blake3 hash over cells, ids and version.
    pub state_hash: String,
}
