//! G-Counter style use-case votes.
//!
//! Each `(use case, agent)` pair owns one cell. A cell only ever moves up:
//! voting and merging both take the maximum. The visible probability of a
//! use case is the mean of its cells.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constraint::UseCaseId;

/// Per-use-case, per-agent vote cells.
pub type VoteCells = BTreeMap<UseCaseId, BTreeMap<String, f32>>;

/// Monotonic vote tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UseCaseBeliefTracker {
    cells: VoteCells,
}

impl UseCaseBeliefTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a vote. Returns true if the cell went up.
    ///
    /// A vote lower than the current cell (or NaN) leaves it unchanged.
    pub fn vote(&mut self, use_case: &UseCaseId, agent: &str, confidence: f32) -> bool {
        let cell = self
            .cells
            .entry(use_case.clone())
            .or_default()
            .entry(agent.to_string())
            .or_insert(0.0);
        if confidence > *cell {
            *cell = confidence;
            true
        } else {
            false
        }
    }

    /// Max-merges remote cells. Returns how many cells went up.
    pub fn merge(&mut self, remote: &VoteCells) -> usize {
        let mut raised = 0;
        for (use_case, votes) in remote {
            for (agent, confidence) in votes {
                if self.vote(use_case, agent, *confidence) {
                    raised += 1;
                }
            }
        }
        raised
    }

    /// Returns the cell for `(use_case, agent)`, if any.
    #[must_use]
    pub fn cell(&self, use_case: &UseCaseId, agent: &str) -> Option<f32> {
        self.cells.get(use_case)?.get(agent).copied()
    }

    /// Returns the raw cells.
    #[must_use]
    pub const fn cells(&self) -> &VoteCells {
        &self.cells
    }

    /// Mean of the cells for one use case.
    #[must_use]
    pub fn probability(&self, use_case: &UseCaseId) -> Option<f32> {
        self.cells.get(use_case).map(mean)
    }

    /// Mean of the cells for every use case.
    #[must_use]
    pub fn probabilities(&self) -> BTreeMap<UseCaseId, f32> {
        self.cells
            .iter()
            .map(|(uc, votes)| (uc.clone(), mean(votes)))
            .collect()
    }

    /// Top `n` use cases by probability, highest first. Ties break by id.
    #[must_use]
    pub fn top(&self, n: usize) -> Vec<(UseCaseId, f32)> {
        rank(self.probabilities(), n)
    }

    /// Returns true if no votes have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(votes: &BTreeMap<String, f32>) -> f32 {
    if votes.is_empty() {
        return 0.0;
    }
    votes.values().sum::<f32>() / votes.len() as f32
}

/// Sorts a probability map descending and keeps the first `n`.
pub(crate) fn rank(probabilities: BTreeMap<UseCaseId, f32>, n: usize) -> Vec<(UseCaseId, f32)> {
    let mut ranked: Vec<_> = probabilities.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    ranked.truncate(n);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uc(s: &str) -> UseCaseId {
        UseCaseId::new(s)
    }

    #[test]
    fn cells_never_decrease() {
        let mut tracker = UseCaseBeliefTracker::new();
        assert!(tracker.vote(&uc("UC3"), "elicitor", 0.7));
        assert!(!tracker.vote(&uc("UC3"), "elicitor", 0.2));
        assert!(!tracker.vote(&uc("UC3"), "elicitor", f32::NAN));
        assert_eq!(tracker.cell(&uc("UC3"), "elicitor"), Some(0.7));
    }

    #[test]
    fn probability_is_mean_of_cells() {
        let mut tracker = UseCaseBeliefTracker::new();
        tracker.vote(&uc("UC3"), "elicitor", 0.8);
        tracker.vote(&uc("UC3"), "mapper", 0.4);
        let p = tracker.probability(&uc("UC3")).unwrap();
        assert!((p - 0.6).abs() < 1e-6);
        assert!(tracker.probability(&uc("UC9")).is_none());
    }

    #[test]
    fn merge_counts_raised_cells() {
        let mut local = UseCaseBeliefTracker::new();
        local.vote(&uc("UC5"), "a", 0.5);

        let mut remote = UseCaseBeliefTracker::new();
        remote.vote(&uc("UC5"), "a", 0.3);
        remote.vote(&uc("UC5"), "b", 0.9);

        assert_eq!(local.merge(remote.cells()), 1);
        assert_eq!(local.cell(&uc("UC5"), "a"), Some(0.5));
        assert_eq!(local.cell(&uc("UC5"), "b"), Some(0.9));
    }

    #[test]
    fn top_is_sorted_and_truncated() {
        let mut tracker = UseCaseBeliefTracker::new();
        tracker.vote(&uc("UC3"), "a", 0.3);
        tracker.vote(&uc("UC5"), "a", 0.9);
        tracker.vote(&uc("UC6"), "a", 0.6);
        let top = tracker.top(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0, uc("UC5"));
        assert_eq!(top[1].0, uc("UC6"));
    }
}
