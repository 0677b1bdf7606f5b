//! Conflict-free constraint store.
//!
//! The store is an LWW-Element-Set of constraints keyed by id, plus a
//! G-Counter of use-case votes and an append-only resolution log. Writes
//! that hit a mutex partner go through an ordered auto-resolution chain
//! (see [`rules::decide`]); when no rule fires the write is rejected with
//! [`Rejection::UnresolvedMutex`] and the store is left untouched.
//!
//! All state sits behind one `RwLock`. The lock is held for the duration of
//! a single call and never handed out; readers get owned snapshots.

pub mod mutex;
pub mod rules;
pub mod snapshot;
pub mod tracker;

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::conflict::{Resolution, ResolutionRule};
use crate::constraint::{validate_confidence, Constraint, ConstraintId, UseCaseId};
use crate::error::{Rejection, ValidationError};

pub use mutex::MutexTable;
pub use rules::MutexDecision;
pub use snapshot::{AddOutcome, MergeReport, PartialState, StateSnapshot, StoreMetrics};
pub use tracker::UseCaseBeliefTracker;

/// Auto-resolution thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// A mutex write newer than its partner by less than this is treated as
    /// a self-correction.
    pub recency_window: Duration,

    /// Minimum confidence gap for the confidence rule to fire.
    pub confidence_margin: f32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            recency_window: Duration::seconds(30),
            confidence_margin: 0.3,
        }
    }
}

impl StoreConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the recency window.
    #[must_use]
    pub fn with_recency_window(mut self, window: Duration) -> Self {
        self.recency_window = window;
        self
    }

    /// Sets the confidence margin.
    #[must_use]
    pub fn with_confidence_margin(mut self, margin: f32) -> Self {
        self.confidence_margin = margin.clamp(0.0, 1.0);
        self
    }
}

#[derive(Debug, Clone)]
struct Entry {
    constraint: Constraint,
    seq: u64,
}

#[derive(Debug)]
struct StoreState {
    constraints: HashMap<ConstraintId, Entry>,
    next_seq: u64,
    votes: UseCaseBeliefTracker,
    resolutions: Vec<Resolution>,
    version: u64,
    last_update: DateTime<Utc>,
    merge_count: u64,
    conflict_count: u64,
}

impl StoreState {
    fn new() -> Self {
        Self {
            constraints: HashMap::new(),
            next_seq: 0,
            votes: UseCaseBeliefTracker::new(),
            resolutions: Vec::new(),
            version: 0,
            last_update: Utc::now(),
            merge_count: 0,
            conflict_count: 0,
        }
    }

    fn bump(&mut self) {
        self.version += 1;
        self.last_update = Utc::now();
    }

    /// Inserts or replaces `constraint`. A replacement keeps its position in
    /// insertion order.
    fn put(&mut self, constraint: Constraint) {
        if let Some(entry) = self.constraints.get_mut(&constraint.id) {
            entry.constraint = constraint;
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.constraints
            .insert(constraint.id.clone(), Entry { constraint, seq });
    }

    fn ordered_ids(&self) -> Vec<ConstraintId> {
        let mut entries: Vec<&Entry> = self.constraints.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.constraint.id.clone()).collect()
    }

    fn state_hash(&self) -> String {
        #[derive(Serialize)]
        struct Hashed<'a> {
            use_cases: &'a tracker::VoteCells,
            constraints: Vec<&'a ConstraintId>,
            version: u64,
        }

        let mut ids: Vec<&ConstraintId> = self.constraints.keys().collect();
        ids.sort();
        let hashed = Hashed {
            use_cases: self.votes.cells(),
            constraints: ids,
            version: self.version,
        };
        let bytes = serde_json::to_vec(&hashed).unwrap_or_default();
        let hex = blake3::hash(&bytes).to_hex();
        hex.as_str()[..8].to_string()
    }

    fn metrics(&self) -> StoreMetrics {
        let auto = self.resolutions.iter().filter(|r| r.auto_resolved).count();
        #[allow(clippy::cast_precision_loss)]
        let auto_resolution_rate = auto as f64 / self.resolutions.len().max(1) as f64;
        StoreMetrics {
            version: self.version,
            total_constraints: self.constraints.len(),
            total_resolutions: self.resolutions.len(),
            auto_resolution_rate,
            merge_count: self.merge_count,
            conflict_count: self.conflict_count,
            state_hash: self.state_hash(),
        }
    }
}

/// Per-session constraint store.
#[derive(Debug)]
pub struct ConstraintStore {
    session_id: String,
    config: StoreConfig,
    mutex: MutexTable,
    state: RwLock<StoreState>,
}

impl ConstraintStore {
    /// Creates a store with the catalog's mutex rules and default thresholds.
    #[must_use]
    pub fn new(session_id: impl Into<String>, catalog: &Catalog) -> Self {
        Self::with_config(session_id, MutexTable::from_catalog(catalog), StoreConfig::default())
    }

    /// Creates a store with an explicit mutex table and thresholds.
    #[must_use]
    pub fn with_config(session_id: impl Into<String>, mutex: MutexTable, config: StoreConfig) -> Self {
        Self {
            session_id: session_id.into(),
            config,
            mutex,
            state: RwLock::new(StoreState::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Session this store belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Mutex rules in force.
    #[must_use]
    pub const fn mutex_table(&self) -> &MutexTable {
        &self.mutex
    }

    /// Adds a constraint.
    ///
    /// Without a live mutex partner this is plain LWW: insert if absent,
    /// replace only if strictly newer. With a partner, the auto-resolution
    /// chain decides.
    ///
    /// # Errors
    ///
    /// - `Rejection::Stale` if LWW drops the write.
    /// - `Rejection::LowerConfidence` if the stored partner wins on margin.
    /// - `Rejection::UnresolvedMutex` if no rule fires.
    ///
    /// A rejection leaves constraints, resolutions and version untouched.
    /// Every write that meets a live mutex partner counts toward
    /// [`StoreMetrics::conflict_count`], whatever the outcome.
    pub fn add(&self, constraint: Constraint) -> Result<AddOutcome, Rejection> {
        let mut state = self.write();
        self.add_locked(&mut state, constraint)
    }

    fn add_locked(&self, state: &mut StoreState, constraint: Constraint) -> Result<AddOutcome, Rejection> {
        let partner = self
            .mutex
            .first_present(&constraint.id, |id| state.constraints.contains_key(id))
            .cloned();

        let Some(partner) = partner else {
            return Self::apply_lww(state, constraint);
        };

        let existing = match state.constraints.get(&partner) {
            Some(entry) => entry.constraint.clone(),
            None => return Self::apply_lww(state, constraint),
        };
        state.conflict_count += 1;

        match rules::decide(&self.config, &existing, &constraint) {
            MutexDecision::KeepIncoming { rule, reason } => {
                let resolution = Resolution::mutex(
                    partner.clone(),
                    constraint.id.clone(),
                    constraint.id.clone(),
                    rule,
                    reason,
                    Utc::now(),
                );
                info!(
                    session = %self.session_id,
                    removed = %partner,
                    kept = %constraint.id,
                    rule = %rule,
                    "mutex auto-resolved"
                );
                state.resolutions.push(resolution.clone());
                state.constraints.remove(&partner);
                state.put(constraint);
                state.bump();
                Ok(AddOutcome::AutoResolved(resolution))
            }
            MutexDecision::KeepExisting => {
                debug!(
                    session = %self.session_id,
                    rejected = %constraint.id,
                    winner = %partner,
                    "mutex write lost on confidence"
                );
                Err(Rejection::LowerConfidence {
                    id: constraint.id,
                    winner: partner,
                })
            }
            MutexDecision::Unresolved => Err(Rejection::UnresolvedMutex {
                id: constraint.id,
                partner,
            }),
        }
    }

    fn apply_lww(state: &mut StoreState, constraint: Constraint) -> Result<AddOutcome, Rejection> {
        let outcome = match state.constraints.get(&constraint.id) {
            None => AddOutcome::Inserted,
            Some(entry) if constraint.timestamp > entry.constraint.timestamp => AddOutcome::Replaced,
            Some(_) => {
                debug!(id = %constraint.id, "stale write dropped");
                return Err(Rejection::Stale { id: constraint.id });
            }
        };
        state.put(constraint);
        state.bump();
        Ok(outcome)
    }

    /// Records a use-case vote (max-merge). Returns true if the cell went up.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for an empty agent id or a confidence
    /// outside [0.0, 1.0].
    pub fn add_use_case_vote(
        &self,
        use_case: &UseCaseId,
        agent: &str,
        confidence: f32,
    ) -> Result<bool, ValidationError> {
        validate_confidence(confidence)?;
        if agent.trim().is_empty() {
            return Err(ValidationError::EmptyIdentifier {
                field: "agent".to_string(),
            });
        }
        let mut state = self.write();
        let raised = state.votes.vote(use_case, agent, confidence);
        state.bump();
        Ok(raised)
    }

    /// Merges a remote partial state.
    ///
    /// Vote cells are max-merged, each remote constraint goes through
    /// [`ConstraintStore::add`], and remote resolutions are appended as they
    /// are. Resolutions are not deduplicated; entries merged twice share the
    /// same [`ResolutionId`](crate::conflict::ResolutionId).
    pub fn merge(&self, remote: &PartialState) -> MergeReport {
        let mut state = self.write();
        state.merge_count += 1;

        let mut report = MergeReport {
            merged_use_cases: state.votes.merge(&remote.use_cases),
            ..MergeReport::default()
        };

        for constraint in &remote.constraints {
            match self.add_locked(&mut state, constraint.clone()) {
                Ok(outcome) => {
                    report.merged_constraints += 1;
                    if outcome.resolution().is_some() {
                        report.conflicts_resolved += 1;
                    }
                }
                Err(rejection) if rejection.needs_decision() => report.unresolved.push(rejection),
                Err(_) => {}
            }
        }

        state.resolutions.extend(remote.resolutions.iter().cloned());
        state.bump();
        report
    }

    /// Returns an owned copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        let state = self.read();
        StateSnapshot {
            use_cases: state.votes.probabilities(),
            constraints: state
                .constraints
                .iter()
                .map(|(id, entry)| (id.clone(), entry.constraint.clone()))
                .collect(),
            order: state.ordered_ids(),
            resolutions: state.resolutions.clone(),
            timestamp: state.last_update,
            version: state.version,
        }
    }

    /// Exports this store as a partial state another store can merge.
    #[must_use]
    pub fn partial_state(&self) -> PartialState {
        let state = self.read();
        let ids = state.ordered_ids();
        PartialState {
            use_cases: state.votes.cells().clone(),
            constraints: ids
                .iter()
                .filter_map(|id| state.constraints.get(id))
                .map(|entry| entry.constraint.clone())
                .collect(),
            resolutions: state.resolutions.clone(),
        }
    }

    /// Settles a mutex pair from outside the store and removes the loser.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ChosenNotInPair` if `chosen` is neither
    /// `a` nor `b`.
    pub fn resolve(
        &self,
        a: &ConstraintId,
        b: &ConstraintId,
        chosen: &ConstraintId,
        reason: impl Into<String>,
        auto: bool,
    ) -> Result<Resolution, ValidationError> {
        self.resolve_with(a, b, chosen, reason, auto, None)
    }

    /// Like [`ConstraintStore::resolve`], but also writes `proposal` when it
    /// is the chosen side. This is how a write refused as an unresolved
    /// mutex gets in once the caller picks it. Removing the loser and
    /// writing the proposal happen under one write lock; the proposal goes
    /// through LWW, so a newer live copy of the chosen id is kept.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ChosenNotInPair` if `chosen` is neither
    /// `a` nor `b`.
    pub fn resolve_with(
        &self,
        a: &ConstraintId,
        b: &ConstraintId,
        chosen: &ConstraintId,
        reason: impl Into<String>,
        auto: bool,
        proposal: Option<Constraint>,
    ) -> Result<Resolution, ValidationError> {
        if chosen != a && chosen != b {
            return Err(ValidationError::ChosenNotInPair {
                chosen: chosen.clone(),
            });
        }

        let mut resolution = Resolution::mutex(
            a.clone(),
            b.clone(),
            chosen.clone(),
            ResolutionRule::External,
            reason,
            Utc::now(),
        );
        resolution.auto_resolved = auto;

        let mut state = self.write();
        let loser = resolution.loser().clone();
        state.constraints.remove(&loser);
        if let Some(incoming) = proposal.filter(|c| &c.id == chosen) {
            if let Err(rejection) = Self::apply_lww(&mut state, incoming) {
                debug!(session = %self.session_id, %rejection, "chosen proposal not applied");
            }
        }
        state.resolutions.push(resolution.clone());
        state.bump();
        info!(session = %self.session_id, kept = %chosen, removed = %loser, "mutex resolved externally");
        Ok(resolution)
    }

    /// Live constraints sorted by strength (mandatory first), then newest
    /// first.
    #[must_use]
    pub fn active_constraints(&self) -> Vec<Constraint> {
        let state = self.read();
        let mut constraints: Vec<Constraint> = state
            .constraints
            .values()
            .map(|entry| entry.constraint.clone())
            .collect();
        constraints.sort_by(|a, b| {
            b.strength
                .cmp(&a.strength)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        constraints
    }

    /// Top `n` use cases by mean vote.
    #[must_use]
    pub fn top_use_cases(&self, n: usize) -> Vec<(UseCaseId, f32)> {
        self.read().votes.top(n)
    }

    /// Looks up a live constraint.
    #[must_use]
    pub fn get(&self, id: &ConstraintId) -> Option<Constraint> {
        self.read().constraints.get(id).map(|e| e.constraint.clone())
    }

    /// Returns true if `id` is live.
    #[must_use]
    pub fn contains(&self, id: &ConstraintId) -> bool {
        self.read().constraints.contains_key(id)
    }

    /// Number of live constraints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().constraints.len()
    }

    /// Returns true if no constraint is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().constraints.is_empty()
    }

    /// Current version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.read().version
    }

    /// Store counters.
    #[must_use]
    pub fn metrics(&self) -> StoreMetrics {
        self.read().metrics()
    }

    /// Full state as JSON for debugging and audit. Never reloaded.
    #[must_use]
    pub fn export_state(&self) -> serde_json::Value {
        let state = self.read();
        let ids = state.ordered_ids();
        let constraints: serde_json::Map<String, serde_json::Value> = ids
            .iter()
            .filter_map(|id| state.constraints.get(id))
            .map(|entry| {
                (
                    entry.constraint.id.to_string(),
                    serde_json::to_value(&entry.constraint).unwrap_or(serde_json::Value::Null),
                )
            })
            .collect();

        serde_json::json!({
            "session_id": self.session_id,
            "version": state.version,
            "timestamp": state.last_update,
            "use_cases": state.votes.cells(),
            "constraints": constraints,
            "order": ids,
            "resolutions": state.resolutions,
            "metrics": state.metrics(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::Strength;

    fn base() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn at(id: &str, secs: f64, strength: Strength, confidence: f32) -> Constraint {
        #[allow(clippy::cast_possible_truncation)]
        let offset = Duration::milliseconds((secs * 1000.0) as i64);
        Constraint::builder(id)
            .strength(strength)
            .timestamp(base() + offset)
            .confidence(confidence)
            .source_agent("test")
            .build()
            .unwrap()
    }

    fn store() -> ConstraintStore {
        ConstraintStore::new("test-session", &Catalog::builtin())
    }

    fn id(s: &str) -> ConstraintId {
        ConstraintId::new(s)
    }

    #[test]
    fn insert_then_lww_replace() {
        let store = store();
        let out = store.add(at("CNST_MODULAR", 0.0, Strength::Mandatory, 0.8)).unwrap();
        assert_eq!(out, AddOutcome::Inserted);
        let out = store.add(at("CNST_MODULAR", 1.0, Strength::Recommended, 0.8)).unwrap();
        assert_eq!(out, AddOutcome::Replaced);
        assert_eq!(store.get(&id("CNST_MODULAR")).unwrap().strength, Strength::Recommended);
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn stale_write_is_rejected_without_bumping_version() {
        let store = store();
        store.add(at("CNST_MODULAR", 5.0, Strength::Mandatory, 0.8)).unwrap();
        let err = store.add(at("CNST_MODULAR", 5.0, Strength::Mandatory, 0.8)).unwrap_err();
        assert!(err.is_stale());
        let err = store.add(at("CNST_MODULAR", 1.0, Strength::Mandatory, 0.8)).unwrap_err();
        assert!(err.is_stale());
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn recency_rule_replaces_partner() {
        let store = store();
        store.add(at("CNST_POWER_MAX_10W", 0.0, Strength::Mandatory, 0.9)).unwrap();
        let out = store.add(at("CNST_PROCESSOR_MIN_I7", 0.1, Strength::Mandatory, 0.8)).unwrap();

        let resolution = out.resolution().unwrap();
        assert!(resolution.auto_resolved);
        assert_eq!(resolution.rule, ResolutionRule::Recency);
        assert!(resolution.reason.to_lowercase().contains("recency"));
        assert!(!store.contains(&id("CNST_POWER_MAX_10W")));
        assert!(store.contains(&id("CNST_PROCESSOR_MIN_I7")));
        assert_eq!(store.snapshot().resolutions.len(), 1);
    }

    #[test]
    fn unresolved_mutex_leaves_store_untouched() {
        let store = store();
        store.add(at("CNST_FANLESS", 0.0, Strength::Mandatory, 0.8)).unwrap();
        let before = store.snapshot();

        let err = store.add(at("CNST_GPU_REQUIRED", 35.0, Strength::Mandatory, 0.8)).unwrap_err();
        assert!(err.needs_decision());
        assert!(err.to_string().starts_with("unresolved_mutex"));

        let after = store.snapshot();
        assert_eq!(after.version, before.version);
        assert!(after.contains(&id("CNST_FANLESS")));
        assert!(!after.contains(&id("CNST_GPU_REQUIRED")));
        assert!(after.resolutions.is_empty());
    }

    #[test]
    fn strength_dominance_after_window() {
        let store = store();
        store.add(at("CNST_WIFI", 0.0, Strength::Recommended, 0.8)).unwrap();
        let out = store.add(at("CNST_LATENCY_MAX_1MS", 45.0, Strength::Mandatory, 0.8)).unwrap();
        assert_eq!(out.resolution().unwrap().rule, ResolutionRule::StrengthDominance);
        assert!(!store.contains(&id("CNST_WIFI")));
    }

    #[test]
    fn existing_wins_on_confidence_margin_without_resolution() {
        let store = store();
        store.add(at("CNST_FANLESS", 0.0, Strength::Mandatory, 0.95)).unwrap();
        let err = store.add(at("CNST_GPU_REQUIRED", 40.0, Strength::Mandatory, 0.4)).unwrap_err();
        assert_eq!(
            err,
            Rejection::LowerConfidence {
                id: id("CNST_GPU_REQUIRED"),
                winner: id("CNST_FANLESS"),
            }
        );
        assert!(store.snapshot().resolutions.is_empty());
        assert!(store.contains(&id("CNST_FANLESS")));
    }

    #[test]
    fn replacement_keeps_insertion_position() {
        let store = store();
        store.add(at("CNST_COMPACT_FORM", 0.0, Strength::Mandatory, 0.8)).unwrap();
        store.add(at("CNST_MODULAR", 1.0, Strength::Mandatory, 0.8)).unwrap();
        store.add(at("CNST_COMPACT_FORM", 2.0, Strength::Mandatory, 0.9)).unwrap();
        assert_eq!(store.snapshot().order, vec![id("CNST_COMPACT_FORM"), id("CNST_MODULAR")]);
    }

    #[test]
    fn resolve_removes_loser_and_logs() {
        let store = store();
        store.add(at("CNST_MODULAR", 0.0, Strength::Mandatory, 0.8)).unwrap();
        store.add(at("CNST_ETHERNET", 0.0, Strength::Mandatory, 0.8)).unwrap();
        let v = store.version();

        let resolution = store
            .resolve(&id("CNST_MODULAR"), &id("CNST_ETHERNET"), &id("CNST_ETHERNET"), "user choice", false)
            .unwrap();
        assert!(!resolution.auto_resolved);
        assert_eq!(resolution.rule, ResolutionRule::External);
        assert!(!store.contains(&id("CNST_MODULAR")));
        assert!(store.version() > v);

        let err = store
            .resolve(&id("A"), &id("B"), &id("C"), "nope", false)
            .unwrap_err();
        assert!(matches!(err, ValidationError::ChosenNotInPair { .. }));
    }

    #[test]
    fn resolve_with_inserts_the_refused_side() {
        let store = store();
        store.add(at("CNST_FANLESS", 0.0, Strength::Mandatory, 0.8)).unwrap();
        let gpu = at("CNST_GPU_REQUIRED", 40.0, Strength::Mandatory, 0.8);
        assert!(store.add(gpu.clone()).is_err());

        store
            .resolve_with(
                &id("CNST_FANLESS"),
                &id("CNST_GPU_REQUIRED"),
                &id("CNST_GPU_REQUIRED"),
                "user choice",
                false,
                Some(gpu),
            )
            .unwrap();
        assert!(!store.contains(&id("CNST_FANLESS")));
        assert!(store.contains(&id("CNST_GPU_REQUIRED")));
        assert_eq!(store.snapshot().resolutions.len(), 1);
    }

    #[test]
    fn resolve_with_ignores_proposal_for_the_losing_side() {
        let store = store();
        store.add(at("CNST_FANLESS", 0.0, Strength::Mandatory, 0.8)).unwrap();
        let gpu = at("CNST_GPU_REQUIRED", 40.0, Strength::Mandatory, 0.8);

        store
            .resolve_with(
                &id("CNST_FANLESS"),
                &id("CNST_GPU_REQUIRED"),
                &id("CNST_FANLESS"),
                "user choice",
                false,
                Some(gpu),
            )
            .unwrap();
        assert!(store.contains(&id("CNST_FANLESS")));
        assert!(!store.contains(&id("CNST_GPU_REQUIRED")));
    }

    #[test]
    fn conflict_count_includes_refused_writes() {
        let store = store();
        store.add(at("CNST_FANLESS", 0.0, Strength::Mandatory, 0.8)).unwrap();
        assert!(store.add(at("CNST_GPU_REQUIRED", 40.0, Strength::Mandatory, 0.8)).is_err());
        store.add(at("CNST_ETHERNET", 41.0, Strength::Mandatory, 0.8)).unwrap();
        assert_eq!(store.metrics().conflict_count, 1);
    }

    #[test]
    fn use_case_votes_are_monotonic_and_validated() {
        let store = store();
        let uc = UseCaseId::new("UC3");
        assert!(store.add_use_case_vote(&uc, "elicitor", 0.7).unwrap());
        assert!(!store.add_use_case_vote(&uc, "elicitor", 0.3).unwrap());
        assert!(store.add_use_case_vote(&uc, "elicitor", 1.3).is_err());
        assert!(store.add_use_case_vote(&uc, " ", 0.3).is_err());
        assert_eq!(store.top_use_cases(1), vec![(uc, 0.7)]);
    }

    #[test]
    fn merge_applies_rules_and_appends_resolutions_verbatim() {
        let local = store();
        local.add(at("CNST_FANLESS", 0.0, Strength::Mandatory, 0.8)).unwrap();

        let remote = store();
        remote.add(at("CNST_MODULAR", 1.0, Strength::Mandatory, 0.8)).unwrap();
        remote.add(at("CNST_POWER_MAX_10W", 1.0, Strength::Mandatory, 0.8)).unwrap();
        remote.add(at("CNST_PROCESSOR_MIN_I7", 2.0, Strength::Mandatory, 0.8)).unwrap();
        remote.add_use_case_vote(&UseCaseId::new("UC5"), "mapper", 0.6).unwrap();
        let mut partial = remote.partial_state();
        partial
            .constraints
            .push(at("CNST_GPU_REQUIRED", 60.0, Strength::Mandatory, 0.8));

        let report = local.merge(&partial);
        assert_eq!(report.merged_constraints, 2);
        assert_eq!(report.merged_use_cases, 1);
        assert_eq!(report.conflicts_resolved, 0);
        assert_eq!(report.unresolved.len(), 1);

        let before = local.snapshot().resolutions.len();
        local.merge(&partial);
        let after = local.snapshot().resolutions;
        assert_eq!(after.len(), before + 1);
        assert_eq!(after[after.len() - 1].id, after[after.len() - 2].id);
        assert_eq!(local.metrics().merge_count, 2);
    }

    #[test]
    fn active_constraints_sorted_by_strength_then_recency() {
        let store = store();
        store.add(at("CNST_MODULAR", 0.0, Strength::Recommended, 0.8)).unwrap();
        store.add(at("CNST_ETHERNET", 1.0, Strength::Mandatory, 0.8)).unwrap();
        store.add(at("CNST_RTOS", 2.0, Strength::Mandatory, 0.8)).unwrap();
        let ids: Vec<String> = store
            .active_constraints()
            .into_iter()
            .map(|c| c.id.to_string())
            .collect();
        assert_eq!(ids, vec!["CNST_RTOS", "CNST_ETHERNET", "CNST_MODULAR"]);
    }

    #[test]
    fn metrics_and_export() {
        let store = store();
        store.add(at("CNST_POWER_MAX_10W", 0.0, Strength::Mandatory, 0.9)).unwrap();
        store.add(at("CNST_PROCESSOR_MIN_I7", 1.0, Strength::Mandatory, 0.9)).unwrap();

        let metrics = store.metrics();
        assert_eq!(metrics.total_constraints, 1);
        assert_eq!(metrics.total_resolutions, 1);
        assert!((metrics.auto_resolution_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(metrics.conflict_count, 1);
        assert_eq!(metrics.state_hash.len(), 8);
        assert!(metrics.state_hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(metrics.state_hash, store.metrics().state_hash);

        let exported = store.export_state();
        assert_eq!(exported["session_id"], "test-session");
        assert!(exported["constraints"]["CNST_PROCESSOR_MIN_I7"].is_object());
        assert_eq!(exported["resolutions"][0]["rule"], "recency");
    }
}
