//! Per-session context.
//!
//! A [`Session`] owns everything one specification conversation needs: the
//! store, the dependency graph, the belief network, the aggregator and the
//! orchestrator with its worker pool. Nothing is shared between sessions.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::aggregate::{
    AggregatedConfidence, AggregationContext, AggregationStrategy, AggregatorConfig,
    ConfidenceAggregator,
};
use crate::catalog::Catalog;
use crate::conflict::{ConflictDescriptor, Resolution};
use crate::constraint::{Constraint, ConstraintId, UseCaseId};
use crate::error::{ReconcileResult, ValidationError};
use crate::graph::DependencyGraph;
use crate::inference::{BeliefNetwork, DisambiguationInfo, NetworkConfig};
use crate::orchestrator::{
    AgentOutcome, ExecutionOrchestrator, ExtractionAgent, OrchestratorConfig,
};
use crate::store::{ConstraintStore, MutexTable, StateSnapshot, StoreConfig};
use crate::time::{Clock, SystemClock};

/// Tuning for every component of a session.
#[derive(Clone, Default)]
pub struct SessionConfig {
    /// Auto-resolution thresholds.
    pub store: StoreConfig,
    /// Worker pool and round deadline.
    pub orchestrator: OrchestratorConfig,
    /// Belief-network likelihoods.
    pub network: NetworkConfig,
    /// Aggregation thresholds.
    pub aggregator: AggregatorConfig,
    clock: Option<Arc<dyn Clock>>,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("store", &self.store)
            .field("orchestrator", &self.orchestrator)
            .field("network", &self.network)
            .field("aggregator", &self.aggregator)
            .field("custom_clock", &self.clock.is_some())
            .finish()
    }
}

impl SessionConfig {
    /// Sets the store thresholds.
    #[must_use]
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Sets the orchestrator configuration.
    #[must_use]
    pub fn with_orchestrator(mut self, orchestrator: OrchestratorConfig) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    /// Sets the belief-network tuning.
    #[must_use]
    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    /// Sets the aggregation thresholds.
    #[must_use]
    pub fn with_aggregator(mut self, aggregator: AggregatorConfig) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// Stamps agent proposals with `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }
}

/// One side of a binary question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceOption<T> {
    /// What the user would pick.
    pub value: T,
    /// Display label.
    pub label: String,
}

/// A question the caller should put to the user before the next round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Disambiguation {
    /// Two constraints cannot both hold.
    ConstraintChoice {
        /// Question text.
        question: String,
        /// The constraint that was present first.
        option_a: ChoiceOption<ConstraintId>,
        /// The constraint that arrived second.
        option_b: ChoiceOption<ConstraintId>,
        /// The conflict the answer settles.
        conflict: ConflictDescriptor,
    },

    /// Two use cases are too close to call.
    UseCaseChoice {
        /// Question text.
        question: String,
        /// The leader and its probability.
        option_a: ChoiceOption<(UseCaseId, f64)>,
        /// The runner-up and its probability.
        option_b: ChoiceOption<(UseCaseId, f64)>,
        /// Indicators that tell them apart.
        info: DisambiguationInfo,
    },

    /// The agents disagree or are unsure, with nothing concrete to offer.
    Clarification {
        /// Question text.
        question: String,
        /// Why the aggregate asked for the user.
        reason: String,
    },
}

impl Disambiguation {
    /// Question text.
    #[must_use]
    pub fn question(&self) -> &str {
        match self {
            Self::ConstraintChoice { question, .. }
            | Self::UseCaseChoice { question, .. }
            | Self::Clarification { question, .. } => question,
        }
    }
}

/// What one `process_input` call produced.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// True if every selected agent produced a proposal.
    pub success: bool,
    /// Store state after the round.
    pub state_snapshot: StateSnapshot,
    /// Per-agent outcomes.
    pub agent_results: Vec<AgentOutcome>,
    /// Wall time of the round.
    pub total_time: Duration,
    /// Conflicts found in this round. Earlier unanswered ones stay in
    /// [`Session::pending_conflicts`].
    pub conflicts: Vec<ConflictDescriptor>,
    /// Completeness in [0, 1].
    pub completeness_score: f64,
    /// Agent readings folded into one confidence.
    pub aggregated_confidence: AggregatedConfidence,
    /// Belief-network posterior after this input.
    pub use_case_posterior: BTreeMap<UseCaseId, f64>,
    /// Question to ask next, if any.
    pub disambiguation: Option<Disambiguation>,
}

/// Reconciliation context for one specification conversation.
pub struct Session {
    session_id: String,
    store: Arc<ConstraintStore>,
    graph: Arc<DependencyGraph>,
    network: BeliefNetwork,
    aggregator: ConfidenceAggregator,
    orchestrator: ExecutionOrchestrator,
    pending: Vec<ConflictDescriptor>,
    last_strategy: Option<AggregationStrategy>,
}

impl Session {
    /// Builds every component from `catalog` and starts the worker pool.
    ///
    /// # Errors
    ///
    /// - `ReconcileError::Catalog` if an indicator does not compile.
    /// - `ReconcileError::Internal` if a worker thread cannot be spawned.
    pub fn new(
        session_id: impl Into<String>,
        catalog: &Catalog,
        agents: Vec<Arc<dyn ExtractionAgent>>,
        config: SessionConfig,
    ) -> ReconcileResult<Self> {
        let session_id = session_id.into();
        let clock: Arc<dyn Clock> = config
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);

        let store = Arc::new(ConstraintStore::with_config(
            session_id.clone(),
            MutexTable::from_catalog(catalog),
            config.store,
        ));
        let graph = Arc::new(DependencyGraph::from_catalog(catalog));
        let network = BeliefNetwork::with_config(catalog, config.network)?;
        let aggregator = ConfidenceAggregator::with_config(config.aggregator);
        let orchestrator = ExecutionOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&graph),
            agents,
            clock,
            config.orchestrator,
        )?;

        info!(
            session = %session_id,
            agents = orchestrator.agents().len(),
            use_cases = catalog.use_cases.len(),
            nodes = graph.len(),
            "session started"
        );

        Ok(Self {
            session_id,
            store,
            graph,
            network,
            aggregator,
            orchestrator,
            pending: Vec::new(),
            last_strategy: None,
        })
    }

    /// Session identifier.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Folds `text` into the beliefs, runs one agent round and decides what
    /// to ask next.
    pub fn process_input(&mut self, text: &str) -> ExecutionResult {
        let use_case_posterior = self.network.update(text);
        let round = self.orchestrator.process_input(text, &self.pending);

        let context = if round.conflicts.is_empty() {
            AggregationContext::default()
        } else {
            AggregationContext::critical()
        };
        let aggregated_confidence = self.aggregator.aggregate(&round.readings, context);
        self.last_strategy = Some(aggregated_confidence.strategy_used);

        self.absorb_conflicts(&round.conflicts);
        let disambiguation = self.next_question(&aggregated_confidence);

        debug!(
            session = %self.session_id,
            conflicts = round.conflicts.len(),
            pending = self.pending.len(),
            confidence = aggregated_confidence.final_confidence,
            asks = disambiguation.is_some(),
            "input processed"
        );

        ExecutionResult {
            success: round.success,
            state_snapshot: round.state_snapshot,
            agent_results: round.agent_results,
            total_time: round.total_time,
            conflicts: round.conflicts,
            completeness_score: round.completeness_score,
            aggregated_confidence,
            use_case_posterior,
            disambiguation,
        }
    }

    /// Adds this round's conflicts to the pending list. An unresolved mutex
    /// stays until [`Session::resolve_conflict`] answers it; a repeat of a
    /// pending conflict replaces it so the newest refused write is kept. An
    /// accumulation conflict is dropped once one of its constraints has left
    /// the store.
    fn absorb_conflicts(&mut self, found: &[ConflictDescriptor]) {
        let store = &self.store;
        self.pending.retain(|c| match c {
            ConflictDescriptor::Progressive { path } => {
                path.participants.iter().all(|id| store.contains(id))
            }
            ConflictDescriptor::UnresolvedMutex { .. } => true,
        });
        for conflict in found {
            match self.pending.iter_mut().find(|p| p.same_conflict(conflict)) {
                Some(existing) => existing.clone_from(conflict),
                None => self.pending.push(conflict.clone()),
            }
        }
    }

    fn next_question(&self, aggregated: &AggregatedConfidence) -> Option<Disambiguation> {
        if let Some((conflict, (a, b))) = self
            .pending
            .iter()
            .find_map(|c| c.choice().map(|pair| (c, pair)))
        {
            return Some(Disambiguation::ConstraintChoice {
                question: format!("Your requirements conflict: {a} and {b} cannot both hold. Which matters more?"),
                option_a: ChoiceOption {
                    value: a.clone(),
                    label: a.to_string(),
                },
                option_b: ChoiceOption {
                    value: b.clone(),
                    label: b.to_string(),
                },
                conflict: conflict.clone(),
            });
        }

        if let Some(info) = self.network.disambiguation_info() {
            let [first, second] = info.top_two.clone();
            return Some(Disambiguation::UseCaseChoice {
                question: "Multiple use cases detected. Which best describes your application?"
                    .to_string(),
                option_a: ChoiceOption {
                    label: self.use_case_label(&first.0),
                    value: first,
                },
                option_b: ChoiceOption {
                    label: self.use_case_label(&second.0),
                    value: second,
                },
                info,
            });
        }

        aggregated
            .requires_disambiguation
            .then(|| Disambiguation::Clarification {
                question: "Could you tell me more about your requirements?".to_string(),
                reason: aggregated.explanation.clone(),
            })
    }

    fn use_case_label(&self, id: &UseCaseId) -> String {
        self.network
            .node(id)
            .map_or_else(|| id.to_string(), |n| n.name.clone())
    }

    /// Applies a user decision between two mutually exclusive constraints
    /// and drops the pending conflicts it answers.
    ///
    /// If `chosen` is a write the store refused as an unresolved mutex, the
    /// refused write is applied in the same step that removes its partner.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ChosenNotInPair` if `chosen` is neither
    /// `a` nor `b`.
    pub fn resolve_conflict(
        &mut self,
        a: &ConstraintId,
        b: &ConstraintId,
        chosen: &ConstraintId,
    ) -> Result<Resolution, ValidationError> {
        let proposal = self
            .pending
            .iter()
            .filter(|c| c.concerns(a, b))
            .find_map(|c| c.proposal().filter(|p| &p.id == chosen).cloned());
        let resolution = self
            .store
            .resolve_with(a, b, chosen, "user choice", false, proposal)?;
        let before = self.pending.len();
        self.pending.retain(|c| !c.concerns(a, b));
        info!(
            session = %self.session_id,
            cleared = before - self.pending.len(),
            "pending conflict answered"
        );
        Ok(resolution)
    }

    /// Treats an explicit user choice as strong evidence for `use_case`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::UnknownUseCase` for an id outside the
    /// catalog.
    pub fn confirm_use_case(
        &mut self,
        use_case: &UseCaseId,
    ) -> Result<BTreeMap<UseCaseId, f64>, ValidationError> {
        self.network.confirm_use_case(use_case)
    }

    /// Tells the aggregator whether its last answer turned out right.
    pub fn record_feedback(&mut self, success: bool) {
        if let Some(strategy) = self.last_strategy {
            self.aggregator.update_strategy_performance(strategy, success);
        }
    }

    /// Live constraints, mandatory first, newest first.
    #[must_use]
    pub fn get_active_constraints(&self) -> Vec<Constraint> {
        self.store.active_constraints()
    }

    /// Top `n` use cases by agent vote.
    #[must_use]
    pub fn get_top_use_cases(&self, n: usize) -> Vec<(UseCaseId, f32)> {
        self.store.top_use_cases(n)
    }

    /// Conflicts still waiting for a decision.
    #[must_use]
    pub fn pending_conflicts(&self) -> &[ConflictDescriptor] {
        &self.pending
    }

    /// Store state plus the belief posterior, for debugging and audit.
    #[must_use]
    pub fn export_state(&self) -> serde_json::Value {
        let mut state = self.store.export_state();
        if let serde_json::Value::Object(map) = &mut state {
            map.insert(
                "use_case_posterior".to_string(),
                serde_json::to_value(self.network.probabilities())
                    .unwrap_or(serde_json::Value::Null),
            );
            map.insert(
                "pending_conflicts".to_string(),
                serde_json::to_value(&self.pending).unwrap_or(serde_json::Value::Null),
            );
        }
        state
    }

    /// The store.
    #[must_use]
    pub fn store(&self) -> &ConstraintStore {
        &self.store
    }

    /// The dependency graph.
    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// The belief network.
    #[must_use]
    pub const fn network(&self) -> &BeliefNetwork {
        &self.network
    }

    /// The aggregator.
    #[must_use]
    pub const fn aggregator(&self) -> &ConfidenceAggregator {
        &self.aggregator
    }

    /// The orchestrator.
    #[must_use]
    pub const fn orchestrator(&self) -> &ExecutionOrchestrator {
        &self.orchestrator
    }
}
