//! Round execution.
//!
//! The orchestrator selects agents, runs them concurrently on a bounded
//! worker pool under one round deadline, and merges whatever completed
//! through the store. Merging happens serially in completion order, so which
//! of two mutually exclusive proposals from the same round wins depends on
//! scheduling.
//!
//! A round never fails as a whole. A failing, panicking or late agent is
//! recorded in its [`AgentOutcome`] and contributes nothing.

mod agent;
mod completeness;
mod pool;

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::aggregate::AgentConfidence;
use crate::conflict::ConflictDescriptor;
use crate::constraint::Constraint;
use crate::error::{AgentError, ReconcileError, ReconcileResult, Rejection};
use crate::graph::DependencyGraph;
use crate::store::{ConstraintStore, StateSnapshot};
use crate::time::Clock;

pub use agent::{
    AgentContext, AgentOutcome, AgentProposal, AgentRole, ConstraintProposal, ExtractionAgent,
    StateUpdates,
};
pub use completeness::completeness_score;
use pool::WorkerPool;

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Worker threads.
    pub workers: usize,
    /// Maximum queued agent jobs.
    pub queue_capacity: usize,
    /// Deadline for one round.
    pub round_timeout: Duration,
    /// Expertise weight per agent id.
    pub agent_weights: BTreeMap<String, f64>,
    /// Weight for agents missing from `agent_weights`.
    pub fallback_weight: f64,
    /// How long dropping the orchestrator waits for busy workers before
    /// detaching them.
    pub shutdown_grace: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            round_timeout: Duration::from_secs(3),
            agent_weights: BTreeMap::new(),
            fallback_weight: 0.33,
            shutdown_grace: Duration::from_secs(1),
        }
    }
}

impl OrchestratorConfig {
    /// Sets the worker count.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the round deadline.
    #[must_use]
    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout = timeout;
        self
    }

    /// Sets the shutdown grace period.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Sets the expertise weight of one agent.
    #[must_use]
    pub fn with_agent_weight(mut self, agent: impl Into<String>, weight: f64) -> Self {
        self.agent_weights.insert(agent.into(), weight);
        self
    }

    /// Expertise weight of an agent.
    #[must_use]
    pub fn weight_for(&self, agent: &str) -> f64 {
        self.agent_weights
            .get(agent)
            .copied()
            .unwrap_or(self.fallback_weight)
    }
}

/// What one round produced.
#[derive(Debug, Clone)]
pub struct RoundResult {
    /// True if every selected agent produced a proposal.
    pub success: bool,
    /// Store state after merging.
    pub state_snapshot: StateSnapshot,
    /// Per-agent outcomes, in completion order; late agents last.
    pub agent_results: Vec<AgentOutcome>,
    /// Wall time of the round.
    pub total_time: Duration,
    /// Conflicts needing a user decision.
    pub conflicts: Vec<ConflictDescriptor>,
    /// Completeness in [0, 1].
    pub completeness_score: f64,
    /// Confidence reading of every agent that completed with content.
    pub readings: Vec<AgentConfidence>,
}

/// Round counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrchestratorMetrics {
    /// Rounds run.
    pub execution_count: u64,
    /// Summed round time.
    pub total_time: Duration,
    /// Agents that missed a deadline.
    pub timeouts: u64,
    /// Agents that failed for any other reason.
    pub failures: u64,
}

impl OrchestratorMetrics {
    /// Mean round time, zero before the first round.
    #[must_use]
    pub fn average_round_time(&self) -> Duration {
        u32::try_from(self.execution_count)
            .ok()
            .filter(|n| *n > 0)
            .map_or(Duration::ZERO, |n| self.total_time / n)
    }
}

type Reply = (usize, Result<AgentProposal, AgentError>, Duration);

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Runs agents and merges their proposals into one store.
pub struct ExecutionOrchestrator {
    store: Arc<ConstraintStore>,
    graph: Arc<DependencyGraph>,
    agents: Vec<Arc<dyn ExtractionAgent>>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    pool: WorkerPool,
    metrics: Mutex<OrchestratorMetrics>,
}

impl ExecutionOrchestrator {
    /// Starts the worker pool.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::Internal` if a worker thread cannot be
    /// spawned.
    pub fn new(
        store: Arc<ConstraintStore>,
        graph: Arc<DependencyGraph>,
        agents: Vec<Arc<dyn ExtractionAgent>>,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> ReconcileResult<Self> {
        let pool = WorkerPool::start(
            "reconcile-agent",
            config.workers,
            config.queue_capacity,
            config.shutdown_grace,
        )
        .map_err(|e| ReconcileError::internal(format!("failed to spawn agent worker: {e}")))?;
        Ok(Self {
            store,
            graph,
            agents,
            clock,
            config,
            pool,
            metrics: Mutex::new(OrchestratorMetrics::default()),
        })
    }

    /// Configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Registered agents.
    #[must_use]
    pub fn agents(&self) -> &[Arc<dyn ExtractionAgent>] {
        &self.agents
    }

    /// Picks the agents for the next round.
    ///
    /// While a disambiguation is pending only resolvers run; if none is
    /// registered the extraction agents run as usual.
    #[must_use]
    pub fn select_agents(
        &self,
        snapshot: &StateSnapshot,
        pending: &[ConflictDescriptor],
    ) -> Vec<Arc<dyn ExtractionAgent>> {
        if !pending.is_empty() && !snapshot.is_empty() {
            let resolvers: Vec<_> = self
                .agents
                .iter()
                .filter(|a| a.role() == AgentRole::Resolver)
                .cloned()
                .collect();
            if !resolvers.is_empty() {
                return resolvers;
            }
        }
        self.agents
            .iter()
            .filter(|a| a.role().is_extraction())
            .cloned()
            .collect()
    }

    /// Runs `agents` concurrently and waits until all reply or the round
    /// deadline passes.
    ///
    /// On timeout the context is cancelled and agents that have not replied
    /// get an [`AgentError::TimedOut`] outcome; anything they send later is
    /// dropped.
    pub fn run_round(
        &self,
        input: &str,
        snapshot: &StateSnapshot,
        agents: &[Arc<dyn ExtractionAgent>],
        ctx: &AgentContext,
    ) -> Vec<AgentOutcome> {
        let (reply_tx, reply_rx) = bounded::<Reply>(agents.len().max(1));
        let input: Arc<str> = Arc::from(input);
        let snapshot = Arc::new(snapshot.clone());

        let mut outcomes = Vec::with_capacity(agents.len());
        let mut awaiting = vec![false; agents.len()];

        for (idx, agent) in agents.iter().enumerate() {
            let job = {
                let agent = Arc::clone(agent);
                let input = Arc::clone(&input);
                let snapshot = Arc::clone(&snapshot);
                let ctx = ctx.clone();
                let reply = reply_tx.clone();
                Box::new(move || {
                    let started = Instant::now();
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        agent.process(&input, &snapshot, &ctx)
                    }))
                    .unwrap_or_else(|_| Err(AgentError::failed(agent.id(), "agent panicked")));
                    let _ = reply.send((idx, result, started.elapsed()));
                })
            };
            match self.pool.try_submit(job) {
                Ok(()) => awaiting[idx] = true,
                Err(error) => outcomes.push(AgentOutcome {
                    agent_id: agent.id().to_string(),
                    role: agent.role(),
                    result: Err(error),
                    elapsed: Duration::ZERO,
                }),
            }
        }
        drop(reply_tx);

        let mut outstanding = awaiting.iter().filter(|w| **w).count();
        let mut timed_out = false;
        while outstanding > 0 {
            match reply_rx.recv_deadline(ctx.deadline()) {
                Ok((idx, result, elapsed)) => {
                    outstanding -= 1;
                    awaiting[idx] = false;
                    let agent = &agents[idx];
                    debug!(
                        agent = agent.id(),
                        elapsed_ms = millis(elapsed),
                        ok = result.is_ok(),
                        "agent replied"
                    );
                    outcomes.push(AgentOutcome {
                        agent_id: agent.id().to_string(),
                        role: agent.role(),
                        result,
                        elapsed,
                    });
                }
                Err(RecvTimeoutError::Timeout) => {
                    timed_out = true;
                    ctx.cancel();
                    warn!(
                        round = ctx.round(),
                        outstanding,
                        timeout_ms = millis(self.config.round_timeout),
                        "round deadline passed; dropping late agents"
                    );
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let duration_ms = millis(self.config.round_timeout);
        for (idx, agent) in agents.iter().enumerate() {
            if !awaiting[idx] {
                continue;
            }
            let error = if timed_out {
                AgentError::TimedOut {
                    agent: agent.id().to_string(),
                    duration_ms,
                }
            } else {
                AgentError::Disconnected
            };
            outcomes.push(AgentOutcome {
                agent_id: agent.id().to_string(),
                role: agent.role(),
                result: Err(error),
                elapsed: self.config.round_timeout,
            });
        }
        outcomes
    }

    /// Pushes completed proposals through the store in the given order.
    ///
    /// Votes go to the tracker, constraints through `add` stamped with the
    /// orchestrator clock, then any attached full state through `merge`.
    /// Returns every unresolved mutex as a conflict.
    pub fn merge_outcomes(&self, outcomes: &[AgentOutcome]) -> Vec<ConflictDescriptor> {
        let mut conflicts = Vec::new();

        for outcome in outcomes {
            let Some(proposal) = outcome.proposal() else {
                continue;
            };
            for (use_case, confidence) in &proposal.state_updates.use_cases {
                if let Err(error) =
                    self.store
                        .add_use_case_vote(use_case, &outcome.agent_id, *confidence)
                {
                    debug!(agent = %outcome.agent_id, %use_case, %error, "vote dropped");
                }
            }
            for proposed in &proposal.state_updates.constraints {
                let built = Constraint::builder(proposed.id.clone())
                    .value(proposed.value.clone())
                    .strength(proposed.strength)
                    .confidence(proposed.confidence)
                    .timestamp(self.clock.now())
                    .source_agent(outcome.agent_id.as_str())
                    .build();
                let constraint = match built {
                    Ok(c) => c,
                    Err(error) => {
                        debug!(agent = %outcome.agent_id, id = %proposed.id, %error, "proposal dropped");
                        continue;
                    }
                };
                if let Err(rejection) = self.store.add(constraint.clone()) {
                    conflicts.extend(ConflictDescriptor::from_rejection(
                        &rejection,
                        &outcome.agent_id,
                        Some(&constraint),
                    ));
                }
            }
        }

        for outcome in outcomes {
            let Some(state) = outcome.proposal().and_then(|p| p.full_state.as_ref()) else {
                continue;
            };
            let report = self.store.merge(state);
            conflicts.extend(report.unresolved.iter().filter_map(|r| {
                let proposal = match r {
                    Rejection::UnresolvedMutex { id, .. } => {
                        state.constraints.iter().find(|c| &c.id == id)
                    }
                    Rejection::Stale { .. } | Rejection::LowerConfidence { .. } => None,
                };
                ConflictDescriptor::from_rejection(r, &outcome.agent_id, proposal)
            }));
        }
        conflicts
    }

    /// Runs one full round: select, execute, merge, check and score.
    pub fn process_input(&self, input: &str, pending: &[ConflictDescriptor]) -> RoundResult {
        let started = Instant::now();
        let round = self.lock_metrics().execution_count + 1;

        let before = self.store.snapshot();
        let agents = self.select_agents(&before, pending);
        let ctx = AgentContext::new(round, started + self.config.round_timeout, pending.to_vec());
        let outcomes = self.run_round(input, &before, &agents, &ctx);

        let mut conflicts = self.merge_outcomes(&outcomes);
        let state_snapshot = self.store.snapshot();
        if let Some(path) = self.graph.detect_progressive_conflict(&state_snapshot.order) {
            conflicts.push(ConflictDescriptor::Progressive { path });
        }
        let completeness = completeness_score(&state_snapshot, conflicts.len());
        let readings = self.readings(&outcomes);
        let total_time = started.elapsed();

        {
            let mut metrics = self.lock_metrics();
            metrics.execution_count += 1;
            metrics.total_time += total_time;
            for outcome in &outcomes {
                match outcome.error() {
                    Some(e) if e.is_timeout() => metrics.timeouts += 1,
                    Some(_) => metrics.failures += 1,
                    None => {}
                }
            }
        }

        info!(
            round,
            agents = outcomes.len(),
            conflicts = conflicts.len(),
            completeness,
            version = state_snapshot.version,
            elapsed_ms = millis(total_time),
            "round complete"
        );

        RoundResult {
            success: outcomes.iter().all(AgentOutcome::success),
            state_snapshot,
            agent_results: outcomes,
            total_time,
            conflicts,
            completeness_score: completeness,
            readings,
        }
    }

    fn readings(&self, outcomes: &[AgentOutcome]) -> Vec<AgentConfidence> {
        outcomes
            .iter()
            .filter_map(|outcome| {
                let proposal = outcome.proposal()?;
                let confidence = proposal.reported_confidence()?;
                let mut reading = AgentConfidence::new(
                    outcome.agent_id.clone(),
                    confidence,
                    self.config.weight_for(&outcome.agent_id),
                )
                .with_evidence(proposal.evidence_count());
                reading.uncertainty_reason = proposal.uncertainty_reason.clone();
                Some(reading)
            })
            .collect()
    }

    fn lock_metrics(&self) -> std::sync::MutexGuard<'_, OrchestratorMetrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Round counters.
    #[must_use]
    pub fn metrics(&self) -> OrchestratorMetrics {
        *self.lock_metrics()
    }
}
