//! Extraction agent contract.
//!
//! Agents are external collaborators: they read the input text and a
//! snapshot and propose use-case votes and constraints. They never touch the
//! store directly; the orchestrator merges their proposals.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Deserializer, Serialize};

use crate::conflict::ConflictDescriptor;
use crate::constraint::{ConstraintId, Strength, UseCaseId};
use crate::error::AgentError;
use crate::store::{PartialState, StateSnapshot};
use crate::value::ConstraintValue;

/// What an agent is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Pulls requirements out of the input.
    Elicitor,
    /// Maps requirements onto catalog constraints.
    Mapper,
    /// Checks proposals against the current state.
    Validator,
    /// Runs only while a disambiguation is pending.
    Resolver,
}

impl AgentRole {
    /// Returns true for roles that run in a normal round.
    #[must_use]
    pub const fn is_extraction(self) -> bool {
        !matches!(self, Self::Resolver)
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Elicitor => "requirements_elicitor",
            Self::Mapper => "specification_mapper",
            Self::Validator => "constraint_validator",
            Self::Resolver => "resolution_agent",
        };
        f.write_str(s)
    }
}

/// Per-round context handed to every agent.
#[derive(Debug, Clone)]
pub struct AgentContext {
    round: u64,
    deadline: Instant,
    cancelled: Arc<AtomicBool>,
    pending: Arc<[ConflictDescriptor]>,
}

impl AgentContext {
    pub(crate) fn new(round: u64, deadline: Instant, pending: Vec<ConflictDescriptor>) -> Self {
        Self {
            round,
            deadline,
            cancelled: Arc::new(AtomicBool::new(false)),
            pending: pending.into(),
        }
    }

    /// Round number, starting at 1.
    #[must_use]
    pub const fn round(&self) -> u64 {
        self.round
    }

    /// True once the round deadline has passed and the orchestrator gave up
    /// on outstanding agents. Long-running agents should poll this and bail
    /// out with [`AgentError::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Time left before the round deadline.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Conflicts awaiting a user decision.
    #[must_use]
    pub fn pending_conflicts(&self) -> &[ConflictDescriptor] {
        &self.pending
    }

    pub(crate) const fn deadline(&self) -> Instant {
        self.deadline
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// An extraction agent.
pub trait ExtractionAgent: Send + Sync {
    /// Stable identifier, recorded as the source of every proposal.
    fn id(&self) -> &str;

    /// Role used for selection.
    fn role(&self) -> AgentRole;

    /// Processes one input.
    ///
    /// # Errors
    ///
    /// Any error isolates this agent for the round; the others still merge.
    fn process(
        &self,
        input: &str,
        snapshot: &StateSnapshot,
        ctx: &AgentContext,
    ) -> Result<AgentProposal, AgentError>;
}

fn full_confidence() -> f32 {
    1.0
}

/// Accepts either a tagged value or a bare JSON value.
fn lenient_value<'de, D>(deserializer: D) -> Result<ConstraintValue, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    if raw.get("type").is_some() {
        if let Ok(tagged) = serde_json::from_value::<ConstraintValue>(raw.clone()) {
            return Ok(tagged);
        }
    }
    Ok(ConstraintValue::from_json(raw))
}

/// A constraint proposed by an agent. Timestamp and source are stamped by
/// the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintProposal {
    /// Proposed constraint.
    pub id: ConstraintId,
    /// Optional payload, tagged or bare.
    #[serde(default, deserialize_with = "lenient_value")]
    pub value: ConstraintValue,
    /// Priority tier; mandatory when omitted.
    #[serde(default)]
    pub strength: Strength,
    /// Agent confidence in [0, 1]; 1.0 when omitted.
    #[serde(default = "full_confidence")]
    pub confidence: f32,
}

impl ConstraintProposal {
    /// A mandatory proposal with full confidence.
    #[must_use]
    pub fn new(id: impl Into<ConstraintId>) -> Self {
        Self {
            id: id.into(),
            value: ConstraintValue::Null,
            strength: Strength::Mandatory,
            confidence: 1.0,
        }
    }

    /// Sets the strength.
    #[must_use]
    pub fn strength(mut self, strength: Strength) -> Self {
        self.strength = strength;
        self
    }

    /// Sets the confidence.
    #[must_use]
    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Sets the value.
    #[must_use]
    pub fn value(mut self, value: impl Into<ConstraintValue>) -> Self {
        self.value = value.into();
        self
    }
}

/// Use-case votes and constraints proposed in one round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateUpdates {
    /// Vote per use case.
    #[serde(default)]
    pub use_cases: BTreeMap<UseCaseId, f32>,
    /// Proposed constraints, merged in order.
    #[serde(default)]
    pub constraints: Vec<ConstraintProposal>,
}

/// Everything one agent returns for a round.
///
/// Deserializes from the `{"state_updates": {...}}` shape.
///
/// # Examples
///
/// ```
/// use reconcile::orchestrator::AgentProposal;
///
/// let proposal: AgentProposal = serde_json::from_str(r#"{
///     "state_updates": {
///         "use_cases": {"UC3": 0.7},
///         "constraints": [{"id": "CNST_FANLESS", "strength": 4, "confidence": 0.8}]
///     }
/// }"#).unwrap();
/// assert_eq!(proposal.state_updates.constraints.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentProposal {
    /// Votes and constraints.
    #[serde(default)]
    pub state_updates: StateUpdates,

    /// Self-reported confidence for the whole proposal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    /// Why the agent doubts its own output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty_reason: Option<String>,

    /// A whole remote state to merge after the proposals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_state: Option<PartialState>,
}

impl AgentProposal {
    /// An empty proposal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a use-case vote.
    #[must_use]
    pub fn with_use_case(mut self, use_case: impl Into<UseCaseId>, confidence: f32) -> Self {
        self.state_updates
            .use_cases
            .insert(use_case.into(), confidence);
        self
    }

    /// Adds a constraint proposal.
    #[must_use]
    pub fn with_constraint(mut self, proposal: ConstraintProposal) -> Self {
        self.state_updates.constraints.push(proposal);
        self
    }

    /// Sets the self-reported confidence.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Flags the proposal as uncertain.
    #[must_use]
    pub fn with_uncertainty(mut self, reason: impl Into<String>) -> Self {
        self.uncertainty_reason = Some(reason.into());
        self
    }

    /// Attaches a remote state.
    #[must_use]
    pub fn with_full_state(mut self, state: PartialState) -> Self {
        self.full_state = Some(state);
        self
    }

    /// Number of votes and constraints proposed.
    #[must_use]
    pub fn evidence_count(&self) -> usize {
        self.state_updates.use_cases.len() + self.state_updates.constraints.len()
    }

    /// Confidence to feed the aggregator: the reported value, else the mean
    /// of every vote and constraint confidence. `None` for an empty proposal.
    #[must_use]
    pub fn reported_confidence(&self) -> Option<f64> {
        if let Some(c) = self.confidence {
            return Some(c.clamp(0.0, 1.0));
        }
        let values: Vec<f64> = self
            .state_updates
            .use_cases
            .values()
            .copied()
            .chain(self.state_updates.constraints.iter().map(|c| c.confidence))
            .map(f64::from)
            .collect();
        if values.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        Some(mean.clamp(0.0, 1.0))
    }
}

/// What happened to one agent in a round.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// Agent id.
    pub agent_id: String,
    /// Agent role.
    pub role: AgentRole,
    /// Proposal, or why there is none.
    pub result: Result<AgentProposal, AgentError>,
    /// Wall time spent, or the round timeout for agents that never replied.
    pub elapsed: Duration,
}

impl AgentOutcome {
    /// Returns true if the agent produced a proposal.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.result.is_ok()
    }

    /// Returns the error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&AgentError> {
        self.result.as_ref().err()
    }

    /// Returns the proposal, if any.
    #[must_use]
    pub fn proposal(&self) -> Option<&AgentProposal> {
        self.result.as_ref().ok()
    }
}
