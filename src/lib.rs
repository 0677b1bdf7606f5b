//! # reconcile - constraint reconciliation for multi-agent requirement capture
//!
//! Several extraction agents read the same user input and each propose
//! technical constraints and use-case votes. This crate merges those
//! proposals into one consistent specification.
//!
//! ## Core Concepts
//!
//! - **ConstraintStore**: LWW map of constraints with mutex-aware auto-resolution
//! - **DependencyGraph**: static REQUIRES/IMPLIES/MUTEX graph with progressive conflict detection
//! - **BeliefNetwork**: posterior over candidate use cases from free-text evidence
//! - **ConfidenceAggregator**: folds per-agent confidence into one actionable number
//! - **Session**: runs agents concurrently and decides what to ask the user next
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use reconcile::{
//!     AgentContext, AgentError, AgentProposal, AgentRole, Catalog, ConstraintProposal,
//!     ExtractionAgent, Session, SessionConfig, StateSnapshot,
//! };
//!
//! struct Keywords;
//!
//! impl ExtractionAgent for Keywords {
//!     fn id(&self) -> &str {
//!         "keywords"
//!     }
//!
//!     fn role(&self) -> AgentRole {
//!         AgentRole::Mapper
//!     }
//!
//!     fn process(
//!         &self,
//!         input: &str,
//!         _snapshot: &StateSnapshot,
//!         _ctx: &AgentContext,
//!     ) -> Result<AgentProposal, AgentError> {
//!         let mut proposal = AgentProposal::new();
//!         if input.contains("outdoor") {
//!             proposal = proposal.with_constraint(ConstraintProposal::new("CNST_OUTDOOR"));
//!         }
//!         Ok(proposal)
//!     }
//! }
//!
//! let agents: Vec<Arc<dyn ExtractionAgent>> = vec![Arc::new(Keywords)];
//! let mut session = Session::new("demo", &Catalog::builtin(), agents, SessionConfig::default())?;
//! let result = session.process_input("an outdoor pump station");
//! assert_eq!(session.get_active_constraints().len(), 1);
//! assert!(result.conflicts.is_empty());
//! # Ok::<(), reconcile::ReconcileError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod catalog;
pub mod conflict;
pub mod constraint;
pub mod error;
pub mod time;
pub mod value;

// Reconciliation components
pub mod aggregate;
pub mod graph;
pub mod inference;
pub mod orchestrator;
pub mod session;
pub mod store;

// Re-export primary types at crate root for convenience
pub use aggregate::{
    AgentConfidence, AggregatedConfidence, AggregationContext, AggregationStrategy,
    AggregatorConfig, ConfidenceAggregator,
};
pub use catalog::Catalog;
pub use conflict::{ConflictDescriptor, ConflictKind, ConflictPath, Resolution, ResolutionRule};
pub use constraint::{Constraint, ConstraintId, Strength, UseCaseId};
pub use error::{
    AgentError, CatalogError, ReconcileError, ReconcileResult, Rejection, ValidationError,
};
pub use graph::{DependencyGraph, RelationType};
pub use inference::{BeliefNetwork, DisambiguationInfo, NetworkConfig};
pub use orchestrator::{
    AgentContext, AgentOutcome, AgentProposal, AgentRole, ConstraintProposal,
    ExecutionOrchestrator, ExtractionAgent, OrchestratorConfig, RoundResult,
};
pub use session::{Disambiguation, ExecutionResult, Session, SessionConfig};
pub use store::{ConstraintStore, PartialState, StateSnapshot, StoreConfig};
pub use time::{Clock, ManualClock, SystemClock};
pub use value::ConstraintValue;
