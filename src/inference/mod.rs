//! Use-case inference.
//!
//! Sequential belief updates over the catalog's use cases, driven by
//! indicator tokens found in free-text evidence.

mod network;

pub use network::{Belief, BeliefNetwork, DisambiguationInfo, NetworkConfig, UseCaseNode};
