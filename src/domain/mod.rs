//! Domain layer: core business logic and models for the swarm runtime.

pub mod models;
pub mod swarm_errors;

pub use swarm_errors::{
    BlackboardError, BusError, CollaborationError, OrchestratorError, RunContextError,
    TaskDelegationError,
};
