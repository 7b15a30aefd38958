//! Application services implementing the swarm runtime's core subsystems.

pub mod blackboard;
pub mod collaboration;
pub mod learning_store;
pub mod message_bus;
pub mod task_delegation;

pub use blackboard::{Blackboard, BlackboardHandler, BlackboardStats, BlackboardStore, PublishOptions};
pub use collaboration::{CollaborationManager, CollaborationTimeouts};
pub use learning_store::LearningStore;
pub use message_bus::{
    BusStats, CircuitBreakerConfig, MessageBus, MessageHandler, DEFAULT_FAILURE_THRESHOLD,
    DEFAULT_RESET_TIMEOUT,
};
pub use task_delegation::{TaskDelegationManager, TaskDelegationStats};
