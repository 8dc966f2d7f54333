//! Service layer: the coordination components.

pub mod agent_manager;
pub mod bounded_map;
pub mod coordinator;
pub mod event_bus;
pub mod priority_queue;
pub mod registry;
pub mod self_healing;

pub use agent_manager::{AgentManager, ManagerStats, SelectionStrategy};
pub use bounded_map::BoundedMap;
pub use coordinator::{CoordinationEngine, CoordinatorStats};
pub use event_bus::{
    CoordinationEvent, EventBus, EventBusConfig, EventCategory, EventPayload, EventSeverity,
};
pub use priority_queue::PriorityQueue;
pub use registry::{AgentRegistry, RegistryStats};
pub use self_healing::{AgentManifest, Criticality, HealingStats, SelfHealingManager};
