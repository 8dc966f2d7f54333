//! Ports (trait interfaces) decoupling the services from their environment.

pub mod channel;
pub mod decomposer;
pub mod recovery;
pub mod runner;

pub use channel::MessageChannel;
pub use decomposer::{TaskDecomposer, TaskRouter};
pub use recovery::{AgentLifecycle, AlertSink, Discovery};
pub use runner::AgentRunner;
