//! Agent messaging port used by the coordination engine.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::CoordinationResult;

/// Request/response channel to a registered agent.
///
/// The coordination engine addresses subtasks and compensation actions to
/// specific agents through this seam; the caller applies its own timeout
/// around `send_request`.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Send a request to the given agent and wait for its response payload.
    async fn send_request(
        &self,
        agent_id: Uuid,
        action: &str,
        payload: Value,
    ) -> CoordinationResult<Value>;
}
