//! Application State

use agent_core::Agent;

/// Shared application state
///
/// The agent is cheap to clone: provider and tool registry live behind
/// `Arc`, and every request drives its own conversation.
#[derive(Clone)]
pub struct AppState {
    pub agent: Agent,
}
