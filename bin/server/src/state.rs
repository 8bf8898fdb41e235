//! Shared application state.

use beyond_ops_ai::Orchestrator;
use beyond_ops_conversation::ConversationStore;

/// Everything handlers need, built once at start-up.
pub struct AppState {
    pub store: ConversationStore,
    pub orchestrator: Orchestrator,
    /// Most conversations returned by one list request.
    pub list_limit: usize,
}

impl AppState {
    pub fn new(store: ConversationStore, orchestrator: Orchestrator, list_limit: usize) -> Self {
        Self {
            store,
            orchestrator,
            list_limit,
        }
    }
}
