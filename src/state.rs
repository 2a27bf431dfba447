use tokio::sync::broadcast;

use crate::llm::CompletionClient;
use crate::protocol::ChatMessage;

/// Capacity of the shared broadcast channel. A receiver that falls this far
/// behind starts skipping messages.
const BROADCAST_CAPACITY: usize = 256;

/// Shared relay state: the global recipient set (broadcast subscribers)
/// and the completion client.
#[derive(Clone)]
pub struct AppState {
    pub broadcast: broadcast::Sender<ChatMessage>,
    pub completion: CompletionClient,
}

impl AppState {
    pub fn new(completion: CompletionClient) -> Self {
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            broadcast,
            completion,
        }
    }
}
