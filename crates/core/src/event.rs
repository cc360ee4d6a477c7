//! Domain event system — decoupled communication between bounded contexts.
//!
//! Events are published when something interesting happens in the system.
//! Other components can subscribe to react without tight coupling.
//! Delivery is best-effort: presence and assignment state is already
//! committed before the event goes out, and a lost event is never an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::presence::{AgentStatus, PresenceSource};

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// An agent's effective status transitioned. Emitted only on actual
    /// transitions, never on same-status heartbeats.
    PresenceChanged {
        agent_id: String,
        status: AgentStatus,
        source: PresenceSource,
        timestamp: DateTime<Utc>,
    },

    /// A conversation was bound to an agent and/or team.
    ConversationAssigned {
        conversation_id: String,
        agent_id: Option<String>,
        team_id: Option<String>,
        assigned_by_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// All active assignments on a conversation were cleared.
    ConversationUnassigned {
        conversation_id: String,
        timestamp: DateTime<Utc>,
    },

    /// An automatic assignment dropped its agent and kept only the team.
    AssignmentDegraded {
        conversation_id: String,
        dropped_agent_id: String,
        team_id: Option<String>,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
