//! # Switchboard Core
//!
//! Domain types, traits, and error definitions for the Switchboard presence
//! and routing engine. This crate has **zero framework dependencies** — it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod conversation;
pub mod directory;
pub mod error;
pub mod event;
pub mod ids;
pub mod presence;
pub mod routing;

// Re-export key types at crate root for ergonomics
pub use conversation::{
    Conversation, ConversationAssignment, Conversations, InboundMessage, NewAssignment,
};
pub use directory::{Agent, Directory, Team};
pub use error::{
    AssignmentError, Error, ErrorKind, PresenceError, Result, RoutingError, StoreError,
};
pub use event::{DomainEvent, EventBus};
pub use ids::{AgentId, ConversationId, RuleId, TeamId};
pub use presence::{
    AgentPresence, AgentStatus, LiveLocation, LocationPing, PresenceEvent, PresenceSource,
    StatusSeconds,
};
pub use routing::{MatchMode, RoutingDecision, RoutingRule, RuleConfig, Strategy};
