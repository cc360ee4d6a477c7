//! # Switchboard Routing
//!
//! Turns an inbound message into an assignment. Each stage is its own
//! module:
//!
//! - [`rules`]: persisted routing rules and the matching predicate
//! - [`select`]: picking one agent from the eligible pool (round-robin
//!   with a durable cursor, or least-loaded)
//! - [`engine`]: first-match-wins evaluation producing a [`RoutingDecision`]
//! - [`assign`]: the gateway every assignment goes through, manual or
//!   automatic, where availability is enforced
//!
//! Only agents with fresh, override-free presence are ever selected.

pub mod assign;
pub mod engine;
pub mod rules;
pub mod select;

pub use assign::{AssignmentGateway, AssignmentOutcome, AssignmentRequest};
pub use engine::RoutingRuleEngine;
pub use rules::{rule_matches, RuleStore};
pub use select::{least_loaded, round_robin};

pub use switchboard_core::routing::RoutingDecision;
