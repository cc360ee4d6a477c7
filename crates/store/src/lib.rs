//! # Switchboard Store
//!
//! SQLite persistence for the organizational side of the engine: agents,
//! teams, memberships, conversations, assignment history, round-robin
//! cursors, and key-value settings.
//!
//! Presence and routing-rule tables are owned by their own crates; they
//! share the pool constructed here.

pub mod conversations;
pub mod db;
pub mod directory;
pub mod settings;

pub use conversations::SqliteConversations;
pub use db::Database;
pub use directory::SqliteDirectory;
pub use settings::{Settings, TIMEZONE_KEY};
