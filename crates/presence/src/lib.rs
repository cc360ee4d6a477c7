//! # Switchboard Presence
//!
//! Agent availability tracking: the heartbeat state machine, the
//! append-only presence event ledger, shift windows, and time-in-status
//! reporting.
//!
//! The raw pieces (heartbeat status, manual override, last-seen time) are
//! persisted; the **effective** status is always derived at read time, so
//! staleness needs no background timer.

pub mod ledger;
pub mod machine;
pub mod report;
pub mod service;
pub mod shift;

pub use machine::{effective_status, is_presence_eligible};
pub use report::{ShiftActivity, TimeInStatusAggregator};
pub use service::{LocationHeartbeat, PresenceOptions, PresenceStore, PresenceUpdate};
pub use shift::{current_window, ShiftName, ShiftWindow, TimezoneResolver};
