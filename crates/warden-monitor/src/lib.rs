//! Warden Monitor
//!
//! The stateful core above the transport: one connection supervisor per
//! server profile, a roster tracker that turns polled player lists into
//! join/leave events, the single-writer playtime store, and the scheduler
//! that drives every periodic task independently.

pub mod playtime;
pub mod roster;
pub mod scheduler;
pub mod supervisor;

pub use playtime::{PlaytimeRecord, PlaytimeStore, RecoveryPolicy, StoreHandle};
pub use roster::{diff, parser_for, PlayerListParser, RosterTracker};
pub use scheduler::{MaintenanceTask, ScheduleConfig, Scheduler};
pub use supervisor::{ConnectionSupervisor, SupervisorConfig};
