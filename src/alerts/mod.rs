//! Exception alerting
//!
//! Tracks which groups sit in an exception stage, renders the tracked set
//! and notifies when a group appears or its count moves.

pub mod checker;
pub mod config;
pub mod format;
pub mod notifier;
pub mod tracker;

pub use checker::{CheckerHandle, CycleOutcome, ExceptionChecker};
pub use config::{EmailSettings, NotifyTarget};
pub use format::{render_table, AlertMessage};
pub use notifier::{AlertChannel, Notifier, NotifierError};
pub use tracker::{Change, Observation, StateTracker, Step, TrackedSet};
