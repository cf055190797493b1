//! Stagewatch: Exception Stage Monitor
//!
//! A long-running daemon that periodically queries a database for item counts
//! grouped by processing stage and project, remembers which projects have
//! items in an exception stage, and sends an alert when a project enters that
//! stage or its count changes.
//!
//! # Features
//!
//! - **Debounced Alerts**: Repeated identical snapshots stay silent
//! - **All-Clear Reset**: Tracked state drops once no exception rows remain
//! - **Failure Tolerance**: Source and delivery failures skip a cycle, never the daemon
//! - **Prompt Shutdown**: Stop requests are honoured without waiting out the interval
//! - **Notification Targets**: SMTP, webhook and log
//!
//! # Example
//!
//! ```
//! use stagewatch::alerts::{StateTracker, TrackedSet};
//! use stagewatch::source::SnapshotRow;
//!
//! let tracker = StateTracker::default();
//! let rows = vec![SnapshotRow::new(3, "In Exceptions Review", "Alpha")];
//!
//! let step = tracker.step(&TrackedSet::new(), Some(&rows));
//! assert!(step.alert);
//! assert_eq!(step.next.get("Alpha").unwrap().count, 3);
//! ```

pub mod alerts;
pub mod config;
pub mod service;
pub mod source;

// Re-export commonly used types
pub use alerts::{ExceptionChecker, Notifier, StateTracker, TrackedSet};
pub use config::{ConfigError, MonitorConfig};
pub use source::{SnapshotRow, SnapshotSource, SourceError, SqlSnapshotSource};
