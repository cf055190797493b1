//! Exception state tracking
//!
//! The tracker remembers which groups are currently in an exception stage
//! and decides, for each new snapshot, whether anything changed enough to
//! alert on. Each step builds the next [`TrackedSet`] from the previous one
//! plus the snapshot; the previous set is never mutated.
//!
//! Per group the states are `absent` and `tracked`:
//!
//! - `absent -> tracked` when an exception row for the group first appears (alerts)
//! - `tracked -> tracked` when the exception row repeats; alerts only if the count changed
//! - `tracked -> absent` for every group at once, on a cycle whose rows contain
//!   no exception row at all (never alerts)

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::source::SnapshotRow;

/// Marker substring identifying an exception stage
pub const DEFAULT_EXCEPTION_MARKER: &str = "Exceptions";

/// Last-seen state of one tracked group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub count: u64,
    #[serde(rename = "state")]
    pub stage_label: String,
    #[serde(rename = "project")]
    pub group_key: String,
}

impl From<&SnapshotRow> for Observation {
    fn from(row: &SnapshotRow) -> Self {
        Self {
            count: row.count,
            stage_label: row.stage_label.clone(),
            group_key: row.group_key.clone(),
        }
    }
}

/// Groups currently in exception, in first-seen order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackedSet {
    entries: IndexMap<String, Observation>,
}

impl TrackedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, group_key: &str) -> Option<&Observation> {
        self.entries.get(group_key)
    }

    pub fn contains(&self, group_key: &str) -> bool {
        self.entries.contains_key(group_key)
    }

    /// Observations in first-seen order
    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.entries.values()
    }

    pub fn to_vec(&self) -> Vec<Observation> {
        self.entries.values().cloned().collect()
    }
}

impl Serialize for TrackedSet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_seq(self.entries.values())
    }
}

/// A state transition produced by a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Group entered the exception stage
    Added { group_key: String, count: u64 },
    /// Tracked group's count moved
    CountChanged {
        group_key: String,
        from: u64,
        to: u64,
    },
    /// No exception rows this cycle; every tracked group dropped
    Cleared { groups: usize },
}

impl Change {
    pub fn is_alerting(&self) -> bool {
        !matches!(self, Change::Cleared { .. })
    }
}

/// Result of applying one snapshot
#[derive(Debug, Clone)]
pub struct Step {
    /// Tracked set after the snapshot
    pub next: TrackedSet,
    /// Whether this snapshot warrants an alert
    pub alert: bool,
    pub changes: Vec<Change>,
}

/// Diffs snapshots against the tracked set
#[derive(Debug, Clone)]
pub struct StateTracker {
    marker: String,
}

impl StateTracker {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Case-sensitive substring match against the marker
    pub fn is_exception(&self, stage_label: &str) -> bool {
        stage_label.contains(self.marker.as_str())
    }

    /// Apply one snapshot to `current`.
    ///
    /// `None` means the fetch failed. A failed or empty snapshot leaves the
    /// tracked set as it was and never alerts.
    pub fn step(&self, current: &TrackedSet, snapshot: Option<&[SnapshotRow]>) -> Step {
        let rows = match snapshot {
            Some(rows) if !rows.is_empty() => rows,
            _ => return Self::unchanged(current),
        };

        let mut next = current.clone();
        let mut changes = Vec::new();
        let mut saw_exception = false;

        for row in rows.iter().filter(|r| self.is_exception(&r.stage_label)) {
            saw_exception = true;

            match next.entries.get_mut(&row.group_key) {
                None => {
                    next.entries
                        .insert(row.group_key.clone(), Observation::from(row));
                    changes.push(Change::Added {
                        group_key: row.group_key.clone(),
                        count: row.count,
                    });
                }
                // The stored label is left alone when only the stage text differs
                Some(tracked) if tracked.count != row.count => {
                    changes.push(Change::CountChanged {
                        group_key: row.group_key.clone(),
                        from: tracked.count,
                        to: row.count,
                    });
                    tracked.count = row.count;
                }
                Some(_) => {}
            }
        }

        if !saw_exception && !next.is_empty() {
            changes.push(Change::Cleared {
                groups: next.len(),
            });
            next.entries.clear();
        }

        let alert = changes.iter().any(Change::is_alerting);
        Step {
            next,
            alert,
            changes,
        }
    }

    fn unchanged(current: &TrackedSet) -> Step {
        Step {
            next: current.clone(),
            alert: false,
            changes: Vec::new(),
        }
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new(DEFAULT_EXCEPTION_MARKER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(count: u64, stage: &str, group: &str) -> SnapshotRow {
        SnapshotRow::new(count, stage, group)
    }

    fn tracked(rows: &[SnapshotRow]) -> TrackedSet {
        StateTracker::default().step(&TrackedSet::new(), Some(rows)).next
    }

    #[test]
    fn test_marker_is_case_sensitive_substring() {
        let tracker = StateTracker::default();
        assert!(tracker.is_exception("Exceptions"));
        assert!(tracker.is_exception("In Exceptions Review"));
        assert!(!tracker.is_exception("exceptions"));
        assert!(!tracker.is_exception("Exception"));
        assert!(!tracker.is_exception("Processing"));
    }

    #[test]
    fn test_custom_marker() {
        let tracker = StateTracker::new("Held");
        let step = tracker.step(&TrackedSet::new(), Some(&[row(2, "On Held Queue", "Alpha")]));
        assert!(step.alert);
        assert!(step.next.contains("Alpha"));
    }

    #[test]
    fn test_new_group_alerts() {
        let tracker = StateTracker::default();
        let current = tracked(&[row(3, "Exceptions", "Alpha")]);

        let step = tracker.step(
            &current,
            Some(&[row(3, "Exceptions", "Alpha"), row(1, "Exceptions", "Beta")]),
        );

        assert!(step.alert);
        assert_eq!(step.next.len(), current.len() + 1);
        assert_eq!(
            step.next.get("Beta"),
            Some(&Observation {
                count: 1,
                stage_label: "Exceptions".to_string(),
                group_key: "Beta".to_string(),
            })
        );
        assert_eq!(
            step.changes,
            vec![Change::Added {
                group_key: "Beta".to_string(),
                count: 1
            }]
        );
    }

    #[test]
    fn test_repeat_with_same_count_is_silent() {
        let tracker = StateTracker::default();
        let current = tracked(&[row(3, "Exceptions", "Alpha")]);

        let step = tracker.step(&current, Some(&[row(3, "Exceptions", "Alpha")]));

        assert!(!step.alert);
        assert_eq!(step.next, current);
        assert!(step.changes.is_empty());
    }

    #[test]
    fn test_count_change_updates_count_only() {
        let tracker = StateTracker::default();
        let current = tracked(&[row(3, "In Exceptions Review", "Alpha")]);

        let step = tracker.step(&current, Some(&[row(5, "Exceptions Hold", "Alpha")]));

        assert!(step.alert);
        let obs = step.next.get("Alpha").unwrap();
        assert_eq!(obs.count, 5);
        assert_eq!(obs.stage_label, "In Exceptions Review");
        assert_eq!(
            step.changes,
            vec![Change::CountChanged {
                group_key: "Alpha".to_string(),
                from: 3,
                to: 5
            }]
        );
    }

    #[test]
    fn test_label_only_change_is_ignored() {
        let tracker = StateTracker::default();
        let current = tracked(&[row(3, "In Exceptions Review", "Alpha")]);

        let step = tracker.step(&current, Some(&[row(3, "Exceptions Hold", "Alpha")]));

        assert!(!step.alert);
        assert_eq!(step.next, current);
    }

    #[test]
    fn test_all_clear_empties_without_alert() {
        let tracker = StateTracker::default();
        let current = tracked(&[row(3, "Exceptions", "Alpha"), row(2, "Exceptions", "Beta")]);

        let step = tracker.step(&current, Some(&[row(1, "Processing", "Gamma")]));

        assert!(!step.alert);
        assert!(step.next.is_empty());
        assert_eq!(step.changes, vec![Change::Cleared { groups: 2 }]);
    }

    #[test]
    fn test_non_exception_row_does_not_remove_single_group() {
        let tracker = StateTracker::default();
        let current = tracked(&[row(3, "Exceptions", "Alpha"), row(2, "Exceptions", "Beta")]);

        let step = tracker.step(
            &current,
            Some(&[row(3, "Exceptions", "Alpha"), row(2, "Processing", "Beta")]),
        );

        assert!(!step.alert);
        assert_eq!(step.next, current);
    }

    #[test]
    fn test_failure_and_empty_snapshot_freeze_state() {
        let tracker = StateTracker::default();
        let current = tracked(&[row(3, "Exceptions", "Alpha")]);

        let failed = tracker.step(&current, None);
        assert!(!failed.alert);
        assert_eq!(failed.next, current);

        let empty = tracker.step(&current, Some(&[]));
        assert!(!empty.alert);
        assert_eq!(empty.next, current);
    }

    #[test]
    fn test_step_does_not_mutate_previous_set() {
        let tracker = StateTracker::default();
        let current = tracked(&[row(3, "Exceptions", "Alpha")]);
        let before = current.clone();

        let _ = tracker.step(&current, Some(&[row(9, "Exceptions", "Alpha")]));
        let _ = tracker.step(&current, Some(&[row(1, "Processing", "Alpha")]));

        assert_eq!(current, before);
    }

    #[test]
    fn test_duplicate_group_rows_in_one_snapshot() {
        let tracker = StateTracker::default();

        let step = tracker.step(
            &TrackedSet::new(),
            Some(&[
                row(3, "Exceptions", "Alpha"),
                row(4, "In Exceptions Review", "Alpha"),
            ]),
        );

        assert!(step.alert);
        assert_eq!(step.next.len(), 1);
        let obs = step.next.get("Alpha").unwrap();
        assert_eq!(obs.count, 4);
        assert_eq!(obs.stage_label, "Exceptions");
    }

    #[test]
    fn test_group_keys_match_exactly() {
        let tracker = StateTracker::default();
        let current = tracked(&[row(3, "Exceptions", "AlphaBeta")]);

        let step = tracker.step(&current, Some(&[row(7, "Exceptions", "Alpha")]));

        assert_eq!(step.next.len(), 2);
        assert_eq!(step.next.get("AlphaBeta").unwrap().count, 3);
        assert_eq!(step.next.get("Alpha").unwrap().count, 7);
    }

    #[test]
    fn test_iteration_is_first_seen_order() {
        let tracker = StateTracker::default();
        let current = tracked(&[row(1, "Exceptions", "Zulu"), row(1, "Exceptions", "Alpha")]);
        let step = tracker.step(
            &current,
            Some(&[row(2, "Exceptions", "Alpha"), row(1, "Exceptions", "Mike")]),
        );

        let keys: Vec<&str> = step.next.iter().map(|o| o.group_key.as_str()).collect();
        assert_eq!(keys, vec!["Zulu", "Alpha", "Mike"]);
    }

    #[test]
    fn test_end_to_end_sequence() {
        let tracker = StateTracker::default();
        let mut state = TrackedSet::new();

        let step = tracker.step(&state, Some(&[row(3, "In Exceptions Review", "Alpha")]));
        assert!(step.alert);
        assert_eq!(step.next.get("Alpha").unwrap().count, 3);
        state = step.next;

        let step = tracker.step(&state, Some(&[row(3, "In Exceptions Review", "Alpha")]));
        assert!(!step.alert);
        assert_eq!(step.next, state);
        state = step.next;

        let step = tracker.step(&state, Some(&[row(5, "In Exceptions Review", "Alpha")]));
        assert!(step.alert);
        assert_eq!(step.next.get("Alpha").unwrap().count, 5);
        state = step.next;

        let step = tracker.step(&state, Some(&[row(1, "Processing", "Alpha")]));
        assert!(!step.alert);
        assert!(step.next.is_empty());
    }

    #[test]
    fn test_serializes_with_column_names() {
        let set = tracked(&[row(3, "Exceptions", "Alpha")]);
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{ "count": 3, "state": "Exceptions", "project": "Alpha" }])
        );
    }
}
