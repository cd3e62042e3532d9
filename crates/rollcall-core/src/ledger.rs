//! Per-session attendance ledger.
//!
//! A [`Session`] covers one class on one calendar date. It remembers the first
//! time each student was seen and emits at most one [`AttendanceEvent`] per
//! student. The ledger does no I/O: callers persist the returned event and the
//! recomputed summary themselves.

use crate::types::{AttendanceEvent, Roster, SessionSummary};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
pub struct Session {
    class_id: String,
    date: NaiveDate,
    /// student id -> first-seen timestamp. The key set is the set of marked ids.
    present: BTreeMap<String, NaiveDateTime>,
}

impl Session {
    pub fn new(class_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            class_id: class_id.into(),
            date,
            present: BTreeMap::new(),
        }
    }

    /// Rebuild a session from events that were already persisted for it.
    ///
    /// Events from another date are ignored; for repeated students the earliest
    /// timestamp wins.
    pub fn restore<'a>(
        class_id: impl Into<String>,
        date: NaiveDate,
        events: impl IntoIterator<Item = &'a AttendanceEvent>,
    ) -> Self {
        let mut session = Self::new(class_id, date);
        for event in events {
            if event.timestamp.date() != date {
                tracing::debug!(
                    student = %event.student_id,
                    timestamp = %event.timestamp,
                    "ignoring persisted event from another date"
                );
                continue;
            }
            session
                .present
                .entry(event.student_id.clone())
                .and_modify(|ts| *ts = (*ts).min(event.timestamp))
                .or_insert(event.timestamp);
        }
        session
    }

    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn is_marked(&self, student_id: &str) -> bool {
        self.present.contains_key(student_id)
    }

    pub fn marked_count(&self) -> usize {
        self.present.len()
    }

    /// First-seen timestamp for a student, if marked.
    pub fn first_seen(&self, student_id: &str) -> Option<NaiveDateTime> {
        self.present.get(student_id).copied()
    }

    /// Mark a student present.
    ///
    /// Returns the new event, or `None` if the student was already marked in
    /// this session. The first timestamp is kept.
    pub fn record_presence(
        &mut self,
        student_id: &str,
        timestamp: NaiveDateTime,
    ) -> Option<AttendanceEvent> {
        if self.present.contains_key(student_id) {
            return None;
        }
        self.present.insert(student_id.to_string(), timestamp);
        Some(AttendanceEvent::present(student_id, timestamp))
    }

    /// Recompute the summary from scratch against the full roster.
    ///
    /// Marked ids that are not on the roster are left out so that present and
    /// absent always partition the roster.
    pub fn compute_summary(&self, roster: &Roster) -> SessionSummary {
        let mut present_students = BTreeMap::new();
        let mut absent_students = BTreeSet::new();

        for id in roster.ids() {
            match self.present.get(id) {
                Some(ts) => {
                    present_students.insert(id.to_string(), *ts);
                }
                None => {
                    absent_students.insert(id.to_string());
                }
            }
        }

        let last_updated = present_students.values().max().copied();

        SessionSummary {
            total_students: present_students.len() + absent_students.len(),
            total_present: present_students.len(),
            total_absent: absent_students.len(),
            present_students,
            absent_students,
            last_updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Descriptor, Student};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        date().and_hms_opt(h, m, s).unwrap()
    }

    fn roster(ids: &[&str]) -> Roster {
        let mut roster = Roster::new("class A");
        for id in ids {
            roster.insert(Student {
                id: id.to_string(),
                descriptor: Descriptor::new(vec![0.0]),
            });
        }
        roster
    }

    fn assert_partition(summary: &SessionSummary, roster: &Roster) {
        assert_eq!(
            summary.total_present + summary.total_absent,
            summary.total_students
        );
        assert_eq!(summary.total_students, roster.len());
        for id in summary.present_students.keys() {
            assert!(!summary.absent_students.contains(id));
        }
        for id in roster.ids() {
            assert!(
                summary.present_students.contains_key(id) || summary.absent_students.contains(id)
            );
        }
    }

    #[test]
    fn test_record_presence_is_idempotent() {
        let mut session = Session::new("class A", date());
        let first = session.record_presence("alice", at(9, 5, 0));
        let second = session.record_presence("alice", at(9, 5, 2));

        assert_eq!(first, Some(AttendanceEvent::present("alice", at(9, 5, 0))));
        assert_eq!(second, None);
        assert_eq!(session.first_seen("alice"), Some(at(9, 5, 0)));
        assert_eq!(session.marked_count(), 1);
    }

    #[test]
    fn test_empty_session_summary() {
        let roster = roster(&["alice", "bob"]);
        let summary = Session::new("class A", date()).compute_summary(&roster);
        assert_eq!(summary.total_present, 0);
        assert_eq!(summary.total_absent, 2);
        assert_eq!(summary.last_updated, None);
        assert_partition(&summary, &roster);
    }

    #[test]
    fn test_summary_tracks_presence() {
        let roster = roster(&["alice", "bob"]);
        let mut session = Session::new("class A", date());

        session.record_presence("alice", at(9, 5, 0));
        let summary = session.compute_summary(&roster);
        assert_eq!(summary.total_present, 1);
        assert_eq!(summary.total_absent, 1);
        assert_eq!(summary.present_students.get("alice"), Some(&at(9, 5, 0)));
        assert!(summary.absent_students.contains("bob"));
        assert_eq!(summary.last_updated, Some(at(9, 5, 0)));
        assert_partition(&summary, &roster);

        session.record_presence("bob", at(9, 6, 0));
        let summary = session.compute_summary(&roster);
        assert_eq!(summary.total_present, 2);
        assert_eq!(summary.total_absent, 0);
        assert_eq!(summary.last_updated, Some(at(9, 6, 0)));
        assert_partition(&summary, &roster);
    }

    #[test]
    fn test_summary_ignores_ids_not_on_roster() {
        let roster = roster(&["alice"]);
        let mut session = Session::new("class A", date());
        session.record_presence("mallory", at(9, 1, 0));

        let summary = session.compute_summary(&roster);
        assert_eq!(summary.total_students, 1);
        assert_eq!(summary.total_present, 0);
        assert!(!summary.present_students.contains_key("mallory"));
        assert_partition(&summary, &roster);
    }

    #[test]
    fn test_restore_keeps_earliest_and_skips_other_dates() {
        let yesterday = NaiveDate::from_ymd_opt(2024, 3, 3)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let events = vec![
            AttendanceEvent::present("alice", at(9, 10, 0)),
            AttendanceEvent::present("alice", at(9, 5, 0)),
            AttendanceEvent::present("bob", yesterday),
        ];

        let mut session = Session::restore("class A", date(), &events);
        assert_eq!(session.first_seen("alice"), Some(at(9, 5, 0)));
        assert!(!session.is_marked("bob"));
        assert_eq!(session.record_presence("alice", at(11, 0, 0)), None);
        assert!(session.record_presence("bob", at(11, 0, 0)).is_some());
    }
}
