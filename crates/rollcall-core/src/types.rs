use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Storage rendering of event timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Storage rendering of session dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Frame-relative bounding box of a detected face. Only used for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Face descriptor (feature vector) produced by the external encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DescriptorRepr")]
pub struct Descriptor {
    pub values: Vec<f32>,
}

/// Sidecar files and capture lines carry either a bare array or `{"values": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum DescriptorRepr {
    Bare(Vec<f32>),
    Wrapped { values: Vec<f32> },
}

impl From<DescriptorRepr> for Descriptor {
    fn from(repr: DescriptorRepr) -> Self {
        match repr {
            DescriptorRepr::Bare(values) | DescriptorRepr::Wrapped { values } => Self { values },
        }
    }
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance between two descriptors.
    ///
    /// Descriptors of different dimension are never comparable and yield +inf.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A known student: identity plus reference descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub descriptor: Descriptor,
}

/// The set of students enrolled in one class.
///
/// Identities are unique. Iteration follows insertion order, which is also the
/// gallery order the matcher uses to break ties.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    class_id: String,
    students: Vec<Student>,
}

impl Roster {
    pub fn new(class_id: impl Into<String>) -> Self {
        Self {
            class_id: class_id.into(),
            students: Vec::new(),
        }
    }

    /// Add a student. Returns `false` (and keeps the existing entry) if the id is taken.
    pub fn insert(&mut self, student: Student) -> bool {
        if self.contains(&student.id) {
            return false;
        }
        self.students.push(student);
        true
    }

    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    pub fn contains(&self, id: &str) -> bool {
        self.students.iter().any(|s| s.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.students.iter().map(|s| s.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }
}

/// A single detected face in a captured frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceObservation {
    pub descriptor: Descriptor,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
}

/// One captured frame, already reduced to face observations by the detection pipeline.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Local wall-clock time the frame was captured.
    pub captured_at: NaiveDateTime,
    pub faces: Vec<FaceObservation>,
}

/// Result of matching an observed descriptor against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Matched student, or `None` for an unknown face.
    pub student_id: Option<String>,
    /// Distance to the best candidate, in [0, inf]. Lower is more similar.
    pub distance: f32,
}

impl MatchResult {
    pub fn unknown(distance: f32) -> Self {
        Self {
            student_id: None,
            distance,
        }
    }

    pub fn is_match(&self) -> bool {
        self.student_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A student was seen during the attendance window. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub student_id: String,
    pub timestamp: NaiveDateTime,
    pub status: AttendanceStatus,
}

impl AttendanceEvent {
    pub fn present(student_id: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        Self {
            student_id: student_id.into(),
            timestamp,
            status: AttendanceStatus::Present,
        }
    }
}

/// Present/absent breakdown for one session, always recomputed from the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_students: usize,
    pub total_present: usize,
    pub total_absent: usize,
    pub present_students: BTreeMap<String, NaiveDateTime>,
    pub absent_students: BTreeSet<String>,
    /// Timestamp of the most recent present event, `None` while nobody is present.
    pub last_updated: Option<NaiveDateTime>,
}

/// A unit of work for the persistence layer.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistRecord {
    Roster {
        class_id: String,
        student_ids: Vec<String>,
    },
    Event {
        class_id: String,
        date: NaiveDate,
        event: AttendanceEvent,
    },
    Summary {
        class_id: String,
        date: NaiveDate,
        summary: SessionSummary,
    },
}

impl PersistRecord {
    /// Short label for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            PersistRecord::Roster { .. } => "roster",
            PersistRecord::Event { .. } => "event",
            PersistRecord::Summary { .. } => "summary",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(id: &str, values: Vec<f32>) -> Student {
        Student {
            id: id.into(),
            descriptor: Descriptor::new(values),
        }
    }

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Descriptor::new(vec![0.1, 0.2, 0.3]);
        assert!(a.euclidean_distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_known_value() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_dimension_mismatch() {
        let a = Descriptor::new(vec![1.0, 0.0]);
        let b = Descriptor::new(vec![1.0, 0.0, 0.0]);
        assert_eq!(a.euclidean_distance(&b), f32::INFINITY);
    }

    #[test]
    fn test_descriptor_accepts_bare_and_wrapped_json() {
        let bare: Descriptor = serde_json::from_str("[0.5, 0.25]").unwrap();
        let wrapped: Descriptor = serde_json::from_str(r#"{"values": [0.5, 0.25]}"#).unwrap();
        assert_eq!(bare, wrapped);
        assert_eq!(bare.values, vec![0.5, 0.25]);
    }

    #[test]
    fn test_roster_rejects_duplicate_ids() {
        let mut roster = Roster::new("class A");
        assert!(roster.insert(student("alice", vec![1.0])));
        assert!(!roster.insert(student("alice", vec![2.0])));
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.students()[0].descriptor.values, vec![1.0]);
    }

    #[test]
    fn test_roster_preserves_insertion_order() {
        let mut roster = Roster::new("class A");
        roster.insert(student("carol", vec![]));
        roster.insert(student("alice", vec![]));
        roster.insert(student("bob", vec![]));
        assert_eq!(roster.ids().collect::<Vec<_>>(), vec!["carol", "alice", "bob"]);
    }
}
