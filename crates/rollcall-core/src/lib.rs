//! rollcall-core — Attendance session controller.
//!
//! Matches observed face descriptors against a class roster, gates capture to
//! a daily time window, and records each student present at most once per
//! class per day while keeping a present/absent summary up to date.

pub mod controller;
pub mod encoder;
pub mod gate;
pub mod ledger;
pub mod matcher;
pub mod roster;
pub mod types;

pub use controller::{
    AttendanceController, AttendanceSink, CaptureError, CaptureSource, ControllerSettings,
    FrameOutcome, FrameReport, RunStats,
};
pub use encoder::{EncodeError, FaceEncoder, ReferenceImage, SidecarEncoder};
pub use gate::{is_open, parse_time_of_day, TimeWindow, WindowError};
pub use ledger::Session;
pub use matcher::{DistanceMetric, Euclidean, Matcher, NearestMatcher, DEFAULT_MATCH_THRESHOLD};
pub use roster::{LoadReport, RosterError, RosterLoader};
pub use types::{
    AttendanceEvent, AttendanceStatus, BoundingBox, Descriptor, FaceObservation, Frame,
    MatchResult, PersistRecord, Roster, SessionSummary, Student, DATE_FORMAT, TIMESTAMP_FORMAT,
};
