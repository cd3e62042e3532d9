//! Frame-by-frame attendance orchestration.
//!
//! Ties a capture source, the time window, a matcher, the session ledger and a
//! persistence sink together. Runs on a single thread and owns the session
//! exclusively; persistence is handed off and never awaited.

use crate::gate::TimeWindow;
use crate::ledger::Session;
use crate::matcher::{Matcher, DEFAULT_MATCH_THRESHOLD};
use crate::types::{AttendanceEvent, Frame, PersistRecord, Roster, SessionSummary};
use chrono::NaiveDateTime;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("malformed frame on line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("frame dropped: {0}")]
    Dropped(String),
}

/// Source of captured frames.
pub trait CaptureSource {
    /// `Ok(None)` ends the stream. `Err` is a dropped frame; the caller skips it.
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;
}

/// Fire-and-forget destination for persistence records. Must not block.
pub trait AttendanceSink {
    fn submit(&self, record: PersistRecord);
}

impl<S: AttendanceSink + ?Sized> AttendanceSink for &S {
    fn submit(&self, record: PersistRecord) {
        (**self).submit(record)
    }
}

impl<S: AttendanceSink + ?Sized> AttendanceSink for Arc<S> {
    fn submit(&self, record: PersistRecord) {
        (**self).submit(record)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    pub threshold: f32,
    pub window: TimeWindow,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            window: TimeWindow::default(),
        }
    }
}

/// What happened to one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Captured outside the attendance window; nothing was recorded.
    OutsideWindow,
    Processed(FrameReport),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub faces: usize,
    pub unknown: usize,
    /// New present events; re-detections of marked students are not included.
    pub events: Vec<AttendanceEvent>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub frames: usize,
    pub dropped: usize,
    pub outside_window: usize,
    pub faces: usize,
    pub unknown_faces: usize,
    pub events: usize,
}

pub struct AttendanceController<M, S> {
    roster: Roster,
    matcher: M,
    sink: S,
    settings: ControllerSettings,
    session: Option<Session>,
    window_open: Option<bool>,
}

impl<M: Matcher, S: AttendanceSink> AttendanceController<M, S> {
    pub fn new(roster: Roster, matcher: M, sink: S, settings: ControllerSettings) -> Self {
        Self {
            roster,
            matcher,
            sink,
            settings,
            session: None,
            window_open: None,
        }
    }

    /// Resume a session whose events were already persisted.
    ///
    /// Only used while frames keep the session's date; a new date starts afresh.
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Summary of the current session, if one has started.
    pub fn summary(&self) -> Option<SessionSummary> {
        self.session.as_ref().map(|s| s.compute_summary(&self.roster))
    }

    /// Hand the roster to the sink.
    pub fn publish_roster(&self) {
        self.sink.submit(PersistRecord::Roster {
            class_id: self.roster.class_id().to_string(),
            student_ids: self.roster.ids().map(str::to_string).collect(),
        });
    }

    pub fn process_frame(&mut self, frame: &Frame) -> FrameOutcome {
        let now = frame.captured_at;
        let open = self.settings.window.is_open(now.time());
        self.note_window(open, now);
        if !open {
            return FrameOutcome::OutsideWindow;
        }

        let date = now.date();
        if let Some(session) = self.session.as_ref().filter(|s| s.date() != date) {
            tracing::info!(
                class = %session.class_id(),
                from = %session.date(),
                to = %date,
                "date changed; starting a new session"
            );
            self.session = None;
        }
        let class_id = self.roster.class_id();
        let session = self.session.get_or_insert_with(|| {
            tracing::info!(class = %class_id, %date, "attendance session started");
            Session::new(class_id, date)
        });

        let mut report = FrameReport::default();
        for face in &frame.faces {
            report.faces += 1;
            let result = self
                .matcher
                .compare(&face.descriptor, self.roster.students(), self.settings.threshold);

            let Some(student_id) = result.student_id else {
                tracing::debug!(distance = result.distance, "unknown face");
                report.unknown += 1;
                continue;
            };

            let Some(event) = session.record_presence(&student_id, now) else {
                tracing::trace!(student = %student_id, "already marked present");
                continue;
            };

            let summary = session.compute_summary(&self.roster);
            tracing::info!(
                student = %student_id,
                distance = result.distance,
                timestamp = %now,
                present = summary.total_present,
                total = summary.total_students,
                "marked present"
            );

            self.sink.submit(PersistRecord::Event {
                class_id: class_id.to_string(),
                date,
                event: event.clone(),
            });
            self.sink.submit(PersistRecord::Summary {
                class_id: class_id.to_string(),
                date,
                summary,
            });
            report.events.push(event);
        }

        FrameOutcome::Processed(report)
    }

    /// Process frames until the source ends or `stop` is cancelled.
    pub fn run<C: CaptureSource>(&mut self, source: &mut C, stop: &CancellationToken) -> RunStats {
        let mut stats = RunStats::default();

        loop {
            if stop.is_cancelled() {
                tracing::info!("stop requested; leaving capture loop");
                break;
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!("capture source ended");
                    break;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "skipping dropped frame");
                    stats.dropped += 1;
                    continue;
                }
            };

            stats.frames += 1;
            match self.process_frame(&frame) {
                FrameOutcome::OutsideWindow => stats.outside_window += 1,
                FrameOutcome::Processed(report) => {
                    stats.faces += report.faces;
                    stats.unknown_faces += report.unknown;
                    stats.events += report.events.len();
                }
            }
        }

        stats
    }

    fn note_window(&mut self, open: bool, now: NaiveDateTime) {
        if self.window_open == Some(open) {
            return;
        }
        if open {
            tracing::info!(window = %self.settings.window, %now, "attendance window open");
        } else {
            tracing::info!(
                window = %self.settings.window,
                %now,
                "outside attendance window; frames are ignored"
            );
        }
        self.window_open = Some(open);
    }
}
