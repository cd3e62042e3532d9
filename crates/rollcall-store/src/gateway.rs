use chrono::NaiveDate;
use rollcall_core::{AttendanceEvent, PersistRecord, SessionSummary};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("summary encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("database schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i32, supported: i32 },
    #[error("corrupt attendance row: {0}")]
    Corrupt(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("failed to spawn persistence worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("persistence worker panicked")]
    WorkerPanicked,
}

/// Durable home for rosters, attendance events and summaries.
///
/// Writes overwrite by key (`class_id`, `date`, `student_id`), so re-sending a
/// record is harmless.
pub trait PersistenceGateway {
    fn write_roster(&mut self, class_id: &str, student_ids: &[String]) -> Result<(), StoreError>;

    fn write_event(
        &mut self,
        class_id: &str,
        date: NaiveDate,
        event: &AttendanceEvent,
    ) -> Result<(), StoreError>;

    fn write_summary(
        &mut self,
        class_id: &str,
        date: NaiveDate,
        summary: &SessionSummary,
    ) -> Result<(), StoreError>;

    fn load_roster(&self, class_id: &str) -> Result<Vec<String>, StoreError>;

    fn load_events(&self, class_id: &str, date: NaiveDate) -> Result<Vec<AttendanceEvent>, StoreError>;

    fn load_summary(&self, class_id: &str, date: NaiveDate) -> Result<Option<SessionSummary>, StoreError>;

    fn apply(&mut self, record: &PersistRecord) -> Result<(), StoreError> {
        match record {
            PersistRecord::Roster { class_id, student_ids } => self.write_roster(class_id, student_ids),
            PersistRecord::Event { class_id, date, event } => self.write_event(class_id, *date, event),
            PersistRecord::Summary { class_id, date, summary } => {
                self.write_summary(class_id, *date, summary)
            }
        }
    }
}

/// Gateway that keeps everything in process memory. Used for dry runs and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryGateway {
    rosters: HashMap<String, Vec<String>>,
    events: HashMap<(String, NaiveDate), BTreeMap<String, AttendanceEvent>>,
    summaries: HashMap<(String, NaiveDate), SessionSummary>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceGateway for MemoryGateway {
    fn write_roster(&mut self, class_id: &str, student_ids: &[String]) -> Result<(), StoreError> {
        self.rosters.insert(class_id.to_string(), student_ids.to_vec());
        Ok(())
    }

    fn write_event(
        &mut self,
        class_id: &str,
        date: NaiveDate,
        event: &AttendanceEvent,
    ) -> Result<(), StoreError> {
        self.events
            .entry((class_id.to_string(), date))
            .or_default()
            .insert(event.student_id.clone(), event.clone());
        Ok(())
    }

    fn write_summary(
        &mut self,
        class_id: &str,
        date: NaiveDate,
        summary: &SessionSummary,
    ) -> Result<(), StoreError> {
        self.summaries.insert((class_id.to_string(), date), summary.clone());
        Ok(())
    }

    fn load_roster(&self, class_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.rosters.get(class_id).cloned().unwrap_or_default())
    }

    fn load_events(&self, class_id: &str, date: NaiveDate) -> Result<Vec<AttendanceEvent>, StoreError> {
        let mut events: Vec<_> = self
            .events
            .get(&(class_id.to_string(), date))
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.student_id.cmp(&b.student_id)));
        Ok(events)
    }

    fn load_summary(&self, class_id: &str, date: NaiveDate) -> Result<Option<SessionSummary>, StoreError> {
        Ok(self.summaries.get(&(class_id.to_string(), date)).cloned())
    }
}
