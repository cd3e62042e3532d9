//! SQLite-backed persistence gateway.

use crate::gateway::{PersistenceGateway, StoreError};
use crate::migrations::run_migrations;
use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::{AttendanceEvent, AttendanceStatus, SessionSummary, DATE_FORMAT, TIMESTAMP_FORMAT};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

pub struct SqliteGateway {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteGateway {
    /// Open (creating if needed) the database at `path` and bring its schema up to date.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut conn = Connection::open(path)?;
        if let Err(e) =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
        {
            tracing::warn!(error = %e, "failed to enable WAL mode");
        }
        run_migrations(&mut conn)?;

        tracing::info!(path = %path.display(), "attendance database opened");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let mut conn = Connection::open_in_memory()?;
        run_migrations(&mut conn)?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Dates with recorded attendance for a class, most recent first.
    pub fn list_dates(&self, class_id: &str) -> Result<Vec<NaiveDate>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT date FROM attendance WHERE class_id = ?1
             UNION
             SELECT date FROM summaries WHERE class_id = ?1
             ORDER BY date DESC",
        )?;
        let rows = stmt.query_map(params![class_id], |row| row.get::<_, String>(0))?;

        let mut dates = Vec::new();
        for raw in rows {
            dates.push(parse_date(&raw?)?);
        }
        Ok(dates)
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| StoreError::Corrupt(format!("invalid date '{value}': {e}")))
}

fn parse_timestamp(value: &str) -> Result<NaiveDateTime, StoreError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map_err(|e| StoreError::Corrupt(format!("invalid timestamp '{value}': {e}")))
}

fn parse_status(value: &str) -> Result<AttendanceStatus, StoreError> {
    match value {
        "Present" => Ok(AttendanceStatus::Present),
        _ => Err(StoreError::Corrupt(format!("unknown attendance status '{value}'"))),
    }
}

impl PersistenceGateway for SqliteGateway {
    fn write_roster(&mut self, class_id: &str, student_ids: &[String]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM students WHERE class_id = ?1", params![class_id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO students (class_id, student_id, position) VALUES (?1, ?2, ?3)",
            )?;
            for (position, student_id) in student_ids.iter().enumerate() {
                stmt.execute(params![class_id, student_id, position as i64])?;
            }
        }
        tx.commit()?;
        tracing::debug!(class = class_id, students = student_ids.len(), "roster written");
        Ok(())
    }

    fn write_event(
        &mut self,
        class_id: &str,
        date: NaiveDate,
        event: &AttendanceEvent,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO attendance (class_id, date, student_id, timestamp, status)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (class_id, date, student_id)
             DO UPDATE SET timestamp = excluded.timestamp, status = excluded.status",
            params![
                class_id,
                date.format(DATE_FORMAT).to_string(),
                event.student_id,
                event.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                event.status.as_str(),
            ],
        )?;
        Ok(())
    }

    fn write_summary(
        &mut self,
        class_id: &str,
        date: NaiveDate,
        summary: &SessionSummary,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_string(summary)?;
        self.conn.execute(
            "INSERT INTO summaries (class_id, date, body) VALUES (?1, ?2, ?3)
             ON CONFLICT (class_id, date) DO UPDATE SET body = excluded.body",
            params![class_id, date.format(DATE_FORMAT).to_string(), body],
        )?;
        Ok(())
    }

    fn load_roster(&self, class_id: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT student_id FROM students WHERE class_id = ?1 ORDER BY position")?;
        let ids = stmt
            .query_map(params![class_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn load_events(&self, class_id: &str, date: NaiveDate) -> Result<Vec<AttendanceEvent>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT student_id, timestamp, status FROM attendance
             WHERE class_id = ?1 AND date = ?2
             ORDER BY timestamp, student_id",
        )?;
        let mut rows = stmt.query(params![class_id, date.format(DATE_FORMAT).to_string()])?;

        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(AttendanceEvent {
                student_id: row.get(0)?,
                timestamp: parse_timestamp(&row.get::<_, String>(1)?)?,
                status: parse_status(&row.get::<_, String>(2)?)?,
            });
        }
        Ok(events)
    }

    fn load_summary(&self, class_id: &str, date: NaiveDate) -> Result<Option<SessionSummary>, StoreError> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM summaries WHERE class_id = ?1 AND date = ?2",
                params![class_id, date.format(DATE_FORMAT).to_string()],
                |row| row.get(0),
            )
            .optional()?;

        body.map(|b| serde_json::from_str(&b).map_err(StoreError::from))
            .transpose()
    }
}
