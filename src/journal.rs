// 📜 Run Journal - append-only audit trail of pipeline runs
//
// Every change is an event: a run start, each gate decision, and how the run
// ended. Each event carries the run's UUID, so one run can be read back as a unit.

use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct JournalEvent {
    pub event_id: String,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub data: serde_json::Value,
}

impl JournalEvent {
    pub fn new(run_id: &str, event_type: &str, data: serde_json::Value) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            data,
        }
    }
}

pub struct Journal {
    conn: Connection,
    run_id: String,
}

impl Journal {
    /// Open (or create) the journal database and start a new run id
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        setup_journal(&conn)?;
        Ok(Journal {
            conn,
            run_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn record(&self, event_type: &str, data: serde_json::Value) -> Result<()> {
        let event = JournalEvent::new(&self.run_id, event_type, data);
        insert_event(&self.conn, &event)
    }

    /// Events of one run, oldest first
    pub fn events_for_run(&self, run_id: &str) -> Result<Vec<JournalEvent>> {
        get_events_for_run(&self.conn, run_id)
    }
}

pub fn setup_journal(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            run_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            data TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_run ON events(run_id)",
        [],
    )?;

    Ok(())
}

pub fn insert_event(conn: &Connection, event: &JournalEvent) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (event_id, run_id, timestamp, event_type, data)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.event_id,
            event.run_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            data_json,
        ],
    )?;

    Ok(())
}

pub fn get_events_for_run(conn: &Connection, run_id: &str) -> Result<Vec<JournalEvent>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, run_id, timestamp, event_type, data
         FROM events
         WHERE run_id = ?1
         ORDER BY id ASC",
    )?;

    let events = stmt
        .query_map(params![run_id], |row| {
            let timestamp_str: String = row.get(2)?;
            let data_json: String = row.get(4)?;

            Ok(JournalEvent {
                event_id: row.get(0)?,
                run_id: row.get(1)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e)))?
                    .with_timezone(&Utc),
                event_type: row.get(3)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e)))?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(events)
}
