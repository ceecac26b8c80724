use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use rusqlite::{Connection, params};

use crate::event::{Event, EventStore, TIME_FORMAT};

#[derive(Debug, Clone, Default)]
pub struct IngestSummary {
    pub rows_seen: usize,
    pub rows_upserted: usize,
    pub rows_rejected: usize,
    pub errors: Vec<String>,
}

pub fn default_db_path() -> PathBuf {
    PathBuf::from("data/events.sqlite")
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS events (
            match_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            group_id TEXT NOT NULL,
            role TEXT NOT NULL,
            utc_time TEXT NOT NULL,
            measurements_json TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (match_id, subject_id)
        );
        CREATE INDEX IF NOT EXISTS idx_events_utc_time ON events(utc_time);
        CREATE INDEX IF NOT EXISTS idx_events_subject ON events(subject_id);
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

/// Upserts rows keyed on (match_id, subject_id): re-ingesting the same
/// source file refreshes rows instead of duplicating them. Rows with a
/// missing identity or timestamp are rejected and counted.
pub fn ingest_events(conn: &mut Connection, rows: &[Event]) -> Result<IngestSummary> {
    let mut summary = IngestSummary {
        rows_seen: rows.len(),
        ..Default::default()
    };

    let tx = conn.transaction().context("begin ingest transaction")?;
    for row in rows {
        if row.subject_id.trim().is_empty() || row.match_id.trim().is_empty() {
            summary.rows_rejected += 1;
            if summary.errors.len() < 20 {
                summary
                    .errors
                    .push(format!("rejected row with empty identity: {row:?}"));
            }
            continue;
        }
        let measurements_json =
            serde_json::to_string(&row.measurements).context("serialize measurements")?;
        tx.execute(
            r#"
            INSERT INTO events (match_id, subject_id, group_id, role, utc_time, measurements_json, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(match_id, subject_id) DO UPDATE SET
                group_id = excluded.group_id,
                role = excluded.role,
                utc_time = excluded.utc_time,
                measurements_json = excluded.measurements_json,
                updated_at = excluded.updated_at
            "#,
            params![
                row.match_id,
                row.subject_id,
                row.group_id,
                row.role,
                row.timestamp.format(TIME_FORMAT).to_string(),
                measurements_json,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("upsert event")?;
        summary.rows_upserted += 1;
    }
    tx.commit().context("commit ingest transaction")?;
    Ok(summary)
}

/// Loads every stored event in time order and rebuilds the in-memory
/// store (which re-derives per-event opponents).
pub fn load_event_store(conn: &Connection) -> Result<EventStore> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT match_id, subject_id, group_id, role, utc_time, measurements_json
            FROM events
            ORDER BY utc_time ASC, match_id ASC, subject_id ASC
            "#,
        )
        .context("prepare load events query")?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })
        .context("query load events")?;

    let mut events = Vec::new();
    for row in rows {
        let (match_id, subject_id, group_id, role, utc_time, measurements_json) =
            row.context("decode event row")?;
        let timestamp = NaiveDateTime::parse_from_str(&utc_time, TIME_FORMAT)
            .with_context(|| format!("bad utc_time {utc_time} for {match_id}/{subject_id}"))?;
        let measurements: HashMap<String, f64> =
            serde_json::from_str(&measurements_json).with_context(|| {
                format!("bad measurements json for {match_id}/{subject_id}")
            })?;
        events.push(Event {
            timestamp,
            subject_id,
            group_id,
            opposing_group_id: None,
            role,
            match_id,
            measurements,
        });
    }

    Ok(EventStore::from_rows(events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::test_event;

    fn mem_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn ingest_and_load_roundtrip() {
        let mut conn = mem_conn();
        let rows = vec![
            test_event("2024-02-02 17:00:00", "Zeus", "T1", "top", "g2", &[("kills", 4.0)]),
            test_event("2024-02-01 17:00:00", "Zeus", "T1", "top", "g1", &[("kills", 2.0)]),
            test_event("2024-02-01 17:00:00", "Kiin", "GenG", "top", "g1", &[("kills", 1.0)]),
        ];
        let summary = ingest_events(&mut conn, &rows).unwrap();
        assert_eq!(summary.rows_upserted, 3);
        assert_eq!(summary.rows_rejected, 0);

        let store = load_event_store(&conn).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.events()[0].match_id, "g1");
        assert_eq!(
            store.events()[0].opposing_group_id.as_deref().is_some(),
            true
        );
    }

    #[test]
    fn reingest_updates_instead_of_duplicating() {
        let mut conn = mem_conn();
        let first = vec![test_event(
            "2024-02-01 17:00:00",
            "Zeus",
            "T1",
            "top",
            "g1",
            &[("kills", 2.0)],
        )];
        ingest_events(&mut conn, &first).unwrap();

        let second = vec![test_event(
            "2024-02-01 17:00:00",
            "Zeus",
            "T1",
            "top",
            "g1",
            &[("kills", 5.0)],
        )];
        ingest_events(&mut conn, &second).unwrap();

        let store = load_event_store(&conn).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.events()[0].measurement("kills"), Some(5.0));
    }

    #[test]
    fn empty_identity_rows_are_rejected() {
        let mut conn = mem_conn();
        let mut bad = test_event("2024-02-01 17:00:00", "Zeus", "T1", "top", "g1", &[]);
        bad.subject_id = " ".to_string();
        let summary = ingest_events(&mut conn, &[bad]).unwrap();
        assert_eq!(summary.rows_rejected, 1);
        assert_eq!(summary.rows_upserted, 0);
    }
}
