// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Rolling SQLite alert log

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::alerts::AlertRecord;
use crate::config::DatabaseConfig;
use crate::error::Result;

/// Rows inserted between automatic prunes
const PRUNE_EVERY: u64 = 50;

/// Alert log backed by one SQLite table
pub struct AlertLog {
    conn: Mutex<Connection>,
    retention_days: u32,
    max_records: usize,
    inserts: AtomicU64,
}

impl AlertLog {
    /// Open or create the database
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&config.path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        "#,
        )?;

        let log = Self {
            conn: Mutex::new(conn),
            retention_days: config.retention_days,
            max_records: config.max_records,
            inserts: AtomicU64::new(0),
        };
        log.create_tables()?;
        log.prune()?;

        info!("Alert log opened at {:?}", config.path);
        Ok(log)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                source TEXT NOT NULL,
                priority TEXT NOT NULL,
                outcome TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                persons INTEGER NOT NULL,
                animals INTEGER NOT NULL,
                message TEXT NOT NULL,
                dispatched_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_alerts_timestamp ON alerts(timestamp);
        "#,
        )?;
        Ok(())
    }

    /// Append one alert decision
    pub fn insert(&self, record: &AlertRecord) -> Result<()> {
        let event = &record.event;
        let persons = event.classifications().iter().filter(|c| c.kind.is_person()).count();
        let animals = event.classifications().iter().filter(|c| c.kind.is_animal()).count();

        {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO alerts (event_id, timestamp, source, priority, outcome, attempts, persons, animals, message, dispatched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    event.id(),
                    event.timestamp().to_rfc3339(),
                    event.source().to_string(),
                    record.priority.to_string(),
                    record.outcome.to_string(),
                    record.attempts,
                    persons as i64,
                    animals as i64,
                    record.message,
                    record.dispatched_at.map(|t| t.to_rfc3339()),
                ],
            )?;
        }

        if self.inserts.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune()?;
        }
        Ok(())
    }

    /// Newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<StoredAlert>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT event_id, timestamp, source, priority, outcome, attempts, persons, animals, message
             FROM alerts ORDER BY id DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(StoredAlert {
                event_id: row.get(0)?,
                timestamp: row.get(1)?,
                source: row.get(2)?,
                priority: row.get(3)?,
                outcome: row.get(4)?,
                attempts: row.get(5)?,
                persons: row.get(6)?,
                animals: row.get(7)?,
                message: row.get(8)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Drop rows past retention, then trim to `max_records`
    pub fn prune(&self) -> Result<usize> {
        self.prune_at(Utc::now())
    }

    pub fn prune_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        let cutoff = now - chrono::Duration::days(self.retention_days as i64);

        let expired = conn.execute(
            "DELETE FROM alerts WHERE timestamp < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        let overflow = conn.execute(
            "DELETE FROM alerts WHERE id NOT IN (SELECT id FROM alerts ORDER BY id DESC LIMIT ?1)",
            params![self.max_records as i64],
        )?;

        if expired + overflow > 0 {
            debug!("Pruned {} expired and {} surplus alerts", expired, overflow);
        }
        Ok(expired + overflow)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAlert {
    pub event_id: String,
    pub timestamp: String,
    pub source: String,
    pub priority: String,
    pub outcome: String,
    pub attempts: u32,
    pub persons: i64,
    pub animals: i64,
    pub message: String,
}
