use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeZone};
use rusqlite::{params, Connection, OptionalExtension, Result};
use tracing::{debug, info};

use crate::app_dirs::AppDirs;
use crate::difficulty::WrapPolicy;
use crate::lesson::WeakItem;
use crate::stats::{ItemKind, RunStatistics};
use crate::util::median;

/// One typeable text in the catalog
#[derive(Clone, Debug, PartialEq)]
pub struct TextRow {
    pub id: i64,
    pub source: i64,
    pub body: String,
}

/// One persisted run summary
#[derive(Clone, Debug)]
pub struct ResultRow {
    pub timestamp: DateTime<Local>,
    pub text_id: i64,
    pub source: i64,
    pub wpm: f64,
    pub accuracy: f64,
    pub viscosity: f64,
}

/// SQLite-backed store for texts, run results and per-item statistics
#[derive(Debug)]
pub struct StatsDb {
    conn: Connection,
}

impl StatsDb {
    /// Open (or create) the database under the state directory
    pub fn new() -> Result<Self> {
        let db_path = AppDirs::db_path().unwrap_or_else(|| PathBuf::from("cadenza.db"));
        Self::open(&db_path)
    }

    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                    Some(format!("Failed to create directory: {}", e)),
                )
            })?;
        }

        let conn = Connection::open(db_path)?;
        Self::create_tables(&conn)?;
        Ok(StatsDb { conn })
    }

    /// In-memory database, used by tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::create_tables(&conn)?;
        Ok(StatsDb { conn })
    }

    fn create_tables(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS source (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                discount REAL
            );
            CREATE TABLE IF NOT EXISTS text (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source INTEGER NOT NULL REFERENCES source(id),
                body TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS result (
                w REAL NOT NULL,
                text_id INTEGER NOT NULL,
                source INTEGER NOT NULL,
                wpm REAL NOT NULL,
                accuracy REAL NOT NULL,
                viscosity REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS statistic (
                w REAL NOT NULL,
                data TEXT NOT NULL,
                type INTEGER NOT NULL,
                time REAL NOT NULL,
                viscosity REAL NOT NULL,
                count INTEGER NOT NULL,
                mistakes INTEGER NOT NULL,
                flawed BOOLEAN NOT NULL
            );
            CREATE TABLE IF NOT EXISTS mistake (
                w REAL NOT NULL,
                target TEXT NOT NULL,
                typed TEXT NOT NULL,
                count INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_statistic_type_w ON statistic(type, w);
            CREATE INDEX IF NOT EXISTS idx_result_w ON result(w);
            "#,
        )
    }

    /// Get or create a source by name. Lesson sources carry a discount
    /// so their statistics can be down-weighted by display layers.
    pub fn add_source(&self, name: &str, discount: Option<f64>) -> Result<i64> {
        self.conn.execute(
            "INSERT OR IGNORE INTO source (name, discount) VALUES (?1, ?2)",
            params![name, discount],
        )?;
        self.conn.query_row(
            "SELECT id FROM source WHERE name = ?1",
            [name],
            |row| row.get(0),
        )
    }

    pub fn source_discount(&self, source: i64) -> Result<Option<f64>> {
        self.conn.query_row(
            "SELECT discount FROM source WHERE id = ?1",
            [source],
            |row| row.get(0),
        )
    }

    /// Insert one text under a source; duplicate bodies collapse to the
    /// already-stored row.
    pub fn add_text(&self, source: i64, body: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT OR IGNORE INTO text (source, body) VALUES (?1, ?2)",
            params![source, body],
        )?;
        self.conn.query_row(
            "SELECT id FROM text WHERE body = ?1",
            [body],
            |row| row.get(0),
        )
    }

    /// Store a generated lesson under the discounted lesson source
    pub fn add_lesson(&self, body: &str) -> Result<TextRow> {
        let source = self.add_source("<lessons>", Some(0.5))?;
        let id = self.add_text(source, body)?;
        info!(id, "stored lesson text");
        Ok(TextRow {
            id,
            source,
            body: body.to_string(),
        })
    }

    pub fn text_count(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM text", [], |row| row.get(0))
    }

    pub fn get_text(&self, id: i64) -> Result<Option<TextRow>> {
        self.conn
            .query_row(
                "SELECT id, source, body FROM text WHERE id = ?1",
                [id],
                Self::text_row,
            )
            .optional()
    }

    /// A sample of texts in random order, for difficulty-ranked selection
    pub fn random_texts(&self, limit: usize) -> Result<Vec<TextRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, source, body FROM text ORDER BY RANDOM() LIMIT ?1")?;
        let rows = stmt.query_map([limit as i64], Self::text_row)?;
        rows.collect()
    }

    /// Successor of `last_id` by insertion order. With no predecessor the
    /// first text is returned; past the last text the wrap policy decides.
    pub fn next_in_order(&self, last_id: Option<i64>, wrap: WrapPolicy) -> Result<Option<TextRow>> {
        let successor = |after: i64| {
            self.conn
                .query_row(
                    "SELECT id, source, body FROM text WHERE id > ?1 ORDER BY id LIMIT 1",
                    [after],
                    Self::text_row,
                )
                .optional()
        };

        match last_id {
            None => successor(0),
            Some(last) => match successor(last)? {
                Some(row) => Ok(Some(row)),
                None => match wrap {
                    WrapPolicy::Restart => successor(0),
                    WrapPolicy::Stop => Ok(None),
                },
            },
        }
    }

    /// Text id of the most recently persisted result
    pub fn last_typed_text(&self) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT text_id FROM result ORDER BY w DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
    }

    /// Item -> median seconds-per-char over all statistic rows of `kind`
    /// at or after `since`.
    pub fn median_costs(
        &self,
        kind: ItemKind,
        since: DateTime<Local>,
    ) -> Result<HashMap<String, f64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT data, time FROM statistic WHERE type = ?1 AND w >= ?2")?;
        let rows = stmt.query_map(params![kind.code(), timestamp_secs(since)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut grouped: HashMap<String, Vec<f64>> = HashMap::new();
        for row in rows {
            let (item, time) = row?;
            grouped.entry(item).or_default().push(time);
        }

        Ok(grouped
            .into_iter()
            .filter_map(|(item, times)| median(&times).map(|m| (item, m)))
            .collect())
    }

    /// The weakest items of `kind` since `since`, least fluid first
    pub fn weak_items(
        &self,
        kind: ItemKind,
        since: DateTime<Local>,
        limit: usize,
    ) -> Result<Vec<WeakItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT data, time, viscosity, count, mistakes FROM statistic
             WHERE type = ?1 AND w >= ?2",
        )?;
        let rows = stmt.query_map(params![kind.code(), timestamp_secs(since)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        struct Acc {
            times: Vec<f64>,
            viscosities: Vec<f64>,
            count: i64,
            mistakes: i64,
        }
        let mut grouped: HashMap<String, Acc> = HashMap::new();
        for row in rows {
            let (item, time, viscosity, count, mistakes) = row?;
            let acc = grouped.entry(item).or_insert(Acc {
                times: Vec::new(),
                viscosities: Vec::new(),
                count: 0,
                mistakes: 0,
            });
            acc.times.push(time);
            acc.viscosities.push(viscosity);
            acc.count += count;
            acc.mistakes += mistakes;
        }

        let mut items: Vec<WeakItem> = grouped
            .into_iter()
            .map(|(item, acc)| {
                let time = median(&acc.times).unwrap_or(0.0);
                let viscosity = median(&acc.viscosities).unwrap_or(0.0);
                let count = acc.count.max(1) as f64;
                WeakItem {
                    item,
                    kind,
                    speed: if time > 0.0 { 12.0 / time } else { 0.0 },
                    accuracy: 1.0 - acc.mistakes as f64 / count,
                    viscosity,
                    count: acc.count as u32,
                    mistakes: acc.mistakes as u32,
                    impact: count * time * time * (1.0 + acc.mistakes as f64 / count),
                }
            })
            .collect();

        items.sort_by(|a, b| {
            b.viscosity
                .partial_cmp(&a.viscosity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        items.truncate(limit);
        Ok(items)
    }

    /// Persist everything a completed run produced in one transaction:
    /// the result summary row, its statistic rows and its mistake rows.
    pub fn persist_run(
        &mut self,
        text_id: i64,
        source: i64,
        stats: &RunStatistics,
        now: DateTime<Local>,
    ) -> Result<()> {
        let w = timestamp_secs(now);
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO result (w, text_id, source, wpm, accuracy, viscosity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                w,
                text_id,
                source,
                stats.summary.wpm,
                stats.summary.accuracy,
                stats.summary.viscosity,
            ],
        )?;

        for record in &stats.records {
            tx.execute(
                "INSERT INTO statistic (w, data, type, time, viscosity, count, mistakes, flawed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    timestamp_secs(record.timestamp),
                    record.item,
                    record.kind.code(),
                    record.time,
                    record.viscosity,
                    record.count as i64,
                    record.mistakes as i64,
                    record.flawed,
                ],
            )?;
        }

        for mistake in &stats.mistakes {
            tx.execute(
                "INSERT INTO mistake (w, target, typed, count) VALUES (?1, ?2, ?3, ?4)",
                params![
                    timestamp_secs(mistake.timestamp),
                    mistake.target.to_string(),
                    mistake.typed.to_string(),
                    mistake.count as i64,
                ],
            )?;
        }

        tx.commit()?;
        debug!(
            text_id,
            records = stats.records.len(),
            mistakes = stats.mistakes.len(),
            "persisted run"
        );
        Ok(())
    }

    /// Most recent results, newest first
    pub fn recent_results(&self, limit: usize) -> Result<Vec<ResultRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT w, text_id, source, wpm, accuracy, viscosity FROM result
             ORDER BY w DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(ResultRow {
                timestamp: secs_timestamp(row.get(0)?),
                text_id: row.get(1)?,
                source: row.get(2)?,
                wpm: row.get(3)?,
                accuracy: row.get(4)?,
                viscosity: row.get(5)?,
            })
        })?;
        rows.collect()
    }

    fn text_row(row: &rusqlite::Row) -> Result<TextRow> {
        Ok(TextRow {
            id: row.get(0)?,
            source: row.get(1)?,
            body: row.get(2)?,
        })
    }
}

fn timestamp_secs(ts: DateTime<Local>) -> f64 {
    ts.timestamp_millis() as f64 / 1000.0
}

fn secs_timestamp(secs: f64) -> DateTime<Local> {
    Local
        .timestamp_millis_opt((secs * 1000.0) as i64)
        .single()
        .unwrap_or_else(Local::now)
}
