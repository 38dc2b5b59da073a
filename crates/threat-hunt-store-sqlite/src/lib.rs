#![allow(clippy::missing_errors_doc)]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use threat_hunt_core::{
    decode_tags, encode_tags, format_timestamp, now_utc, parse_timestamp, sample_hunts,
    HuntRecord, NewHunt,
};

const HUNTS_TABLE: &str = "hunts";

const HUNT_COLUMNS: [&str; 10] = [
    "id",
    "name",
    "query_str",
    "datasource",
    "severity",
    "status",
    "tags",
    "ai_score",
    "created_at",
    "updated_at",
];

const SCHEMA_HUNTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS hunts (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  query_str TEXT NOT NULL,
  datasource TEXT NOT NULL DEFAULT 'SIEM',
  severity TEXT NOT NULL DEFAULT 'medium',
  status TEXT NOT NULL DEFAULT 'open',
  tags TEXT,
  ai_score REAL,
  created_at TEXT,
  updated_at TEXT
);
";

const SCHEMA_HUNTS_INDEXES: &str = r"
CREATE INDEX IF NOT EXISTS idx_hunts_created_at
  ON hunts(created_at DESC, id DESC);

CREATE TRIGGER IF NOT EXISTS trg_hunts_touch_updated_at
AFTER UPDATE ON hunts
FOR EACH ROW
WHEN NEW.updated_at IS OLD.updated_at
BEGIN
  UPDATE hunts
     SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
   WHERE id = NEW.id;
END;
";

const SELECT_HUNTS: &str = "SELECT
        id, name, query_str, datasource, severity, status,
        tags, ai_score, created_at, updated_at
     FROM hunts
     ORDER BY created_at IS NULL, created_at DESC, id DESC";

pub struct SqliteHuntStore {
    conn: Connection,
}

/// Outcome of [`seed_if_empty`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct SeedReport {
    pub seeded: bool,
    pub inserted: usize,
    pub existing: usize,
}

impl SqliteHuntStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Creates the hunts table, index and trigger when absent. Safe on every start.
    pub fn ensure_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA_HUNTS_TABLE)
            .context("failed to create hunts table")?;

        ensure_table_has_columns(&self.conn, HUNTS_TABLE, &HUNT_COLUMNS)?;

        self.conn
            .execute_batch(SCHEMA_HUNTS_INDEXES)
            .context("failed to apply hunts index and trigger")?;
        Ok(())
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM hunts", [], |row| row.get(0))
            .context("failed to count hunts")?;
        usize::try_from(count).with_context(|| format!("invalid hunt count: {count}"))
    }

    /// Appends a batch in one transaction. Ids come from SQLite; both
    /// timestamps are set to the same instant.
    pub fn insert_many(&mut self, hunts: &[NewHunt]) -> Result<Vec<HuntRecord>> {
        for hunt in hunts {
            hunt.validate()
                .map_err(|err| anyhow!("hunt validation failed for {:?}: {err}", hunt.name))?;
        }

        let now = now_utc();
        let stamp = format_timestamp(now).map_err(|err| anyhow!(err.to_string()))?;

        let tx = self
            .conn
            .transaction()
            .context("failed to start insert transaction")?;

        let mut records = Vec::with_capacity(hunts.len());
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO hunts(
                        name, query_str, datasource, severity, status,
                        tags, ai_score, created_at, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                )
                .context("failed to prepare hunt insert")?;

            for hunt in hunts {
                let id = stmt
                    .insert(params![
                        hunt.name,
                        hunt.query_str,
                        hunt.datasource_or_default(),
                        hunt.severity_or_default(),
                        hunt.status_or_default(),
                        encode_tags(&hunt.tags),
                        hunt.ai_score,
                        stamp,
                    ])
                    .with_context(|| format!("failed to insert hunt {:?}", hunt.name))?;

                records.push(HuntRecord {
                    id,
                    name: hunt.name.clone(),
                    query_str: hunt.query_str.clone(),
                    datasource: hunt.datasource_or_default().to_string(),
                    severity: hunt.severity_or_default().to_string(),
                    status: hunt.status_or_default().to_string(),
                    tags: hunt.tags.clone(),
                    ai_score: hunt.ai_score,
                    created_at: Some(now),
                    updated_at: Some(now),
                });
            }
        }

        tx.commit().context("failed to commit insert transaction")?;
        Ok(records)
    }

    /// Every hunt, most recently created first. Ties keep the later id first;
    /// rows without `created_at` sort last.
    pub fn list_all(&self) -> Result<Vec<HuntRecord>> {
        let mut stmt = self
            .conn
            .prepare(SELECT_HUNTS)
            .context("failed to prepare hunt listing")?;
        let rows = stmt
            .query_map([], parse_hunt_row)
            .context("failed to list hunts")?;
        collect_rows(rows)
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Ensures the schema exists and writes the example hunts only when the table
/// is empty. Existing rows are never touched.
pub fn seed_if_empty(store: &mut SqliteHuntStore) -> Result<SeedReport> {
    store.ensure_schema()?;

    let existing = store.count()?;
    if existing > 0 {
        tracing::debug!(existing, "hunt store already populated; skipping seed");
        return Ok(SeedReport {
            seeded: false,
            inserted: 0,
            existing,
        });
    }

    let inserted = store.insert_many(&sample_hunts())?.len();
    tracing::info!(inserted, "seeded example hunts");
    Ok(SeedReport {
        seeded: true,
        inserted,
        existing,
    })
}

/// Column values as stored; timestamps are parsed after the statement yields.
struct HuntRow {
    id: i64,
    name: String,
    query_str: String,
    datasource: String,
    severity: String,
    status: String,
    tags: Option<String>,
    ai_score: Option<f64>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl HuntRow {
    fn into_record(self) -> Result<HuntRecord> {
        let id = self.id;
        let created_at = parse_optional_timestamp(self.created_at.as_deref())
            .with_context(|| format!("hunt {id} has an unreadable created_at"))?;
        let updated_at = parse_optional_timestamp(self.updated_at.as_deref())
            .with_context(|| format!("hunt {id} has an unreadable updated_at"))?;

        Ok(HuntRecord {
            id,
            name: self.name,
            query_str: self.query_str,
            datasource: self.datasource,
            severity: self.severity,
            status: self.status,
            tags: decode_tags(self.tags.as_deref()),
            ai_score: self.ai_score,
            created_at,
            updated_at,
        })
    }
}

fn parse_hunt_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<HuntRow> {
    Ok(HuntRow {
        id: row.get(0)?,
        name: row.get(1)?,
        query_str: row.get(2)?,
        datasource: row.get(3)?,
        severity: row.get(4)?,
        status: row.get(5)?,
        tags: row.get(6)?,
        ai_score: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn parse_optional_timestamp(
    raw: Option<&str>,
) -> Result<Option<time::OffsetDateTime>, threat_hunt_core::HuntError> {
    raw.map(parse_timestamp).transpose()
}

fn ensure_table_has_columns(conn: &Connection, table_name: &str, columns: &[&str]) -> Result<()> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table_name})"))
        .with_context(|| format!("failed to inspect table_info for {table_name}"))?;
    let mut rows = stmt.query([])?;

    let mut available = Vec::new();
    while let Some(row) = rows.next()? {
        available.push(row.get::<_, String>(1)?);
    }

    for required in columns {
        if !available.iter().any(|candidate| candidate == required) {
            return Err(anyhow!(
                "hunt schema check failed: missing column {table_name}.{required}"
            ));
        }
    }

    Ok(())
}

fn collect_rows(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<HuntRow>>,
) -> Result<Vec<HuntRecord>> {
    let mut records = Vec::new();
    for row in rows {
        let row = row.context("failed to read hunt row")?;
        records.push(row.into_record()?);
    }
    Ok(records)
}
