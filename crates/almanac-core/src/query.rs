use rusqlite::types::ValueRef;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::tables::{DateRow, EventRow, QueryTables};

pub const DEFAULT_QUERY: &str = "SELECT * FROM events";
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Failure reported by a query engine. The message is shown to the user as
/// the engine produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("{0}")]
    Engine(String),

    #[error("could not load query tables: {0}")]
    Load(String),
}

impl From<rusqlite::Error> for QueryError {
    fn from(err: rusqlite::Error) -> Self {
        QueryError::Engine(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryOutcome {
    /// The statement matched nothing or returned no columns.
    Empty,
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
}

impl QueryOutcome {
    pub fn row_count(&self) -> usize {
        match self {
            QueryOutcome::Empty => 0,
            QueryOutcome::Rows { rows, .. } => rows.len(),
        }
    }
}

/// Executes a query string against the `events` and `dates` tables.
pub trait QueryEngine {
    fn execute(&mut self, query: &str, tables: &QueryTables) -> Result<QueryOutcome, QueryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [(&'static str, &'static str)],
}

pub const SCHEMA: [TableSchema; 2] = [
    TableSchema {
        name: "events",
        columns: &[
            ("id", "TEXT"),
            ("name", "TEXT"),
            ("date", "TEXT"),
            ("priority", "TEXT"),
            ("description", "TEXT"),
            ("category_name", "TEXT"),
            ("category_color", "TEXT"),
            ("day_name", "TEXT"),
            ("month_name", "TEXT"),
            ("year", "INTEGER"),
            ("day", "INTEGER"),
        ],
    },
    TableSchema {
        name: "dates",
        columns: &[("date", "TEXT"), ("day_name", "TEXT"), ("year", "INTEGER")],
    },
];

impl TableSchema {
    fn create_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|(name, ty)| format!("{name} {ty}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "DROP TABLE IF EXISTS {name}; CREATE TABLE {name} ({columns});",
            name = self.name
        )
    }
}

/// In-memory SQLite. Tables are rebuilt from the current rows before every
/// query, so statements that modify them never leak into the next run.
pub struct SqliteEngine {
    conn: Connection,
}

impl SqliteEngine {
    pub fn open_in_memory() -> Result<Self, QueryError> {
        let conn = Connection::open_in_memory().map_err(|err| QueryError::Load(err.to_string()))?;
        Ok(Self { conn })
    }

    fn load(&mut self, tables: &QueryTables) -> rusqlite::Result<()> {
        let tx = self.conn.transaction()?;
        for schema in &SCHEMA {
            tx.execute_batch(&schema.create_sql())?;
        }
        {
            let mut insert = tx.prepare(
                "INSERT INTO events (id, name, date, priority, description, category_name, \
                 category_color, day_name, month_name, year, day) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for row in &tables.events {
                insert_event(&mut insert, row)?;
            }

            let mut insert =
                tx.prepare("INSERT INTO dates (date, day_name, year) VALUES (?1, ?2, ?3)")?;
            for row in &tables.dates {
                insert_date(&mut insert, row)?;
            }
        }
        tx.commit()
    }
}

fn insert_event(stmt: &mut rusqlite::Statement<'_>, row: &EventRow) -> rusqlite::Result<usize> {
    stmt.execute(params![
        row.id,
        row.name,
        row.date,
        row.priority,
        row.description,
        row.category_name,
        row.category_color,
        row.day_name,
        row.month_name,
        row.year,
        row.day,
    ])
}

fn insert_date(stmt: &mut rusqlite::Statement<'_>, row: &DateRow) -> rusqlite::Result<usize> {
    stmt.execute(params![row.date, row.day_name, row.year])
}

impl QueryEngine for SqliteEngine {
    #[instrument(skip(self, tables), fields(events = tables.events.len()))]
    fn execute(&mut self, query: &str, tables: &QueryTables) -> Result<QueryOutcome, QueryError> {
        self.load(tables)
            .map_err(|err| QueryError::Load(err.to_string()))?;

        let mut stmt = self.conn.prepare(query)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let mut cells = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                cells.push(cell_to_json(row.get_ref(idx)?));
            }
            rows.push(cells);
        }

        debug!(columns = columns.len(), rows = rows.len(), "query executed");
        if rows.is_empty() || columns.is_empty() {
            return Ok(QueryOutcome::Empty);
        }
        Ok(QueryOutcome::Rows { columns, rows })
    }
}

fn cell_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

/// Previously run queries, most recent first, without repeats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryHistory {
    entries: Vec<String>,
}

impl QueryHistory {
    pub fn new(entries: Vec<String>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remembers `query` unless it is already known. Returns `true` when the
    /// history changed.
    pub fn record(&mut self, query: &str, limit: usize) -> bool {
        if self.entries.iter().any(|entry| entry == query) {
            return false;
        }
        self.entries.insert(0, query.to_string());
        self.entries.truncate(limit);
        true
    }

    /// Applies dedup and the cap to a history loaded from disk.
    pub fn normalize(&mut self, limit: usize) {
        let mut seen = Vec::with_capacity(self.entries.len());
        self.entries.retain(|entry| {
            if seen.contains(entry) {
                false
            } else {
                seen.push(entry.clone());
                true
            }
        });
        self.entries.truncate(limit);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRun {
    pub query: String,
    pub result: Result<QueryOutcome, QueryError>,
}

/// Runs one console query. Blank input falls back to [`DEFAULT_QUERY`];
/// only successful queries are added to the history.
pub fn run_console_query<E: QueryEngine + ?Sized>(
    engine: &mut E,
    history: &mut QueryHistory,
    history_limit: usize,
    raw: &str,
    tables: &QueryTables,
) -> QueryRun {
    let query = match raw.trim() {
        "" => DEFAULT_QUERY.to_string(),
        trimmed => trimmed.to_string(),
    };

    let result = engine.execute(&query, tables);
    match &result {
        Ok(outcome) => {
            history.record(&query, history_limit);
            info!(rows = outcome.row_count(), "query ok");
        }
        Err(err) => warn!(error = %err, "query failed"),
    }
    QueryRun { query, result }
}
