//! The DB gateway: builds connection URLs, opens pooled engines, and
//! introspects schemas/tables/views.
//!
//! Expressed as a trait so the worker, classifier, and materializer never
//! see `mysql_async` types directly - the same separation the reference
//! persistence crates keep between their `Persistence`/`PersistenceReader`
//! traits and the engine-specific connection code in `connection.rs`. Only
//! one implementation ships ([`mysql::MySqlGateway`]); tests exercise the
//! rest of the crate against [`fake::FakeGateway`] instead of a live
//! database.

pub mod fake;
pub mod mysql;

use std::{cmp::Ordering, collections::BTreeMap, sync::Arc};

use async_trait::async_trait;

use crate::config::{Driver, HostConfig};

/// Opens a pooled gateway for `host`, optionally scoped to `db`. The single
/// match arm today mirrors [`Driver`]'s single variant; a second engine
/// slots in here without the orchestrator or worker changing.
pub fn open(host: &HostConfig, db: Option<&str>) -> anyhow::Result<Arc<dyn DbGateway>> {
    match host.driver {
        Driver::Mysql => Ok(Arc::new(mysql::MySqlGateway::connect(host, db)?)),
    }
}

/// A column's structural definition, as reflected from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    /// The engine-native type, verbatim (e.g. `BIGINT`, `VARCHAR(255)`).
    /// Reflection yields this as-is; no cross-engine type rewriting is
    /// performed.
    pub sql_type: String,
    pub nullable: bool,
}

/// A table's structural definition, as reflected from the source. Carries
/// enough to recreate the table on the target without an ALTER.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Column names making up the primary key, in key order. Empty if the
    /// table has none.
    pub primary_key: Vec<String>,
    /// One entry per UNIQUE constraint/index, each holding its member column
    /// names in key order. Does not include the primary key.
    pub unique_keys: Vec<Vec<String>>,
}

impl TableDef {
    /// The single column of a single-column primary key, if there is one.
    /// Used by the incremental copier's best-effort tie-break dedupe when
    /// several rows share the same watermark value.
    pub fn single_primary_key_column(&self) -> Option<&str> {
        match self.primary_key.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }
}

/// A scalar cell value, engine-agnostic. Gateways convert their native
/// driver value type to and from this on the way in and out.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    UInt(u64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl SqlValue {
    /// Orders values the way the watermark comparison needs: `Null` is
    /// always smallest (an empty target has no watermark, which must sort
    /// below every real value), comparable variants compare structurally,
    /// and values from different incomparable variants are treated as
    /// equal rather than panicking (defensive - the `order_by` column
    /// should be a single consistent type in practice).
    pub fn partial_cmp_for_watermark(&self, other: &SqlValue) -> Ordering {
        use SqlValue::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Int(a), Int(b)) => a.cmp(b),
            (UInt(a), UInt(b)) => a.cmp(b),
            (Double(a), Double(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Text(a), Text(b)) => a.cmp(b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl std::fmt::Display for SqlValue {
    /// Renders a watermark value for logging. `Null` prints as `<none>`
    /// rather than an empty string so `batch_include` log lines stay
    /// grep-able when a table has never been touched.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlValue::Null => write!(f, "<none>"),
            SqlValue::Int(i) => write!(f, "{i}"),
            SqlValue::UInt(u) => write!(f, "{u}"),
            SqlValue::Double(d) => write!(f, "{d}"),
            SqlValue::Text(s) => write!(f, "{s}"),
            SqlValue::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
        }
    }
}

/// One reflected row, keyed by column name. `BTreeMap` keeps column order
/// stable for deterministic tests and logging.
pub type Row = BTreeMap<String, SqlValue>;

/// A batch of rows read from the source, in ascending `order_by` order.
#[derive(Debug, Clone, Default)]
pub struct RowBatch {
    pub rows: Vec<Row>,
}

impl RowBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Operations the replication worker needs against either side of a
/// replication pair. All methods are scoped to one already-selected
/// database except [`list_schemas`](DbGateway::list_schemas), which lists
/// schemas visible from an administrative connection.
#[async_trait]
pub trait DbGateway: Send + Sync {
    /// Lists schema names on this host matching `pattern`.
    async fn list_schemas(&self, pattern: &regex::Regex) -> anyhow::Result<Vec<String>>;

    /// Runs an administrative statement with no database selected (the
    /// target's optional `execute_first` bootstrap).
    async fn execute_admin(&self, statement: &str) -> anyhow::Result<()>;

    async fn database_exists(&self, db: &str) -> anyhow::Result<bool>;

    /// Idempotent: creates `db` if it does not already exist.
    async fn ensure_database(&self, db: &str) -> anyhow::Result<()>;

    /// Lists every table in `db`, excluding views.
    async fn list_tables(&self, db: &str) -> anyhow::Result<Vec<TableDef>>;

    /// Lists the names of every view in `db`.
    async fn list_views(&self, db: &str) -> anyhow::Result<Vec<String>>;

    /// Fetches a view's `SELECT` body, with any `CREATE VIEW ... AS` prefix
    /// already stripped.
    async fn view_definition(&self, db: &str, view: &str) -> anyhow::Result<String>;

    async fn table_exists(&self, db: &str, table: &str) -> anyhow::Result<bool>;

    /// Creates `table` in `db` using `def`'s structural definition, applying
    /// dialect-specific storage options.
    async fn create_table_like(&self, db: &str, def: &TableDef) -> anyhow::Result<()>;

    async fn drop_table(&self, db: &str, table: &str) -> anyhow::Result<()>;

    async fn create_view(&self, db: &str, view: &str, body: &str) -> anyhow::Result<()>;

    /// `SELECT <order_by> FROM <table> ORDER BY <order_by> DESC LIMIT 1`.
    async fn max_order_value(
        &self,
        db: &str,
        table: &str,
        order_by: &str,
    ) -> anyhow::Result<Option<SqlValue>>;

    /// `SELECT * FROM <table> WHERE <order_by> > after OR (<order_by> = after
    /// AND <pk> > tie_pk) ORDER BY <order_by> ASC LIMIT <limit>`.
    ///
    /// `tie_break` is `(primary key column, last primary key value inserted
    /// at `after`)`, supplied by the caller when it knows both - it lets a
    /// batch boundary that landed in the middle of a run of equal
    /// `order_by` values pick up the rest of that run on the next call
    /// instead of skipping them, at the cost of needing a single-column
    /// primary key to compare by. Without it, ties are only ever read once
    /// even if a batch cut them off mid-run.
    async fn fetch_batch(
        &self,
        db: &str,
        table: &str,
        order_by: &str,
        after: Option<&SqlValue>,
        tie_break: Option<(&str, &SqlValue)>,
        limit: u64,
    ) -> anyhow::Result<RowBatch>;

    /// Fetches every row of `table`, with no ordering or limit - used by the
    /// dynamic copier's full refresh.
    async fn fetch_all(&self, db: &str, table: &str) -> anyhow::Result<RowBatch>;

    /// Inserts `batch` into `table` inside a single transaction. Returns the
    /// number of rows inserted.
    async fn insert_batch(&self, db: &str, table: &str, batch: &RowBatch) -> anyhow::Result<u64>;
}
