//! An in-memory [`DbGateway`] used to test the classifier, materializer,
//! dynamic copier and incremental copier without a live database - this
//! build environment has none available. Mirrors the shape of a real
//! engine closely enough (separate databases, tables with a structural
//! definition, views with a stored body) that the worker code under test
//! cannot tell the difference.

use std::{
    collections::BTreeMap,
    sync::Mutex,
};

use async_trait::async_trait;

use super::{ColumnDef, DbGateway, Row, RowBatch, SqlValue, TableDef};

#[derive(Debug, Clone, Default)]
struct FakeTable {
    def: TableDef,
    rows: Vec<Row>,
}

#[derive(Debug, Clone, Default)]
struct FakeDatabase {
    tables: BTreeMap<String, FakeTable>,
    views: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct FakeState {
    databases: BTreeMap<String, FakeDatabase>,
    admin_statements: Vec<String>,
}

/// An in-memory stand-in for one host (source or target). Build one per
/// side of a replication pair in tests.
#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<FakeState>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a table with rows, creating its database if necessary.
    pub fn with_table(self, db: &str, def: TableDef, rows: Vec<Row>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let database = state.databases.entry(db.to_string()).or_default();
            database
                .tables
                .insert(def.name.clone(), FakeTable { def, rows });
        }
        self
    }

    pub fn with_view(self, db: &str, name: &str, body: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let database = state.databases.entry(db.to_string()).or_default();
            database.views.insert(name.to_string(), body.to_string());
        }
        self
    }

    /// Seeds an empty database with no tables (for "database already
    /// exists" scenarios).
    pub fn with_empty_database(self, db: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.databases.entry(db.to_string()).or_default();
        }
        self
    }

    pub fn rows(&self, db: &str, table: &str) -> Vec<Row> {
        let state = self.state.lock().unwrap();
        state
            .databases
            .get(db)
            .and_then(|d| d.tables.get(table))
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn table_def(&self, db: &str, table: &str) -> Option<TableDef> {
        let state = self.state.lock().unwrap();
        state
            .databases
            .get(db)
            .and_then(|d| d.tables.get(table))
            .map(|t| t.def.clone())
    }

    pub fn admin_statements(&self) -> Vec<String> {
        self.state.lock().unwrap().admin_statements.clone()
    }
}

fn column(name: &str) -> ColumnDef {
    ColumnDef {
        name: name.to_string(),
        sql_type: "BIGINT".to_string(),
        nullable: false,
    }
}

/// A minimal `TableDef` builder for tests: one column per name, no primary
/// key or unique keys unless given explicitly via [`TableDef`] construction
/// directly.
pub fn table_def(name: &str, columns: &[&str]) -> TableDef {
    TableDef {
        name: name.to_string(),
        columns: columns.iter().map(|c| column(c)).collect(),
        primary_key: Vec::new(),
        unique_keys: Vec::new(),
    }
}

#[async_trait]
impl DbGateway for FakeGateway {
    async fn list_schemas(&self, pattern: &regex::Regex) -> anyhow::Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .databases
            .keys()
            .filter(|name| pattern.is_match(name))
            .cloned()
            .collect())
    }

    async fn execute_admin(&self, statement: &str) -> anyhow::Result<()> {
        self.state
            .lock()
            .unwrap()
            .admin_statements
            .push(statement.to_string());
        Ok(())
    }

    async fn database_exists(&self, db: &str) -> anyhow::Result<bool> {
        Ok(self.state.lock().unwrap().databases.contains_key(db))
    }

    async fn ensure_database(&self, db: &str) -> anyhow::Result<()> {
        self.state
            .lock()
            .unwrap()
            .databases
            .entry(db.to_string())
            .or_default();
        Ok(())
    }

    async fn list_tables(&self, db: &str) -> anyhow::Result<Vec<TableDef>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .databases
            .get(db)
            .map(|d| d.tables.values().map(|t| t.def.clone()).collect())
            .unwrap_or_default())
    }

    async fn list_views(&self, db: &str) -> anyhow::Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .databases
            .get(db)
            .map(|d| d.views.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn view_definition(&self, db: &str, view: &str) -> anyhow::Result<String> {
        let state = self.state.lock().unwrap();
        state
            .databases
            .get(db)
            .and_then(|d| d.views.get(view))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such view {db}.{view}"))
    }

    async fn table_exists(&self, db: &str, table: &str) -> anyhow::Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state
            .databases
            .get(db)
            .is_some_and(|d| d.tables.contains_key(table)))
    }

    async fn create_table_like(&self, db: &str, def: &TableDef) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        let database = state.databases.entry(db.to_string()).or_default();
        database.tables.entry(def.name.clone()).or_insert_with(|| FakeTable {
            def: def.clone(),
            rows: Vec::new(),
        });
        Ok(())
    }

    async fn drop_table(&self, db: &str, table: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(database) = state.databases.get_mut(db) {
            database.tables.remove(table);
        }
        Ok(())
    }

    async fn create_view(&self, db: &str, view: &str, body: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        let database = state.databases.entry(db.to_string()).or_default();
        database.views.insert(view.to_string(), body.to_string());
        Ok(())
    }

    async fn max_order_value(
        &self,
        db: &str,
        table: &str,
        order_by: &str,
    ) -> anyhow::Result<Option<SqlValue>> {
        let state = self.state.lock().unwrap();
        let Some(t) = state.databases.get(db).and_then(|d| d.tables.get(table)) else {
            return Ok(None);
        };
        Ok(t.rows
            .iter()
            .filter_map(|row| row.get(order_by))
            .max_by(|a, b| a.partial_cmp_for_watermark(b))
            .cloned())
    }

    async fn fetch_batch(
        &self,
        db: &str,
        table: &str,
        order_by: &str,
        after: Option<&SqlValue>,
        tie_break: Option<(&str, &SqlValue)>,
        limit: u64,
    ) -> anyhow::Result<RowBatch> {
        let state = self.state.lock().unwrap();
        let Some(t) = state.databases.get(db).and_then(|d| d.tables.get(table)) else {
            return Ok(RowBatch::default());
        };
        let mut rows: Vec<Row> = t
            .rows
            .iter()
            .filter(|row| {
                let Some(after) = after else { return true };
                let Some(value) = row.get(order_by) else {
                    return false;
                };
                match value.partial_cmp_for_watermark(after) {
                    std::cmp::Ordering::Greater => true,
                    std::cmp::Ordering::Equal => {
                        let Some((pk_col, last_pk)) = tie_break else {
                            return false;
                        };
                        match row.get(pk_col) {
                            Some(pk) => {
                                pk.partial_cmp_for_watermark(last_pk) == std::cmp::Ordering::Greater
                            }
                            None => false,
                        }
                    }
                    std::cmp::Ordering::Less => false,
                }
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.get(order_by)
                .zip(b.get(order_by))
                .map(|(x, y)| x.partial_cmp_for_watermark(y))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rows.truncate(limit as usize);
        Ok(RowBatch { rows })
    }

    async fn fetch_all(&self, db: &str, table: &str) -> anyhow::Result<RowBatch> {
        let state = self.state.lock().unwrap();
        Ok(state
            .databases
            .get(db)
            .and_then(|d| d.tables.get(table))
            .map(|t| RowBatch {
                rows: t.rows.clone(),
            })
            .unwrap_or_default())
    }

    async fn insert_batch(&self, db: &str, table: &str, batch: &RowBatch) -> anyhow::Result<u64> {
        let mut state = self.state.lock().unwrap();
        let Some(database) = state.databases.get_mut(db) else {
            anyhow::bail!("no such database {db}");
        };
        let Some(t) = database.tables.get_mut(table) else {
            anyhow::bail!("no such table {db}.{table}");
        };
        t.rows.extend(batch.rows.iter().cloned());
        Ok(batch.rows.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, time: i64) -> Row {
        let mut r = Row::new();
        r.insert("id".to_string(), SqlValue::Int(id));
        r.insert("Time".to_string(), SqlValue::Int(time));
        r
    }

    #[tokio::test]
    async fn fetch_batch_excludes_rows_at_or_before_watermark() {
        let gw = FakeGateway::new().with_table(
            "src",
            table_def("events", &["id", "Time"]),
            vec![row(1, 1), row(2, 2), row(3, 3)],
        );
        let batch = gw
            .fetch_batch("src", "events", "Time", Some(&SqlValue::Int(1)), None, 10)
            .await
            .unwrap();
        let times: Vec<i64> = batch
            .rows
            .iter()
            .map(|r| match r.get("Time").unwrap() {
                SqlValue::Int(i) => *i,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(times, vec![2, 3]);
    }

    #[tokio::test]
    async fn fetch_batch_truncates_to_limit_in_ascending_order() {
        let gw = FakeGateway::new().with_table(
            "src",
            table_def("events", &["id", "Time"]),
            vec![row(1, 3), row(2, 1), row(3, 2)],
        );
        let batch = gw
            .fetch_batch("src", "events", "Time", None, None, 2)
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
        let times: Vec<i64> = batch
            .rows
            .iter()
            .map(|r| match r.get("Time").unwrap() {
                SqlValue::Int(i) => *i,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(times, vec![1, 2]);
    }

    #[tokio::test]
    async fn tie_break_picks_up_rows_sharing_the_watermark_value() {
        // Two rows share Time=5; a prior batch only carried pk=10 at that
        // watermark, so the next call should surface the remaining pk=11 row
        // instead of skipping it because Time is no longer strictly greater.
        let gw = FakeGateway::new().with_table(
            "src",
            table_def("events", &["id", "Time"]),
            vec![row(10, 5), row(11, 5), row(12, 6)],
        );
        let batch = gw
            .fetch_batch(
                "src",
                "events",
                "Time",
                Some(&SqlValue::Int(5)),
                Some(("id", &SqlValue::Int(10))),
                10,
            )
            .await
            .unwrap();
        let ids: Vec<i64> = batch
            .rows
            .iter()
            .map(|r| match r.get("id").unwrap() {
                SqlValue::Int(i) => *i,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ids, vec![11, 12]);
    }

    #[tokio::test]
    async fn without_tie_break_equal_watermark_rows_are_skipped() {
        let gw = FakeGateway::new().with_table(
            "src",
            table_def("events", &["id", "Time"]),
            vec![row(10, 5), row(11, 5), row(12, 6)],
        );
        let batch = gw
            .fetch_batch("src", "events", "Time", Some(&SqlValue::Int(5)), None, 10)
            .await
            .unwrap();
        let ids: Vec<i64> = batch
            .rows
            .iter()
            .map(|r| match r.get("id").unwrap() {
                SqlValue::Int(i) => *i,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ids, vec![12]);
    }

    #[tokio::test]
    async fn insert_batch_requires_an_existing_table() {
        let gw = FakeGateway::new().with_empty_database("src");
        let result = gw
            .insert_batch("src", "missing", &RowBatch::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn ensure_database_is_idempotent() {
        let gw = FakeGateway::new();
        gw.ensure_database("app").await.unwrap();
        gw.ensure_database("app").await.unwrap();
        assert!(gw.database_exists("app").await.unwrap());
    }
}
