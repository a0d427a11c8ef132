//! Full-refresh copier for small, lookup-like tables that lack a monotonic
//! ordering column: drop the target copy, recreate it from the source
//! definition, and bulk-reinsert every row in one transaction. Cheaper than
//! change tracking for tables this size, and simpler than trying to diff
//! them.

use std::time::Instant;

use crate::gateway::{DbGateway, TableDef};

/// Outcome of refreshing one dynamic table, carried back to the caller for
/// logging (`dynamic_recreated`, `batch_dynamic`).
pub struct RefreshOutcome {
    pub table: String,
    pub rows: u64,
    pub duration: std::time::Duration,
}

/// A table that failed to refresh. The table is skipped; the rest of the
/// pass continues.
pub struct RefreshFailure {
    pub table: String,
    pub error: anyhow::Error,
}

/// Refreshes every table in `defs` on `target`, pulling fresh rows from
/// `source` each time. A table whose refresh fails is recorded in the
/// failure list rather than aborting the remaining tables.
pub async fn refresh_all(
    source: &dyn DbGateway,
    target: &dyn DbGateway,
    source_db: &str,
    target_db: &str,
    defs: &[TableDef],
) -> (Vec<RefreshOutcome>, Vec<RefreshFailure>) {
    let mut outcomes = Vec::new();
    let mut failures = Vec::new();
    for def in defs {
        match refresh_one(source, target, source_db, target_db, def).await {
            Ok(outcome) => outcomes.push(outcome),
            Err(error) => failures.push(RefreshFailure {
                table: def.name.clone(),
                error,
            }),
        }
    }
    (outcomes, failures)
}

async fn refresh_one(
    source: &dyn DbGateway,
    target: &dyn DbGateway,
    source_db: &str,
    target_db: &str,
    def: &TableDef,
) -> anyhow::Result<RefreshOutcome> {
    let started = Instant::now();
    target.drop_table(target_db, &def.name).await?;
    target.create_table_like(target_db, def).await?;
    let batch = source.fetch_all(source_db, &def.name).await?;
    let rows = target.insert_batch(target_db, &def.name, &batch).await?;
    Ok(RefreshOutcome {
        table: def.name.clone(),
        rows,
        duration: started.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{fake::FakeGateway, fake::table_def, SqlValue};

    fn row(id: i64) -> crate::gateway::Row {
        let mut r = crate::gateway::Row::new();
        r.insert("id".to_string(), SqlValue::Int(id));
        r
    }

    #[tokio::test]
    async fn refresh_replaces_target_rows_with_current_source_rows() {
        let source = FakeGateway::new().with_table(
            "app",
            table_def("lookup", &["id"]),
            vec![row(1), row(2), row(3)],
        );
        let target = FakeGateway::new().with_table(
            "app",
            table_def("lookup", &["id"]),
            vec![row(1), row(2), row(3), row(4)],
        );

        let defs = vec![table_def("lookup", &["id"])];
        let (outcomes, failures) =
            refresh_all(&source, &target, "app", "app", &defs).await;

        assert!(failures.is_empty());
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].rows, 3);
        assert_eq!(target.rows("app", "lookup").len(), 3);
    }

    /// Wraps a [`FakeGateway`] but fails `insert_batch` for one named table,
    /// so failure isolation can be tested without a live database: the fake
    /// gateway's other operations auto-create whatever database/table they
    /// are pointed at, so a genuine failure has to be injected explicitly.
    struct FlakyTarget {
        inner: FakeGateway,
        fails_on: String,
    }

    #[async_trait::async_trait]
    impl DbGateway for FlakyTarget {
        async fn list_schemas(&self, p: &regex::Regex) -> anyhow::Result<Vec<String>> {
            self.inner.list_schemas(p).await
        }
        async fn execute_admin(&self, s: &str) -> anyhow::Result<()> {
            self.inner.execute_admin(s).await
        }
        async fn database_exists(&self, db: &str) -> anyhow::Result<bool> {
            self.inner.database_exists(db).await
        }
        async fn ensure_database(&self, db: &str) -> anyhow::Result<()> {
            self.inner.ensure_database(db).await
        }
        async fn list_tables(&self, db: &str) -> anyhow::Result<Vec<TableDef>> {
            self.inner.list_tables(db).await
        }
        async fn list_views(&self, db: &str) -> anyhow::Result<Vec<String>> {
            self.inner.list_views(db).await
        }
        async fn view_definition(&self, db: &str, v: &str) -> anyhow::Result<String> {
            self.inner.view_definition(db, v).await
        }
        async fn table_exists(&self, db: &str, t: &str) -> anyhow::Result<bool> {
            self.inner.table_exists(db, t).await
        }
        async fn create_table_like(&self, db: &str, def: &TableDef) -> anyhow::Result<()> {
            self.inner.create_table_like(db, def).await
        }
        async fn drop_table(&self, db: &str, t: &str) -> anyhow::Result<()> {
            self.inner.drop_table(db, t).await
        }
        async fn create_view(&self, db: &str, v: &str, body: &str) -> anyhow::Result<()> {
            self.inner.create_view(db, v, body).await
        }
        async fn max_order_value(
            &self,
            db: &str,
            t: &str,
            o: &str,
        ) -> anyhow::Result<Option<SqlValue>> {
            self.inner.max_order_value(db, t, o).await
        }
        async fn fetch_batch(
            &self,
            db: &str,
            t: &str,
            o: &str,
            after: Option<&SqlValue>,
            tie: Option<(&str, &SqlValue)>,
            limit: u64,
        ) -> anyhow::Result<crate::gateway::RowBatch> {
            self.inner.fetch_batch(db, t, o, after, tie, limit).await
        }
        async fn fetch_all(&self, db: &str, t: &str) -> anyhow::Result<crate::gateway::RowBatch> {
            self.inner.fetch_all(db, t).await
        }
        async fn insert_batch(
            &self,
            db: &str,
            table: &str,
            batch: &crate::gateway::RowBatch,
        ) -> anyhow::Result<u64> {
            if table == self.fails_on {
                anyhow::bail!("simulated insert failure for {table}");
            }
            self.inner.insert_batch(db, table, batch).await
        }
    }

    #[tokio::test]
    async fn a_failing_table_does_not_block_its_siblings() {
        let source = FakeGateway::new()
            .with_table("app", table_def("good", &["id"]), vec![row(1)])
            .with_table("app", table_def("bad", &["id"]), vec![row(2)]);
        let target = FlakyTarget {
            inner: FakeGateway::new().with_empty_database("app"),
            fails_on: "bad".to_string(),
        };
        let defs = vec![table_def("good", &["id"]), table_def("bad", &["id"])];

        let (outcomes, failures) =
            refresh_all(&source, &target, "app", "app", &defs).await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].table, "good");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].table, "bad");
    }
}
