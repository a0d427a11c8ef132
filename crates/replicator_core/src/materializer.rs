//! Brings a target database up to date with a source database's structure,
//! without ever altering or dropping what is already there (the dynamic
//! path in [`crate::dynamic`] is the one exception to "never drop").

use crate::gateway::{DbGateway, TableDef};

/// Creates `db` on `target` if it is not already there. Idempotent.
pub async fn ensure_database(target: &dyn DbGateway, db: &str) -> anyhow::Result<bool> {
    if target.database_exists(db).await? {
        return Ok(false);
    }
    target.ensure_database(db).await?;
    Ok(true)
}

/// Creates `table` on `target` from `def` if a table by that name does not
/// already exist. Never alters an existing target table - schema
/// divergence between source and target is left to the operator.
pub async fn ensure_table(
    target: &dyn DbGateway,
    db: &str,
    def: &TableDef,
) -> anyhow::Result<bool> {
    if target.table_exists(db, &def.name).await? {
        return Ok(false);
    }
    target.create_table_like(db, def).await?;
    Ok(true)
}

/// Creates `view` on `target` from the source's view body if absent. On
/// failure the caller should log and continue with the next view rather
/// than abort the pass - one broken view definition must not block the
/// rest of the schema.
pub async fn ensure_view(
    target: &dyn DbGateway,
    db: &str,
    view: &str,
    source_body: &str,
) -> anyhow::Result<bool> {
    let existing = target.list_views(db).await?;
    if existing.iter().any(|v| v == view) {
        return Ok(false);
    }
    target.create_view(db, view, source_body).await?;
    Ok(true)
}

/// Runs [`ensure_table`] for every table, reporting which ones it actually
/// created (as opposed to finding already present).
pub async fn ensure_tables(
    target: &dyn DbGateway,
    db: &str,
    defs: &[TableDef],
) -> anyhow::Result<Vec<String>> {
    let mut created = Vec::new();
    for def in defs {
        if ensure_table(target, db, def).await? {
            created.push(def.name.clone());
        }
    }
    Ok(created)
}

/// A view whose source body could not be materialized on the target.
pub struct ViewFailure {
    pub view: String,
    pub error: anyhow::Error,
}

/// Runs [`ensure_view`] for every listed view name. Per-view failures are
/// collected rather than propagated; the caller decides how to log them.
pub async fn ensure_views(
    source: &dyn DbGateway,
    target: &dyn DbGateway,
    source_db: &str,
    target_db: &str,
    views: &[String],
) -> (Vec<String>, Vec<ViewFailure>) {
    let mut created = Vec::new();
    let mut failures = Vec::new();
    for view in views {
        let outcome = async {
            let body = source.view_definition(source_db, view).await?;
            ensure_view(target, target_db, view, &body).await
        }
        .await;
        match outcome {
            Ok(true) => created.push(view.clone()),
            Ok(false) => {}
            Err(error) => failures.push(ViewFailure {
                view: view.clone(),
                error,
            }),
        }
    }
    (created, failures)
}
