//! The replication worker: one task per `(source_db, target_db)` pair.
//! Reflects both sides, classifies tables, and runs whichever of the
//! views+dynamic pass and the incremental pass its [`WorkerMode`] allows.
//!
//! This is the layer [`orchestrator`](crate::orchestrator) spawns one Tokio
//! task per, matching the reference `DbReplicator` thread - ported to an
//! async task because every unit of work here is I/O-bound, not CPU-bound.

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;

use crate::{
    classify::classify_schema,
    config::DatabaseRule,
    dynamic,
    gateway::{DbGateway, TableDef},
    incremental,
    logger::{self, WorkerLog},
    materializer,
};

/// Which passes a worker runs. Mirrors the CLI's `--only-dynamic-and-views`
/// switch (§6): a scheduled "refresh dynamics" run skips the (expensive)
/// incremental pass entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    Full,
    OnlyDynamicAndViews,
}

/// What one worker run accomplished, for the orchestrator to aggregate and
/// for the CLI's exit-code decision (setup failures matter; per-table
/// failures, by design, do not - see §7).
#[derive(Debug, Default)]
pub struct WorkerOutcome {
    pub source_db: String,
    pub target_db: String,
    /// `None` if the worker never got past setup (target DB unreachable or
    /// uncreatable).
    pub setup_error: Option<String>,
    pub views_created: Vec<String>,
    pub view_failures: Vec<String>,
    pub dynamic_refreshed: Vec<String>,
    pub dynamic_failures: Vec<String>,
    pub ordered_tables_caught_up: Vec<String>,
    pub ordered_tables_cancelled: Vec<String>,
}

impl WorkerOutcome {
    fn new(source_db: &str, target_db: &str) -> Self {
        WorkerOutcome {
            source_db: source_db.to_string(),
            target_db: target_db.to_string(),
            ..Default::default()
        }
    }
}

/// Runs one worker to completion (or cancellation). `source`/`target` are
/// already-connected gateways scoped to no particular database; this
/// function does all of its own database selection by name, the way the
/// reference `DbReplicator` opens its own pair of SQLAlchemy engines
/// per-database rather than reusing a host-wide connection.
#[allow(clippy::too_many_arguments)]
pub async fn run_worker(
    source: &dyn DbGateway,
    target: &dyn DbGateway,
    source_db: &str,
    target_db: &str,
    rule: &DatabaseRule,
    batch_size: u64,
    mode: WorkerMode,
    cancellation: &CancellationToken,
    log: &WorkerLog,
) -> WorkerOutcome {
    let mut outcome = WorkerOutcome::new(source_db, target_db);

    log.reflecting_source();
    let source_tables = match source.list_tables(source_db).await {
        Ok(tables) => tables,
        Err(err) => {
            log.exception("unable to reflect source schema", &err);
            outcome.setup_error = Some(err.to_string());
            return outcome;
        }
    };
    let source_views: HashSet<String> = match source.list_views(source_db).await {
        Ok(views) => views.into_iter().collect(),
        Err(err) => {
            log.exception("unable to list source views", &err);
            outcome.setup_error = Some(err.to_string());
            return outcome;
        }
    };

    match materializer::ensure_database(target, target_db).await {
        Ok(true) => log.database_created(),
        Ok(false) => {}
        Err(err) => {
            // Per §7: if the target DB cannot be created the worker cannot
            // proceed at all; log and exit cleanly rather than attempting
            // any pass against a database that may not exist.
            log.exception("unable to create target database", &err);
            outcome.setup_error = Some(err.to_string());
            return outcome;
        }
    }

    log.reflecting_target();
    if let Err(err) = target.list_tables(target_db).await {
        log.exception("unable to reflect target schema", &err);
        outcome.setup_error = Some(err.to_string());
        return outcome;
    }

    let table_names: Vec<&str> = source_tables.iter().map(|t| t.name.as_str()).collect();
    let classification = classify_schema(table_names, &source_views, rule);

    let by_name = |names: &[String]| -> Vec<TableDef> {
        source_tables
            .iter()
            .filter(|t| names.contains(&t.name))
            .cloned()
            .collect()
    };

    if rule.replicate_views {
        let (created, failures) = materializer::ensure_views(
            source,
            target,
            source_db,
            target_db,
            &classification.views,
        )
        .await;
        for view in &created {
            log.view_created(view);
        }
        for failure in &failures {
            log.exception(&format!("unable to create view {}", failure.view), &failure.error);
        }
        outcome.views_created = created;
        outcome.view_failures = failures.into_iter().map(|f| f.view).collect();
    }

    let dynamic_defs = by_name(&classification.dynamic);
    let (refreshed, failures) =
        dynamic::refresh_all(source, target, source_db, target_db, &dynamic_defs).await;
    for outcome_item in &refreshed {
        log.dynamic_recreated(&outcome_item.table);
        log.batch_dynamic(
            &outcome_item.table,
            outcome_item.rows,
            logger::as_seconds(outcome_item.duration),
        );
    }
    for failure in &failures {
        log.exception(&format!("unable to refresh dynamic table {}", failure.table), &failure.error);
    }
    outcome.dynamic_refreshed = refreshed.into_iter().map(|o| o.table).collect();
    outcome.dynamic_failures = failures.into_iter().map(|f| f.table).collect();

    if mode == WorkerMode::OnlyDynamicAndViews {
        return outcome;
    }

    let ordered_defs = by_name(&classification.ordered);
    // Every ordered table's target exists before any of them starts
    // copying, so a table referencing another by foreign key (unenforced
    // as that is on most of these engines) still finds its sibling's
    // target table present.
    if let Err(err) = materializer::ensure_tables(target, target_db, &ordered_defs).await {
        log.exception("unable to create target tables for the incremental pass", &err);
        outcome.setup_error = Some(err.to_string());
        return outcome;
    }

    for def in &ordered_defs {
        if cancellation.is_cancelled() {
            break;
        }
        let table_log = log.clone();
        let table_name = def.name.clone();
        let result = incremental::copy_table(
            source,
            target,
            source_db,
            target_db,
            def,
            &rule.order_by,
            batch_size,
            cancellation,
            |report| {
                table_log.batch_include(
                    &table_name,
                    report.batch_number,
                    report.rows,
                    report.watermark.as_ref(),
                    logger::as_seconds(report.read_time + report.write_time),
                    logger::as_seconds(report.read_time),
                    logger::as_seconds(report.write_time),
                );
            },
            |err, class| {
                table_log.exception(
                    &format!("{:?} error copying table {table_name}", class),
                    err,
                );
            },
        )
        .await;

        match result {
            Ok(incremental::StopReason::CaughtUp) => {
                outcome.ordered_tables_caught_up.push(def.name.clone())
            }
            Ok(incremental::StopReason::Cancelled) => {
                outcome.ordered_tables_cancelled.push(def.name.clone())
            }
            Err(err) => {
                // Only a programmer error reaches here (§7): classified
                // per-batch errors are handled inside `copy_table` and
                // never propagate.
                log.exception(&format!("table {} crashed", def.name), &err);
            }
        }
    }

    outcome
}
