//! Per-scheme fan-out: lists source schemas matching each `DatabaseRule`,
//! derives the target name, and spawns one [`worker::run_worker`] task per
//! matched `(source_db, target_db)` pair. Mirrors the reference
//! `SchemeReplicator.run`: one administrative connection to bootstrap the
//! target, then one thread (here, one Tokio task) per database pair.

use tokio_util::sync::CancellationToken;

use crate::{
    config::{Config, DatabaseRule, SchemeConfig},
    gateway,
    logger::WorkerLog,
    naming,
    worker::{self, WorkerMode, WorkerOutcome},
};

/// Everything one scheme run produced, for the CLI to summarize.
#[derive(Debug, Default)]
pub struct SchemeOutcome {
    pub scheme: String,
    pub bootstrap_error: Option<String>,
    /// One entry per `DatabaseRule` whose runtime invariant (§3: `exact`
    /// naming must match exactly one source schema) was violated - the
    /// rule is skipped entirely rather than guessing which match to keep.
    pub rule_errors: Vec<String>,
    pub workers: Vec<WorkerOutcome>,
}

/// Runs every configured scheme to completion. Schemes run concurrently
/// with each other exactly as their workers do; nothing here serializes
/// across schemes.
pub async fn run_all_schemes(
    config: &Config,
    mode: WorkerMode,
    cancellation: &CancellationToken,
) -> Vec<SchemeOutcome> {
    let mut handles = Vec::with_capacity(config.schemes.len());
    for scheme in &config.schemes {
        let scheme = scheme.clone();
        let mode = mode;
        let cancellation = cancellation.clone();
        handles.push(tokio::spawn(
            async move { run_scheme(&scheme, mode, &cancellation).await },
        ));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(join_err) => {
                tracing::error!("scheme task panicked: {join_err}");
            }
        }
    }
    outcomes
}

/// Runs one scheme: bootstrap, then one worker per matched database.
pub async fn run_scheme(
    scheme: &SchemeConfig,
    mode: WorkerMode,
    cancellation: &CancellationToken,
) -> SchemeOutcome {
    let scheme_log = WorkerLog::new(scheme.name.as_str(), "-");
    let mut outcome = SchemeOutcome {
        scheme: scheme.name.clone(),
        ..Default::default()
    };

    let source_admin = match gateway::open(&scheme.source, None) {
        Ok(gw) => gw,
        Err(err) => {
            scheme_log.exception("unable to open administrative connection to source", &err);
            outcome.bootstrap_error = Some(err.to_string());
            return outcome;
        }
    };

    if let Some(stmt) = scheme.target.execute_first.as_deref() {
        match gateway::open(&scheme.target, None) {
            Ok(target_admin) => match target_admin.execute_admin(stmt).await {
                Ok(()) => scheme_log.bootstrapped_with(stmt),
                // Bootstrap errors are logged, not fatal (§7): the scheme
                // continues even if the statement fails.
                Err(err) => scheme_log.exception("bootstrap statement failed", &err),
            },
            Err(err) => scheme_log.exception(
                "unable to open administrative connection to target for bootstrap",
                &err,
            ),
        }
    }

    let mut worker_specs = Vec::new();
    for rule in &scheme.databases {
        match matched_databases(source_admin.as_ref(), rule).await {
            Ok(specs) => worker_specs.extend(specs),
            Err(message) => outcome.rule_errors.push(message),
        }
    }

    let mut handles = Vec::with_capacity(worker_specs.len());
    for (source_db, target_db, rule) in worker_specs {
        let scheme_name = scheme.name.clone();
        let source_host = scheme.source.clone();
        let target_host = scheme.target.clone();
        let batch_size = scheme.batch_size;
        let cancellation = cancellation.clone();
        handles.push(tokio::spawn(async move {
            let log = WorkerLog::new(scheme_name.as_str(), target_db.as_str());
            let source = match gateway::open(&source_host, Some(&source_db)) {
                Ok(gw) => gw,
                Err(err) => {
                    log.exception("unable to open source connection", &err);
                    return WorkerOutcome {
                        source_db,
                        target_db,
                        setup_error: Some(err.to_string()),
                        ..Default::default()
                    };
                }
            };
            let target = match gateway::open(&target_host, None) {
                Ok(gw) => gw,
                Err(err) => {
                    log.exception("unable to open target connection", &err);
                    return WorkerOutcome {
                        source_db,
                        target_db,
                        setup_error: Some(err.to_string()),
                        ..Default::default()
                    };
                }
            };
            worker::run_worker(
                source.as_ref(),
                target.as_ref(),
                &source_db,
                &target_db,
                &rule,
                batch_size,
                mode,
                &cancellation,
                &log,
            )
            .await
        }));
    }

    for handle in handles {
        match handle.await {
            Ok(worker_outcome) => outcome.workers.push(worker_outcome),
            Err(join_err) => {
                scheme_log.error(&format!("worker task panicked: {join_err}"));
            }
        }
    }

    outcome
}

/// Lists the source schemas one `DatabaseRule` selects and derives the
/// target name for each, enforcing the runtime half of the `exact` naming
/// invariant that `config::validate_database_rule` cannot check statically
/// (§3: it must match exactly one source schema).
async fn matched_databases(
    source_admin: &dyn gateway::DbGateway,
    rule: &DatabaseRule,
) -> Result<Vec<(String, String, DatabaseRule)>, String> {
    let matches = source_admin
        .list_schemas(&rule.source_pattern)
        .await
        .map_err(|err| format!("unable to list source schemas: {err}"))?;

    if rule.naming_strategy == crate::config::NamingStrategy::Exact && matches.len() != 1 {
        return Err(format!(
            "naming_strategy = exact requires source_pattern {:?} to match exactly one schema, matched {}",
            rule.source_pattern.as_str(),
            matches.len()
        ));
    }

    Ok(matches
        .into_iter()
        .map(|source_db| {
            let target_db = naming::derive_target_name(rule, &source_db);
            (source_db, target_db, rule.clone())
        })
        .collect())
}
