//! Contextual logger with `{scheme, db}` fields, built on `tracing`.
//!
//! The reference tool builds one `logging.Logger` child per `(scheme, db)`
//! pair and calls named methods on it (`database_created`,
//! `batch_include`, ...) rather than formatting ad hoc strings at call
//! sites. This mirrors that shape with a thin wrapper around `tracing`:
//! every method is one `tracing::info!`/`error!` call carrying `scheme` and
//! `db` as structured fields, the same way the reference MySQL/Postgres
//! persistence crates attach `cluster_name` and friends as static labels
//! rather than building strings (`crates/mysql/src/metrics.rs` in this
//! project's lineage). Installing a global `tracing_subscriber::fmt`
//! subscriber with an `EnvFilter` (done once, in the CLI's `main`) gives
//! every line a timestamp, level, and these fields for free.

use std::time::Duration;

use crate::gateway::SqlValue;

/// A logger scoped to one `(scheme, db)` pair. Cheap to construct; hold one
/// per worker and pass it down into the passes it runs.
#[derive(Debug, Clone)]
pub struct WorkerLog {
    scheme: String,
    db: String,
}

impl WorkerLog {
    pub fn new(scheme: impl Into<String>, db: impl Into<String>) -> Self {
        WorkerLog {
            scheme: scheme.into(),
            db: db.into(),
        }
    }

    pub fn info(&self, message: &str) {
        tracing::info!(scheme = %self.scheme, db = %self.db, "{message}");
    }

    pub fn error(&self, message: &str) {
        tracing::error!(scheme = %self.scheme, db = %self.db, "{message}");
    }

    /// Logs an error together with its full `anyhow` cause chain, for
    /// failures a human will need to reproduce (per-table/per-view/per-batch
    /// failures, §7).
    pub fn exception(&self, context: &str, err: &anyhow::Error) {
        tracing::error!(
            scheme = %self.scheme,
            db = %self.db,
            error = %err,
            cause_chain = ?err.chain().map(|c| c.to_string()).collect::<Vec<_>>(),
            "{context}"
        );
    }

    pub fn reflecting_source(&self) {
        tracing::info!(scheme = %self.scheme, db = %self.db, "reflecting source schema");
    }

    pub fn reflecting_target(&self) {
        tracing::info!(scheme = %self.scheme, db = %self.db, "reflecting target schema");
    }

    pub fn database_created(&self) {
        tracing::info!(scheme = %self.scheme, db = %self.db, "target database created");
    }

    pub fn view_created(&self, view: &str) {
        tracing::info!(scheme = %self.scheme, db = %self.db, view, "view created");
    }

    pub fn dynamic_recreated(&self, table: &str) {
        tracing::info!(scheme = %self.scheme, db = %self.db, table, "dynamic table recreated");
    }

    pub fn batch_dynamic(&self, table: &str, count: u64, seconds: f64) {
        tracing::info!(
            scheme = %self.scheme,
            db = %self.db,
            table,
            rows = count,
            seconds,
            "dynamic table refreshed"
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn batch_include(
        &self,
        table: &str,
        batch_nb: u64,
        count: u64,
        watermark: Option<&SqlValue>,
        total_s: f64,
        read_s: f64,
        write_s: f64,
    ) {
        let watermark = watermark
            .map(ToString::to_string)
            .unwrap_or_else(|| "<none>".to_string());
        tracing::info!(
            scheme = %self.scheme,
            db = %self.db,
            table,
            batch_nb,
            rows = count,
            watermark,
            total_s,
            read_s,
            write_s,
            "batch copied"
        );
    }

    pub fn bootstrapped_with(&self, stmt: &str) {
        tracing::info!(scheme = %self.scheme, db = %self.db, statement = stmt, "bootstrap statement executed");
    }
}

/// Converts a [`Duration`] to fractional seconds for the structured log
/// fields above, which report timings as `f64` seconds rather than a
/// `Duration`'s `Debug` form.
pub fn as_seconds(d: Duration) -> f64 {
    d.as_secs_f64()
}

/// Installs the process-wide `tracing` subscriber. Called once from
/// `main`; every [`WorkerLog`] call afterwards is picked up by it.
/// Verbosity is controlled by `RUST_LOG` (defaults to `info`) via
/// `tracing_subscriber::EnvFilter`, matching the knob operators already
/// expect from any `tracing`-based Rust service.
pub fn init_subscriber() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
