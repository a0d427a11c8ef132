//! Core library for the incremental database replicator: schema reflection,
//! bootstrap of missing target schema, table classification, and the
//! watermark-driven batch-copy loop. The CLI (`replicator_cli`) is a thin
//! shell around [`orchestrator::run_all_schemes`].

pub mod classify;
pub mod config;
pub mod dynamic;
pub mod error;
pub mod gateway;
pub mod incremental;
pub mod logger;
pub mod materializer;
pub mod naming;
pub mod orchestrator;
pub mod worker;
