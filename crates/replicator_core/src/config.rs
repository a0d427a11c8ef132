//! Scheme configuration: JSON file -> validated, immutable tree of typed
//! records.
//!
//! The reference tool (`timeds`) treats its config as an open-ended
//! attribute bag checked against a hand-rolled schema at runtime. Here the
//! JSON is parsed straight into `serde` structs with `deny_unknown_fields`
//! (the same tightening this codebase's Fivetran connector applies to its
//! `State`/`Checkpoint` wire types) and then validated into a second,
//! immutable layer that compiles every regex once up front.

use std::{collections::BTreeMap, fmt, path::Path};

use regex::Regex;
use serde::Deserialize;

const DEFAULT_BATCH_SIZE: u64 = 100_000;
const DEFAULT_ORDER_BY: &str = "Time";

/// A database engine this tool knows how to replicate between.
///
/// The reference implementation only ever registers one connector
/// (`mysql` -> `pymysql`); this enum stays a single-variant set for the same
/// reason rather than guessing at unsupported engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Mysql,
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Driver::Mysql => write!(f, "mysql"),
        }
    }
}

/// How a target database name is derived from the matched source schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingStrategy {
    /// Target name equals the source name.
    Original,
    /// Target name is a fixed string, regardless of which source matched.
    Exact,
    /// Target name is `source_pattern` regex-substituted by `target` inside
    /// the source name.
    Replace,
}

impl Default for NamingStrategy {
    fn default() -> Self {
        NamingStrategy::Original
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHost {
    host: String,
    port: u16,
    driver: Driver,
    username: String,
    password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTargetHost {
    host: String,
    port: u16,
    driver: Driver,
    username: String,
    password: String,
    #[serde(default)]
    execute_first: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDatabaseRule {
    source: String,
    target: Option<String>,
    #[serde(default)]
    naming_strategy: NamingStrategy,
    include_tables: Option<String>,
    exclude_tables: Option<String>,
    dynamic_tables: Option<String>,
    #[serde(default)]
    replicate_views: bool,
    order_by: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawScheme {
    source: RawHost,
    target: RawTargetHost,
    batch_size: Option<u64>,
    databases: Vec<RawDatabaseRule>,
}

/// A validated connection descriptor for one side of a replication pair.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub host: String,
    pub port: u16,
    pub driver: Driver,
    pub username: String,
    pub password: String,
    pub execute_first: Option<String>,
}

/// A validated directive selecting source schemas by regex and declaring how
/// to copy them.
#[derive(Debug, Clone)]
pub struct DatabaseRule {
    pub source_pattern: Regex,
    pub target_name: Option<String>,
    pub naming_strategy: NamingStrategy,
    pub include_tables: Option<Regex>,
    pub exclude_tables: Option<Regex>,
    pub dynamic_tables: Option<Regex>,
    pub replicate_views: bool,
    pub order_by: String,
}

/// A single named replication configuration: one source host, one target
/// host, and a list of database rules. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct SchemeConfig {
    pub name: String,
    pub source: HostConfig,
    pub target: HostConfig,
    pub batch_size: u64,
    pub databases: Vec<DatabaseRule>,
}

/// The full set of replication schemes loaded from one config file.
#[derive(Debug, Clone)]
pub struct Config {
    pub schemes: Vec<SchemeConfig>,
}

/// A configuration validation failure, always attributable to one scheme.
#[derive(Debug, thiserror::Error)]
#[error("[{scheme}] {message}")]
pub struct ConfigError {
    pub scheme: String,
    pub message: String,
}

impl ConfigError {
    fn new(scheme: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError {
            scheme: scheme.into(),
            message: message.into(),
        }
    }
}

fn compile_optional_pattern(
    scheme: &str,
    field: &str,
    raw: Option<String>,
) -> Result<Option<Regex>, ConfigError> {
    match raw {
        // Empty regex is treated as unset: compiling it would match
        // every table name, which is never the intent of an absent filter.
        None => Ok(None),
        Some(ref s) if s.is_empty() => Ok(None),
        Some(s) => Regex::new(&s)
            .map(Some)
            .map_err(|e| ConfigError::new(scheme, format!("invalid regex for {field}: {e}"))),
    }
}

impl Config {
    /// Parses and validates a config file, failing on the first invalid
    /// scheme. Unknown top-level keys inside a scheme body are rejected by
    /// `serde` before validation even runs.
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("unable to read config file {}: {e}", path.display()))?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> anyhow::Result<Config> {
        let raw: BTreeMap<String, RawScheme> = serde_json::from_str(contents)
            .map_err(|e| anyhow::anyhow!("invalid config JSON: {e}"))?;
        let mut schemes = Vec::with_capacity(raw.len());
        for (name, scheme) in raw {
            schemes.push(validate_scheme(name, scheme)?);
        }
        Ok(Config { schemes })
    }
}

fn validate_scheme(name: String, raw: RawScheme) -> Result<SchemeConfig, ConfigError> {
    if raw.databases.is_empty() {
        return Err(ConfigError::new(&name, "databases must be non-empty"));
    }
    let batch_size = raw.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
    if batch_size < 1 {
        return Err(ConfigError::new(&name, "batch_size must be >= 1"));
    }

    let mut databases = Vec::with_capacity(raw.databases.len());
    for db in raw.databases {
        databases.push(validate_database_rule(&name, db)?);
    }

    Ok(SchemeConfig {
        source: HostConfig {
            host: raw.source.host,
            port: raw.source.port,
            driver: raw.source.driver,
            username: raw.source.username,
            password: raw.source.password,
            execute_first: None,
        },
        target: HostConfig {
            host: raw.target.host,
            port: raw.target.port,
            driver: raw.target.driver,
            username: raw.target.username,
            password: raw.target.password,
            execute_first: raw.target.execute_first,
        },
        batch_size,
        databases,
        name,
    })
}

fn validate_database_rule(
    scheme: &str,
    raw: RawDatabaseRule,
) -> Result<DatabaseRule, ConfigError> {
    let source_pattern = Regex::new(&raw.source)
        .map_err(|e| ConfigError::new(scheme, format!("invalid regex for source: {e}")))?;

    // Naming strategies that need a fixed/replacement string
    // must be given one.
    if matches!(
        raw.naming_strategy,
        NamingStrategy::Exact | NamingStrategy::Replace
    ) && raw.target.as_deref().unwrap_or("").is_empty()
    {
        return Err(ConfigError::new(
            scheme,
            format!(
                "naming_strategy = {:?} requires target",
                raw.naming_strategy
            ),
        ));
    }

    let include_tables = compile_optional_pattern(scheme, "include_tables", raw.include_tables)?;
    let exclude_tables = compile_optional_pattern(scheme, "exclude_tables", raw.exclude_tables)?;
    let dynamic_tables = compile_optional_pattern(scheme, "dynamic_tables", raw.dynamic_tables)?;

    Ok(DatabaseRule {
        source_pattern,
        target_name: raw.target,
        naming_strategy: raw.naming_strategy,
        include_tables,
        exclude_tables,
        dynamic_tables,
        replicate_views: raw.replicate_views,
        order_by: raw.order_by.unwrap_or_else(|| DEFAULT_ORDER_BY.to_string()),
    })
}
