//! Logging bootstrap.
//!
//! Engines log under fixed targets ([`ENGINE_TARGETS`]). The filter is built
//! from an explicit directive, else `RUST_LOG`, else [`DEFAULT_DIRECTIVES`],
//! and `engine_level` then pins the presale and vesting targets on top of it.
//! Output is text or JSON with RFC3339 (UTC) timestamps.

use std::env;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config::TelemetrySettings;

/// Targets used by the sale engines and the in-memory ledger.
pub const ENGINE_TARGETS: [&str; 3] = ["presale", "vesting", "ledger"];

/// Fallback filter: engine commits at info, ledger chatter only when it warns.
pub const DEFAULT_DIRECTIVES: &str = "info,presale=info,vesting=info,ledger=warn";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info,presale=debug". `None` reads `RUST_LOG`.
    pub env_filter: Option<String>,
    /// Level forced onto the `presale` and `vesting` targets, e.g. "debug"
    /// to see rejected deposits without raising everything else.
    pub engine_level: Option<String>,
    pub json: bool,
    /// Print target, file and line.
    pub with_targets_and_lines: bool,
    pub with_threads: bool,
    /// Colors; text output only.
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            engine_level: None,
            json: true,
            with_targets_and_lines: true,
            with_threads: false,
            ansi: false,
        }
    }
}

impl From<&TelemetrySettings> for LoggingConfig {
    fn from(s: &TelemetrySettings) -> Self {
        Self {
            env_filter: s.log_filter.clone(),
            engine_level: s.engine_level.clone(),
            json: s.json,
            ansi: s.ansi,
            ..Self::default()
        }
    }
}

impl LoggingConfig {
    /// The directive string handed to `EnvFilter`.
    pub fn directives(&self) -> String {
        let base = self
            .env_filter
            .clone()
            .or_else(|| env::var(EnvFilter::DEFAULT_ENV).ok())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DIRECTIVES.to_string());
        with_engine_level(base, self.engine_level.as_deref())
    }
}

// later directives for the same target win, so appending overrides the base
fn with_engine_level(base: String, level: Option<&str>) -> String {
    match level.map(str::trim).filter(|l| !l.is_empty()) {
        Some(level) => ["presale", "vesting"]
            .iter()
            .fold(base, |acc, target| format!("{acc},{target}={level}")),
        None => base,
    }
}

/// Install the global subscriber. Fails if one is already set.
pub fn init(cfg: LoggingConfig) -> anyhow::Result<()> {
    let directives = cfg.directives();
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|e| {
        eprintln!("invalid log filter `{directives}` ({e}); using `{DEFAULT_DIRECTIVES}`");
        EnvFilter::new(DEFAULT_DIRECTIVES)
    });

    let fmt_layer = {
        let base = fmt::layer()
            .with_target(cfg.with_targets_and_lines)
            .with_file(cfg.with_targets_and_lines)
            .with_line_number(cfg.with_targets_and_lines)
            .with_thread_ids(cfg.with_threads)
            .with_thread_names(cfg.with_threads)
            .with_timer(fmt::time::UtcTime::rfc_3339());

        if cfg.json {
            base.json().with_ansi(false).flatten_event(true).boxed()
        } else {
            base.with_ansi(cfg.ansi).boxed()
        }
    };

    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("logging already initialized: {e}"))?;
    tracing::debug!(target: "presale", %directives, "logging initialized");
    Ok(())
}

pub fn init_from_settings(settings: &TelemetrySettings) -> anyhow::Result<()> {
    init(LoggingConfig::from(settings))
}

/// Quick setup from the environment:
/// - LOG_JSON=true|false
/// - LOG_ANSI=true|false
/// - LOG_THREADS=true|false
/// - LOG_ENGINE_LEVEL=<level> for the presale and vesting targets
/// - RUST_LOG=<filter>
pub fn init_from_env() -> anyhow::Result<()> {
    let flag = |name: &str, default: bool| env::var(name).map(|v| v == "true").unwrap_or(default);
    init(LoggingConfig {
        env_filter: None,
        engine_level: env::var("LOG_ENGINE_LEVEL").ok(),
        json: flag("LOG_JSON", true),
        with_targets_and_lines: true,
        with_threads: flag("LOG_THREADS", false),
        ansi: flag("LOG_ANSI", false),
    })
}
