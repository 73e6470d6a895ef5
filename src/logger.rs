use std::str::FromStr;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Pick the effective level: CLI override first, then the config file value.
pub fn resolve_level(cli: Option<&str>, config: Option<&str>) -> LogLevel {
    cli.and_then(|s| s.parse().ok())
        .or_else(|| config.and_then(|s| s.parse().ok()))
        .unwrap_or_default()
}

/// Initialize the global subscriber. `RUST_LOG` wins over `level` when set.
pub fn init_logger(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("server_node_r={}", level.as_str())));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(true)
                .with_ansi(true)
                .compact(),
        )
        .init();
}

pub mod log {
    pub use tracing::{debug, error, info, warn};

    /// Record the outcome of an incremental user sync
    pub fn user_sync(tag: &str, deleted: usize, added: usize) {
        if deleted > 0 || added > 0 {
            info!(tag = tag, deleted = deleted, added = added, "Users synchronized");
        } else {
            debug!(tag = tag, "Users unchanged");
        }
    }

    /// Record a node tag switch
    pub fn tag_switch(old: &str, new: &str) {
        info!(old_tag = old, new_tag = new, "Node configuration changed, tag switched");
    }

    /// Record a report submission result
    pub fn report(kind: &str, count: usize, error: Option<&anyhow::Error>) {
        match error {
            Some(e) => warn!(report = kind, count = count, error = %format!("{:#}", e), "Report failed"),
            None => info!(report = kind, count = count, "Report submitted"),
        }
    }
}
