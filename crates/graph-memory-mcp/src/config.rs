//! Configuration for the graph memory MCP server.

use std::time::Duration;

/// Built-in defaults, overridable through the environment and the CLI.
pub mod defaults {
    use std::time::Duration;

    /// HTTP listen port.
    pub const PORT: u16 = 3001;

    /// Maximum accepted request body size (4 MiB).
    pub const MAX_REQUEST_SIZE: usize = 4 * 1024 * 1024;

    /// Per-request deadline.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Idle time after which the sweep evicts a session (30 minutes).
    pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(1800);

    /// Interval between sweep ticks.
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

    /// Drain period granted to in-flight requests on shutdown.
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

    /// Directory for graph database files, relative to the client project root.
    pub const DB_RELATIVE_DIR: &str = ".graph-memory";

    /// File extension of graph database files.
    pub const DB_EXTENSION: &str = "gmdb";

    /// Debug level: 0 silent, 1 info, 2 debug, 3 trace.
    pub const DEBUG_LEVEL: u8 = 1;
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port.
    pub port: u16,

    /// Maximum request body size in bytes, enforced before dispatch.
    pub max_request_size: usize,

    /// Deadline applied to every admitted request.
    pub request_timeout: Duration,

    /// Inactivity window before the sweep terminates a session.
    pub session_idle_timeout: Duration,

    /// How often the sweep task runs.
    pub sweep_interval: Duration,

    /// How long shutdown waits for in-flight requests.
    pub shutdown_grace: Duration,

    /// Allowed CORS origins. Empty means any origin.
    pub cors_origins: Vec<String>,

    /// Directory for database files under each client project root.
    pub db_relative_dir: String,

    /// Extension of database files.
    pub db_extension: String,

    /// Verbosity, 0 (silent) to 3 (trace).
    pub debug_level: u8,
}

impl Config {
    /// Create configuration from environment variables, falling back to the
    /// built-in defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns an error if a set variable fails to parse.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("PORT") {
            config.port = port.parse()?;
        }
        if let Ok(size) = std::env::var("GRAPH_MEMORY_MAX_REQUEST_SIZE") {
            config.max_request_size = size.parse()?;
        }
        if let Ok(ms) = std::env::var("GRAPH_MEMORY_REQUEST_TIMEOUT_MS") {
            config.request_timeout = Duration::from_millis(ms.parse()?);
        }
        if let Ok(ms) = std::env::var("GRAPH_MEMORY_SESSION_IDLE_TIMEOUT_MS") {
            config.session_idle_timeout = Duration::from_millis(ms.parse()?);
        }
        if let Ok(ms) = std::env::var("GRAPH_MEMORY_SHUTDOWN_GRACE_MS") {
            config.shutdown_grace = Duration::from_millis(ms.parse()?);
        }
        if let Ok(origins) = std::env::var("GRAPH_MEMORY_CORS_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(dir) = std::env::var("GRAPH_MEMORY_DB_DIR") {
            config.db_relative_dir = dir;
        }
        if let Ok(ext) = std::env::var("GRAPH_MEMORY_DB_EXTENSION") {
            config.db_extension = ext.trim_start_matches('.').to_string();
        }
        if let Ok(level) = std::env::var("GRAPH_MEMORY_DEBUG") {
            config.debug_level = level.parse::<u8>()?.min(3);
        }

        Ok(config)
    }

    /// Configuration for tests: tight timeouts, port picked by the OS.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            port: 0,
            max_request_size: defaults::MAX_REQUEST_SIZE,
            request_timeout: Duration::from_secs(5),
            session_idle_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_millis(50),
            shutdown_grace: Duration::from_millis(200),
            cors_origins: Vec::new(),
            db_relative_dir: defaults::DB_RELATIVE_DIR.to_string(),
            db_extension: defaults::DB_EXTENSION.to_string(),
            debug_level: 0,
        }
    }

    /// Default `tracing` filter directive for the configured debug level.
    #[must_use]
    pub fn default_log_filter(&self) -> &'static str {
        match self.debug_level {
            0 => "error",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: defaults::PORT,
            max_request_size: defaults::MAX_REQUEST_SIZE,
            request_timeout: defaults::REQUEST_TIMEOUT,
            session_idle_timeout: defaults::SESSION_IDLE_TIMEOUT,
            sweep_interval: defaults::SWEEP_INTERVAL,
            shutdown_grace: defaults::SHUTDOWN_GRACE,
            cors_origins: Vec::new(),
            db_relative_dir: defaults::DB_RELATIVE_DIR.to_string(),
            db_extension: defaults::DB_EXTENSION.to_string(),
            debug_level: defaults::DEBUG_LEVEL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 3001);
        assert_eq!(config.max_request_size, 4 * 1024 * 1024);
        assert_eq!(config.session_idle_timeout, Duration::from_secs(1800));
        assert!(config.cors_origins.is_empty());
    }

    #[test]
    fn test_log_filter_levels() {
        let mut config = Config::default();
        config.debug_level = 0;
        assert_eq!(config.default_log_filter(), "error");
        config.debug_level = 3;
        assert_eq!(config.default_log_filter(), "trace");
    }

    #[test]
    fn test_testing_config_is_tight() {
        let config = Config::for_testing();
        assert!(config.sweep_interval < Duration::from_secs(1));
        assert_eq!(config.port, 0);
    }
}
