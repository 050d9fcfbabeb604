//! Tracing subscriber setup for logvault binaries.
//!
//! Events go to stderr so stdout stays free for command output.

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by `RUST_LOG`.
    pub log_level: Level,
    /// Per-module level overrides (e.g. `"logvault_store" => DEBUG`).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::WARN,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Map a `-v` count onto a default level.
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.log_level = match verbosity {
            0 => self.log_level,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };
        self
    }

    /// Add or replace a per-module override.
    pub fn with_module_level(mut self, module: &str, level: Level) -> Self {
        if let Some(entry) = self.module_levels.iter_mut().find(|(m, _)| m == module) {
            entry.1 = level;
        } else {
            self.module_levels.push((module.to_string(), level));
        }
        self
    }

    /// `EnvFilter` directive string for this config.
    pub fn filter_directives(&self) -> String {
        let mut directives = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            directives.push(',');
            directives.push_str(module);
            directives.push('=');
            directives.push_str(&level.to_string().to_lowercase());
        }
        directives
    }
}

/// Install the global subscriber. Call once at startup.
///
/// Fails if a global subscriber is already set.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TryInitError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
    });
    let text_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
}
