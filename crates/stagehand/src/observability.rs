//! # Observability
//!
//! One-call setup of a `tracing` subscriber for processes embedding the
//! runner. Library code only emits events; installing a subscriber is the
//! host's choice.

use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Configuration for [`init`].
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Maximum level captured for `stagehand` targets.
    pub level: Level,
    pub target: LogTarget,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            target: LogTarget::default(),
        }
    }
}

impl ObservabilityConfig {
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }
}

/// Where formatted events are written.
#[derive(Debug, Clone, Default)]
pub enum LogTarget {
    #[default]
    Console,
    /// Truncates and writes to the given path.
    File(String),
}

fn filter(level: Level) -> Result<EnvFilter, Box<dyn std::error::Error + Send + Sync>> {
    Ok(EnvFilter::from_default_env().add_directive(format!("stagehand={level}").parse()?))
}

/// Installs the global tracing subscriber.
///
/// Fails if a global subscriber is already set, or if the log file cannot be
/// created. `RUST_LOG` directives are honored alongside the configured level.
pub fn init(config: ObservabilityConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let subscriber = tracing_subscriber::registry().with(filter(config.level)?);

    match config.target {
        LogTarget::Console => {
            let layer = fmt::layer().with_writer(std::io::stdout);
            subscriber.with(layer).try_init()?;
        }
        LogTarget::File(path) => {
            let file = std::fs::File::create(path)?;
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file));
            subscriber.with(layer).try_init()?;
        }
    };

    Ok(())
}
