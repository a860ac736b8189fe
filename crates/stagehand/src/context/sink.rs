//! Output sink abstraction for run reporting.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// Result of one test case, reported through [`OutputSink::case_finished`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseOutcome {
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration: Duration,
}

impl CaseOutcome {
    pub fn passed(duration: Duration) -> Self {
        Self {
            passed: true,
            message: None,
            duration,
        }
    }

    pub fn failed(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            passed: false,
            message: Some(message.into()),
            duration,
        }
    }
}

/// Where logs and case events go. Rendering is up to the implementation.
pub trait OutputSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    fn case_started(&self, manifest_id: &str, case: &str);

    fn case_finished(&self, manifest_id: &str, case: &str, outcome: &CaseOutcome);
}

/// Forwards every event to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => trace!(target: "stagehand::output", "{message}"),
            LogLevel::Debug => debug!(target: "stagehand::output", "{message}"),
            LogLevel::Info => info!(target: "stagehand::output", "{message}"),
            LogLevel::Warn => warn!(target: "stagehand::output", "{message}"),
            LogLevel::Error => error!(target: "stagehand::output", "{message}"),
        }
    }

    fn case_started(&self, manifest_id: &str, case: &str) {
        info!(target: "stagehand::output", manifest_id, case, "Case started");
    }

    fn case_finished(&self, manifest_id: &str, case: &str, outcome: &CaseOutcome) {
        if outcome.passed {
            info!(
                target: "stagehand::output",
                manifest_id,
                case,
                duration_ms = outcome.duration.as_millis() as u64,
                "Case passed"
            );
        } else {
            warn!(
                target: "stagehand::output",
                manifest_id,
                case,
                duration_ms = outcome.duration.as_millis() as u64,
                message = outcome.message.as_deref().unwrap_or_default(),
                "Case failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse() {
        assert_eq!("WARNING".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert_eq!("debug".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::default().to_string(), "info");
    }

    #[test]
    fn test_case_outcome_constructors() {
        let ok = CaseOutcome::passed(Duration::from_millis(5));
        assert!(ok.passed && ok.message.is_none());
        let failed = CaseOutcome::failed("status 500", Duration::ZERO);
        assert_eq!(failed.message.as_deref(), Some("status 500"));
    }
}
