//! Logging configuration

use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::backend::local::LOG_TARGET as LOCAL_TASK_TARGET;
use crate::errors::OrchestratorError;

/// Log level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_filter_string(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

impl serde::Serialize for LogLevel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_filter_string())
    }
}

impl<'de> serde::Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging options
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Level for previewd's own targets
    pub log_level: LogLevel,

    /// Re-emit the output of local preview processes
    pub task_output: bool,

    /// Enable JSON format
    pub json_format: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            task_output: true,
            json_format: false,
        }
    }
}

/// HTTP stacks that flood the log at debug level
const QUIET_TARGETS: [&str; 4] = ["hyper", "hyper_util", "h2", "reqwest"];

/// Filter used when `RUST_LOG` is not set
pub fn default_filter(options: &LogOptions) -> String {
    let level = options.log_level.to_filter_string();
    let mut directives = vec![level.to_string()];
    if options.log_level != LogLevel::Trace {
        directives.extend(QUIET_TARGETS.iter().map(|target| format!("{}=warn", target)));
    }

    let task_level = if options.task_output { "info" } else { "off" };
    directives.push(format!("{}={}", LOCAL_TASK_TARGET, task_level));
    directives.join(",")
}

/// Initialize logging
pub fn init_logging(options: LogOptions) -> Result<(), OrchestratorError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter(&options))
            .map_err(|e| OrchestratorError::ConfigError(e.to_string()))?,
    };

    let subscriber = tracing_subscriber::registry().with(filter);
    let result = if options.json_format {
        subscriber.with(fmt::layer().json()).try_init()
    } else {
        subscriber.with(fmt::layer().with_target(true)).try_init()
    };
    result.map_err(|e| OrchestratorError::ConfigError(e.to_string()))
}
