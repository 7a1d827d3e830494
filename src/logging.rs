use std::{
    io::{self, Write},
    sync::OnceLock,
};

use serde::Serialize;

use crate::error::ConversionError;

// Process-wide sink, registered once.
static LOG_SINK: OnceLock<Box<dyn LogSink>> = OnceLock::new();

/// Log level definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Parse a level name case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// A single log entry.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: String,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: &str) -> Self {
        Self {
            level,
            message: message.to_string(),
            timestamp: jiff::Zoned::now().to_string(),
        }
    }
}

/// Destination for log records.
pub trait LogSink: Send + Sync {
    fn emit(&self, record: &LogRecord);
}

/// Human-readable lines on stderr, filtered by minimum level.
#[derive(Debug, Clone, Copy)]
pub struct StderrSink {
    pub min_level: LogLevel,
}

impl Default for StderrSink {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
        }
    }
}

impl LogSink for StderrSink {
    fn emit(&self, record: &LogRecord) {
        if record.level < self.min_level {
            return;
        }
        eprintln!(
            "{} [{}] {}",
            record.timestamp,
            record.level.as_str().to_uppercase(),
            record.message
        );
    }
}

/// One JSON object per line on stderr.
#[derive(Debug, Clone, Copy)]
pub struct JsonLineSink {
    pub min_level: LogLevel,
}

impl LogSink for JsonLineSink {
    fn emit(&self, record: &LogRecord) {
        if record.level < self.min_level {
            return;
        }
        match serde_json::to_string(record) {
            Ok(line) => {
                let _ = writeln!(io::stderr(), "{line}");
            }
            Err(e) => eprintln!("Failed to serialize log record: {}", e),
        }
    }
}

/// Register the process-wide log sink.
pub fn init_logging(sink: Box<dyn LogSink>) {
    if LOG_SINK.set(sink).is_err() {
        eprintln!("Warning: Logging system already initialized");
    }
}

/// Emit a log message through the registered sink.
pub fn send_log(level: LogLevel, message: &str) {
    let record = LogRecord::new(level, message);
    match LOG_SINK.get() {
        Some(sink) => sink.emit(&record),
        // Fallback to console if logging not initialized
        None => {
            if level >= LogLevel::Info {
                eprintln!("[{}] {}", level.as_str().to_uppercase(), message);
            }
        }
    }
}

/// Log a ConversionError with optional context.
pub fn log_conversion_error(error: &ConversionError, context: Option<&str>) {
    let message = match context {
        Some(ctx) => format!("{}: {}", ctx, error),
        None => error.to_string(),
    };

    send_log(LogLevel::Error, &message);
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::send_log($crate::logging::LogLevel::Debug, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::send_log($crate::logging::LogLevel::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::send_log($crate::logging::LogLevel::Warn, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::send_log($crate::logging::LogLevel::Error, &format!($($arg)*))
    };
}
