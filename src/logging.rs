//! Log sink interface required by the push engine
//!
//! The engine emits leveled messages through an injected [`Logger`]; it never
//! decides where the lines end up. The CLI installs a [`ConsoleLogger`]; a
//! hosting service can forward the same messages to a live connection.

use std::sync::Arc;

/// Leveled log sink supplied by the caller.
///
/// Implementations must be callable from whichever task executes the push.
pub trait Logger: Send + Sync {
    fn error(&self, message: &str);
    fn info(&self, message: &str);
    fn debug(&self, message: &str);
}

/// Verbosity threshold for [`ConsoleLogger`].
///
/// The numeric mapping matches the CLI's `--log-level` flag: 0-1 errors only,
/// 2-3 informational, 4 and above debug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Info,
    Debug,
}

impl LogLevel {
    pub fn from_cli(level: u8) -> Self {
        match level {
            0 | 1 => LogLevel::Error,
            2 | 3 => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }
}

/// Logger writing to stdout/stderr, used by the CLI binary.
#[derive(Debug, Clone)]
pub struct ConsoleLogger {
    level: LogLevel,
}

impl ConsoleLogger {
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }
}

impl Logger for ConsoleLogger {
    fn error(&self, message: &str) {
        eprintln!("[ERROR] {}", message);
    }

    fn info(&self, message: &str) {
        if self.level >= LogLevel::Info {
            println!("[INFO] {}", message);
        }
    }

    fn debug(&self, message: &str) {
        if self.level >= LogLevel::Debug {
            println!("[DEBUG] {}", message);
        }
    }
}

/// Sink that drops everything. Default when the caller supplies none.
#[derive(Debug, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn error(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn debug(&self, _message: &str) {}
}

pub fn null_logger() -> Arc<dyn Logger> {
    Arc::new(NullLogger)
}
