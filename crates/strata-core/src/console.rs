use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConsoleLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Sink for user-facing, leveled messages.
///
/// The engine never depends on how (or whether) these are displayed.
pub trait ConsoleSink: Send + Sync {
    fn print(&self, level: ConsoleLevel, text: &str);

    fn info(&self, text: &str) {
        self.print(ConsoleLevel::Info, text);
    }

    fn error(&self, text: &str) {
        self.print(ConsoleLevel::Error, text);
    }
}

/// Forwards console output to `tracing` under the `strata.console` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingConsole;

impl ConsoleSink for TracingConsole {
    fn print(&self, level: ConsoleLevel, text: &str) {
        match level {
            ConsoleLevel::Debug => tracing::debug!(target = "strata.console", "{text}"),
            ConsoleLevel::Info => tracing::info!(target = "strata.console", "{text}"),
            ConsoleLevel::Warn => tracing::warn!(target = "strata.console", "{text}"),
            ConsoleLevel::Error => tracing::error!(target = "strata.console", "{text}"),
        }
    }
}

/// Buffers console output in memory.
#[derive(Debug, Default)]
pub struct MemoryConsole {
    lines: Mutex<Vec<(ConsoleLevel, String)>>,
}

impl MemoryConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(ConsoleLevel, String)> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ConsoleSink for MemoryConsole {
    fn print(&self, level: ConsoleLevel, text: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((level, text.to_string()));
    }
}
