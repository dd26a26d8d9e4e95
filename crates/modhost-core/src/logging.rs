//! Module log records forwarded to `tracing`.

use modhost_sdk::{LogLevel, LogRecord, LogSink};

/// Emits module log records as `tracing` events under the `modhost::module`
/// target, tagged with the module's id and name.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl TracingLogSink {
    pub fn new() -> Self {
        Self
    }
}

impl LogSink for TracingLogSink {
    fn emit(&self, record: &LogRecord) {
        let LogRecord {
            module_id,
            module_name,
            level,
            message,
            ..
        } = record;

        match *level {
            LogLevel::Debug => tracing::debug!(
                target: "modhost::module",
                module_id = %module_id,
                module_name = %module_name,
                "{}", message
            ),
            LogLevel::Info => tracing::info!(
                target: "modhost::module",
                module_id = %module_id,
                module_name = %module_name,
                "{}", message
            ),
            LogLevel::Warn => tracing::warn!(
                target: "modhost::module",
                module_id = %module_id,
                module_name = %module_name,
                "{}", message
            ),
            LogLevel::Error => tracing::error!(
                target: "modhost::module",
                module_id = %module_id,
                module_name = %module_name,
                "{}", message
            ),
        }
    }
}
