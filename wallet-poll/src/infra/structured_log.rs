//! Structured logging for poll cycles.
//!
//! Entries are serialized to JSON and handed to the `log` facade, so the host
//! application decides where they end up.

use serde::Serialize;

use crate::error::PollError;

#[derive(Debug, Clone, Copy, Serialize)]
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

    fn as_log_level(&self) -> log::Level {
        match self {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LogEntry<'a> {
    pub level: LogLevel,
    pub trace_id: &'a str,
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calls: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp_ms: i64,
}

impl<'a> LogEntry<'a> {
    pub fn new(level: LogLevel, trace_id: &'a str, message: &'a str) -> Self {
        Self {
            level,
            trace_id,
            message,
            chain_id: None,
            cycle: None,
            calls: None,
            chunks: None,
            latency_ms: None,
            status: None,
            error_kind: None,
            error_message: None,
            timestamp_ms: crate::types::now_ms(),
        }
    }

    pub fn with_chain(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn with_cycle(mut self, cycle: u64) -> Self {
        self.cycle = Some(cycle);
        self
    }

    pub fn with_batch(mut self, calls: usize, chunks: usize) -> Self {
        self.calls = Some(calls);
        self.chunks = Some(chunks);
        self
    }

    pub fn with_latency(mut self, latency_ms: i64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn with_status(mut self, status: &'a str) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_error(mut self, error: &PollError) -> Self {
        self.error_kind = Some(error.kind());
        self.error_message = Some(error.to_string());
        self
    }

    pub fn emit(&self) {
        let level = self.level.as_log_level();
        if !log::log_enabled!(target: "wallet_poll", level) {
            return;
        }
        if let Ok(json) = serde_json::to_string(self) {
            log::log!(target: "wallet_poll", level, "{}", json);
        }
    }
}

/// Per-cycle logging context.
pub struct CycleContext<'a> {
    pub trace_id: &'a str,
    pub chain_id: u64,
    pub cycle: u64,
    pub start_ms: i64,
}

impl<'a> CycleContext<'a> {
    pub fn new(trace_id: &'a str, chain_id: u64, cycle: u64, start_ms: i64) -> Self {
        Self {
            trace_id,
            chain_id,
            cycle,
            start_ms,
        }
    }

    fn entry(&self, level: LogLevel, message: &'a str) -> LogEntry<'a> {
        LogEntry::new(level, self.trace_id, message)
            .with_chain(self.chain_id)
            .with_cycle(self.cycle)
    }

    pub fn log_cycle_start(&self, calls: usize) {
        let mut entry = self.entry(LogLevel::Debug, "poll_start");
        entry.calls = Some(calls);
        entry.emit();
    }

    pub fn log_cycle_complete(&self, calls: usize, chunks: usize, status: &'a str) {
        let latency = crate::types::now_ms().saturating_sub(self.start_ms);
        self.entry(LogLevel::Info, "poll_complete")
            .with_batch(calls, chunks)
            .with_latency(latency)
            .with_status(status)
            .emit();
    }

    pub fn log_cycle_error(&self, error: &PollError) {
        let latency = crate::types::now_ms().saturating_sub(self.start_ms);
        self.entry(LogLevel::Error, "poll_error")
            .with_latency(latency)
            .with_status("error")
            .with_error(error)
            .emit();
    }

    pub fn log_stale_drop(&self, reason: &'a str) {
        self.entry(LogLevel::Warn, "poll_result_dropped")
            .with_status(reason)
            .emit();
    }
}
