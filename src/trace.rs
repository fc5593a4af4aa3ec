use std::collections::VecDeque;

use crate::{Error, Result};

/// Bounded in-memory trace log with per-category switches.
#[derive(Debug, Clone)]
pub(crate) struct TraceState {
    enabled: bool,
    timers: bool,
    engines: bool,
    to_stderr: bool,
    limit: usize,
    lines: VecDeque<String>,
}

impl Default for TraceState {
    fn default() -> Self {
        Self {
            enabled: false,
            timers: true,
            engines: true,
            to_stderr: false,
            limit: 10_000,
            lines: VecDeque::new(),
        }
    }
}

impl TraceState {
    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn set_timers(&mut self, enabled: bool) {
        self.timers = enabled;
    }

    pub(crate) fn set_engines(&mut self, enabled: bool) {
        self.engines = enabled;
    }

    pub(crate) fn set_stderr(&mut self, enabled: bool) {
        self.to_stderr = enabled;
    }

    pub(crate) fn set_limit(&mut self, max_entries: usize) -> Result<()> {
        if max_entries == 0 {
            return Err(Error::InvalidInput(
                "set_trace_log_limit requires at least 1 entry".into(),
            ));
        }
        self.limit = max_entries;
        while self.lines.len() > self.limit {
            self.lines.pop_front();
        }
        Ok(())
    }

    pub(crate) fn take(&mut self) -> Vec<String> {
        self.lines.drain(..).collect()
    }

    pub(crate) fn timer_line(&mut self, line: impl FnOnce() -> String) {
        if self.enabled && self.timers {
            self.push(line());
        }
    }

    pub(crate) fn engine_line(&mut self, line: impl FnOnce() -> String) {
        if self.enabled && self.engines {
            self.push(line());
        }
    }

    fn push(&mut self, line: String) {
        tracing::trace!(target: "storefront_kit::trace", "{line}");
        if self.to_stderr {
            eprintln!("{line}");
        }
        if self.lines.len() >= self.limit {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }
}
