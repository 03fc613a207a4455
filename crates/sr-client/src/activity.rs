//! User-visible activity log

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Local};
use parking_lot::Mutex;

/// Lines kept in the activity log
pub const ACTIVITY_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl ActivityLevel {
    /// Single-character marker shown before the message
    pub fn marker(&self) -> &'static str {
        match self {
            ActivityLevel::Info => "·",
            ActivityLevel::Success => "✓",
            ActivityLevel::Warning => "!",
            ActivityLevel::Error => "✗",
        }
    }
}

/// One line of the activity log
#[derive(Debug, Clone)]
pub struct ActivityLine {
    pub timestamp: DateTime<Local>,
    pub level: ActivityLevel,
    pub message: String,
}

impl fmt::Display for ActivityLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.timestamp.format("%H:%M:%S"),
            self.level.marker(),
            self.message
        )
    }
}

/// Bounded log of what the client did, newest last.
///
/// Every line is mirrored to `tracing` at the matching level, so the log
/// file holds the full history while the screen shows the tail.
#[derive(Debug)]
pub struct ActivityLog {
    lines: Mutex<VecDeque<ActivityLine>>,
    capacity: usize,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::with_capacity(ACTIVITY_CAPACITY)
    }
}

impl ActivityLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, level: ActivityLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            ActivityLevel::Info | ActivityLevel::Success => tracing::info!("{}", message),
            ActivityLevel::Warning => tracing::warn!("{}", message),
            ActivityLevel::Error => tracing::error!("{}", message),
        }

        let mut lines = self.lines.lock();
        while lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(ActivityLine {
            timestamp: Local::now(),
            level,
            message,
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(ActivityLevel::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.push(ActivityLevel::Success, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.push(ActivityLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(ActivityLevel::Error, message);
    }

    /// All lines, oldest first
    pub fn lines(&self) -> Vec<ActivityLine> {
        self.lines.lock().iter().cloned().collect()
    }

    /// The newest `n` lines, oldest first
    pub fn tail(&self, n: usize) -> Vec<ActivityLine> {
        let lines = self.lines.lock();
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
