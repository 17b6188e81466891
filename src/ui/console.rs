//! Output sinks for debugger messages

use std::sync::Mutex;

use colored::Colorize;

/// Where the dispatcher writes user-facing messages
pub trait DisplaySink: Send + Sync {
    fn show(&self, text: &str);
}

/// Prints to stdout; `err,` lines in red, `warning,` lines in yellow
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }
}

impl DisplaySink for ConsoleSink {
    fn show(&self, text: &str) {
        let text = text.trim_end_matches('\n');
        if text.starts_with("err,") {
            println!("{}", text.red());
        } else if text.starts_with("warning,") {
            println!("{}", text.yellow());
        } else {
            println!("{}", text);
        }
    }
}

/// Captures messages in memory
#[derive(Debug, Default)]
pub struct BufferSink {
    lines: Mutex<Vec<String>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything shown so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|line| line.contains(needle))
    }

    pub fn clear(&self) {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl DisplaySink for BufferSink {
    fn show(&self, text: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());
    }
}
