//! Status output for the terminal.

use std::sync::Mutex;

use camstream_core::stream::PresentationSink;
use tracing::info;

/// Prints every status line to stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    last: Mutex<Option<String>>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent status shown.
    pub fn last(&self) -> Option<String> {
        self.last.lock().ok().and_then(|last| last.clone())
    }
}

impl PresentationSink for ConsoleSink {
    fn show(&self, status: &str) {
        println!("{status}");
        info!(status, "status");
        if let Ok(mut last) = self.last.lock() {
            *last = Some(status.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remembers_last_status() {
        let sink = ConsoleSink::new();
        assert_eq!(sink.last(), None);
        sink.show("Connected");
        sink.show("RESULT");
        assert_eq!(sink.last().as_deref(), Some("RESULT"));
    }
}
