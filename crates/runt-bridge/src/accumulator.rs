//! Ordered output of the active execution.
//!
//! Events are kept exactly as they arrived. Order matters: the report
//! interleaves text, images and errors the way the kernel produced them.

use std::path::PathBuf;

use serde_json::Value;

use crate::transport::{MimeBundle, StreamName};
use crate::traceback::derive_error_line;

const PNG_MIME: &str = "image/png";
const TEXT_MIME: &str = "text/plain";

#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    /// Raw stream text, escape sequences and carriage returns included.
    Stream { name: StreamName, text: String },
    /// Plain-text representation of an expression result or display.
    Result { text: String },
    /// PNG already written to the artifact directory.
    Image { path: PathBuf },
    Error {
        name: String,
        message: String,
        traceback: Vec<String>,
        derived_line: Option<u32>,
    },
}

/// Append-only list of one execution's output.
#[derive(Debug, Clone, Default)]
pub struct OutputAccumulator {
    events: Vec<OutputEvent>,
}

impl OutputAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: OutputEvent) {
        self.events.push(event);
    }

    pub fn push_stream(&mut self, name: StreamName, text: impl Into<String>) {
        self.push(OutputEvent::Stream {
            name,
            text: text.into(),
        });
    }

    /// Record the text of a rich output. Bundles without `text/plain` are
    /// ignored; images go through [`OutputAccumulator::push_image`] once saved.
    pub fn push_result(&mut self, data: &MimeBundle) {
        if let Some(text) = data.get(TEXT_MIME).and_then(mime_text) {
            self.push(OutputEvent::Result { text });
        }
    }

    pub fn push_image(&mut self, path: PathBuf) {
        self.push(OutputEvent::Image { path });
    }

    /// Number of images recorded so far, which is also the index of the next.
    pub fn image_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, OutputEvent::Image { .. }))
            .count()
    }

    pub fn push_error(&mut self, name: &str, message: &str, traceback: Vec<String>) {
        let derived_line = derive_error_line(&traceback);
        self.push(OutputEvent::Error {
            name: name.to_string(),
            message: message.to_string(),
            traceback,
            derived_line,
        });
    }

    pub fn events(&self) -> &[OutputEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<OutputEvent> {
        self.events
    }
}

/// The base64 PNG of a rich output, if it has one. An image wins over the
/// bundle's text fallback.
pub fn image_payload(data: &MimeBundle) -> Option<String> {
    data.get(PNG_MIME).and_then(mime_text)
}

/// MIME values are strings, or arrays of lines in older kernels.
fn mime_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => Some(parts.iter().filter_map(Value::as_str).collect()),
        _ => None,
    }
}
