//! Turning a finished execution into persisted artifacts.
//!
//! The accumulated output is walked in arrival order. Consecutive text is
//! buffered and rendered through the terminal grid, images (already saved
//! when they arrived) are referenced, and errors get their own section. Persistence failures are
//! logged and never stop the walk: the caller always gets an outcome to
//! report, and the queue always advances.

use std::path::PathBuf;

use log::{info, warn};

use crate::accumulator::OutputEvent;
use crate::artifacts::{report_file_name, ArtifactStore};
use crate::protocol::{ErrorSummary, Event, ResultStatus};
use crate::queue::ActiveExecution;
use crate::terminal;
use crate::traceback::strip_ansi;

/// Result of finalizing one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Finalized {
    pub cell_id: String,
    pub report: PathBuf,
    pub images: Vec<PathBuf>,
    pub status: ResultStatus,
    pub error: Option<ErrorSummary>,
}

impl Finalized {
    pub fn into_event(self) -> Event {
        Event::ResultReady {
            cell_id: self.cell_id,
            file: self.report,
            status: self.status,
            error: self.error,
            images: self.images,
        }
    }
}

/// Markdown report under construction.
#[derive(Debug, Default)]
struct Report {
    lines: Vec<String>,
    /// Text waiting to be rendered as one fenced block.
    text_run: String,
}

impl Report {
    fn push_text(&mut self, text: &str) {
        self.text_run.push_str(text);
    }

    fn flush_text(&mut self) {
        if self.text_run.is_empty() {
            return;
        }
        let raw = std::mem::take(&mut self.text_run);
        let rendered = terminal::render(&strip_ansi(&raw)).replace("```", "'''");
        if rendered.trim().is_empty() {
            return;
        }
        self.lines.push("```text".to_string());
        self.lines.push(rendered);
        self.lines.push("```".to_string());
        self.lines.push(String::new());
    }

    fn push_image(&mut self, file_name: &str) {
        self.flush_text();
        self.lines.push(format!("![Result]({})", file_name));
        self.lines.push(String::new());
    }

    fn push_error(&mut self, traceback: &[String]) {
        self.flush_text();
        self.lines.push("### Error".to_string());
        self.lines.push("```".to_string());
        self.lines.push(traceback.join("\n").replace("```", "'''"));
        self.lines.push("```".to_string());
        self.lines.push(String::new());
    }

    fn finish(mut self, cell_id: &str) -> String {
        self.flush_text();
        let mut markdown = format!("# Output: {}\n\n", cell_id);
        if self.lines.is_empty() {
            markdown.push_str("*(No output)*\n");
        } else {
            markdown.push_str(&self.lines.join("\n"));
        }
        markdown
    }
}

/// Write the report for `execution` and describe the outcome. The
/// `result_ready` event is left to the caller.
pub async fn finalize(execution: ActiveExecution) -> Finalized {
    let ActiveExecution {
        request, output, ..
    } = execution;
    let cell_id = request.cell_id;
    let store = ArtifactStore::new(request.artifact_dir);

    let dir_ready = match store.ensure_dir().await {
        Ok(()) => true,
        Err(e) => {
            warn!("[finalize] {}", e);
            false
        }
    };

    let mut report = Report::default();
    let mut images = Vec::new();
    let mut error: Option<ErrorSummary> = None;

    for event in output.into_events() {
        match event {
            OutputEvent::Stream { text, .. } => report.push_text(&text),
            OutputEvent::Result { text } => {
                report.push_text(&text);
                report.push_text("\n");
            }
            OutputEvent::Image { path } => {
                if let Some(name) = path.file_name() {
                    report.push_image(&name.to_string_lossy());
                }
                images.push(path);
            }
            OutputEvent::Error {
                name,
                message,
                traceback,
                derived_line,
            } => {
                let cleaned: Vec<String> = traceback.iter().map(|l| strip_ansi(l)).collect();
                report.push_error(&cleaned);
                if error.is_none() {
                    error = Some(ErrorSummary {
                        msg: format!("{}: {}", name, message),
                        line: derived_line.unwrap_or(1),
                        traceback: cleaned,
                    });
                }
            }
        }
    }

    let markdown = report.finish(&cell_id);
    let report_path = if dir_ready {
        match store.write_report(&cell_id, &markdown).await {
            Ok(path) => path,
            Err(e) => {
                warn!("[finalize] {}", e);
                store.path_of(&report_file_name(&cell_id))
            }
        }
    } else {
        store.path_of(&report_file_name(&cell_id))
    };

    let status = if error.is_some() {
        ResultStatus::Error
    } else {
        ResultStatus::Ok
    };
    info!(
        "[finalize] {} finished ({:?}, {} image(s))",
        cell_id,
        status,
        images.len()
    );

    Finalized {
        cell_id,
        report: report_path,
        images,
        status,
        error,
    }
}
