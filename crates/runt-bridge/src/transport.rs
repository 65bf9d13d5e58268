//! The seam between the bridge and a kernel.
//!
//! A transport submits requests and hands back the correlation id the kernel
//! will echo in every event it produces for that request. Events themselves
//! flow separately, as [`KernelEvent`] values on a channel drained by the
//! bridge loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;

/// A MIME bundle as published by the kernel (`"text/plain" -> ..`, `"image/png" -> ..`).
pub type MimeBundle = serde_json::Map<String, Value>;

/// Which output stream a chunk of text was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Stdout,
    Stderr,
}

/// Kernel execution status as reported on the broadcast channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelStatus {
    Busy,
    Idle,
}

/// How a piece of code should be submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteMode {
    /// A user cell: stored in history, allowed to prompt for input.
    Cell,
    /// Bridge housekeeping and helper programs: no history, no input.
    Silent,
}

/// One event produced by the kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelEvent {
    /// Correlation id of the request that caused this event, if any.
    pub parent_id: Option<String>,
    pub kind: KernelEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KernelEventKind {
    Stream {
        name: StreamName,
        text: String,
    },
    ExecuteResult {
        data: MimeBundle,
    },
    DisplayData {
        data: MimeBundle,
    },
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
    Status(KernelStatus),
    InspectReply {
        found: bool,
        data: MimeBundle,
    },
    InputRequest {
        prompt: String,
        password: bool,
    },
}

impl KernelEventKind {
    /// Short name used in log lines.
    pub fn label(&self) -> &'static str {
        match self {
            KernelEventKind::Stream { .. } => "stream",
            KernelEventKind::ExecuteResult { .. } => "execute_result",
            KernelEventKind::DisplayData { .. } => "display_data",
            KernelEventKind::Error { .. } => "error",
            KernelEventKind::Status(KernelStatus::Busy) => "status:busy",
            KernelEventKind::Status(KernelStatus::Idle) => "status:idle",
            KernelEventKind::InspectReply { .. } => "inspect_reply",
            KernelEventKind::InputRequest { .. } => "input_request",
        }
    }
}

impl KernelEvent {
    pub fn new(parent_id: impl Into<String>, kind: KernelEventKind) -> Self {
        Self {
            parent_id: Some(parent_id.into()),
            kind,
        }
    }
}

/// Submits work to a kernel.
///
/// Implementations must return the correlation id only after the request has
/// been handed to the kernel, so that every event carrying that id arrives on
/// the event channel after the call returns.
#[async_trait]
pub trait KernelTransport: Send {
    /// Submit code for execution and return its correlation id.
    async fn execute(&mut self, code: &str, mode: ExecuteMode) -> Result<String, TransportError>;

    /// Ask the kernel to introspect `code` at `cursor_pos`.
    async fn inspect(&mut self, code: &str, cursor_pos: usize) -> Result<String, TransportError>;

    /// Answer the kernel's pending input request.
    async fn input_reply(&mut self, value: String) -> Result<(), TransportError>;

    /// Stop the kernel (if owned) and release all channels.
    async fn shutdown(&mut self) -> Result<(), TransportError>;
}
