//! Editor-facing protocol.
//!
//! Messages are newline-delimited JSON on the bridge's stdin (commands) and
//! stdout (events). Commands are discriminated by a `command` field, events
//! by a `type` field.

use std::path::PathBuf;

use log::{debug, error};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use crate::transport::StreamName;

/// Figure backend selection for `set_plot_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlotMode {
    Inline,
    Window,
}

/// Commands the editor sends to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Queue a cell for execution.
    Execute {
        code: String,
        cell_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_dir: Option<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },

    /// List user variables in the kernel namespace.
    GetVariables,

    /// Preview a dataframe-like variable.
    ViewDataframe { name: String },

    /// Short summary of a variable (type, size, repr).
    Peek { name: String },

    /// Kernel introspection of a name.
    Inspect { name: String },

    /// Render a variable as text for the system clipboard.
    CopyToClipboard { name: String },

    SetPlotMode { mode: PlotMode },

    /// Delete artifacts whose cell id is not in `ids`.
    PurgeCache {
        #[serde(default)]
        ids: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_dir: Option<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },

    /// Delete artifacts whose cell id is in `ids`.
    RemoveCache {
        #[serde(default)]
        ids: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_dir: Option<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },

    /// Older spelling of `purge_cache`, keyed by document name only.
    CleanCache {
        #[serde(default)]
        valid_ids: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },

    /// Answer a pending `input_request`.
    InputReply { value: String },
}

/// Outcome of a finished execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Ok,
    Error,
}

/// Summary of the first error raised by an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// `"<name>: <message>"`
    pub msg: String,
    /// Line in the cell the error points at (1 when unknown).
    pub line: u32,
    /// Traceback lines with terminal escapes removed.
    pub traceback: Vec<String>,
}

/// One entry of a `variable_list` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub info: String,
}

/// Payload of an `inspection_data` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inspection {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub docstring: String,
    pub file: String,
    pub definition: String,
}

/// Events the bridge sends to the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Live output of the active execution, forwarded unmodified.
    Stream {
        text: String,
        stream: StreamName,
        cell_id: String,
    },

    ExecutionStarted { cell_id: String, code: String },

    ResultReady {
        cell_id: String,
        file: PathBuf,
        status: ResultStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorSummary>,
        images: Vec<PathBuf>,
    },

    ImageSaved { path: PathBuf, cell_id: String },

    VariableList { variables: Vec<VariableInfo> },

    DataframeData {
        name: String,
        columns: Value,
        index: Value,
        data: Value,
    },

    PeekData { data: Value },

    ClipboardData { content: String },

    InspectionData { data: Inspection },

    InputRequest {
        prompt: String,
        cell_id: String,
        /// The kernel asked for a secret; the editor should mask the input.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        password: bool,
    },

    Error { msg: String },

    Debug { msg: String },
}

impl Command {
    /// Serialize command to JSON line (with newline terminator).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Parse command from JSON line.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

impl Event {
    /// Serialize event to JSON line (with newline terminator).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Parse event from JSON line.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

/// Forward commands read from `reader` until EOF.
///
/// Lines that are not UTF-8, not JSON or not a known command are dropped and
/// reading goes on. Only an I/O error on the stream itself stops the loop.
pub async fn read_commands<R>(mut reader: R, commands: mpsc::Sender<Command>)
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                debug!("[bridge] Command input closed");
                break;
            }
            Ok(_) => {
                let line = match std::str::from_utf8(&buf) {
                    Ok(line) => line,
                    Err(e) => {
                        debug!("[bridge] Ignoring non-UTF-8 command: {}", e);
                        continue;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match Command::from_line(line) {
                    Ok(command) => {
                        if commands.send(command).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("[bridge] Ignoring malformed command: {}", e),
                }
            }
            Err(e) => {
                error!("[bridge] Failed to read commands: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execute_minimal_fields() {
        let cmd = Command::from_line(r#"{"command":"execute","code":"print(1)","cell_id":"c1"}"#)
            .unwrap();
        assert_eq!(
            cmd,
            Command::Execute {
                code: "print(1)".into(),
                cell_id: "c1".into(),
                file_dir: None,
                cwd: None,
                filename: None,
            }
        );
    }

    #[test]
    fn test_unit_and_extra_fields() {
        let cmd = Command::from_line(r#"{"command":"get_variables","unused":true}"#).unwrap();
        assert_eq!(cmd, Command::GetVariables);

        let cmd = Command::from_line(r#"{"command":"set_plot_mode","mode":"inline"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::SetPlotMode {
                mode: PlotMode::Inline
            }
        );
    }

    #[test]
    fn test_cache_commands_default_ids() {
        let cmd = Command::from_line(r#"{"command":"purge_cache","file_dir":"/tmp/x"}"#).unwrap();
        match cmd {
            Command::PurgeCache { ids, file_dir, .. } => {
                assert!(ids.is_empty());
                assert_eq!(file_dir, Some(PathBuf::from("/tmp/x")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_and_malformed() {
        assert!(Command::from_line(r#"{"command":"reticulate"}"#).is_err());
        assert!(Command::from_line("not json").is_err());
        assert!(Command::from_line(r#"{"command":"peek"}"#).is_err());
    }

    #[test]
    fn test_event_wire_shape() {
        let line = Event::Stream {
            text: "hi\n".into(),
            stream: StreamName::Stdout,
            cell_id: "c1".into(),
        }
        .to_line()
        .unwrap();
        assert!(line.ends_with('\n'));
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(
            value,
            json!({"type": "stream", "text": "hi\n", "stream": "stdout", "cell_id": "c1"})
        );
    }

    #[test]
    fn test_result_ready_omits_missing_error() {
        let event = Event::ResultReady {
            cell_id: "c1".into(),
            file: PathBuf::from("/cache/c1.md"),
            status: ResultStatus::Ok,
            error: None,
            images: vec![],
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["status"], "ok");
        assert!(value.get("error").is_none());
        assert_eq!(value["images"], json!([]));
    }

    #[test]
    fn test_variable_info_uses_type_key() {
        let event = Event::VariableList {
            variables: vec![VariableInfo {
                name: "x".into(),
                type_name: "int".into(),
                info: "1".into(),
            }],
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "variable_list", "variables": [{"name": "x", "type": "int", "info": "1"}]})
        );
    }

    #[test]
    fn test_input_request_password_flag() {
        let plain = Event::InputRequest {
            prompt: "name? ".into(),
            cell_id: "c1".into(),
            password: false,
        };
        let value: Value = serde_json::from_str(&plain.to_line().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "input_request", "prompt": "name? ", "cell_id": "c1"})
        );

        let secret = Event::InputRequest {
            prompt: "token: ".into(),
            cell_id: "c1".into(),
            password: true,
        };
        assert!(secret.to_line().unwrap().contains(r#""password":true"#));
    }

    async fn read_all(input: &[u8]) -> Vec<Command> {
        let (tx, mut rx) = mpsc::channel(16);
        read_commands(input, tx).await;
        let mut out = Vec::new();
        while let Ok(command) = rx.try_recv() {
            out.push(command);
        }
        out
    }

    #[tokio::test]
    async fn test_non_utf8_line_does_not_stop_reader() {
        let input = b"\xff\xfe garbage\n{\"command\":\"execute\",\"code\":\"1\",\"cell_id\":\"c1\"}\n";

        let commands = read_all(input).await;

        assert_eq!(commands.len(), 1);
        assert!(matches!(&commands[0], Command::Execute { cell_id, .. } if cell_id == "c1"));
    }

    #[tokio::test]
    async fn test_malformed_and_blank_lines_are_skipped() {
        let input = b"not json\n\n{\"command\":\"launch_rockets\"}\n{\"command\":\"get_variables\"}";

        assert_eq!(read_all(input).await, vec![Command::GetVariables]);
    }
}
