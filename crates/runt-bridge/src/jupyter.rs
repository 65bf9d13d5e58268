//! Jupyter kernel transport.
//!
//! Launches a kernel from its kernelspec (or attaches to a running one via its
//! connection file), then drains iopub, shell replies and stdin requests into
//! a single [`KernelEvent`] channel. Requests go out on the shell writer; input
//! replies on the stdin channel.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use jupyter_protocol::{
    ConnectionInfo, ExecuteRequest, InputReply, InspectRequest, JupyterMessage,
    JupyterMessageContent, KernelInfoRequest, Media, ReplyStatus, ShutdownRequest,
};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::BridgeConfig;
use crate::error::TransportError;
use crate::transport::{
    ExecuteMode, KernelEvent, KernelEventKind, KernelStatus, KernelTransport, MimeBundle,
    StreamName,
};

/// A connected Jupyter kernel.
pub struct JupyterTransport {
    session_id: String,
    shell_writer: Option<runtimelib::DealerSendConnection>,
    /// Values for the stdin task to send as input replies.
    input_tx: mpsc::UnboundedSender<String>,
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    /// Present only when this transport launched the kernel.
    process: Option<tokio::process::Child>,
    #[cfg(unix)]
    process_group_id: Option<i32>,
    /// Connection file written at launch, removed at shutdown.
    connection_file: Option<PathBuf>,
}

impl JupyterTransport {
    /// Launch a kernel from the configured kernelspec.
    pub async fn launch(
        config: &BridgeConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<KernelEvent>), TransportError> {
        let kernelspec = runtimelib::find_kernelspec(&config.kernel_name)
            .await
            .map_err(|e| TransportError::Launch(format!("{}: {}", config.kernel_name, e)))?;

        // Reserve ports
        let ip = std::net::IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        let ports = runtimelib::peek_ports(ip, 5)
            .await
            .map_err(|e| TransportError::Launch(e.to_string()))?;

        let connection_info = ConnectionInfo {
            transport: jupyter_protocol::connection_info::Transport::TCP,
            ip: ip.to_string(),
            stdin_port: ports[0],
            control_port: ports[1],
            hb_port: ports[2],
            shell_port: ports[3],
            iopub_port: ports[4],
            signature_scheme: "hmac-sha256".to_string(),
            key: Uuid::new_v4().to_string(),
            kernel_name: Some(config.kernel_name.clone()),
        };

        let runtime_dir = runtimelib::dirs::runtime_dir();
        tokio::fs::create_dir_all(&runtime_dir).await?;

        let kernel_id: String =
            petname::petname(2, "-").unwrap_or_else(|| Uuid::new_v4().to_string());
        let connection_file = runtime_dir.join(format!("runt-bridge-{}.json", kernel_id));
        let contents = serde_json::to_string_pretty(&connection_info)
            .map_err(|e| TransportError::Launch(e.to_string()))?;
        tokio::fs::write(&connection_file, contents).await?;

        let mut cmd = kernelspec
            .command(&connection_file, Some(Stdio::null()), Some(Stdio::null()))
            .map_err(|e| TransportError::Launch(e.to_string()))?;
        if let Some(cwd) = &config.kernel_cwd {
            cmd.current_dir(cwd);
        }

        #[cfg(unix)]
        cmd.process_group(0);

        let process = cmd.kill_on_drop(true).spawn()?;
        info!(
            "[jupyter] Started {} kernel {} ({:?})",
            config.kernel_name, kernel_id, connection_file
        );

        // Small delay to let the kernel bind its sockets
        tokio::time::sleep(Duration::from_millis(500)).await;

        #[cfg(unix)]
        let process_group_id = process.id().map(|pid| pid as i32);

        let connected = Self::connect(&connection_info, config.startup_timeout).await;
        let (mut transport, events) = match connected {
            Ok(pair) => pair,
            Err(e) => {
                tokio::fs::remove_file(&connection_file).await.ok();
                return Err(e);
            }
        };

        transport.process = Some(process);
        #[cfg(unix)]
        {
            transport.process_group_id = process_group_id;
        }
        transport.connection_file = Some(connection_file);
        Ok((transport, events))
    }

    /// Attach to a kernel someone else started.
    pub async fn attach(
        connection_file: &Path,
        config: &BridgeConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<KernelEvent>), TransportError> {
        let contents = tokio::fs::read_to_string(connection_file).await?;
        let connection_info: ConnectionInfo = serde_json::from_str(&contents)
            .map_err(|e| TransportError::Launch(format!("{:?}: {}", connection_file, e)))?;
        info!("[jupyter] Attaching to kernel at {:?}", connection_file);
        Self::connect(&connection_info, config.startup_timeout).await
    }

    async fn connect(
        connection_info: &ConnectionInfo,
        startup_timeout: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<KernelEvent>), TransportError> {
        let session_id = Uuid::new_v4().to_string();

        let mut iopub =
            runtimelib::create_client_iopub_connection(connection_info, "", &session_id)
                .await
                .map_err(launch_err)?;

        let identity = runtimelib::peer_identity_for_session(&session_id).map_err(launch_err)?;
        let mut shell = runtimelib::create_client_shell_connection_with_identity(
            connection_info,
            &session_id,
            identity.clone(),
        )
        .await
        .map_err(launch_err)?;
        let mut stdin_conn = runtimelib::create_client_stdin_connection_with_identity(
            connection_info,
            &session_id,
            identity,
        )
        .await
        .map_err(launch_err)?;

        // Verify kernel is alive
        let request: JupyterMessage = KernelInfoRequest::default().into();
        shell.send(request).await.map_err(|e| TransportError::Send {
            msg_type: "kernel_info_request",
            reason: e.to_string(),
        })?;
        match tokio::time::timeout(startup_timeout, shell.read()).await {
            Ok(Ok(msg)) => info!("[jupyter] Kernel alive: got {}", msg.header.msg_type),
            Ok(Err(e)) => {
                error!("[jupyter] Error reading kernel_info_reply: {}", e);
                return Err(TransportError::Launch(format!("Kernel did not respond: {}", e)));
            }
            Err(_) => {
                error!("[jupyter] Timeout waiting for kernel_info_reply");
                return Err(TransportError::Timeout(startup_timeout));
            }
        }

        let (shell_writer, mut shell_reader) = shell.split();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (input_tx, mut input_rx) = mpsc::unbounded_channel::<String>();
        let (stop_tx, stop_rx) = watch::channel(false);

        let iopub_tx = events_tx.clone();
        let mut iopub_stop = stop_rx.clone();
        let iopub_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = iopub.read() => match result {
                        Ok(message) => {
                            debug!(
                                "[jupyter] iopub: type={} parent_msg_id={:?}",
                                message.header.msg_type,
                                message.parent_header.as_ref().map(|h| &h.msg_id)
                            );
                            if let Some(event) = kernel_event(&message) {
                                if iopub_tx.send(event).is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            error!("[jupyter] iopub read error: {}", e);
                            break;
                        }
                    },
                    _ = iopub_stop.changed() => break,
                }
            }
        });

        let shell_tx = events_tx.clone();
        let mut shell_stop = stop_rx.clone();
        let shell_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = shell_reader.read() => match result {
                        Ok(message) => {
                            if let Some(event) = kernel_event(&message) {
                                if shell_tx.send(event).is_err() {
                                    break;
                                }
                            } else {
                                debug!("[jupyter] shell reply: type={}", message.header.msg_type);
                            }
                        }
                        Err(e) => {
                            error!("[jupyter] shell read error: {}", e);
                            break;
                        }
                    },
                    _ = shell_stop.changed() => break,
                }
            }
        });

        let stdin_tx = events_tx;
        let mut stdin_stop = stop_rx;
        let stdin_task = tokio::spawn(async move {
            let mut pending: Option<JupyterMessage> = None;
            loop {
                tokio::select! {
                    result = stdin_conn.read() => match result {
                        Ok(message) => {
                            if let Some(event) = kernel_event(&message) {
                                pending = Some(message);
                                if stdin_tx.send(event).is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            error!("[jupyter] stdin read error: {}", e);
                            break;
                        }
                    },
                    value = input_rx.recv() => {
                        let Some(value) = value else { break };
                        let Some(request) = pending.take() else {
                            debug!("[jupyter] No pending input request, dropping reply");
                            continue;
                        };
                        let reply = InputReply {
                            value,
                            status: ReplyStatus::Ok,
                            error: None,
                        };
                        if let Err(e) = stdin_conn.send(reply.as_child_of(&request)).await {
                            error!("[jupyter] Failed to send input_reply: {}", e);
                        }
                    }
                    _ = stdin_stop.changed() => break,
                }
            }
        });

        Ok((
            Self {
                session_id,
                shell_writer: Some(shell_writer),
                input_tx,
                stop_tx,
                tasks: vec![iopub_task, shell_task, stdin_task],
                process: None,
                #[cfg(unix)]
                process_group_id: None,
                connection_file: None,
            },
            events_rx,
        ))
    }

    async fn send(&mut self, message: JupyterMessage) -> Result<String, TransportError> {
        let shell = self.shell_writer.as_mut().ok_or(TransportError::NotRunning)?;
        let msg_id = message.header.msg_id.clone();
        let msg_type = message.header.msg_type.clone();
        shell.send(message).await.map_err(|e| TransportError::Send {
            msg_type: "shell request",
            reason: e.to_string(),
        })?;
        debug!(
            "[jupyter] Sent {}: msg_id={} session={}",
            msg_type, msg_id, self.session_id
        );
        Ok(msg_id)
    }

    #[cfg(unix)]
    fn kill_process_group(&mut self) {
        if let Some(pgid) = self.process_group_id.take() {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                if e != nix::errno::Errno::ESRCH {
                    error!("[jupyter] Failed to kill process group {}: {}", pgid, e);
                }
            }
        }
    }
}

#[async_trait]
impl KernelTransport for JupyterTransport {
    async fn execute(&mut self, code: &str, mode: ExecuteMode) -> Result<String, TransportError> {
        let mut request = ExecuteRequest::new(code.to_string());
        match mode {
            ExecuteMode::Cell => request.allow_stdin = true,
            ExecuteMode::Silent => {
                request.silent = true;
                request.store_history = false;
                request.allow_stdin = false;
            }
        }
        self.send(request.into()).await
    }

    async fn inspect(&mut self, code: &str, cursor_pos: usize) -> Result<String, TransportError> {
        let request = InspectRequest {
            code: code.to_string(),
            cursor_pos,
            detail_level: Some(0),
        };
        self.send(request.into()).await
    }

    async fn input_reply(&mut self, value: String) -> Result<(), TransportError> {
        self.input_tx
            .send(value)
            .map_err(|_| TransportError::NotRunning)
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        info!("[jupyter] Shutting down kernel");
        let _ = self.stop_tx.send(true);
        for task in self.tasks.drain(..) {
            task.abort();
        }

        // Only ask the kernel to exit if we started it
        if let Some(mut shell) = self.shell_writer.take() {
            if self.process.is_some() {
                let request: JupyterMessage = ShutdownRequest { restart: false }.into();
                if let Err(e) = shell.send(request).await {
                    warn!("[jupyter] Failed to send shutdown_request: {}", e);
                }
            }
        }

        #[cfg(unix)]
        self.kill_process_group();
        self.process = None;

        if let Some(path) = self.connection_file.take() {
            tokio::fs::remove_file(&path).await.ok();
        }
        info!("[jupyter] Kernel shutdown complete");
        Ok(())
    }
}

impl Drop for JupyterTransport {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }

        #[cfg(unix)]
        self.kill_process_group();

        if let Some(ref path) = self.connection_file {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn launch_err(e: impl std::fmt::Display) -> TransportError {
    TransportError::Launch(e.to_string())
}

/// Convert a kernel message into a [`KernelEvent`], if the bridge cares about it.
fn kernel_event(message: &JupyterMessage) -> Option<KernelEvent> {
    let kind = match &message.content {
        JupyterMessageContent::StreamContent(stream) => KernelEventKind::Stream {
            name: match stream.name {
                jupyter_protocol::Stdio::Stdout => StreamName::Stdout,
                jupyter_protocol::Stdio::Stderr => StreamName::Stderr,
            },
            text: stream.text.clone(),
        },
        JupyterMessageContent::ExecuteResult(result) => KernelEventKind::ExecuteResult {
            data: mime_bundle(&result.data),
        },
        JupyterMessageContent::DisplayData(display) => KernelEventKind::DisplayData {
            data: mime_bundle(&display.data),
        },
        JupyterMessageContent::ErrorOutput(error) => KernelEventKind::Error {
            ename: error.ename.clone(),
            evalue: error.evalue.clone(),
            traceback: error.traceback.clone(),
        },
        JupyterMessageContent::Status(status) => match status.execution_state {
            jupyter_protocol::ExecutionState::Busy => KernelEventKind::Status(KernelStatus::Busy),
            jupyter_protocol::ExecutionState::Idle => KernelEventKind::Status(KernelStatus::Idle),
            _ => return None,
        },
        JupyterMessageContent::InspectReply(reply) => {
            let content = serde_json::to_value(reply).ok()?;
            KernelEventKind::InspectReply {
                found: content
                    .get("found")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
                data: content
                    .get("data")
                    .and_then(|v| v.as_object())
                    .cloned()
                    .unwrap_or_default(),
            }
        }
        JupyterMessageContent::InputRequest(request) => KernelEventKind::InputRequest {
            prompt: request.prompt.clone(),
            password: request.password,
        },
        _ => return None,
    };

    Some(KernelEvent {
        parent_id: message.parent_header.as_ref().map(|h| h.msg_id.clone()),
        kind,
    })
}

/// Flatten a [`Media`] bundle into `mime type -> value` JSON.
fn mime_bundle(media: &Media) -> MimeBundle {
    match serde_json::to_value(media) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => MimeBundle::new(),
    }
}
