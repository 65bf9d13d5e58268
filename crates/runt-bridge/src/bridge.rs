//! The bridge core.
//!
//! A single task owns the queue, the correlator and the kernel handle. Editor
//! commands and kernel events reach it over two channels and are handled one
//! at a time, so every state transition (enqueue, dispatch, append, finalize,
//! dequeue) happens in one place without locks.

use std::future::Future;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::accumulator::image_payload;
use crate::artifacts::ArtifactStore;
use crate::cache::{purge_cache, remove_cache};
use crate::config::{document_dir, BridgeConfig, SCRATCHPAD};
use crate::correlator::{Correlator, Route};
use crate::error::TransportError;
use crate::finalizer;
use crate::protocol::{Command, Event};
use crate::queue::{ExecutionQueue, ExecutionRequest, Submission};
use crate::side_query::{chdir_program, plot_mode_program, SideQuery, SideQueryKind};
use crate::transport::{
    ExecuteMode, KernelEvent, KernelEventKind, KernelStatus, KernelTransport, StreamName,
};

/// Outbound half of the editor protocol.
pub type EventSender = mpsc::UnboundedSender<Event>;

pub struct Bridge<T: KernelTransport> {
    kernel: T,
    config: BridgeConfig,
    queue: ExecutionQueue,
    correlator: Correlator,
    events: EventSender,
    /// The active execution is blocked on an input request.
    awaiting_input: bool,
}

impl<T: KernelTransport> Bridge<T> {
    pub fn new(kernel: T, config: BridgeConfig, events: EventSender) -> Self {
        Self {
            kernel,
            config,
            queue: ExecutionQueue::new(),
            correlator: Correlator::new(),
            events,
            awaiting_input: false,
        }
    }

    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    /// Process commands and kernel events until the command stream ends, the
    /// kernel event stream ends, or `shutdown` resolves. Then shut the kernel
    /// down.
    pub async fn run<F>(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut kernel_events: mpsc::UnboundedReceiver<KernelEvent>,
        shutdown: F,
    ) -> Result<(), TransportError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        info!("[bridge] Command stream closed");
                        break;
                    }
                },
                event = kernel_events.recv() => match event {
                    Some(event) => self.handle_kernel_event(event).await,
                    None => {
                        error!("[bridge] Kernel event stream closed");
                        self.emit(Event::Error {
                            msg: "Kernel connection lost".to_string(),
                        });
                        break;
                    }
                },
                _ = &mut shutdown => {
                    info!("[bridge] Shutdown requested");
                    break;
                }
            }
        }

        self.kernel.shutdown().await
    }

    pub async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Execute {
                code,
                cell_id,
                file_dir,
                cwd,
                filename,
            } => {
                let artifact_dir = self
                    .config
                    .artifact_dir(file_dir.as_deref(), filename.as_deref());
                self.submit(ExecutionRequest {
                    cell_id,
                    code,
                    working_dir: cwd,
                    artifact_dir,
                })
                .await;
            }
            Command::GetVariables => {
                self.side_query(SideQuery::new(SideQueryKind::Variables, None))
                    .await
            }
            Command::ViewDataframe { name } => {
                self.side_query(SideQuery::new(SideQueryKind::Dataframe, Some(name)))
                    .await
            }
            Command::Peek { name } => {
                self.side_query(SideQuery::new(SideQueryKind::Peek, Some(name)))
                    .await
            }
            Command::CopyToClipboard { name } => {
                self.side_query(SideQuery::new(SideQueryKind::Clipboard, Some(name)))
                    .await
            }
            Command::Inspect { name } => self.inspect(name).await,
            Command::SetPlotMode { mode } => {
                info!("[bridge] Plot mode: {:?}", mode);
                self.housekeeping(&plot_mode_program(mode)).await;
            }
            Command::PurgeCache {
                ids,
                file_dir,
                filename,
            } => match self.config.cache_dir(file_dir.as_deref(), filename.as_deref()) {
                Some(dir) => {
                    purge_cache(&ids, &dir).await;
                }
                None => debug!("[cache] purge_cache without a directory, ignoring"),
            },
            Command::RemoveCache {
                ids,
                file_dir,
                filename,
            } => match self.config.cache_dir(file_dir.as_deref(), filename.as_deref()) {
                Some(dir) => {
                    remove_cache(&ids, &dir).await;
                }
                None => debug!("[cache] remove_cache without a directory, ignoring"),
            },
            Command::CleanCache {
                valid_ids,
                filename,
            } => {
                let document = filename.as_deref().unwrap_or(SCRATCHPAD);
                let dir = document_dir(&self.config.cache_root, document);
                purge_cache(&valid_ids, &dir).await;
            }
            Command::InputReply { value } => self.input_reply(value).await,
        }
    }

    pub async fn handle_kernel_event(&mut self, event: KernelEvent) {
        let KernelEvent { parent_id, kind } = event;
        let Some(parent_id) = parent_id else {
            debug!("[correlator] Dropping unparented {}", kind.label());
            return;
        };
        let Some(route) = self.correlator.route(&parent_id).cloned() else {
            debug!(
                "[correlator] Dropping stale {} for {}",
                kind.label(),
                parent_id
            );
            return;
        };

        if kind == KernelEventKind::Status(KernelStatus::Idle) && route.ends_on_idle() {
            self.correlator.release(&parent_id);
            if route == Route::Primary {
                self.finish(&parent_id).await;
            }
            return;
        }

        match route {
            Route::Primary => self.on_primary(&parent_id, kind).await,
            Route::Side(query) => self.on_side(&parent_id, &query, kind),
            Route::Housekeeping => {
                if let KernelEventKind::Error { ename, evalue, .. } = kind {
                    warn!("[bridge] Housekeeping execution failed: {}: {}", ename, evalue);
                }
            }
        }
    }

    async fn on_primary(&mut self, correlation_id: &str, kind: KernelEventKind) {
        let Some(active) = self.queue.active_for(correlation_id) else {
            debug!("[correlator] No active execution for {}", correlation_id);
            return;
        };
        let cell_id = active.request.cell_id.clone();

        match kind {
            KernelEventKind::Stream { name, text } => {
                active.output.push_stream(name, text.clone());
                self.emit(Event::Stream {
                    text,
                    stream: name,
                    cell_id,
                });
            }
            KernelEventKind::ExecuteResult { data } | KernelEventKind::DisplayData { data } => {
                match image_payload(&data) {
                    Some(png) => self.save_image(correlation_id, &png).await,
                    None => active.output.push_result(&data),
                }
            }
            KernelEventKind::Error {
                ename,
                evalue,
                traceback,
            } => {
                let live = format!("{}\n", traceback.join("\n"));
                active.output.push_error(&ename, &evalue, traceback);
                self.emit(Event::Stream {
                    text: live,
                    stream: StreamName::Stderr,
                    cell_id,
                });
            }
            KernelEventKind::InputRequest { prompt, password } => {
                self.awaiting_input = true;
                self.emit(Event::InputRequest {
                    prompt,
                    cell_id,
                    password,
                });
            }
            KernelEventKind::Status(_) | KernelEventKind::InspectReply { .. } => {}
        }
    }

    /// Write an image of the active execution as soon as it arrives and tell
    /// the editor. The report only references it at finalize.
    async fn save_image(&mut self, correlation_id: &str, png_base64: &str) {
        let Some(active) = self.queue.active_for(correlation_id) else {
            return;
        };
        let cell_id = active.request.cell_id.clone();
        let index = active.output.image_count();
        let store = ArtifactStore::new(active.request.artifact_dir.clone());

        let saved = match store.ensure_dir().await {
            Ok(()) => store.write_image(&cell_id, index, png_base64).await,
            Err(e) => Err(e),
        };
        let path = match saved {
            Ok(path) => path,
            Err(e) => {
                warn!("[finalize] Skipping image for {}: {}", cell_id, e);
                return;
            }
        };

        debug!("[finalize] Saved image {:?}", path);
        if let Some(active) = self.queue.active_for(correlation_id) {
            active.output.push_image(path.clone());
        }
        self.emit(Event::ImageSaved { path, cell_id });
    }

    fn on_side(&mut self, correlation_id: &str, query: &SideQuery, kind: KernelEventKind) {
        match kind {
            KernelEventKind::DisplayData { data } => {
                if let Some(event) = query.decode_display(&data) {
                    self.emit(event);
                }
            }
            KernelEventKind::InspectReply { found, data } => {
                self.correlator.release(correlation_id);
                if let Some(event) = query.decode_inspect(found, &data) {
                    self.emit(event);
                }
            }
            KernelEventKind::Error { ename, evalue, .. } => {
                debug!(
                    "[bridge] {:?} query failed: {}: {}",
                    query.kind, ename, evalue
                );
            }
            _ => {}
        }
    }

    async fn submit(&mut self, request: ExecutionRequest) {
        match self.queue.submit(request) {
            Submission::Dispatch(request) => {
                self.dispatch(request).await;
            }
            Submission::Queued { position } => {
                info!(
                    "[queue] Queued cell (position {}): {:?}",
                    position,
                    self.queue.pending_cells()
                );
            }
        }
    }

    /// Send `request` to the kernel. Returns false if it could not be sent.
    async fn dispatch(&mut self, request: ExecutionRequest) -> bool {
        if let Some(dir) = &request.working_dir {
            self.housekeeping(&chdir_program(dir)).await;
        }

        match self.kernel.execute(&request.code, ExecuteMode::Cell).await {
            Ok(correlation_id) => {
                info!(
                    "[queue] Executing {}: msg_id={}",
                    request.cell_id, correlation_id
                );
                self.correlator.register_primary(&correlation_id);
                self.emit(Event::ExecutionStarted {
                    cell_id: request.cell_id.clone(),
                    code: request.code.clone(),
                });
                self.queue.activate(request, correlation_id);
                true
            }
            Err(e) => {
                error!("[queue] Failed to execute {}: {}", request.cell_id, e);
                self.emit(Event::Error {
                    msg: format!("Failed to execute {}: {}", request.cell_id, e),
                });
                false
            }
        }
    }

    /// Finalize the active execution and start the next one.
    async fn finish(&mut self, correlation_id: &str) {
        self.awaiting_input = false;
        let Some(active) = self.queue.complete(correlation_id) else {
            return;
        };
        let done = finalizer::finalize(active).await;
        self.emit(done.into_event());
        self.advance().await;
    }

    /// Dispatch pending requests until one is accepted or the queue is empty.
    async fn advance(&mut self) {
        while let Some(next) = self.queue.next_pending() {
            if self.dispatch(next).await {
                break;
            }
        }
    }

    async fn housekeeping(&mut self, code: &str) {
        match self.kernel.execute(code, ExecuteMode::Silent).await {
            Ok(correlation_id) => self.correlator.register_housekeeping(&correlation_id),
            Err(e) => warn!("[bridge] Housekeeping execution not sent: {}", e),
        }
    }

    async fn side_query(&mut self, query: SideQuery) {
        let Some(program) = query.program() else {
            return;
        };
        match self.kernel.execute(&program, ExecuteMode::Silent).await {
            Ok(correlation_id) => self.correlator.register_side(&correlation_id, query),
            Err(e) => debug!("[bridge] {:?} query not sent: {}", query.kind, e),
        }
    }

    async fn inspect(&mut self, name: String) {
        let cursor_pos = name.chars().count();
        match self.kernel.inspect(&name, cursor_pos).await {
            Ok(correlation_id) => self.correlator.register_side(
                &correlation_id,
                SideQuery::new(SideQueryKind::Inspect, Some(name)),
            ),
            Err(e) => debug!("[bridge] Inspect not sent: {}", e),
        }
    }

    async fn input_reply(&mut self, value: String) {
        if !self.awaiting_input {
            debug!("[bridge] No pending input request, ignoring reply");
            return;
        }
        self.awaiting_input = false;
        if let Err(e) = self.kernel.input_reply(value).await {
            warn!("[bridge] Failed to send input reply: {}", e);
        }
    }

    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            debug!("[bridge] Event receiver closed, dropping event");
        }
    }
}
