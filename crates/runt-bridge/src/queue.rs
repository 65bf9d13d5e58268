//! FIFO execution queue with a single active slot.
//!
//! The queue owns the pending requests and the one execution currently
//! running in the kernel. It never talks to the kernel itself: the bridge
//! asks it what to run next and tells it when the kernel reports completion.

use std::collections::VecDeque;
use std::path::PathBuf;

use crate::accumulator::OutputAccumulator;

/// A cell waiting to run. Immutable once queued.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub cell_id: String,
    pub code: String,
    /// Directory to switch the kernel into before running the cell.
    pub working_dir: Option<PathBuf>,
    /// Directory the report and images are written to.
    pub artifact_dir: PathBuf,
}

/// The request currently running in the kernel.
#[derive(Debug)]
pub struct ActiveExecution {
    pub request: ExecutionRequest,
    pub correlation_id: String,
    pub output: OutputAccumulator,
}

/// What `submit` decided.
#[derive(Debug, PartialEq)]
pub enum Submission {
    /// Nothing is running: dispatch this request now.
    Dispatch(ExecutionRequest),
    /// Something is running: queued behind `position` other requests.
    Queued { position: usize },
}

#[derive(Debug, Default)]
pub struct ExecutionQueue {
    /// Pending requests (FIFO)
    pending: VecDeque<ExecutionRequest>,
    /// Currently executing request
    active: Option<ActiveExecution>,
}

impl ExecutionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand the request back for immediate dispatch if idle, else enqueue it.
    ///
    /// Requests already waiting always go first, so a request is only
    /// dispatched directly when the pending queue is empty too.
    pub fn submit(&mut self, request: ExecutionRequest) -> Submission {
        if self.active.is_none() && self.pending.is_empty() {
            return Submission::Dispatch(request);
        }
        self.pending.push_back(request);
        Submission::Queued {
            position: self.pending.len() - 1,
        }
    }

    /// Next request to dispatch (if queue is non-empty and nothing executing).
    pub fn next_pending(&mut self) -> Option<ExecutionRequest> {
        if self.active.is_some() {
            return None;
        }
        self.pending.pop_front()
    }

    /// Mark `request` as running under `correlation_id`.
    pub fn activate(&mut self, request: ExecutionRequest, correlation_id: String) {
        self.active = Some(ActiveExecution {
            request,
            correlation_id,
            output: OutputAccumulator::new(),
        });
    }

    pub fn active(&self) -> Option<&ActiveExecution> {
        self.active.as_ref()
    }

    /// The active execution, if it is the one identified by `correlation_id`.
    pub fn active_for(&mut self, correlation_id: &str) -> Option<&mut ActiveExecution> {
        self.active
            .as_mut()
            .filter(|active| active.correlation_id == correlation_id)
    }

    /// Take the active execution out of its slot if it matches `correlation_id`.
    pub fn complete(&mut self, correlation_id: &str) -> Option<ActiveExecution> {
        if self.active.as_ref()?.correlation_id == correlation_id {
            return self.active.take();
        }
        None
    }

    /// Cell ids waiting to run, in order.
    pub fn pending_cells(&self) -> Vec<&str> {
        self.pending.iter().map(|r| r.cell_id.as_str()).collect()
    }

    /// Check if queue is empty (no pending and no executing)
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.active.is_none()
    }
}
