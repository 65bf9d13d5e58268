//! runt-bridge - Editor bridge to a long-lived Jupyter kernel.
//!
//! The editor sends cells to run over newline-delimited JSON on stdin. The
//! bridge runs them one at a time in submission order, forwards their output
//! live, and on completion writes a Markdown report (plus any images) to a
//! per-document cache directory before announcing the result on stdout.
//!
//! Besides executions, the bridge answers side queries about kernel state
//! (variables, dataframe previews, introspection) and keeps the artifact cache
//! in step with the editor's live cells.

pub mod accumulator;
pub mod artifacts;
pub mod bridge;
pub mod cache;
pub mod config;
pub mod correlator;
pub mod error;
pub mod finalizer;
pub mod jupyter;
pub mod protocol;
pub mod queue;
pub mod side_query;
pub mod terminal;
pub mod traceback;
pub mod transport;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use error::{ArtifactError, TransportError};
pub use transport::KernelTransport;
