use thiserror::Error;

/// Errors surfaced by the event subsystem. Listener failures are logged and
/// isolated, never raised to the firer, so the variants here only cover
/// infrastructure misuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// A job was posted after the worker pool was drained on shutdown.
    #[error("event worker pool is shut down")]
    WorkersClosed,
}
