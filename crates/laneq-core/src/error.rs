//! Caller/config errors raised synchronously at the API boundary.

/// Errors returned by dispatcher and lane configuration entrypoints.
///
/// Job failures are not errors at this boundary: they are captured on the
/// `JobRecord` and emitted as events. Persistence failures are logged and
/// retried by the flush loop without surfacing here.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("lane concurrency must be at least 1 (got {0})")]
    InvalidConcurrency(usize),

    #[error("lane count must be at least 1 (got {0})")]
    InvalidLaneCount(usize),

    #[error("dispatcher is shut down")]
    ShutDown,
}
