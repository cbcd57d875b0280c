//! Service-level error type.
//!
//! Internal lifecycle mutations never fail; everything externally observable
//! is reported at the control-plane boundary as one of these variants.

/// Errors surfaced by synchronous control-plane entry points.
#[derive(Debug, thiserror::Error)]
pub enum AppMgrError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
    #[error("process record not found: {0}")]
    RecordNotFound(String),
    #[error("remote scheduler not bound")]
    ClientNotBound,
    #[error("remote call failed: {0}")]
    Remote(String),
    #[error("task queue unavailable: {0}")]
    Queue(String),
    #[error("process launch failed: {0}")]
    Launch(String),
}
