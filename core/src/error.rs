//! Error types for the kubeforward-core library.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for kubeforward operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving, starting, or tracking a
/// forwarding session.
///
/// Every variant is surfaced to the user as an inline message on the
/// dialog; nothing is retried automatically. The user re-triggers the
/// originating command instead.
#[derive(Error, Debug)]
pub enum Error {
    /// The service has no selector and cannot be auto-targeted.
    #[error("service has no selector")]
    NoSelector,

    /// The pod list query succeeded but matched nothing.
    #[error("no pods match selector '{0}'")]
    NoMatchingPods(String),

    /// Transport or auth failure while resolving pods. Re-invoking the
    /// resolve is the only retry path.
    #[error("pod resolution failed: {0}")]
    ResolutionFailed(String),

    /// Missing pod/port at confirm time, out-of-range local port, or a
    /// local-port collision with a tracked session.
    #[error("{0}")]
    Validation(String),

    /// The forwarding backend rejected the start call. The message is
    /// passed through verbatim.
    #[error("{0}")]
    StartFailed(String),

    /// The start call did not complete within the configured timeout.
    #[error("port-forward start timed out after {0:?}")]
    StartTimeout(Duration),

    /// Configuration could not be read or written.
    #[error("configuration error: {0}")]
    Config(String),

    /// Any other caught error, message unmodified.
    #[error("{0}")]
    Unknown(String),
}
