//! Error types for the capability gate.

/// Top-level error type for the gate and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// A platform capability query or remediation launch failed.
    #[error("platform error: {0}")]
    Platform(String),

    /// The downstream event subscription could not be opened or failed.
    #[error("stream error: {0}")]
    Stream(String),

    /// Notification registration or deregistration failed.
    #[error("notification error: {0}")]
    Notification(String),

    /// The gate actor is no longer running.
    #[error("gate closed: {0}")]
    GateClosed(String),

    /// Host bridge protocol error.
    #[error("host error: {0}")]
    Host(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, GateError>;
