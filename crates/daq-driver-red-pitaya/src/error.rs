//! Error types for the radar streaming driver.
//!
//! Every variant is fatal for a session: the continuity monitor has no
//! recoverable path, so callers either propagate these with `?` or report
//! them and exit.

use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type StreamResult<T> = std::result::Result<T, StreamError>;

/// Protocol stage a write belongs to, used to label transport faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configure,
    Upload,
    Trigger,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Stage::Configure => "configure",
            Stage::Upload => "upload",
            Stage::Trigger => "trigger",
        };
        write!(f, "{}", label)
    }
}

/// Errors raised while encoding or decoding command words.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The value does not fit in the 28 value bits and would collide with the tag.
    #[error("command value {value} does not fit in 28 bits (max {max})")]
    ValueOutOfRange { value: u32, max: u32 },

    /// A decoded word carries a tag this protocol does not define.
    #[error("unknown command tag {tag} in word {word:#010x}")]
    UnknownTag { tag: u8, word: u32 },

    /// A decoded command had the wrong shape (length or word order).
    #[error("malformed command: {0}")]
    Malformed(String),
}

/// Primary error type for the streaming session.
#[derive(Error, Debug)]
pub enum StreamError {
    /// `host:port` could not be parsed or resolved.
    #[error("invalid device address '{addr}': {reason}")]
    InvalidAddress { addr: String, reason: String },

    /// The TCP connection was refused or the host is unreachable.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The connection attempt did not complete within the configured timeout.
    #[error("connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout {
        addr: String,
        timeout: std::time::Duration,
    },

    /// A send during configure, upload or trigger failed or was short.
    #[error("{stage} write of {bytes} bytes failed: {source}")]
    TransportWrite {
        stage: Stage,
        bytes: usize,
        #[source]
        source: std::io::Error,
    },

    /// The stream ended or failed before a full burst arrived.
    #[error("burst receive failed after {received} of {expected} bytes: {source}")]
    TransportRead {
        received: usize,
        expected: usize,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Command(#[from] CommandError),

    /// An operation was called out of protocol order.
    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: crate::session::SessionState,
    },

    /// Configuration values are inconsistent with the protocol.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl StreamError {
    /// Returns true for faults of the TCP transport itself.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            StreamError::Connect { .. }
                | StreamError::ConnectTimeout { .. }
                | StreamError::TransportWrite { .. }
                | StreamError::TransportRead { .. }
        )
    }
}
