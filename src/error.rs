//! Error types for the sub-agent.
//!
//! Every long-lived task catches these at its top level and re-enters its
//! reconnect/retry state; none of them terminate the agent after startup.

use crate::oid::Oid;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Wire-level decode/encode failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// Data ended before a fixed-size field.
    Truncated { needed: usize, available: usize },
    /// Payload bytes left over after the typed payload was consumed.
    TrailingBytes { count: usize },
    /// Header `payload_length` does not match the octets on the wire.
    PayloadLengthMismatch { declared: u32, actual: usize },
    /// Header `payload_length` exceeds the frame ceiling.
    PayloadTooLarge { length: u32 },
    /// Unknown PDU type octet.
    UnknownPduType(u8),
    /// A PDU that is valid AgentX but unexpected in the current state.
    UnexpectedPduType(u8),
    /// OID with more than `MAX_SUB_IDS` sub-identifiers.
    OidTooLong { count: usize },
    /// Octet string length field runs past the payload.
    BadOctetStringLength { declared: u32 },
    /// Unknown value type tag in a VarBind.
    UnknownValueType(u16),
    /// Value payload has the wrong size for its type tag.
    BadValueLength { tag: u16, length: usize },
}

impl std::fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { needed, available } => {
                write!(f, "need {} bytes but only {} remaining", needed, available)
            }
            Self::TrailingBytes { count } => {
                write!(f, "{} trailing bytes after payload", count)
            }
            Self::PayloadLengthMismatch { declared, actual } => {
                write!(f, "payload_length {} but {} octets consumed", declared, actual)
            }
            Self::PayloadTooLarge { length } => {
                write!(f, "payload_length {} exceeds frame ceiling", length)
            }
            Self::UnknownPduType(t) => write!(f, "unknown PDU type {}", t),
            Self::UnexpectedPduType(t) => write!(f, "unexpected PDU type {}", t),
            Self::OidTooLong { count } => {
                write!(f, "OID has {} sub-ids, exceeds maximum", count)
            }
            Self::BadOctetStringLength { declared } => {
                write!(f, "octet string length {} runs past payload", declared)
            }
            Self::UnknownValueType(t) => write!(f, "unknown value type tag {}", t),
            Self::BadValueLength { tag, length } => {
                write!(f, "value of type {} has invalid length {}", tag, length)
            }
        }
    }
}

/// Sub-agent error type.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Socket I/O failure on the master transport. Recovered by the
    /// reconnect loop.
    #[error("transport error: {source}")]
    Transport {
        #[source]
        source: std::io::Error,
    },

    /// Malformed or unexpected PDU. Triggers a transport reset.
    #[error("protocol error at offset {offset}: {kind}")]
    Protocol {
        offset: usize,
        kind: ProtocolErrorKind,
    },

    /// Header carried a version other than 1.
    #[error("unsupported AgentX version {version}")]
    UnsupportedVersion { version: u8 },

    /// The master answered an administrative PDU with a non-zero error.
    #[error("master returned error {code} to {operation}")]
    Master { operation: &'static str, code: u16 },

    /// Store unavailable or returning invalid data. Updaters retry next
    /// cycle; the trap engine re-subscribes.
    #[error("store error: {message}")]
    Store { message: String },

    /// Missing or malformed configuration. Fatal at startup.
    #[error("config error in {path}: {message}")]
    Config { path: String, message: String },

    /// A leaf getter failed. Becomes genErr in the response.
    #[error("leaf error at {oid}: {message}")]
    Leaf { oid: Oid, message: String },

    /// A trap handler failed. The handler keeps receiving events.
    #[error("trap handler {handler}: {message}")]
    Handler {
        handler: &'static str,
        message: String,
    },
}

impl Error {
    /// Create a protocol error.
    pub fn protocol(offset: usize, kind: ProtocolErrorKind) -> Self {
        Self::Protocol { offset, kind }
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a leaf error.
    pub fn leaf(oid: Oid, message: impl Into<String>) -> Self {
        Self::Leaf {
            oid,
            message: message.into(),
        }
    }

    /// Create a trap handler error.
    pub fn handler(handler: &'static str, message: impl Into<String>) -> Self {
        Self::Handler {
            handler,
            message: message.into(),
        }
    }

    /// True for store-side faults the caller should retry.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store { .. })
    }

    /// True for failures that require a transport reset.
    pub fn resets_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Protocol { .. } | Self::UnsupportedVersion { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::Transport { source }
    }
}
