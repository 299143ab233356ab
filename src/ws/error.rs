#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Cause reported by a transport through [`ConnectionEvent::Failed`].
///
/// Cheap to clone so one failure can settle every coalesced caller.
///
/// [`ConnectionEvent::Failed`]: super::ConnectionEvent::Failed
#[derive(Clone)]
pub struct TransportError(Arc<dyn StdError + Send + Sync + 'static>);

impl TransportError {
    pub fn new<E: StdError + Send + Sync + 'static>(error: E) -> Self {
        Self(Arc::new(error))
    }

    /// Build a cause from a plain message, for transports without a typed error.
    pub fn msg<S: Into<String>>(message: S) -> Self {
        let message: String = message.into();
        let boxed: Box<dyn StdError + Send + Sync + 'static> = message.into();
        Self(Arc::from(boxed))
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }
}

impl fmt::Debug for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum WsError {
    /// Server answered the upgrade request with something other than `101 Switching Protocols`
    HandshakeRejected {
        /// HTTP status of the upgrade response
        status: u16,
        /// Status message of the upgrade response
        message: String,
    },
    /// Transport signaled an error before or after the connection was established
    Transport(TransportError),
    /// Automatic reconnection gave up
    ReconnectExhausted {
        /// Number of reconnection attempts that were made
        attempts: u32,
    },
    /// Connection ended with a close code other than 1000
    AbnormalClose {
        /// Close code reported by the transport
        code: u16,
        /// Close reason reported by the transport
        reason: String,
        /// Whether the peer initiated the close
        remote: bool,
    },
    /// WebSocket connection is not open, or the manager has shut down
    ConnectionClosed,
    /// Handshake did not complete within the configured connect timeout
    Timeout,
    /// Subscription stream lagged and missed messages
    Lagged {
        /// Number of messages that were missed
        count: u64,
    },
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandshakeRejected { status, message } => {
                write!(f, "WebSocket handshake rejected: {status} {message}")
            }
            Self::Transport(e) => write!(f, "WebSocket transport error: {e}"),
            Self::ReconnectExhausted { attempts } => {
                write!(f, "WebSocket reconnection gave up after {attempts} attempts")
            }
            Self::AbnormalClose {
                code,
                reason,
                remote,
            } => {
                let side = if *remote { "remote" } else { "local" };
                write!(f, "WebSocket closed abnormally by {side} side: {code} {reason}")
            }
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::Timeout => write!(f, "WebSocket operation timed out"),
            Self::Lagged { count } => write!(f, "Subscription lagged, missed {count} messages"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}
