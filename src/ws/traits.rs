//! Seams between the connection manager and the raw socket.

use super::config::Config;
use super::error::TransportError;
use super::event_bus::EventSink;

/// One raw socket connection attempt.
///
/// A transport reports everything through the [`EventSink`] it was created with:
/// - [`Transport::open`] eventually yields exactly one handshake result or failure
/// - [`Transport::close`] eventually yields exactly one close notification
/// - nothing is reported after a close or failure
///
/// Instances are never reused; the manager creates a fresh one for every attempt
/// and drops it once its events have terminated.
pub trait Transport: Send + 'static {
    /// Start the opening handshake.
    fn open(&mut self);

    /// Start the closing handshake.
    fn close(&mut self);

    /// Queue an outgoing text frame.
    fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Best-effort status, not authoritative for the connection state.
    fn is_open(&self) -> bool;
}

/// Factory for [`Transport`] instances.
///
/// # Example
///
/// ```ignore
/// impl Connector for MyConnector {
///     type Transport = MySocket;
///
///     fn create(&self, config: &Config, events: EventSink) -> MySocket {
///         MySocket::new(config.server_uri.clone(), events)
///     }
/// }
/// ```
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    fn create(&self, config: &Config, events: EventSink) -> Self::Transport;
}
