//! Reconnecting WebSocket connection management.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: public handle; connect, close, send and subscribe
//! - [`EventBus`]: ordered event feed of one [`Transport`] attempt
//! - [`ReconnectPolicy`]: attempt index to retry delay
//! - [`MessageBroadcaster`]: fan-out of incoming text to subscribers, rebound on every reconnect
//! - [`Transport`] / [`Connector`]: seam to the raw socket; [`tungstenite`] is the default
//!
//! # Example
//!
//! ```ignore
//! let connection = ConnectionManager::new(config, MyConnector)?;
//! let messages = connection.on_message();
//! connection.connect().await?;
//! ```

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod error;
pub mod event_bus;
pub mod reconnect;
pub mod traits;
#[cfg(feature = "tungstenite")]
pub mod tungstenite;

pub use broadcast::{MessageBroadcaster, MessageFeed};
pub use connection::{ConnectionManager, ConnectionState, Lifecycle};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use error::TransportError;
pub use event_bus::{ConnectionEvent, EventBus, EventSink};
pub use reconnect::ReconnectPolicy;
pub use traits::*;
