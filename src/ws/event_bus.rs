//! Ordered event feed for a single transport instance.

use futures::Stream;
use tokio::sync::mpsc;

use super::config::Config;
use super::error::TransportError;
use super::traits::{Connector, Transport};

/// Status code of a successful WebSocket upgrade.
pub const SWITCHING_PROTOCOLS: u16 = 101;

/// Close code of a clean shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Event produced by a transport, consumed once by the connection controller.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Handshake finished with the given HTTP status
    Opened { status: u16, message: String },
    /// Text frame received
    Message(String),
    /// Transport error; terminal
    Failed(TransportError),
    /// Closing handshake finished or the peer went away; terminal
    Closed {
        code: u16,
        reason: String,
        remote: bool,
    },
}

impl ConnectionEvent {
    /// Whether nothing can follow this event on the same transport.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Closed { .. })
    }
}

/// Callback side of an [`EventBus`], handed to the transport on creation.
///
/// Events sent after the bus is dropped are discarded.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl EventSink {
    pub fn on_open<S: Into<String>>(&self, status: u16, message: S) {
        self.emit(ConnectionEvent::Opened {
            status,
            message: message.into(),
        });
    }

    pub fn on_message<S: Into<String>>(&self, text: S) {
        self.emit(ConnectionEvent::Message(text.into()));
    }

    pub fn on_error(&self, cause: TransportError) {
        self.emit(ConnectionEvent::Failed(cause));
    }

    pub fn on_close<S: Into<String>>(&self, code: u16, reason: S, remote: bool) {
        self.emit(ConnectionEvent::Closed {
            code,
            reason: reason.into(),
            remote,
        });
    }

    /// `true` once the owning bus is gone and events go nowhere.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.tx.is_closed()
    }

    fn emit(&self, event: ConnectionEvent) {
        _ = self.tx.send(event);
    }
}

/// Turns one transport's callbacks into an ordered sequence of [`ConnectionEvent`]s.
///
/// The first call to [`EventBus::next`] opens the transport. The sequence ends after
/// the first terminal event; a finished bus is discarded, never reopened.
pub struct EventBus<T: Transport> {
    transport: T,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    started: bool,
    terminated: bool,
}

impl<T: Transport> EventBus<T> {
    pub fn new<C: Connector<Transport = T>>(connector: &C, config: &Config) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let transport = connector.create(config, EventSink { tx });

        Self {
            transport,
            events,
            started: false,
            terminated: false,
        }
    }

    /// Next event in arrival order, or `None` once the sequence has terminated.
    ///
    /// Cancel safe: dropping the future loses no event.
    pub async fn next(&mut self) -> Option<ConnectionEvent> {
        if self.terminated {
            return None;
        }
        if !self.started {
            self.started = true;
            self.transport.open();
        }

        // A transport that drops its sink without reporting is treated as failed.
        let event = self.events.recv().await.unwrap_or_else(|| {
            ConnectionEvent::Failed(TransportError::msg("transport event feed ended"))
        });
        if event.is_terminal() {
            self.terminated = true;
            self.events.close();
        }
        Some(event)
    }

    /// Consume the bus as a [`Stream`].
    pub fn into_stream(mut self) -> impl Stream<Item = ConnectionEvent> {
        async_stream::stream! {
            while let Some(event) = self.next().await {
                yield event;
            }
        }
    }

    /// Whether the transport has been asked to open.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.started
    }

    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn close(&mut self) {
        self.transport.close();
    }

    pub fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.transport.send(text)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use futures::StreamExt as _;

    use super::*;

    #[derive(Default)]
    struct Calls {
        opens: usize,
        closes: usize,
        sink: Option<EventSink>,
    }

    struct Recording(Arc<Mutex<Calls>>);

    impl Transport for Recording {
        fn open(&mut self) {
            self.0.lock().unwrap().opens += 1;
        }

        fn close(&mut self) {
            self.0.lock().unwrap().closes += 1;
        }

        fn send(&mut self, _text: String) -> Result<(), TransportError> {
            Ok(())
        }

        fn is_open(&self) -> bool {
            let calls = self.0.lock().unwrap();
            calls.opens > 0 && calls.closes == 0
        }
    }

    struct RecordingConnector(Arc<Mutex<Calls>>);

    impl Connector for RecordingConnector {
        type Transport = Recording;

        fn create(&self, _config: &Config, events: EventSink) -> Recording {
            self.0.lock().unwrap().sink = Some(events);
            Recording(Arc::clone(&self.0))
        }
    }

    fn bus() -> (EventBus<Recording>, Arc<Mutex<Calls>>, EventSink) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let config = Config::from_uri("ws://h/p").unwrap();
        let bus = EventBus::new(&RecordingConnector(Arc::clone(&calls)), &config);
        let sink = calls.lock().unwrap().sink.clone().unwrap();
        (bus, calls, sink)
    }

    #[tokio::test]
    async fn first_poll_opens_transport_once() {
        let (mut bus, calls, sink) = bus();
        assert_eq!(calls.lock().unwrap().opens, 0, "creation must not open");
        assert!(!bus.is_open());

        sink.on_open(SWITCHING_PROTOCOLS, "OK");
        sink.on_message("a");
        _ = bus.next().await;
        _ = bus.next().await;

        assert!(bus.is_started());
        assert_eq!(calls.lock().unwrap().opens, 1);
        assert!(bus.is_open());

        bus.close();
        assert!(!bus.is_open());
    }

    #[tokio::test]
    async fn sequence_ends_after_terminal_event() {
        let (bus, _calls, sink) = bus();

        sink.on_open(SWITCHING_PROTOCOLS, "OK");
        sink.on_message("a");
        sink.on_message("b");
        sink.on_close(NORMAL_CLOSURE, "bye", false);
        sink.on_message("late");

        let events: Vec<_> = bus.into_stream().collect().await;

        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], ConnectionEvent::Opened { status: 101, .. }));
        assert!(matches!(&events[1], ConnectionEvent::Message(text) if text == "a"));
        assert!(matches!(&events[2], ConnectionEvent::Message(text) if text == "b"));
        assert!(matches!(events[3], ConnectionEvent::Closed { code: 1000, .. }));
        assert!(sink.is_detached(), "terminated bus should stop accepting events");
    }

    #[tokio::test]
    async fn dropped_sink_reads_as_failure() {
        let (mut bus, calls, sink) = bus();
        drop(sink);
        calls.lock().unwrap().sink = None;

        let event = bus.next().await;

        assert!(matches!(event, Some(ConnectionEvent::Failed(_))));
        assert!(bus.is_terminated());
        assert!(bus.next().await.is_none());
    }
}
