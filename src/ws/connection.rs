#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::time::{Duration, Instant as StdInstant};

use backoff::backoff::Backoff as _;
use futures::Stream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};

use super::broadcast::{MessageBroadcaster, MessageFeed};
use super::config::Config;
use super::error::WsError;
use super::event_bus::{ConnectionEvent, EventBus, NORMAL_CLOSURE, SWITCHING_PROTOCOLS};
use super::reconnect::{LinearBackoff, ReconnectPolicy};
use super::traits::Connector;
use crate::Result;

/// Broadcast channel capacity for lifecycle notifications.
const LIFECYCLE_CAPACITY: usize = 64;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum ConnectionState {
    /// Never connected
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Successfully connected
    Connected {
        /// When the connection was established
        since: StdInstant,
    },
    /// Waiting out the delay before a reconnection attempt
    Reconnecting {
        /// Attempt that will run when the delay elapses
        attempt: u32,
    },
    /// Closing handshake in progress
    Closing,
    /// Connection is gone and will not come back on its own
    Closed,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Notification published on state changes that observers may need to act on.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Lifecycle {
    /// Connection established, either first time or after a reconnect
    Connected,
    /// Connection failed and a retry has been scheduled
    Reconnecting {
        attempt: u32,
        delay: Duration,
    },
    /// Established connection failed and no retry will happen
    ConnectionLost(WsError),
    /// Every reconnection attempt failed
    ReconnectExhausted,
    /// Connection closed on request or cleanly by the peer
    Closed {
        /// Whether the close completed with code 1000
        clean: bool,
    },
}

type Outcome = std::result::Result<bool, WsError>;

enum Command {
    Connect(oneshot::Sender<Outcome>),
    Close(oneshot::Sender<Outcome>),
    Send(String, oneshot::Sender<std::result::Result<(), WsError>>),
}

/// Manages a single WebSocket connection: connecting, reconnecting, closing and
/// broadcasting incoming messages.
///
/// All state lives in one background controller task; this handle only sends it
/// requests, so it is cheap to clone and share. Concurrent `connect()` calls share
/// one attempt and one outcome, as do concurrent `close()` calls.
///
/// # Example
///
/// ```rust, no_run
/// use futures::StreamExt as _;
/// use resilient_ws::ws::ConnectionManager;
/// use resilient_ws::ws::config::Config;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = Config::builder()
///         .server_uri("wss://example.com/feed".parse()?)
///         .auto_reconnect(true)
///         .build();
///     let connection = ConnectionManager::tungstenite(config)?;
///
///     let mut messages = Box::pin(connection.on_message());
///     connection.connect().await?;
///
///     while let Some(message) = messages.next().await {
///         println!("{}", message?);
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    messages: MessageFeed,
    lifecycle_tx: broadcast::Sender<Lifecycle>,
}

impl ConnectionManager {
    /// Create a connection manager and start its controller task.
    ///
    /// Nothing is opened until [`connect`](Self::connect) is called. Must be called
    /// from within a tokio runtime.
    pub fn new<C: Connector>(config: Config, connector: C) -> Result<Self> {
        config.validate()?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (lifecycle_tx, _) = broadcast::channel(LIFECYCLE_CAPACITY);
        let broadcaster = MessageBroadcaster::default();
        let messages = broadcaster.feed();

        let controller = Controller {
            backoff: ReconnectPolicy::from(config.reconnect).backoff(),
            config,
            connector,
            state_tx,
            lifecycle_tx: lifecycle_tx.clone(),
            broadcaster,
            active: None,
            next_source: 0,
            retrying: false,
            retry_at: None,
            handshake_deadline: None,
            closing: None,
            pending_connect: Vec::new(),
            pending_close: Vec::new(),
        };
        tokio::spawn(controller.run(command_rx));

        Ok(Self {
            commands,
            state_rx,
            messages,
            lifecycle_tx,
        })
    }

    /// Connection manager over the default `tokio-tungstenite` transport.
    #[cfg(feature = "tungstenite")]
    pub fn tungstenite(config: Config) -> Result<Self> {
        Self::new(config, super::tungstenite::TungsteniteConnector)
    }

    /// Establish the connection.
    ///
    /// Resolves `true` immediately when already connected. While an attempt or a
    /// reconnect sequence is in flight, resolves with that sequence's outcome instead
    /// of starting another. Resolves `false` if the attempt is cancelled by
    /// [`close`](Self::close).
    pub async fn connect(&self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Connect(tx))?;
        let outcome = rx.await.map_err(|_e| WsError::ConnectionClosed)?;
        Ok(outcome?)
    }

    /// Close the connection.
    ///
    /// Resolves `true` iff the closing handshake completed with code 1000, and also
    /// when there is nothing open to close. A pending reconnect is cancelled.
    pub async fn close(&self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Close(tx))?;
        let outcome = rx.await.map_err(|_e| WsError::ConnectionClosed)?;
        Ok(outcome?)
    }

    /// Send a text frame over the active connection.
    pub async fn send<S: Into<String>>(&self, text: S) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Send(text.into(), tx))?;
        rx.await.map_err(|_e| WsError::ConnectionClosed)??;
        Ok(())
    }

    /// Subscribe to incoming messages.
    ///
    /// The subscription survives reconnects and only sees messages that arrive
    /// after this call.
    pub fn on_message(&self) -> impl Stream<Item = Result<String>> + use<> {
        self.messages.subscribe()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Subscribe to lifecycle notifications, including the terminal
    /// [`Lifecycle::ReconnectExhausted`].
    #[must_use]
    pub fn lifecycle(&self) -> broadcast::Receiver<Lifecycle> {
        self.lifecycle_tx.subscribe()
    }

    fn request(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }
}

/// Transport currently owned by the controller, tagged with the id its messages
/// are published under.
struct Active<C: Connector> {
    source: u64,
    bus: EventBus<C::Transport>,
}

/// Why the controller is in [`ConnectionState::Closing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closing {
    /// Closing an established connection; clean iff the close code is 1000
    Established,
    /// Abandoning a handshake; any teardown counts as success
    Handshake,
}

/// Single owner of the connection state. Every transition happens in [`Controller::run`].
struct Controller<C: Connector> {
    config: Config,
    connector: C,
    backoff: LinearBackoff,
    state_tx: watch::Sender<ConnectionState>,
    lifecycle_tx: broadcast::Sender<Lifecycle>,
    broadcaster: MessageBroadcaster,
    active: Option<Active<C>>,
    next_source: u64,
    /// The current attempt belongs to a reconnect sequence
    retrying: bool,
    retry_at: Option<Instant>,
    handshake_deadline: Option<Instant>,
    closing: Option<Closing>,
    pending_connect: Vec<oneshot::Sender<Outcome>>,
    pending_close: Vec<oneshot::Sender<Outcome>>,
}

impl<C: Connector> Controller<C> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                // Requests first: a close queued behind a connect cancels it before it opens
                biased;

                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    // Every handle is gone
                    None => break,
                },
                (source, event) = next_event(&mut self.active) => self.on_event(source, event),
                () = wait_until(self.retry_at) => self.on_retry_due(),
                () = wait_until(self.handshake_deadline) => self.on_handshake_timeout(),
            }
        }

        self.discard_active();
        #[cfg(feature = "tracing")]
        tracing::debug!("Connection manager dropped, controller stopped");
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        #[cfg(feature = "tracing")]
        tracing::debug!(from = %self.state(), to = %state, "Connection state transition");
        self.state_tx.send_replace(state);
    }

    fn notify(&self, event: Lifecycle) {
        // Nobody listening is fine
        _ = self.lifecycle_tx.send(event);
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect(tx) => self.on_connect(tx),
            Command::Close(tx) => self.on_close(tx),
            Command::Send(text, tx) => {
                let connected = self.state().is_connected();
                let result = match &mut self.active {
                    Some(active) if connected => {
                        active.bus.send(text).map_err(WsError::Transport)
                    }
                    _ => Err(WsError::ConnectionClosed),
                };
                _ = tx.send(result);
            }
        }
    }

    fn on_connect(&mut self, tx: oneshot::Sender<Outcome>) {
        match self.state() {
            ConnectionState::Connected { .. } => {
                _ = tx.send(Ok(true));
            }
            ConnectionState::Disconnected | ConnectionState::Closed => {
                self.pending_connect.push(tx);
                self.retrying = false;
                self.start_attempt();
            }
            // Coalesce onto the attempt in flight; while closing, the request waits
            // and starts a fresh attempt once the close completes.
            ConnectionState::Connecting
            | ConnectionState::Reconnecting { .. }
            | ConnectionState::Closing => self.pending_connect.push(tx),
        }
    }

    fn on_close(&mut self, tx: oneshot::Sender<Outcome>) {
        match self.state() {
            ConnectionState::Disconnected | ConnectionState::Closed => {
                _ = tx.send(Ok(true));
            }
            ConnectionState::Closing => self.pending_close.push(tx),
            ConnectionState::Connected { .. } => {
                self.pending_close.push(tx);
                self.begin_close(Closing::Established);
            }
            ConnectionState::Connecting => {
                self.pending_close.push(tx);
                self.retrying = false;
                resolve(&mut self.pending_connect, &Ok(false));
                self.handshake_deadline = None;
                let started = self
                    .active
                    .as_ref()
                    .is_some_and(|active| active.bus.is_started());
                if started {
                    self.begin_close(Closing::Handshake);
                } else {
                    // The transport was never opened, there is nothing to tear down.
                    self.active = None;
                    self.finish_close(true);
                }
            }
            ConnectionState::Reconnecting { .. } => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Close requested while reconnecting, cancelling retry");
                self.retry_at = None;
                self.retrying = false;
                resolve(&mut self.pending_connect, &Ok(false));
                self.pending_close.push(tx);
                self.finish_close(true);
            }
        }
    }

    fn begin_close(&mut self, closing: Closing) {
        self.closing = Some(closing);
        self.set_state(ConnectionState::Closing);
        if let Some(active) = &mut self.active {
            active.bus.close();
        }
    }

    fn finish_close(&mut self, clean: bool) {
        self.closing = None;
        self.broadcaster.unbind();
        self.set_state(ConnectionState::Closed);
        self.notify(Lifecycle::Closed { clean });
        resolve(&mut self.pending_close, &Ok(clean));

        // connect() calls that arrived while closing
        if !self.pending_connect.is_empty() {
            self.retrying = false;
            self.start_attempt();
        }
    }

    fn start_attempt(&mut self) {
        let source = self.next_source;
        self.next_source = self.next_source.wrapping_add(1);

        let bus = EventBus::new(&self.connector, &self.config);
        self.active = Some(Active { source, bus });
        self.handshake_deadline = self
            .config
            .connect_timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));
        self.set_state(ConnectionState::Connecting);
    }

    fn on_event(&mut self, source: u64, event: Option<ConnectionEvent>) {
        let Some(event) = event else {
            // A finished bus is never polled again
            self.active = None;
            return;
        };

        match event {
            ConnectionEvent::Message(text) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(%text, "Received WebSocket text message");
                self.broadcaster.publish(source, text);
            }
            ConnectionEvent::Opened { status, message } => self.on_opened(source, status, message),
            ConnectionEvent::Failed(cause) => {
                self.active = None;
                self.on_terminated(WsError::Transport(cause), None);
            }
            ConnectionEvent::Closed {
                code,
                reason,
                remote,
            } => {
                self.active = None;
                let error = WsError::AbnormalClose {
                    code,
                    reason,
                    remote,
                };
                self.on_terminated(error, Some(code));
            }
        }
    }

    fn on_opened(&mut self, source: u64, status: u16, message: String) {
        match self.state() {
            ConnectionState::Connecting if status == SWITCHING_PROTOCOLS => {
                self.handshake_deadline = None;
                self.retrying = false;
                self.backoff.reset();
                self.broadcaster.bind(source);
                self.set_state(ConnectionState::Connected {
                    since: StdInstant::now(),
                });
                self.notify(Lifecycle::Connected);
                resolve(&mut self.pending_connect, &Ok(true));
            }
            ConnectionState::Connecting => {
                self.discard_active();
                self.on_attempt_failed(WsError::HandshakeRejected { status, message });
            }
            ConnectionState::Closing if status != SWITCHING_PROTOCOLS => {
                self.discard_active();
                self.finish_close(true);
            }
            // A successful handshake racing a close request; the close is already underway.
            _ => {}
        }
    }

    /// The active transport reported a terminal event. `close_code` is set for closes.
    fn on_terminated(&mut self, error: WsError, close_code: Option<u16>) {
        match self.state() {
            ConnectionState::Connecting => {
                self.handshake_deadline = None;
                self.on_attempt_failed(error);
            }
            ConnectionState::Connected { .. } => {
                self.broadcaster.unbind();
                if close_code == Some(NORMAL_CLOSURE) {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Peer closed the connection cleanly");
                    self.set_state(ConnectionState::Closed);
                    self.notify(Lifecycle::Closed { clean: true });
                } else {
                    self.on_connection_lost(error);
                }
            }
            ConnectionState::Closing => {
                let clean = match self.closing {
                    Some(Closing::Handshake) => true,
                    _ => close_code == Some(NORMAL_CLOSURE),
                };
                self.finish_close(clean);
            }
            ConnectionState::Disconnected
            | ConnectionState::Reconnecting { .. }
            | ConnectionState::Closed => {}
        }
    }

    fn on_connection_lost(&mut self, error: WsError) {
        if self.config.auto_reconnect {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %error, "Connection lost, reconnecting");
            self.backoff.reset();
            self.retrying = true;
            self.schedule_retry();
        } else {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %error, "Connection lost");
            self.set_state(ConnectionState::Closed);
            self.notify(Lifecycle::ConnectionLost(error));
        }
    }

    fn on_attempt_failed(&mut self, error: WsError) {
        if self.retrying {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                error = %error,
                attempt = self.backoff.attempt(),
                "Reconnection attempt failed"
            );
            self.schedule_retry();
        } else {
            self.set_state(ConnectionState::Closed);
            resolve(&mut self.pending_connect, &Err(error));
        }
    }

    fn schedule_retry(&mut self) {
        if let Some(delay) = self.backoff.next_backoff() {
            let attempt = self.backoff.attempt();
            #[cfg(feature = "tracing")]
            tracing::info!(attempt, ?delay, "Scheduling reconnection attempt");
            // A delay past the clock's range never fires; only close() ends the wait
            self.retry_at = Instant::now().checked_add(delay);
            self.set_state(ConnectionState::Reconnecting { attempt });
            self.notify(Lifecycle::Reconnecting { attempt, delay });
        } else {
            let attempts = self.backoff.attempt();
            #[cfg(feature = "tracing")]
            tracing::error!(attempts, "Reconnection attempts exhausted");
            self.retrying = false;
            self.set_state(ConnectionState::Closed);
            self.notify(Lifecycle::ReconnectExhausted);
            resolve(
                &mut self.pending_connect,
                &Err(WsError::ReconnectExhausted { attempts }),
            );
        }
    }

    fn on_retry_due(&mut self) {
        self.retry_at = None;
        if matches!(self.state(), ConnectionState::Reconnecting { .. }) {
            self.start_attempt();
        }
    }

    fn on_handshake_timeout(&mut self) {
        self.handshake_deadline = None;
        if self.state() == ConnectionState::Connecting {
            #[cfg(feature = "tracing")]
            tracing::warn!(timeout = ?self.config.connect_timeout, "Handshake timed out");
            self.discard_active();
            self.on_attempt_failed(WsError::Timeout);
        }
    }

    /// Drop the active transport, asking it to close first if it may still be live.
    fn discard_active(&mut self) {
        if let Some(mut active) = self.active.take()
            && active.bus.is_started()
            && !active.bus.is_terminated()
        {
            active.bus.close();
        }
    }
}

fn resolve(waiters: &mut Vec<oneshot::Sender<Outcome>>, outcome: &Outcome) {
    for tx in waiters.drain(..) {
        _ = tx.send(outcome.clone());
    }
}

async fn next_event<C: Connector>(
    active: &mut Option<Active<C>>,
) -> (u64, Option<ConnectionEvent>) {
    match active {
        Some(active) => (active.source, active.bus.next().await),
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
