#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use resilient_ws::ws::config::Config;
use resilient_ws::ws::{
    ConnectionManager, ConnectionState, Connector, EventSink, Lifecycle, Transport, TransportError,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, timeout};

pub const URI: &str = "ws://h/p";

/// What a mock transport does when opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnOpen {
    /// Report `Opened(101, "OK")`
    Accept,
    /// Report `Opened(status, "Rejected")`
    Reject(u16),
    /// Report `Failed`
    Fail,
    /// Report nothing; the test drives the handshake through the handle
    Manual,
}

/// Test-side view of one transport the manager created.
#[derive(Clone)]
pub struct MockHandle {
    pub index: usize,
    sink: EventSink,
    opened_at: Arc<Mutex<Option<Instant>>>,
    closes: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl MockHandle {
    pub fn accept(&self) {
        self.sink.on_open(101, "OK");
    }

    pub fn message(&self, text: &str) {
        self.sink.on_message(text);
    }

    pub fn fail(&self, cause: &str) {
        self.sink.on_error(TransportError::msg(cause));
    }

    pub fn remote_close(&self, code: u16, reason: &str) {
        self.sink.on_close(code, reason, true);
    }

    pub fn opened_at(&self) -> Option<Instant> {
        *self.opened_at.lock().unwrap()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Whether the manager has discarded this transport.
    pub fn is_discarded(&self) -> bool {
        self.sink.is_detached()
    }
}

struct Shared {
    script: Box<dyn Fn(usize) -> OnOpen + Send + Sync>,
    /// Close code reported after `close()`; `None` leaves the close to the test
    close_code: Mutex<Option<u16>>,
    created: Mutex<Vec<MockHandle>>,
    opened_tx: mpsc::UnboundedSender<MockHandle>,
    opened_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockHandle>>,
}

/// Scripted [`Connector`]: the n-th transport created behaves as `script(n)`.
#[derive(Clone)]
pub struct MockConnector {
    shared: Arc<Shared>,
}

impl MockConnector {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(usize) -> OnOpen + Send + Sync + 'static,
    {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                script: Box::new(script),
                close_code: Mutex::new(Some(1000)),
                created: Mutex::new(Vec::new()),
                opened_tx,
                opened_rx: tokio::sync::Mutex::new(opened_rx),
            }),
        }
    }

    /// Every transport behaves the same way.
    pub fn always(on_open: OnOpen) -> Self {
        Self::new(move |_| on_open)
    }

    /// Close code every transport reports once asked to close.
    pub fn with_close_code(self, code: Option<u16>) -> Self {
        *self.shared.close_code.lock().unwrap() = code;
        self
    }

    /// Number of transports created so far.
    pub fn created(&self) -> usize {
        self.shared.created.lock().unwrap().len()
    }

    pub fn transport(&self, index: usize) -> MockHandle {
        self.shared.created.lock().unwrap()[index].clone()
    }

    /// Wait for the next transport to be opened.
    pub async fn opened(&self) -> MockHandle {
        let mut rx = self.shared.opened_rx.lock().await;
        timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("no transport was opened")
            .unwrap()
    }
}

pub struct MockTransport {
    handle: MockHandle,
    on_open: OnOpen,
    shared: Arc<Shared>,
}

impl Transport for MockTransport {
    fn open(&mut self) {
        *self.handle.opened_at.lock().unwrap() = Some(Instant::now());
        match self.on_open {
            OnOpen::Accept => self.handle.accept(),
            OnOpen::Reject(status) => self.handle.sink.on_open(status, "Rejected"),
            OnOpen::Fail => self.handle.fail("connection refused"),
            OnOpen::Manual => {}
        }
        drop(self.shared.opened_tx.send(self.handle.clone()));
    }

    fn close(&mut self) {
        self.handle.closes.fetch_add(1, Ordering::SeqCst);
        if let Some(code) = *self.shared.close_code.lock().unwrap() {
            self.handle.sink.on_close(code, "bye", false);
        }
    }

    fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.handle.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.handle.opened_at().is_some() && !self.handle.is_discarded()
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    fn create(&self, _config: &Config, events: EventSink) -> MockTransport {
        let mut created = self.shared.created.lock().unwrap();
        let index = created.len();
        let handle = MockHandle {
            index,
            sink: events,
            opened_at: Arc::new(Mutex::new(None)),
            closes: Arc::new(AtomicUsize::new(0)),
            sent: Arc::new(Mutex::new(Vec::new())),
        };
        created.push(handle.clone());

        MockTransport {
            handle,
            on_open: (self.shared.script)(index),
            shared: Arc::clone(&self.shared),
        }
    }
}

pub fn config(auto_reconnect: bool) -> Config {
    let mut config = Config::from_uri(URI).unwrap();
    config.auto_reconnect = auto_reconnect;
    config
}

pub fn manager(config: Config, connector: &MockConnector) -> ConnectionManager {
    ConnectionManager::new(config, connector.clone()).unwrap()
}

/// Wait until the manager reports a state matching `predicate`.
pub async fn wait_for_state<F>(rx: &mut watch::Receiver<ConnectionState>, predicate: F)
where
    F: FnMut(&ConnectionState) -> bool,
{
    timeout(Duration::from_secs(30), rx.wait_for(predicate))
        .await
        .expect("state was not reached in time")
        .unwrap();
}

/// Next lifecycle notification matching `predicate`, skipping the rest.
pub async fn next_lifecycle<F>(rx: &mut broadcast::Receiver<Lifecycle>, mut predicate: F) -> Lifecycle
where
    F: FnMut(&Lifecycle) -> bool,
{
    timeout(Duration::from_secs(30), async {
        loop {
            let event = rx.recv().await.unwrap();
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("lifecycle notification was not published in time")
}
