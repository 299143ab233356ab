//! Default [`Transport`] over `tokio-tungstenite`.
//!
//! Pure plumbing: every socket outcome becomes a [`ConnectionEvent`](super::ConnectionEvent)
//! and the connection manager decides what it means.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{
    HeaderName, HeaderValue, SEC_WEBSOCKET_PROTOCOL,
};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};

use super::config::Config;
use super::error::TransportError;
use super::event_bus::{EventSink, NORMAL_CLOSURE};
use super::traits::{Connector, Transport};

/// Close code reported when the peer's close frame carried no status.
const NO_STATUS_RECEIVED: u16 = 1005;

/// Creates a [`TungsteniteTransport`] per connection attempt.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    type Transport = TungsteniteTransport;

    fn create(&self, config: &Config, events: EventSink) -> TungsteniteTransport {
        TungsteniteTransport {
            config: config.clone(),
            events,
            outgoing: None,
            task: None,
            open: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[derive(Debug)]
enum Outgoing {
    Text(String),
    Close,
}

/// One `tokio-tungstenite` connection, driven by its own task once opened.
pub struct TungsteniteTransport {
    config: Config,
    events: EventSink,
    outgoing: Option<mpsc::UnboundedSender<Outgoing>>,
    task: Option<JoinHandle<()>>,
    open: Arc<AtomicBool>,
}

impl Transport for TungsteniteTransport {
    fn open(&mut self) {
        if self.task.is_some() {
            return;
        }

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        self.outgoing = Some(outgoing_tx);

        let request = build_request(&self.config);
        let events = self.events.clone();
        let open = Arc::clone(&self.open);
        self.task = Some(tokio::spawn(async move {
            match request {
                Ok(request) => run_socket(request, outgoing_rx, events, &open).await,
                Err(e) => events.on_error(e),
            }
            open.store(false, Ordering::Release);
        }));
    }

    fn close(&mut self) {
        match &self.outgoing {
            // A finished socket task has already reported its terminal event.
            Some(outgoing) => {
                _ = outgoing.send(Outgoing::Close);
            }
            // Never opened: nothing on the wire to shut down.
            None => self.events.on_close(NORMAL_CLOSURE, "", false),
        }
    }

    fn send(&mut self, text: String) -> Result<(), TransportError> {
        let outgoing = self
            .outgoing
            .as_ref()
            .ok_or_else(|| TransportError::msg("socket is not open"))?;
        outgoing
            .send(Outgoing::Text(text))
            .map_err(|_e| TransportError::msg("socket task has stopped"))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl Drop for TungsteniteTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn build_request(config: &Config) -> Result<Request, TransportError> {
    let mut request = config
        .server_uri
        .as_str()
        .into_client_request()
        .map_err(TransportError::new)?;
    let headers = request.headers_mut();

    if let Some(draft) = &config.protocol_draft {
        let value = HeaderValue::from_str(draft).map_err(TransportError::new)?;
        headers.insert(SEC_WEBSOCKET_PROTOCOL, value);
    }
    for (name, value) in &config.http_headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(TransportError::new)?;
        let value = HeaderValue::from_str(value).map_err(TransportError::new)?;
        headers.insert(name, value);
    }

    Ok(request)
}

async fn run_socket(
    request: Request,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: EventSink,
    open: &AtomicBool,
) {
    let (ws_stream, response) = match connect_async(request).await {
        Ok(connected) => connected,
        Err(tungstenite::Error::Http(response)) => {
            let status = response.status();
            events.on_open(status.as_u16(), status.canonical_reason().unwrap_or_default());
            return;
        }
        Err(e) => {
            events.on_error(TransportError::new(e));
            return;
        }
    };

    open.store(true, Ordering::Release);
    let status = response.status();
    events.on_open(status.as_u16(), status.canonical_reason().unwrap_or_default());

    let (mut write, mut read) = ws_stream.split();
    let mut closing = false;

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(text = text.as_str(), "Received WebSocket text frame");
                    events.on_message(text.as_str());
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame.map_or((NO_STATUS_RECEIVED, String::new()), |frame| {
                        (u16::from(frame.code), frame.reason.as_str().to_owned())
                    });
                    // Flush the close reply tungstenite queued for a peer-initiated close
                    _ = write.close().await;
                    events.on_close(code, reason, !closing);
                    return;
                }
                Some(Ok(_)) => {
                    // Binary frames and control frames carry nothing for subscribers.
                }
                Some(Err(e)) => {
                    events.on_error(TransportError::new(e));
                    return;
                }
                None => {
                    events.on_error(TransportError::msg("connection ended without a close frame"));
                    return;
                }
            },

            Some(command) = outgoing.recv() => {
                let message = match command {
                    Outgoing::Text(text) => Message::Text(text.into()),
                    Outgoing::Close if closing => continue,
                    Outgoing::Close => {
                        closing = true;
                        Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "".into(),
                        }))
                    }
                };
                if let Err(e) = write.send(message).await {
                    events.on_error(TransportError::new(e));
                    return;
                }
            }
        }
    }
}
