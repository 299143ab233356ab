use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::error::WsError;
use crate::Result;

/// Broadcast channel capacity for incoming messages.
pub const BROADCAST_CAPACITY: usize = 1024;

/// Fans incoming text messages out to every live subscriber.
///
/// Lives as long as the connection manager. Subscribers attach once through a
/// [`MessageFeed`] and keep receiving across reconnects; only the upstream source
/// changes. A message is published only if it comes from the bound source, so a
/// discarded transport can never leak into the stream.
#[derive(Debug)]
pub struct MessageBroadcaster {
    tx: broadcast::Sender<String>,
    source: Option<u64>,
}

impl MessageBroadcaster {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, source: None }
    }

    /// Route messages from `source` to subscribers, replacing any previous source.
    pub fn bind(&mut self, source: u64) {
        self.source = Some(source);
    }

    pub fn unbind(&mut self) {
        self.source = None;
    }

    #[must_use]
    pub const fn bound_source(&self) -> Option<u64> {
        self.source
    }

    /// Deliver `text` if it came from the bound source. Returns whether it was accepted.
    pub fn publish(&self, source: u64, text: String) -> bool {
        if self.source != Some(source) {
            return false;
        }
        // No subscribers is fine, the message simply has nobody to go to.
        _ = self.tx.send(text);
        true
    }

    /// Read-only handle for subscribers.
    #[must_use]
    pub fn feed(&self) -> MessageFeed {
        MessageFeed {
            tx: self.tx.clone(),
        }
    }
}

impl Default for MessageBroadcaster {
    fn default() -> Self {
        Self::new(BROADCAST_CAPACITY)
    }
}

/// Subscription side of a [`MessageBroadcaster`].
#[derive(Debug, Clone)]
pub struct MessageFeed {
    tx: broadcast::Sender<String>,
}

impl MessageFeed {
    /// Live messages from now on; nothing delivered earlier is replayed.
    ///
    /// The subscription is registered when this is called, not when the stream is
    /// first polled. A subscriber that falls more than the channel capacity behind
    /// gets a [`WsError::Lagged`] item and then continues with the oldest retained
    /// message.
    pub fn subscribe(&self) -> impl Stream<Item = Result<String>> + use<> {
        let mut rx = self.tx.subscribe();

        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(text) => yield Ok(text),
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Subscription lagged, missed {n} messages");
                        yield Err(WsError::Lagged { count: n }.into());
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Number of currently attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
