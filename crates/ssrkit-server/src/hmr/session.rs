use futures_util::stream::{self, Stream};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::hmr::broadcaster::EventBroadcaster;

/// One message on a live-reload connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HmrMessage {
    Connect,
    Event(String),
    Heartbeat,
}

impl HmrMessage {
    pub fn event_name(&self) -> &str {
        match self {
            HmrMessage::Connect => "connect",
            HmrMessage::Event(_) => "hmr",
            HmrMessage::Heartbeat => "ping",
        }
    }

    pub fn data(&self) -> &str {
        match self {
            HmrMessage::Connect => "connected",
            HmrMessage::Event(payload) => payload,
            HmrMessage::Heartbeat => "ping",
        }
    }

    /// Server-sent-events framing. Multi-line data is split into one
    /// `data:` line per line.
    pub fn to_sse(&self) -> String {
        let mut frame = format!("event: {}\n", self.event_name());
        let data = self.data();
        if data.is_empty() {
            frame.push_str("data: \n");
        }
        for line in data.lines() {
            frame.push_str("data: ");
            frame.push_str(line);
            frame.push('\n');
        }
        frame.push('\n');
        frame
    }
}

/// A subscribed live-reload client.
///
/// Yields `Connect` first, then one `Event` per inbox message, or a
/// `Heartbeat` whenever the inbox stays quiet for the heartbeat interval.
/// Dropping the session unsubscribes the client.
pub struct HmrSession {
    client_id: String,
    inbox: mpsc::Receiver<String>,
    broadcaster: EventBroadcaster,
    heartbeat: Duration,
    connected: bool,
}

impl HmrSession {
    pub(crate) fn new(
        client_id: String,
        inbox: mpsc::Receiver<String>,
        broadcaster: EventBroadcaster,
        heartbeat: Duration,
    ) -> Self {
        Self {
            client_id,
            inbox,
            broadcaster,
            heartbeat,
            connected: false,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Next message, or `None` once the inbox is closed.
    pub async fn next_message(&mut self) -> Option<HmrMessage> {
        if !self.connected {
            self.connected = true;
            return Some(HmrMessage::Connect);
        }

        match tokio::time::timeout(self.heartbeat, self.inbox.recv()).await {
            Ok(Some(payload)) => Some(HmrMessage::Event(payload)),
            Ok(None) => None,
            Err(_) => Some(HmrMessage::Heartbeat),
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = HmrMessage> + Send {
        stream::unfold(self, |mut session| async move {
            let message = session.next_message().await?;
            Some((message, session))
        })
    }
}

impl Drop for HmrSession {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(&self.client_id);
    }
}
