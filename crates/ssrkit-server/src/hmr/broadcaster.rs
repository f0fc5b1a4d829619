use ssrkit_common::HmrConfig;
use ssrkit_metrics::RenderMetricsCollector;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::hmr::session::HmrSession;
use crate::hmr::throttle::{Throttle, ThrottleState};

/// Configuration for the broadcaster
#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    /// Quiet period before a published event is delivered
    pub throttle: Duration,
    /// Messages a subscriber may have queued before new ones are dropped
    pub inbox_capacity: usize,
    /// Idle time after which a session yields a heartbeat
    pub heartbeat: Duration,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(300),
            inbox_capacity: 5,
            heartbeat: Duration::from_secs(30),
        }
    }
}

impl From<&HmrConfig> for BroadcasterConfig {
    fn from(config: &HmrConfig) -> Self {
        Self {
            throttle: config.throttle(),
            inbox_capacity: config.inbox_capacity.max(1),
            heartbeat: config.heartbeat(),
        }
    }
}

struct ThrottleSlot {
    throttle: Throttle,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    config: BroadcasterConfig,
    subscribers: RwLock<HashMap<String, mpsc::Sender<String>>>,
    throttle: Mutex<ThrottleSlot>,
    next_client: AtomicU64,
    metrics: Option<Arc<RenderMetricsCollector>>,
}

impl Inner {
    fn fire(&self, epoch: u64) {
        let event = {
            let mut slot = self.throttle.lock().unwrap_or_else(|e| e.into_inner());
            let event = slot.throttle.fire(epoch);
            if event.is_some() {
                slot.timer = None;
            }
            event
        };
        if let Some(event) = event {
            self.deliver(&event);
        }
    }

    /// Non-blocking fan-out. A full inbox loses this message only; a closed
    /// one is unsubscribed.
    fn deliver(&self, event: &str) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
            for (client_id, inbox) in subscribers.iter() {
                match inbox.try_send(event.to_string()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!("Inbox of {} is full, dropping '{}'", client_id, event);
                    }
                    Err(TrySendError::Closed(_)) => closed.push(client_id.clone()),
                }
            }
        }
        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
            for client_id in closed {
                subscribers.remove(&client_id);
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_hmr_event();
        }
        tracing::debug!("Delivered '{}' to {} subscribers", event, delivered);
        delivered
    }
}

/// Fans live-reload events out to connected browsers.
///
/// Cloning is cheap; all clones share subscribers and throttle state.
#[derive(Clone)]
pub struct EventBroadcaster {
    inner: Arc<Inner>,
}

impl EventBroadcaster {
    pub fn new(config: BroadcasterConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_metrics(config: BroadcasterConfig, metrics: Arc<RenderMetricsCollector>) -> Self {
        Self::build(config, Some(metrics))
    }

    fn build(config: BroadcasterConfig, metrics: Option<Arc<RenderMetricsCollector>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                subscribers: RwLock::new(HashMap::new()),
                throttle: Mutex::new(ThrottleSlot {
                    throttle: Throttle::new(),
                    timer: None,
                }),
                next_client: AtomicU64::new(1),
                metrics,
            }),
        }
    }

    pub fn config(&self) -> &BroadcasterConfig {
        &self.inner.config
    }

    /// Unique id for a new connection.
    pub fn next_client_id(&self) -> String {
        format!("hmr-client-{}", self.inner.next_client.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers `client_id` with a fresh bounded inbox. An existing
    /// subscriber with the same id is replaced and its inbox closed.
    pub fn subscribe(&self, client_id: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(self.inner.config.inbox_capacity);
        let mut subscribers = self.inner.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subscribers.insert(client_id.to_string(), tx);
        tracing::debug!("{} subscribed ({} total)", client_id, subscribers.len());
        rx
    }

    pub fn unsubscribe(&self, client_id: &str) {
        let mut subscribers = self.inner.subscribers.write().unwrap_or_else(|e| e.into_inner());
        if subscribers.remove(client_id).is_some() {
            tracing::debug!("{} unsubscribed ({} remaining)", client_id, subscribers.len());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Subscribes a new client and wraps its inbox in a session.
    pub fn session(&self) -> HmrSession {
        let client_id = self.next_client_id();
        let inbox = self.subscribe(&client_id);
        HmrSession::new(client_id, inbox, self.clone(), self.inner.config.heartbeat)
    }

    pub fn throttle_state(&self) -> ThrottleState {
        self.inner.throttle.lock().unwrap_or_else(|e| e.into_inner()).throttle.state()
    }

    /// Publishes `event` through the throttle.
    ///
    /// Delivery is trailing-edge only: each call restarts the quiet window
    /// and the latest event is delivered once when it closes. A lone event
    /// is also held back for the full window; nothing fires on the leading
    /// edge. Outside a tokio runtime, or with a zero window, the event is
    /// delivered immediately.
    pub fn publish(&self, event: impl Into<String>) {
        let event = event.into();
        let window = self.inner.config.throttle;

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) if !window.is_zero() => handle,
            _ => {
                self.inner.deliver(&event);
                return;
            }
        };

        let mut slot = self.inner.throttle.lock().unwrap_or_else(|e| e.into_inner());
        let epoch = slot.throttle.arm(event);
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        let inner = Arc::clone(&self.inner);
        slot.timer = Some(runtime.spawn(async move {
            tokio::time::sleep(window).await;
            inner.fire(epoch);
        }));
    }

    /// Delivers `event` right away, bypassing the throttle.
    pub fn publish_now(&self, event: &str) -> usize {
        self.inner.deliver(event)
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(BroadcasterConfig::default())
    }
}
