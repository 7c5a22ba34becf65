//! Long-lived stream connection with fixed-delay reconnect.
//!
//! One task owns the socket and the view. The connection is an explicit
//! state machine:
//!
//! ```text
//! Connecting --ok--> Open --close/error--> Backoff(D) --elapsed--> Connecting
//! Connecting --error--> Backoff(D)
//! ```
//!
//! Each close or error schedules exactly one reconnect; there is no cap and
//! no escalation. Pending reconnect and expiry timers live inside the task
//! and are dropped with it on shutdown.

use super::event::parse_event;
use super::view::DashboardView;
use crate::backend::BackendClient;
use crate::config::StreamConfig;
use crate::error::RelayError;
use anyhow::{anyhow, Context, Result};
use futures::future::{BoxFuture, FutureExt};
use futures::StreamExt;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant, Sleep};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Builder for a stream consumer
pub struct StreamConsumer {
    config: StreamConfig,
    bootstrap: Option<BackendClient>,
}

impl StreamConsumer {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            bootstrap: None,
        }
    }

    /// Fetch a stats snapshot from the backend before the first connect
    pub fn with_bootstrap(mut self, backend: BackendClient) -> Self {
        self.bootstrap = Some(backend);
        self
    }

    /// Start consuming `address`; returns immediately.
    pub fn connect(self, address: impl Into<String>) -> StreamHandle {
        let (view_tx, view_rx) = watch::channel(DashboardView::new(self.config.alert_capacity));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let alive = Arc::new(AtomicBool::new(true));

        let consumer = ConsumerLoop {
            config: self.config,
            address: address.into(),
            view_tx,
            alive: Arc::clone(&alive),
            expiries: VecDeque::new(),
        };
        let task = tokio::spawn(consumer.run(self.bootstrap, shutdown_rx));

        StreamHandle {
            view_rx,
            alive,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Read side of a running consumer
pub struct StreamHandle {
    view_rx: watch::Receiver<DashboardView>,
    alive: Arc<AtomicBool>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle {
    /// Snapshot of the current view
    pub fn view(&self) -> DashboardView {
        self.view_rx.borrow().clone()
    }

    pub fn connected(&self) -> bool {
        self.view_rx.borrow().connected
    }

    /// Receiver notified on every view change
    pub fn subscribe(&self) -> watch::Receiver<DashboardView> {
        self.view_rx.clone()
    }

    /// Stop the consumer; no timer fires afterwards. Idempotent.
    pub async fn shutdown(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Stream consumer task ended abnormally");
            }
        }
        info!("Stream consumer stopped");
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Connection state owned by the consumer task
enum Link {
    Connecting(BoxFuture<'static, Result<WsStream>>),
    Open(Box<WsStream>),
    /// Pending reconnect
    Backoff(Pin<Box<Sleep>>),
}

enum Step {
    Opened(WsStream),
    Text(String),
    Ignored,
    Lost(String),
    RetryDue,
}

impl Link {
    async fn next(&mut self) -> Step {
        match self {
            Link::Connecting(connecting) => match connecting.await {
                Ok(ws) => Step::Opened(ws),
                Err(e) => Step::Lost(format!("{:#}", e)),
            },
            Link::Open(ws) => match ws.next().await {
                Some(Ok(Message::Text(text))) => Step::Text(text.as_str().to_string()),
                Some(Ok(Message::Close(frame))) => Step::Lost(
                    frame
                        .map(|f| format!("closed by server: {}", f.reason.as_str()))
                        .unwrap_or_else(|| "closed by server".to_string()),
                ),
                Some(Ok(_)) => Step::Ignored,
                Some(Err(e)) => Step::Lost(e.to_string()),
                None => Step::Lost("stream ended".to_string()),
            },
            Link::Backoff(delay) => {
                delay.as_mut().await;
                Step::RetryDue
            }
        }
    }
}

pub(crate) struct ConsumerLoop {
    pub(crate) config: StreamConfig,
    pub(crate) address: String,
    pub(crate) view_tx: watch::Sender<DashboardView>,
    /// Liveness flag checked when a reconnect timer fires
    pub(crate) alive: Arc<AtomicBool>,
    /// (deadline, alert seq), deadlines non-decreasing
    pub(crate) expiries: VecDeque<(Instant, u64)>,
}

impl ConsumerLoop {
    async fn run(
        mut self,
        bootstrap: Option<BackendClient>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        if let Some(backend) = bootstrap {
            tokio::select! {
                _ = &mut shutdown_rx => return,
                _ = self.bootstrap_stats(&backend) => {}
            }
        }

        info!(url = %self.address, "Connecting to event stream");
        let mut link = Link::Connecting(self.dial());

        loop {
            let next_expiry = self.expiries.front().map(|(deadline, _)| *deadline);
            let expiry_due = async move {
                match next_expiry {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            let step = tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = expiry_due => {
                    self.expire_due(Instant::now());
                    continue;
                }
                step = link.next() => step,
            };

            match step {
                Step::Opened(ws) => {
                    info!(url = %self.address, "Event stream connected");
                    self.set_connected(true);
                    link = Link::Open(Box::new(ws));
                }
                Step::Text(text) => self.on_text(&text),
                Step::Ignored => {}
                Step::Lost(reason) => {
                    self.set_connected(false);
                    let delay = self.config.reconnect_delay();
                    warn!(
                        error = %RelayError::ConnectionLost(reason),
                        retry_in_ms = delay.as_millis() as u64,
                        "Event stream unavailable"
                    );
                    link = Link::Backoff(Box::pin(sleep(delay)));
                }
                Step::RetryDue => {
                    if !self.alive.load(Ordering::SeqCst) {
                        break;
                    }
                    debug!(url = %self.address, "Reconnecting to event stream");
                    link = Link::Connecting(self.dial());
                }
            }
        }

        self.set_connected(false);
        debug!("Event stream loop exited");
    }

    fn dial(&self) -> BoxFuture<'static, Result<WsStream>> {
        let url = self.address.clone();
        let timeout = self.config.connect_timeout();
        async move {
            let (ws, _) = tokio::time::timeout(timeout, connect_async(url.as_str()))
                .await
                .map_err(|_| anyhow!("timed out connecting to {}", url))?
                .with_context(|| format!("failed to connect to {}", url))?;
            Ok(ws)
        }
        .boxed()
    }

    async fn bootstrap_stats(&self, backend: &BackendClient) {
        match tokio::time::timeout(self.config.connect_timeout(), backend.fetch_stats()).await {
            Ok(Ok(stats)) => {
                info!(keys = stats.len(), "Loaded bootstrap stats");
                self.view_tx.send_modify(|view| view.stats = Some(stats));
            }
            Ok(Err(e)) => {
                let detail = format!("{:#}", e);
                warn!(error = %detail, "Bootstrap stats unavailable");
            }
            Err(_) => warn!("Bootstrap stats request timed out"),
        }
    }

    /// Parse and apply one raw payload. Bad payloads are dropped.
    pub(crate) fn on_text(&mut self, raw: &str) {
        let event = match parse_event(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping stream payload");
                return;
            }
        };

        let kind = event.kind();
        let mut alert_seq = None;
        self.view_tx.send_modify(|view| alert_seq = view.apply(event));
        debug!(kind = kind, "Stream event applied");

        if let (Some(seq), Some(expiry)) = (alert_seq, self.config.alert_expiry()) {
            self.expiries.push_back((Instant::now() + expiry, seq));
        }
    }

    /// Expire every alert whose deadline is at or before `now`
    pub(crate) fn expire_due(&mut self, now: Instant) {
        while let Some(&(deadline, seq)) = self.expiries.front() {
            if deadline > now {
                break;
            }
            self.expiries.pop_front();
            self.view_tx.send_if_modified(|view| view.alerts.expire(seq));
        }
    }

    fn set_connected(&self, connected: bool) {
        self.view_tx.send_if_modified(|view| {
            if view.connected == connected {
                return false;
            }
            view.connected = connected;
            true
        });
    }
}
