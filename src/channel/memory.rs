//! In-process loopback channel.
//!
//! Holds a registry of reachable addresses and records every delivered
//! payload. Events are injected with [`MemoryChannel::emit`]. Used by the
//! test suites, and by the bridge's dry-run mode (`session.dry_run`) where
//! [`MemoryChannel::dry_run`] authorizes at once and accepts every address.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use super::{
    ChannelAddress, ChannelConnector, ChannelEvent, ChannelLink, ChannelPayload, ChannelTransport,
};

#[derive(Default)]
struct Shared {
    registered: Mutex<HashSet<String>>,
    delivered: Mutex<Vec<(ChannelAddress, ChannelPayload)>>,
    /// Event sender of the most recent open, tagged with its open number
    events_tx: Mutex<Option<(usize, mpsc::Sender<ChannelEvent>)>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    transport_calls: AtomicUsize,
    fail_open: AtomicBool,
    fail_delivery: AtomicBool,
    accept_all: AtomicBool,
    auto_authorize: AtomicBool,
    delivery_delay_ms: AtomicU64,
}

/// Loopback channel; clones share the same state
#[derive(Clone, Default)]
pub struct MemoryChannel {
    shared: Arc<Shared>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel for running the bridge without a gateway: every transport
    /// opened is authorized immediately and every address is reachable.
    pub fn dry_run() -> Self {
        let channel = Self::default();
        channel.shared.accept_all.store(true, Ordering::SeqCst);
        channel.shared.auto_authorize.store(true, Ordering::SeqCst);
        channel
    }

    /// Mark a canonical address as reachable
    pub fn register(&self, address: &str) {
        self.shared
            .registered
            .lock()
            .unwrap()
            .insert(address.to_string());
    }

    /// Make subsequent `open()` calls fail
    pub fn set_fail_open(&self, fail: bool) {
        self.shared.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent deliveries fail after the registration check
    pub fn set_fail_delivery(&self, fail: bool) {
        self.shared.fail_delivery.store(fail, Ordering::SeqCst);
    }

    /// Hold each delivery for `delay` before recording it
    pub fn set_delivery_delay(&self, delay: Duration) {
        self.shared
            .delivery_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Push an event to the currently open transport.
    ///
    /// Returns false when no transport is open or its receiver is gone.
    pub async fn emit(&self, event: ChannelEvent) -> bool {
        let sender = self.shared.events_tx.lock().unwrap().clone();
        match sender {
            Some((_, tx)) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    pub fn delivered(&self) -> Vec<(ChannelAddress, ChannelPayload)> {
        self.shared.delivered.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Registration checks plus deliveries made through any transport
    pub fn transport_calls(&self) -> usize {
        self.shared.transport_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelConnector for MemoryChannel {
    async fn open(&self) -> Result<ChannelLink> {
        if self.shared.fail_open.load(Ordering::SeqCst) {
            bail!("loopback channel refused to open");
        }
        let link_id = self.shared.opens.fetch_add(1, Ordering::SeqCst) + 1;

        let (tx, events) = mpsc::channel(64);
        if self.shared.auto_authorize.load(Ordering::SeqCst) {
            // Fresh channel with spare capacity; cannot be full
            let _ = tx.try_send(ChannelEvent::Authorized);
        }
        *self.shared.events_tx.lock().unwrap() = Some((link_id, tx));

        Ok(ChannelLink {
            transport: Box::new(MemoryTransport {
                shared: Arc::clone(&self.shared),
                link_id,
            }),
            events,
        })
    }
}

struct MemoryTransport {
    shared: Arc<Shared>,
    link_id: usize,
}

#[async_trait]
impl ChannelTransport for MemoryTransport {
    async fn is_registered(&self, address: &ChannelAddress) -> Result<bool> {
        self.shared.transport_calls.fetch_add(1, Ordering::SeqCst);
        if self.shared.accept_all.load(Ordering::SeqCst) {
            return Ok(true);
        }
        Ok(self
            .shared
            .registered
            .lock()
            .unwrap()
            .contains(address.as_str()))
    }

    async fn deliver(&self, address: &ChannelAddress, payload: ChannelPayload) -> Result<()> {
        self.shared.transport_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.shared.delivery_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.shared.fail_delivery.load(Ordering::SeqCst) {
            bail!("loopback delivery failed");
        }
        info!(recipient = %address, "Loopback channel recorded payload");
        self.shared
            .delivered
            .lock()
            .unwrap()
            .push((address.clone(), payload));
        Ok(())
    }

    async fn close(&self) {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        let mut events_tx = self.shared.events_tx.lock().unwrap();
        // A later open owns the feed now; leave it alone
        if matches!(*events_tx, Some((id, _)) if id == self.link_id) {
            events_tx.take();
        }
    }
}
