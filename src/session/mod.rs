// Messaging session lifecycle
//
// UNINITIALIZED --initialize--> AWAITING_AUTH --authorized--> READY
// AWAITING_AUTH --pairing code--> AWAITING_AUTH (artifact replaced)
// any live state --transport closed--> UNINITIALIZED (or TERMINATED after shutdown)
// any state --shutdown--> TERMINATED

use crate::channel::{
    ChannelAddress, ChannelConnector, ChannelEvent, ChannelPayload, ChannelTransport,
    InboundMessage,
};
use crate::config::SessionConfig;
use crate::error::RelayError;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Uninitialized,
    AwaitingAuth,
    Ready,
    Terminated,
}

/// Published view of the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Pairing code to show the operator; only set while AWAITING_AUTH
    pub pending_artifact: Option<String>,
}

impl SessionStatus {
    fn uninitialized() -> Self {
        Self {
            state: SessionState::Uninitialized,
            pending_artifact: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }
}

/// Receives each message the session's transport delivers.
///
/// Called from the session's receive loop, one message at a time; the
/// next message is not read until this returns.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, message: InboundMessage);
}

/// Mutable lifecycle bookkeeping, guarded by one async mutex
#[derive(Default)]
struct Lifecycle {
    transport: Option<Arc<dyn ChannelTransport>>,
    driver: Option<JoinHandle<()>>,
    pending_reinit: Option<JoinHandle<()>>,
    generation: u64,
}

/// Owns the messaging session and its transport handle.
///
/// Dependents never touch the transport; they go through the READY-gated
/// [`SessionManager::is_registered`] and [`SessionManager::deliver`].
pub struct SessionManager {
    config: SessionConfig,
    connector: Arc<dyn ChannelConnector>,
    inbound: Arc<dyn InboundHandler>,
    status_tx: watch::Sender<SessionStatus>,
    lifecycle: Mutex<Lifecycle>,
    /// Liveness flag; once set no timer may reopen the transport
    shutdown_requested: AtomicBool,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn ChannelConnector>,
        inbound: Arc<dyn InboundHandler>,
    ) -> Arc<Self> {
        let (status_tx, _) = watch::channel(SessionStatus::uninitialized());
        Arc::new(Self {
            config,
            connector,
            inbound,
            status_tx,
            lifecycle: Mutex::new(Lifecycle::default()),
            shutdown_requested: AtomicBool::new(false),
        })
    }

    /// Current state and pairing artifact
    pub fn status(&self) -> SessionStatus {
        self.status_tx.borrow().clone()
    }

    /// Watch status transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    pub fn address_suffix(&self) -> &str {
        &self.config.address_suffix
    }

    /// Open the transport and start the receive loop.
    ///
    /// No-op while a session is already starting or live. Failures are
    /// returned as `TRANSPORT_UNAVAILABLE` and leave the session
    /// UNINITIALIZED; retrying is up to the caller.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), RelayError> {
        {
            let _lifecycle = self.lifecycle.lock().await;
            match self.status().state {
                SessionState::Uninitialized => {}
                SessionState::Terminated => {
                    return Err(RelayError::TransportUnavailable(
                        "session has been shut down".to_string(),
                    ));
                }
                state => {
                    debug!(state = ?state, "Session already initializing or live");
                    return Ok(());
                }
            }
            self.set_status(SessionState::AwaitingAuth, None);
        }

        info!("Opening messaging channel");
        let link = match self.connector.open().await {
            Ok(link) => link,
            Err(e) => {
                let _lifecycle = self.lifecycle.lock().await;
                if !self.is_shutdown() {
                    self.set_status(SessionState::Uninitialized, None);
                }
                warn!(error = %e, "Failed to open messaging channel");
                return Err(RelayError::TransportUnavailable(e.to_string()));
            }
        };

        let transport: Arc<dyn ChannelTransport> = Arc::from(link.transport);
        let mut lifecycle = self.lifecycle.lock().await;
        if self.is_shutdown() {
            drop(lifecycle);
            transport.close().await;
            return Err(RelayError::TransportUnavailable(
                "session shut down during initialization".to_string(),
            ));
        }

        lifecycle.generation += 1;
        let generation = lifecycle.generation;
        lifecycle.transport = Some(transport);
        lifecycle.driver = Some(tokio::spawn(Arc::clone(self).drive(link.events, generation)));

        info!(generation = generation, "Messaging channel open, awaiting authorization");
        Ok(())
    }

    /// Terminate the session: cancel timers, stop the receive loop,
    /// release the transport. Idempotent.
    pub async fn shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);

        let transport = {
            let mut lifecycle = self.lifecycle.lock().await;
            if let Some(timer) = lifecycle.pending_reinit.take() {
                timer.abort();
            }
            if let Some(driver) = lifecycle.driver.take() {
                driver.abort();
            }
            self.set_status(SessionState::Terminated, None);
            lifecycle.transport.take()
        };

        if let Some(transport) = transport {
            transport.close().await;
            info!("Messaging transport released");
        }
        info!("Session terminated");
    }

    /// READY-gated registration check
    pub async fn is_registered(&self, address: &ChannelAddress) -> Result<bool, RelayError> {
        let transport = self.ready_transport().await?;
        transport
            .is_registered(address)
            .await
            .map_err(|e| RelayError::TransportUnavailable(e.to_string()))
    }

    /// READY-gated delivery of a complete payload
    pub async fn deliver(
        &self,
        address: &ChannelAddress,
        payload: ChannelPayload,
    ) -> Result<(), RelayError> {
        let transport = self.ready_transport().await?;
        transport
            .deliver(address, payload)
            .await
            .map_err(|e| RelayError::TransportUnavailable(e.to_string()))
    }

    async fn ready_transport(&self) -> Result<Arc<dyn ChannelTransport>, RelayError> {
        if !self.status().is_ready() {
            return Err(RelayError::NotReady);
        }
        let lifecycle = self.lifecycle.lock().await;
        lifecycle.transport.clone().ok_or(RelayError::NotReady)
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    fn set_status(&self, state: SessionState, pending_artifact: Option<String>) {
        self.status_tx.send_replace(SessionStatus {
            state,
            pending_artifact,
        });
    }

    /// Receive loop for one transport generation
    fn drive(
        self: Arc<Self>,
        mut events: mpsc::Receiver<ChannelEvent>,
        generation: u64,
    ) -> BoxFuture<'static, ()> {
        async move {
            let reason = loop {
                match events.recv().await {
                    Some(ChannelEvent::Pairing { code }) => self.on_pairing(code),
                    Some(ChannelEvent::Authorized) => self.on_authorized(),
                    Some(ChannelEvent::Message(message)) => {
                        debug!(from = %message.from, "Inbound message received");
                        self.inbound.handle(message).await;
                    }
                    Some(ChannelEvent::Closed { reason }) => break reason,
                    None => break None,
                }
            };
            self.on_transport_closed(generation, reason).await;
        }
        .boxed()
    }

    fn on_pairing(&self, code: String) {
        let published = self.status_tx.send_if_modified(|status| {
            if status.state != SessionState::AwaitingAuth {
                return false;
            }
            status.pending_artifact = Some(code);
            true
        });
        if published {
            info!("Pairing code published; waiting for operator to link the device");
        } else {
            debug!("Ignoring pairing code outside AWAITING_AUTH");
        }
    }

    fn on_authorized(&self) {
        let authorized = self.status_tx.send_if_modified(|status| {
            if status.state != SessionState::AwaitingAuth {
                return false;
            }
            *status = SessionStatus {
                state: SessionState::Ready,
                pending_artifact: None,
            };
            true
        });
        if authorized {
            info!("Messaging session ready");
        }
    }

    async fn on_transport_closed(self: &Arc<Self>, generation: u64, reason: Option<String>) {
        let transport = {
            let mut lifecycle = self.lifecycle.lock().await;
            if lifecycle.generation != generation || self.is_shutdown() {
                return;
            }
            lifecycle.driver = None;

            let lost = RelayError::ConnectionLost(
                reason.unwrap_or_else(|| "transport closed".to_string()),
            );
            warn!(error = %lost, "Messaging session lost");
            self.set_status(SessionState::Uninitialized, None);

            if self.config.auto_reinitialize {
                lifecycle.pending_reinit = Some(self.schedule_reinitialize());
            } else {
                info!("Auto-reinitialize disabled; session needs a manual initialize");
            }
            lifecycle.transport.take()
        };

        if let Some(transport) = transport {
            transport.close().await;
        }
    }

    fn schedule_reinitialize(self: &Arc<Self>) -> JoinHandle<()> {
        let delay = self.config.reinitialize_delay();
        let manager = Arc::clone(self);
        info!(delay_ms = delay.as_millis() as u64, "Scheduling session reinitialize");

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if manager.is_shutdown() {
                return;
            }
            manager.lifecycle.lock().await.pending_reinit = None;
            if let Err(e) = manager.initialize().await {
                warn!(error = %e, "Scheduled reinitialize failed");
            }
        })
    }
}
