// Messaging channel abstraction
//
// A connector opens exactly one transport per call. The transport carries
// outbound calls; everything the channel pushes back (pairing codes,
// authorization, inbound messages, closure) arrives on the event receiver.

mod address;
pub mod gateway;
pub mod memory;

pub use address::{normalize, ChannelAddress};
pub use gateway::GatewayConnector;
pub use memory::MemoryChannel;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Message received from a channel participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub from: String,
    pub body: String,
}

/// Events pushed by an open transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// New device-link code for the operator to scan
    Pairing { code: String },
    /// Device link confirmed; the session may send
    Authorized,
    Message(InboundMessage),
    /// Transport is gone; no further events follow
    Closed { reason: Option<String> },
}

/// Media ready for delivery (already read from disk)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
    pub caption: Option<String>,
}

/// Complete payload handed to the transport in one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelPayload {
    Text(String),
    Media(MediaAttachment),
}

/// An open transport plus its event feed
pub struct ChannelLink {
    pub transport: Box<dyn ChannelTransport>,
    pub events: mpsc::Receiver<ChannelEvent>,
}

/// Opens transports to the messaging channel
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn open(&self) -> Result<ChannelLink>;
}

/// Outbound side of an open transport
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Whether the address is reachable on the channel
    async fn is_registered(&self, address: &ChannelAddress) -> Result<bool>;

    /// Hand the full payload to the channel; no partial sends.
    async fn deliver(&self, address: &ChannelAddress, payload: ChannelPayload) -> Result<()>;

    /// Release the transport. Safe to call more than once.
    async fn close(&self);
}
