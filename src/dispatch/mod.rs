// Outbound notification dispatch
//
// send(): READY gate -> normalize -> registration check -> media read -> one
// delivery call. Every step fails with a specific RelayError; nothing is
// retried and nothing is stored. The send timeout bounds the steps before
// delivery only: a delivery already handed to the transport is never
// abandoned, it runs to the transport's own request timeout.

use crate::channel::{normalize, ChannelAddress, ChannelPayload, MediaAttachment};
use crate::error::RelayError;
use crate::session::SessionManager;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};


/// What to send to a recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundPayload {
    Text(String),
    /// File on local disk plus optional caption
    Media {
        path: PathBuf,
        caption: Option<String>,
    },
}

/// Outcome of one recipient in a broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Recipient as the caller supplied it
    pub number: String,
    pub result: Result<ChannelAddress, RelayError>,
}

pub struct OutboundDispatcher {
    session: Arc<SessionManager>,
    send_timeout: Duration,
}

impl OutboundDispatcher {
    pub fn new(session: Arc<SessionManager>, send_timeout: Duration) -> Self {
        Self {
            session,
            send_timeout,
        }
    }

    /// Send one payload; returns the canonical address it went to.
    pub async fn send(
        &self,
        recipient: &str,
        payload: &OutboundPayload,
    ) -> Result<ChannelAddress, RelayError> {
        if !self.session.status().is_ready() {
            return Err(RelayError::NotReady);
        }

        let suffix = self.session.address_suffix();
        let address = normalize(recipient, suffix);
        if address.local_part(suffix).is_empty() {
            return Err(RelayError::UnregisteredRecipient(address.to_string()));
        }

        let prepared =
            match tokio::time::timeout(self.send_timeout, self.prepare(&address, payload)).await {
                Ok(prepared) => prepared,
                Err(_) => Err(RelayError::TransportUnavailable(format!(
                    "send to {} not ready for delivery within {}ms",
                    address,
                    self.send_timeout.as_millis()
                ))),
            };

        let result = match prepared {
            Ok(channel_payload) => self.session.deliver(&address, channel_payload).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                info!(recipient = %address, kind = payload.kind(), "Notification delivered");
                Ok(address)
            }
            Err(e) => {
                debug!(recipient = %address, error = %e, "Notification not delivered");
                Err(e)
            }
        }
    }

    /// Send the same payload to each recipient in order.
    ///
    /// One recipient failing never stops the rest.
    pub async fn broadcast(
        &self,
        recipients: &[String],
        payload: &OutboundPayload,
    ) -> Vec<DeliveryReport> {
        let mut reports = Vec::with_capacity(recipients.len());
        for number in recipients {
            let result = self.send(number, payload).await;
            if let Err(ref e) = result {
                warn!(recipient = %number, error = %e, "Broadcast delivery failed");
            }
            reports.push(DeliveryReport {
                number: number.clone(),
                result,
            });
        }

        let delivered = reports.iter().filter(|r| r.result.is_ok()).count();
        info!(
            delivered = delivered,
            total = reports.len(),
            "Broadcast complete"
        );
        reports
    }

    /// Registration check and media read; yields what to hand to the transport
    async fn prepare(
        &self,
        address: &ChannelAddress,
        payload: &OutboundPayload,
    ) -> Result<ChannelPayload, RelayError> {
        if !self.session.is_registered(address).await? {
            return Err(RelayError::UnregisteredRecipient(address.to_string()));
        }

        Ok(match payload {
            OutboundPayload::Text(text) => ChannelPayload::Text(text.clone()),
            OutboundPayload::Media { path, caption } => {
                ChannelPayload::Media(read_media(path, caption.clone()).await?)
            }
        })
    }
}

impl OutboundPayload {
    fn kind(&self) -> &'static str {
        match self {
            OutboundPayload::Text(_) => "text",
            OutboundPayload::Media { .. } => "media",
        }
    }
}

async fn read_media(path: &Path, caption: Option<String>) -> Result<MediaAttachment, RelayError> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| RelayError::MediaUnavailable(format!("{}: {}", path.display(), e)))?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string());

    Ok(MediaAttachment {
        file_name,
        mime_type: mime_type_for(path).to_string(),
        data,
        caption,
    })
}

/// MIME type by file extension
fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}
