// Configuration (TOML + env overrides)
pub mod config;

// Error taxonomy shared by the bridge and the stream consumer
pub mod error;

// Messaging channel: addresses, transport traits, gateway transport
pub mod channel;

// Session lifecycle manager
pub mod session;

// Outbound notifications
pub mod dispatch;

// Inbound reply relay
pub mod relay;

// Decision backend HTTP client
pub mod backend;

// Bridge HTTP surface
pub mod api;

// Dashboard event stream consumer
pub mod stream;

pub use error::RelayError;
