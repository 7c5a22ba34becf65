// Bridge HTTP surface: pairing status, health, outbound sends

pub mod bridge;

pub use bridge::{create_bridge_router, BridgeState};
