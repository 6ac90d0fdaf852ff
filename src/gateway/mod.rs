//! Gateway client: authenticated streaming ingest
//!
//! - `client`: connection state machine, heartbeat, reconnect
//! - `auth`: challenge/response signing
//! - `messages`: tolerant classification of inbound frames

pub mod auth;
pub mod client;
pub mod messages;

pub use auth::{Ed25519Signer, Signer};
pub use client::{
    ClientEvent, ConnectionState, Connector, Frame, GatewayClient, GatewayHandle, GatewayOptions,
    Transport, WsConnector, WsTransport,
};
pub use messages::{classify, Inbound};
