//! The bus ⇄ client bridge: registry, retained cache, dispatcher.
//!
//! Everything here runs inside one dispatcher task; the rest of the
//! gateway talks to it through `BridgeEvent`, and it talks to the MQTT
//! link through `BusCommand`.

pub mod dispatcher;
pub mod registry;
pub mod retained;

pub use dispatcher::Dispatcher;
pub use registry::ClientRegistry;
pub use retained::RetainedCache;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;

/// Capacity of each client's outbound frame queue.
pub const CLIENT_CHANNEL_CAPACITY: usize = 64;

/// Everything the dispatcher reacts to.
#[derive(Debug)]
pub enum BridgeEvent {
    /// A WebSocket client finished its handshake.
    ClientConnected {
        id: u64,
        sender: mpsc::Sender<String>,
    },
    /// A text frame arrived from a client.
    ClientMessage { id: u64, text: String },
    /// A client's connection ended.
    ClientDisconnected { id: u64 },
    /// The bus link (re)established its connection.
    BusConnected,
    /// A message arrived from the bus; the deployment prefix is already
    /// stripped from `topic`.
    BusMessage { topic: String, payload: Bytes },
    /// Drop every connected client (bulk logout).
    DisconnectAll,
}

/// Requests from the gateway to the MQTT link. Topics are subtopics; the
/// link owns the deployment prefix.
#[derive(Debug)]
pub enum BusCommand {
    Subscribe(String),
    Publish {
        topic: String,
        payload: Value,
        retain: bool,
    },
    /// Publish the offline marker and disconnect; the link exits.
    Shutdown,
}
