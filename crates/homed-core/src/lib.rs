//! Shared library for the HOMEd web gateway.
//!
//! Home of the pieces both sides of the bridge agree on: the workspace
//! error type, bus topic naming, the JSON envelopes spoken over
//! WebSocket, and session token minting.

pub mod error;
pub mod messages;
pub mod token;
pub mod topic;

pub use error::{HomedError, HomedResult};
pub use messages::{ClientAction, ClientEnvelope, TopicUpdate};
pub use topic::TopicRoot;
