//! WebSocket support for real-time conversations
//!
//! # Architecture
//!
//! - **Auth**: Handshake verification (agent token, visitor token, or widget key)
//! - **Gate**: Per-address connection attempt limiting
//! - **Connection**: Represents an authenticated WebSocket connection
//! - **Room**: Conversation-based pub/sub for broadcasting events
//! - **Router**: Conversation operations with their realtime fan-out
//! - **Delivery**: Deferred `delivered` status updates
//! - **Presence**: Agent online flag and offline notices
//! - **State**: Global WebSocket state shared across all connections
//! - **Handler**: Axum WebSocket route handler
//! - **Events**: Type-safe event definitions for client/server communication

pub mod auth;
pub mod connection;
pub mod delivery;
pub mod events;
pub mod gate;
pub mod handler;
pub mod presence;
pub mod room;
pub mod router;
pub mod state;

pub use auth::{ConnectionAuthenticator, Handshake};
pub use delivery::DeliveryScheduler;
pub use gate::{ConnectionGate, GateConfig};
pub use handler::ws_handler;
pub use presence::PresenceTracker;
pub use router::RoomRouter;
pub use state::WebSocketState;
