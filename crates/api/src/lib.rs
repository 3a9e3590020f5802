//! Chatdesk API Library
//!
//! Multi-tenant support chat backend: widget visitors, bots and agents
//! exchanging messages over HTTP and a realtime WebSocket channel.

pub mod auth;
pub mod config;
pub mod conversations;
pub mod error;
pub mod routes;
pub mod state;
pub mod store;
pub mod tenancy;
pub mod websocket;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
