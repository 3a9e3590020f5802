//! Chatdesk Shared Types and Utilities
//!
//! Domain types, the error taxonomy and database helpers shared by the
//! Chatdesk crates.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
