//! Network module - Handles TCP communication with Core
//!
//! Provides:
//! - Framed connections shared by every Core exchange
//! - A one-shot request/response client
//! - The persistent per-user session manager

mod client;
mod connection;
mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use client::*;
pub use connection::*;
pub use session::*;
