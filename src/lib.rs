//! fsx-bridge - Gateway between request/response front ends and Core
//!
//! Speaks Core's framed binary protocol over TCP, keeps one persistent
//! connection per logged-in user and merges presence from both sides.

pub mod config;
pub mod gateway;
pub mod network;
pub mod presence;
pub mod protocol;
