//! Protocol module - Defines the wire protocol spoken by FSX Core
//!
//! Every message is a fixed 12-byte big-endian header followed by a payload:
//! - 4 bytes magic ("FSX1")
//! - 1 byte protocol version
//! - 1 byte message type
//! - 4 bytes payload length
//! - 2 bytes reserved (always written as 0)
//!
//! String fields inside payloads are a `u16` byte length followed by UTF-8 bytes.

mod message;
mod codec;

pub use message::*;
pub use codec::*;

/// Protocol version; responses carrying any other version are rejected
pub const PROTOCOL_VERSION: u8 = 1;

/// Default port of the Core client protocol
pub const DEFAULT_PORT: u16 = 9000;

/// Magic number for protocol identification
pub const MAGIC: u32 = 0x4653_5831; // "FSX1"
