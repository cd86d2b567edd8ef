//! Protocol message definitions
//!
//! Defines the message types exchanged with Core and the payload layout of each.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::codec::{put_string, FramingError, PayloadReader, ValidationError};

/// Message type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Ping = 2,
    Pong = 3,
    RegisterRequest = 10,
    RegisterResponse = 11,
    LoginRequest = 12,
    LoginResponse = 13,
    OnlineListRequest = 20,
    OnlineListResponse = 21,
}

impl MessageType {
    /// The response Core sends for this request, if it answers at all
    pub fn response_type(self) -> Option<MessageType> {
        match self {
            MessageType::Ping => Some(MessageType::Pong),
            MessageType::RegisterRequest => Some(MessageType::RegisterResponse),
            MessageType::LoginRequest => Some(MessageType::LoginResponse),
            MessageType::OnlineListRequest => Some(MessageType::OnlineListResponse),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::Ping => "PING",
            MessageType::Pong => "PONG",
            MessageType::RegisterRequest => "REGISTER_REQ",
            MessageType::RegisterResponse => "REGISTER_RESP",
            MessageType::LoginRequest => "LOGIN_REQ",
            MessageType::LoginResponse => "LOGIN_RESP",
            MessageType::OnlineListRequest => "ONLINE_LIST_REQ",
            MessageType::OnlineListResponse => "ONLINE_LIST_RESP",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), u8::from(*self))
    }
}

impl From<MessageType> for u8 {
    fn from(msg_type: MessageType) -> u8 {
        msg_type as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        match code {
            2 => Ok(MessageType::Ping),
            3 => Ok(MessageType::Pong),
            10 => Ok(MessageType::RegisterRequest),
            11 => Ok(MessageType::RegisterResponse),
            12 => Ok(MessageType::LoginRequest),
            13 => Ok(MessageType::LoginResponse),
            20 => Ok(MessageType::OnlineListRequest),
            21 => Ok(MessageType::OnlineListResponse),
            other => Err(other),
        }
    }
}

/// Payload sent with every keep-alive PING
pub const PING_PAYLOAD: &[u8] = b"ping";

/// REGISTER_REQ payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl RegisterRequest {
    pub fn new(username: &str, email: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    pub fn encode(&self) -> Result<Bytes, ValidationError> {
        let mut buf = BytesMut::with_capacity(
            6 + self.username.len() + self.email.len() + self.password.len(),
        );
        put_string(&mut buf, "username", &self.username)?;
        put_string(&mut buf, "email", &self.email)?;
        put_string(&mut buf, "password", &self.password)?;
        Ok(buf.freeze())
    }

    pub fn decode(payload: &[u8]) -> Result<Self, FramingError> {
        let mut reader = PayloadReader::new(payload);
        let username = reader.read_string("username")?;
        let email = reader.read_string("email")?;
        let password = reader.read_string("password")?;
        reader.finish()?;
        Ok(Self {
            username,
            email,
            password,
        })
    }
}

/// LOGIN_REQ payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl LoginRequest {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    pub fn encode(&self) -> Result<Bytes, ValidationError> {
        let mut buf = BytesMut::with_capacity(4 + self.username.len() + self.password.len());
        put_string(&mut buf, "username", &self.username)?;
        put_string(&mut buf, "password", &self.password)?;
        Ok(buf.freeze())
    }

    pub fn decode(payload: &[u8]) -> Result<Self, FramingError> {
        let mut reader = PayloadReader::new(payload);
        let username = reader.read_string("username")?;
        let password = reader.read_string("password")?;
        reader.finish()?;
        Ok(Self { username, password })
    }
}

/// REGISTER_RESP payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub ok: bool,
    pub message: String,
}

impl RegisterResponse {
    pub fn encode(&self) -> Result<Bytes, ValidationError> {
        let mut buf = BytesMut::with_capacity(3 + self.message.len());
        buf.put_u8(self.ok as u8);
        put_string(&mut buf, "message", &self.message)?;
        Ok(buf.freeze())
    }

    pub fn decode(payload: &[u8]) -> Result<Self, FramingError> {
        let mut reader = PayloadReader::new(payload);
        let ok = reader.read_u8("ok")? != 0;
        let message = reader.read_string("message")?;
        reader.finish()?;
        Ok(Self { ok, message })
    }
}

/// LOGIN_RESP payload
///
/// `token`, `user_id` and `username` are only present on the wire when `ok` is set;
/// for a rejected login they decode as empty/zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub ok: bool,
    pub token: String,
    pub user_id: u64,
    pub username: String,
    pub message: String,
}

impl LoginResponse {
    pub fn accepted(token: &str, user_id: u64, username: &str, message: &str) -> Self {
        Self {
            ok: true,
            token: token.to_string(),
            user_id,
            username: username.to_string(),
            message: message.to_string(),
        }
    }

    pub fn rejected(message: &str) -> Self {
        Self {
            ok: false,
            token: String::new(),
            user_id: 0,
            username: String::new(),
            message: message.to_string(),
        }
    }

    pub fn encode(&self) -> Result<Bytes, ValidationError> {
        let mut buf = BytesMut::with_capacity(
            15 + self.token.len() + self.username.len() + self.message.len(),
        );
        buf.put_u8(self.ok as u8);
        if self.ok {
            put_string(&mut buf, "token", &self.token)?;
            buf.put_u64(self.user_id);
            put_string(&mut buf, "username", &self.username)?;
        }
        put_string(&mut buf, "message", &self.message)?;
        Ok(buf.freeze())
    }

    pub fn decode(payload: &[u8]) -> Result<Self, FramingError> {
        let mut reader = PayloadReader::new(payload);
        let ok = reader.read_u8("ok")? != 0;

        let mut response = Self::rejected("");
        response.ok = ok;
        if ok {
            response.token = reader.read_string("token")?;
            response.user_id = reader.read_u64("user_id")?;
            response.username = reader.read_string("username")?;
        }
        response.message = reader.read_string("message")?;
        reader.finish()?;

        Ok(response)
    }
}

/// ONLINE_LIST_RESP payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnlineListResponse {
    pub usernames: Vec<String>,
}

impl OnlineListResponse {
    pub fn encode(&self) -> Result<Bytes, ValidationError> {
        let count = u16::try_from(self.usernames.len()).map_err(|_| {
            ValidationError::FieldTooLong {
                field: "usernames",
                len: self.usernames.len(),
            }
        })?;

        let names_len: usize = self.usernames.iter().map(|u| 2 + u.len()).sum();
        let mut buf = BytesMut::with_capacity(2 + names_len);
        buf.put_u16(count);
        for username in &self.usernames {
            put_string(&mut buf, "username", username)?;
        }
        Ok(buf.freeze())
    }

    pub fn decode(payload: &[u8]) -> Result<Self, FramingError> {
        let mut reader = PayloadReader::new(payload);
        let count = reader.read_u16("count")? as usize;

        // Each entry needs at least its length prefix
        let mut usernames = Vec::with_capacity(count.min(reader.remaining() / 2));
        for _ in 0..count {
            usernames.push(reader.read_string("username")?);
        }
        reader.finish()?;

        Ok(Self { usernames })
    }
}
