//! Core request/response client
//!
//! Every call opens a fresh TCP connection, performs one framed exchange
//! and closes the connection again. There is no pooling and no retry.

use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

use super::connection::{Connection, ConnectionError, ProtocolError};
use crate::config::CoreConfig;
use crate::protocol::{
    FramingError, LoginRequest, LoginResponse, MessageType, OnlineListResponse, RegisterRequest,
    RegisterResponse, ValidationError,
};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl From<FramingError> for ClientError {
    fn from(err: FramingError) -> Self {
        ClientError::Protocol(ProtocolError::Framing(err))
    }
}

impl ClientError {
    /// Core could not be reached; callers may degrade or report unavailability
    pub fn is_connection(&self) -> bool {
        matches!(self, ClientError::Connection(_))
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// One-shot client for Core
#[derive(Debug, Clone)]
pub struct CoreClient {
    addr: String,
}

impl CoreClient {
    /// Create a client for Core at `addr` (`host:port`)
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(config.address())
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Perform one request/response exchange over a new connection
    pub async fn request(
        &self,
        msg_type: MessageType,
        payload: &[u8],
        timeout: Duration,
    ) -> ClientResult<Bytes> {
        let expected = msg_type
            .response_type()
            .ok_or_else(|| ClientError::Unexpected(format!("{} has no response type", msg_type)))?;

        let mut conn = Connection::connect(&self.addr, timeout).await?;
        let result = conn.exchange(msg_type, payload, expected).await;
        // Dropping the connection closes the socket on every path
        drop(conn);

        match &result {
            Ok(payload) => tracing::debug!(
                "{} to {} answered with {} bytes",
                msg_type,
                self.addr,
                payload.len()
            ),
            Err(e) => tracing::debug!("{} to {} failed: {}", msg_type, self.addr, e),
        }

        result
    }

    /// Register a new account
    pub async fn register(
        &self,
        req: &RegisterRequest,
        timeout: Duration,
    ) -> ClientResult<RegisterResponse> {
        let payload = req.encode()?;
        let response = self
            .request(MessageType::RegisterRequest, &payload, timeout)
            .await?;
        Ok(RegisterResponse::decode(&response)?)
    }

    /// Check credentials with a throwaway connection
    pub async fn login(
        &self,
        req: &LoginRequest,
        timeout: Duration,
    ) -> ClientResult<LoginResponse> {
        let payload = req.encode()?;
        let response = self
            .request(MessageType::LoginRequest, &payload, timeout)
            .await?;
        Ok(LoginResponse::decode(&response)?)
    }

    /// Usernames Core itself considers online
    pub async fn online_list(&self, timeout: Duration) -> ClientResult<Vec<String>> {
        let response = self
            .request(MessageType::OnlineListRequest, &[], timeout)
            .await?;
        Ok(OnlineListResponse::decode(&response)?.usernames)
    }
}
