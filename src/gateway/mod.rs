//! Gateway module - The operations offered to front ends
//!
//! Wires the one-shot client, the session manager and presence together
//! from a single `Config`.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::network::{ClientResult, CoreClient, SessionManager};
use crate::presence::{OnlineUsers, PresenceAggregator};
use crate::protocol::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

pub struct Gateway {
    client: CoreClient,
    sessions: Arc<SessionManager>,
    presence: PresenceAggregator,
    request_timeout: Duration,
}

impl Gateway {
    pub fn new(config: &Config) -> Self {
        let client = CoreClient::from_config(&config.core);
        let sessions = Arc::new(SessionManager::new(
            config.core.address(),
            config.session.clone(),
        ));
        let presence = PresenceAggregator::new(
            Arc::new(client.clone()),
            sessions.clone(),
            config.presence.core_timeout(),
        );

        tracing::info!("Gateway ready for Core at {}", client.addr());

        Self {
            client,
            sessions,
            presence,
            request_timeout: config.core.request_timeout(),
        }
    }

    /// Timeout configured for one-shot requests
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        timeout: Duration,
    ) -> ClientResult<RegisterResponse> {
        let request = RegisterRequest::new(username, email, password);
        let response = self.client.register(&request, timeout).await?;

        if response.ok {
            tracing::info!("Registered {} <{}>", username, email);
        } else {
            tracing::warn!("Registration refused for {}: {}", username, response.message);
        }

        Ok(response)
    }

    /// Check credentials with Core, then open the user's persistent session.
    ///
    /// The returned outcome is Core's answer to the probe; a session that
    /// cannot be established afterwards is only logged.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> ClientResult<LoginResponse> {
        let response = self
            .client
            .login(&LoginRequest::new(username, password), timeout)
            .await?;

        if !response.ok {
            tracing::warn!("Login failed for {}: {}", username, response.message);
            return Ok(response);
        }

        tracing::info!("Login accepted for {} (user_id={})", username, response.user_id);
        if self.sessions.create(username, password).await.is_none() {
            tracing::warn!(
                "Login for {} succeeded but no persistent session was created",
                username
            );
        }

        Ok(response)
    }

    pub async fn logout(&self, username: &str) {
        self.sessions.remove(username).await;
    }

    pub async fn get_online(&self) -> OnlineUsers {
        self.presence.get_online().await
    }

    pub async fn has_session(&self, username: &str) -> bool {
        self.sessions.has_session(username).await
    }

    /// Close every persistent session
    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
        tracing::info!("Gateway shut down");
    }
}
