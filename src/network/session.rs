//! Persistent per-user sessions with Core
//!
//! Each logged-in user owns one TCP connection to Core, kept alive by a
//! background task that sends PING frames. Closing that connection is how
//! Core learns the user went offline.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::client::ClientResult;
use super::connection::{write_frame, Connection, ConnectionError, FrameReader};
use crate::config::SessionConfig;
use crate::protocol::{
    encode_frame, FramingError, LoginRequest, LoginResponse, MessageType, PING_PAYLOAD,
};

/// One user's live connection to Core
#[derive(Debug)]
pub struct UserSession {
    username: String,
    token: String,
    user_id: u64,
    remote_addr: String,
    live: AtomicBool,
    /// `None` once the socket has been closed
    writer: Mutex<Option<OwnedWriteHalf>>,
}

impl UserSession {
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn mark_dead(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    async fn send_ping(&self, timeout: Duration) -> ClientResult<()> {
        let frame = encode_frame(MessageType::Ping, PING_PAYLOAD)?;

        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(ConnectionError::Closed)?;
        write_frame(writer, &frame, &self.remote_addr, timeout).await
    }

    /// Shut the socket down; later sends fail with `ConnectionError::Closed`
    async fn close_socket(&self) -> io::Result<()> {
        match self.writer.lock().await.take() {
            Some(mut writer) => writer.shutdown().await,
            None => Ok(()),
        }
    }
}

/// A table entry: the session plus the keep-alive task it owns
struct SessionEntry {
    session: Arc<UserSession>,
    shutdown_tx: mpsc::Sender<()>,
    keepalive: JoinHandle<()>,
}

impl SessionEntry {
    /// Stop the keep-alive and close the socket. Both steps always run.
    async fn close(self) {
        let SessionEntry {
            session,
            shutdown_tx,
            keepalive,
        } = self;

        session.mark_dead();

        // A full channel means a signal is already pending; a closed one
        // means the task has already stopped on its own.
        let _ = shutdown_tx.try_send(());

        if let Err(e) = session.close_socket().await {
            tracing::warn!("Error closing session socket for {}: {}", session.username, e);
        }

        drop(shutdown_tx);
        if let Err(e) = keepalive.await {
            tracing::warn!("Keep-alive task for {} ended abnormally: {}", session.username, e);
        }
    }
}

/// Serialises handshakes for one username
#[derive(Default)]
struct LoginGate {
    lock: Mutex<()>,
    /// Bumped by every `remove` while a login for this user is in flight
    removals: AtomicU64,
}

#[derive(Default)]
struct SessionTable {
    sessions: HashMap<String, SessionEntry>,
    /// Per-username handshake gates; at most one login to Core per user at a time
    logins: HashMap<String, Arc<LoginGate>>,
}

impl SessionTable {
    fn live(&self, username: &str) -> Option<Arc<UserSession>> {
        self.sessions
            .get(username)
            .filter(|entry| entry.session.is_live())
            .map(|entry| entry.session.clone())
    }

    /// Give back a caller's gate, forgetting it once nobody else holds it.
    ///
    /// Callers clone gates under the table lock, so the count seen here is
    /// stable: the table's copy plus this one means no one is waiting.
    fn release_gate(&mut self, username: &str, gate: Arc<LoginGate>) {
        let unused = self
            .logins
            .get(username)
            .map(|current| Arc::ptr_eq(current, &gate) && Arc::strong_count(&gate) == 2)
            .unwrap_or(false);
        if unused {
            self.logins.remove(username);
        }
    }
}

/// Owns every persistent user connection to Core
pub struct SessionManager {
    core_addr: String,
    config: SessionConfig,
    table: Mutex<SessionTable>,
}

impl SessionManager {
    pub fn new(core_addr: impl Into<String>, config: SessionConfig) -> Self {
        Self {
            core_addr: core_addr.into(),
            config,
            table: Mutex::new(SessionTable::default()),
        }
    }

    /// Log `username` in over a connection that stays open.
    ///
    /// Returns the existing session if one is live. Rejected credentials,
    /// Core being unreachable, and a `remove` for the same user arriving
    /// before the handshake completes all yield `None`.
    pub async fn create(&self, username: &str, password: &str) -> Option<Arc<UserSession>> {
        let (gate, removals) = {
            let mut table = self.table.lock().await;
            if let Some(session) = table.live(username) {
                tracing::debug!("Reusing live session for {}", username);
                return Some(session);
            }
            let gate = table.logins.entry(username.to_string()).or_default().clone();
            let removals = gate.removals.load(Ordering::SeqCst);
            (gate, removals)
        };

        let login = gate.lock.lock().await;
        let result = self.create_gated(username, password, &gate, removals).await;

        let mut table = self.table.lock().await;
        drop(login);
        table.release_gate(username, gate);
        result
    }

    async fn create_gated(
        &self,
        username: &str,
        password: &str,
        gate: &LoginGate,
        removals: u64,
    ) -> Option<Arc<UserSession>> {
        let stale = {
            let mut table = self.table.lock().await;
            // A concurrent create may have finished while we waited on the gate
            if let Some(session) = table.live(username) {
                return Some(session);
            }
            table.sessions.remove(username)
        };
        if let Some(stale) = stale {
            tracing::info!("Discarding stale session for {}", username);
            stale.close().await;
        }

        let entry = match self.handshake(username, password).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!("Session for {} could not be established: {}", username, e);
                return None;
            }
        };

        let mut table = self.table.lock().await;
        if gate.removals.load(Ordering::SeqCst) != removals {
            drop(table);
            tracing::info!("Logout for {} arrived during login, discarding new session", username);
            entry.close().await;
            return None;
        }
        if let Some(existing) = table.live(username) {
            drop(table);
            entry.close().await;
            return Some(existing);
        }

        let session = entry.session.clone();
        table.sessions.insert(username.to_string(), entry);
        tracing::info!(
            "Session created for {} (user_id={}, sessions={})",
            username,
            session.user_id,
            table.sessions.len()
        );

        Some(session)
    }

    /// Open a connection, log in on it and start its keep-alive
    async fn handshake(
        &self,
        username: &str,
        password: &str,
    ) -> ClientResult<Option<SessionEntry>> {
        let payload = LoginRequest::new(username, password).encode()?;

        let mut conn = Connection::connect(&self.core_addr, self.config.handshake_timeout()).await?;
        let response = conn
            .exchange(MessageType::LoginRequest, &payload, MessageType::LoginResponse)
            .await?;
        let login = LoginResponse::decode(&response)?;

        if !login.ok {
            tracing::warn!("Login rejected for {}: {}", username, login.message);
            return Ok(None);
        }

        let remote_addr = conn.remote_addr().to_string();
        let (reader, writer) = conn.into_parts();
        let session = Arc::new(UserSession {
            username: username.to_string(),
            token: login.token,
            user_id: login.user_id,
            remote_addr,
            live: AtomicBool::new(true),
            writer: Mutex::new(Some(writer)),
        });

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let keepalive = tokio::spawn(keepalive_loop(
            session.clone(),
            reader,
            shutdown_rx,
            self.config.keepalive_interval(),
            self.config.send_timeout(),
        ));

        Ok(Some(SessionEntry {
            session,
            shutdown_tx,
            keepalive,
        }))
    }

    /// Close and forget the session for `username`, if any.
    ///
    /// A login for the same user still in its handshake is cancelled too.
    pub async fn remove(&self, username: &str) {
        let (entry, remaining, cancelled_login) = {
            let mut table = self.table.lock().await;
            let cancelled_login = match table.logins.get(username) {
                Some(gate) => {
                    gate.removals.fetch_add(1, Ordering::SeqCst);
                    true
                }
                None => false,
            };
            let entry = table.sessions.remove(username);
            (entry, table.sessions.len(), cancelled_login)
        };

        match entry {
            Some(entry) => {
                let was_live = entry.session.is_live();
                entry.close().await;
                tracing::info!(
                    "Session removed for {} (was_live={}, sessions={})",
                    username,
                    was_live,
                    remaining
                );
            }
            None if cancelled_login => tracing::info!("Cancelled in-flight login for {}", username),
            None => tracing::warn!("No session to remove for {}", username),
        }
    }

    /// Usernames with a live session, in no particular order
    pub async fn online_usernames(&self) -> Vec<String> {
        let table = self.table.lock().await;
        table
            .sessions
            .iter()
            .filter(|(_, entry)| entry.session.is_live())
            .map(|(username, _)| username.clone())
            .collect()
    }

    pub async fn has_session(&self, username: &str) -> bool {
        self.table.lock().await.live(username).is_some()
    }

    /// The live session for `username`
    pub async fn session(&self, username: &str) -> Option<Arc<UserSession>> {
        self.table.lock().await.live(username)
    }

    /// Close every session
    pub async fn shutdown(&self) {
        let entries: Vec<SessionEntry> = {
            let mut table = self.table.lock().await;
            table.sessions.drain().map(|(_, entry)| entry).collect()
        };

        let count = entries.len();
        for entry in entries {
            entry.close().await;
        }
        tracing::info!("Session manager shut down ({} sessions closed)", count);
    }
}

/// Ping Core periodically and drain whatever it sends back.
///
/// Ends on the shutdown signal, or on any I/O failure after clearing liveness.
/// The table entry is left in place for the next `create`/`remove` to reconcile.
async fn keepalive_loop(
    session: Arc<UserSession>,
    mut inbound: FrameReader,
    mut shutdown_rx: mpsc::Receiver<()>,
    interval: Duration,
    send_timeout: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let failure = loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => break None,

            _ = ticker.tick() => {
                if !session.is_live() {
                    break None;
                }
                if let Err(e) = session.send_ping(send_timeout).await {
                    break Some(format!("ping failed: {}", e));
                }
                tracing::debug!("Ping sent for {}", session.username);
            }

            read = inbound.fill() => match read {
                Ok(0) => {
                    break Some(format!("Core closed the connection ({})", inbound.eof_error()))
                }
                Ok(_) => {
                    if let Err(e) = drain_inbound(&session, &mut inbound) {
                        break Some(format!("bad frame from Core: {}", e));
                    }
                }
                Err(e) => break Some(format!("read failed: {}", e)),
            },
        }
    };

    if let Some(reason) = failure {
        session.mark_dead();
        tracing::warn!("Keep-alive for {} stopped: {}", session.username, reason);
    } else {
        tracing::debug!("Keep-alive for {} cancelled", session.username);
    }
}

fn drain_inbound(session: &UserSession, inbound: &mut FrameReader) -> Result<(), FramingError> {
    while let Some(frame) = inbound.next_frame()? {
        match frame.header.message_type() {
            Some(MessageType::Pong) => tracing::trace!("Pong received for {}", session.username),
            _ => tracing::debug!(
                "Ignoring message type {} on session for {}",
                frame.header.msg_type,
                session.username
            ),
        }
    }
    Ok(())
}
