//! Presence module - Who is online
//!
//! Merges Core's own online list with the users holding a live session in
//! this process. When Core cannot be queried, presence degrades to the local
//! sessions instead of failing.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::network::{ClientError, ClientResult, CoreClient, SessionManager};

/// Default bound on the Core online-list query
pub const DEFAULT_PRESENCE_TIMEOUT: Duration = Duration::from_secs(2);

/// Anything that can report the usernames Core considers online
#[async_trait]
pub trait OnlineSource: Send + Sync {
    async fn online_users(&self, timeout: Duration) -> ClientResult<Vec<String>>;
}

#[async_trait]
impl OnlineSource for CoreClient {
    async fn online_users(&self, timeout: Duration) -> ClientResult<Vec<String>> {
        self.online_list(timeout).await
    }
}

/// Online users, sorted and deduplicated
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineUsers {
    pub count: usize,
    pub usernames: Vec<String>,
}

impl FromIterator<String> for OnlineUsers {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let usernames: Vec<String> = iter
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Self {
            count: usernames.len(),
            usernames,
        }
    }
}

/// Combines Core's view of presence with the local session table
pub struct PresenceAggregator {
    core: Arc<dyn OnlineSource>,
    sessions: Arc<SessionManager>,
    timeout: Duration,
}

impl PresenceAggregator {
    pub fn new(
        core: Arc<dyn OnlineSource>,
        sessions: Arc<SessionManager>,
        timeout: Duration,
    ) -> Self {
        Self {
            core,
            sessions,
            timeout,
        }
    }

    /// Everyone online. Never fails: Core errors degrade to local sessions only.
    pub async fn get_online(&self) -> OnlineUsers {
        let core_users = match self.core.online_users(self.timeout).await {
            Ok(users) => Some(users),
            Err(ClientError::Connection(e)) => {
                tracing::warn!("Core unreachable for online list, using local sessions: {}", e);
                None
            }
            Err(e) => {
                tracing::error!("Core online list failed, using local sessions: {}", e);
                None
            }
        };

        let local_users = self.sessions.online_usernames().await;

        match core_users {
            Some(core_users) => {
                let core_count = core_users.len();
                let local_count = local_users.len();
                let online: OnlineUsers = core_users.into_iter().chain(local_users).collect();
                tracing::info!(
                    "Online list: {} users (core={}, local={})",
                    online.count,
                    core_count,
                    local_count
                );
                online
            }
            None => local_users.into_iter().collect(),
        }
    }
}
