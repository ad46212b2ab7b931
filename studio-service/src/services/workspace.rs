//! In-memory registry of logged-in workspaces and the sessions they own.
//!
//! A workspace is identified by the opaque bearer token issued at login.
//! Sessions are only visible to the workspace that created them; asking for
//! somebody else's session looks exactly like asking for a missing one.
//! Tokens expire after a fixed lifetime; an expired workspace is closed the
//! same way a logout closes it.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::edit::EditSession;
use crate::services::chat::ChatConversation;

pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// The authenticated caller, inserted into request extensions by the auth
/// middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceUser {
    pub token: String,
}

#[derive(Debug, Clone)]
struct WorkspaceEntry {
    opened_at: DateTime<Utc>,
}

impl WorkspaceEntry {
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        // A clock that went backwards counts as no time elapsed.
        let elapsed = (now - self.opened_at).to_std().unwrap_or_default();
        elapsed >= ttl
    }
}

struct Owned<T> {
    owner: String,
    value: Arc<T>,
}

/// Sessions of one kind, keyed by id and tagged with their owner.
struct SessionTable<T> {
    label: &'static str,
    sessions: DashMap<Uuid, Owned<T>>,
}

impl<T> SessionTable<T> {
    fn new(label: &'static str) -> Self {
        Self {
            label,
            sessions: DashMap::new(),
        }
    }

    fn insert(&self, owner: &str, value: T) -> (Uuid, Arc<T>) {
        let id = Uuid::new_v4();
        let value = Arc::new(value);
        self.sessions.insert(
            id,
            Owned {
                owner: owner.to_string(),
                value: Arc::clone(&value),
            },
        );
        (id, value)
    }

    fn get(&self, owner: &str, id: Uuid) -> Result<Arc<T>, AppError> {
        self.sessions
            .get(&id)
            .filter(|entry| entry.owner == owner)
            .map(|entry| Arc::clone(&entry.value))
            .ok_or_else(|| self.not_found(id))
    }

    fn remove(&self, owner: &str, id: Uuid) -> Result<(), AppError> {
        self.sessions
            .remove_if(&id, |_, entry| entry.owner == owner)
            .map(|_| ())
            .ok_or_else(|| self.not_found(id))
    }

    fn remove_owned_by(&self, owner: &str) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| entry.owner != owner);
        before.saturating_sub(self.sessions.len())
    }

    fn not_found(&self, id: Uuid) -> AppError {
        AppError::NotFound(anyhow::anyhow!("{} session {} not found", self.label, id))
    }
}

pub struct Workspaces {
    ttl: Duration,
    tokens: DashMap<String, WorkspaceEntry>,
    chats: SessionTable<ChatConversation>,
    edits: SessionTable<Mutex<EditSession>>,
}

impl Default for Workspaces {
    fn default() -> Self {
        Self::new()
    }
}

impl Workspaces {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TOKEN_TTL)
    }

    /// Registry whose tokens stop authenticating `ttl` after login.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            tokens: DashMap::new(),
            chats: SessionTable::new("Chat"),
            edits: SessionTable::new("Edit"),
        }
    }

    /// Issue a fresh bearer token. Expired workspaces are swept first.
    pub fn open(&self) -> String {
        let swept = self.sweep_expired();
        if swept > 0 {
            tracing::debug!(swept, "Expired workspaces closed");
        }

        let token = Uuid::new_v4().simple().to_string();
        self.tokens.insert(
            token.clone(),
            WorkspaceEntry {
                opened_at: Utc::now(),
            },
        );
        token
    }

    pub fn authenticate(&self, token: &str) -> Option<WorkspaceUser> {
        let expired = self
            .tokens
            .get(token)?
            .is_expired(Utc::now(), self.ttl);

        if expired {
            tracing::info!("Workspace token expired");
            self.close(token);
            return None;
        }

        Some(WorkspaceUser {
            token: token.to_string(),
        })
    }

    /// Close every workspace whose token has outlived the TTL.
    fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = self
            .tokens
            .iter()
            .filter(|entry| entry.value().is_expired(now, self.ttl))
            .map(|entry| entry.key().clone())
            .collect();

        expired.iter().filter(|token| self.close(token)).count()
    }

    /// Revoke `token` and drop every session it owns. Returns false if the
    /// token was not active.
    pub fn close(&self, token: &str) -> bool {
        if self.tokens.remove(token).is_none() {
            return false;
        }
        let chats = self.chats.remove_owned_by(token);
        let edits = self.edits.remove_owned_by(token);
        tracing::info!(chats, edits, "Workspace closed");
        true
    }

    pub fn insert_chat(
        &self,
        user: &WorkspaceUser,
        conversation: ChatConversation,
    ) -> (Uuid, Arc<ChatConversation>) {
        self.chats.insert(&user.token, conversation)
    }

    pub fn chat(&self, user: &WorkspaceUser, id: Uuid) -> Result<Arc<ChatConversation>, AppError> {
        self.chats.get(&user.token, id)
    }

    pub fn remove_chat(&self, user: &WorkspaceUser, id: Uuid) -> Result<(), AppError> {
        self.chats.remove(&user.token, id)
    }

    pub fn insert_edit(&self, user: &WorkspaceUser) -> (Uuid, Arc<Mutex<EditSession>>) {
        self.edits.insert(&user.token, Mutex::new(EditSession::new()))
    }

    pub fn edit(&self, user: &WorkspaceUser, id: Uuid) -> Result<Arc<Mutex<EditSession>>, AppError> {
        self.edits.get(&user.token, id)
    }

    pub fn remove_edit(&self, user: &WorkspaceUser, id: Uuid) -> Result<(), AppError> {
        self.edits.remove(&user.token, id)
    }
}
