//! Browser sessions carrying login state across the authorize redirect.
//!
//! The coordinator only sees [`SessionBridge`]; the in-memory [`MemorySessionStore`]
//! is the default backend. A session holds two keys:
//! - [`LOGGED_IN_USER_KEY`]: the authenticated user id
//! - [`PENDING_REQUEST_KEY`]: the authorize request parked while the user logs in

use std::collections::HashMap;
use std::time::Duration;

use moka::future::Cache;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::SessionError;

/// Session key holding the authenticated user id.
pub const LOGGED_IN_USER_KEY: &str = "logged_in_user_id";

/// Session key holding the parked [`AuthorizationRequest`](super::types::AuthorizationRequest).
pub const PENDING_REQUEST_KEY: &str = "pending_authorization_request";

type SessionValues = HashMap<String, serde_json::Value>;

/// A loaded session. Changes are local until passed to [`SessionBridge::save`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: String,
    values: SessionValues,
    is_new: bool,
}

impl SessionHandle {
    /// Fresh, empty session with a random id.
    #[must_use]
    pub fn fresh() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            values: SessionValues::new(),
            is_new: true,
        }
    }

    fn existing(id: String, values: SessionValues) -> Self {
        Self { id, values, is_new: false }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// True when the caller did not present a live session and must be given the id.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.is_new
    }

    /// Read and decode a value.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SessionError> {
        self.values
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(SessionError::from)
    }

    /// Encode and store a value.
    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), SessionError> {
        self.values.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Remove a key. Returns whether it was present.
    pub fn delete(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

/// Session backend.
#[async_trait::async_trait]
pub trait SessionBridge: Send + Sync {
    /// Load the session named by `session_id`, or start a fresh one when it is
    /// absent or no longer live.
    async fn start(&self, session_id: Option<&str>) -> Result<SessionHandle, SessionError>;

    /// Persist the handle's values under its id.
    async fn save(&self, handle: &SessionHandle) -> Result<(), SessionError>;
}

/// In-memory sessions with idle expiry.
pub struct MemorySessionStore {
    sessions: Cache<String, SessionValues>,
}

impl MemorySessionStore {
    /// Create a store evicting sessions idle for `ttl`, holding at most `capacity`.
    #[must_use]
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        let sessions = Cache::builder()
            .max_capacity(capacity)
            .time_to_idle(ttl)
            .build();
        Self { sessions }
    }

    /// Number of live sessions (approximate until pending maintenance runs).
    #[must_use]
    pub fn session_count(&self) -> u64 {
        self.sessions.entry_count()
    }
}

impl std::fmt::Debug for MemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySessionStore")
            .field("sessions", &self.sessions.entry_count())
            .finish()
    }
}

#[async_trait::async_trait]
impl SessionBridge for MemorySessionStore {
    async fn start(&self, session_id: Option<&str>) -> Result<SessionHandle, SessionError> {
        if let Some(id) = session_id {
            if let Some(values) = self.sessions.get(id).await {
                return Ok(SessionHandle::existing(id.to_string(), values));
            }
            tracing::debug!("Unknown or expired session presented, starting a new one");
        }
        let handle = SessionHandle::fresh();
        tracing::debug!(session_id = %handle.id, "Created new session");
        Ok(handle)
    }

    async fn save(&self, handle: &SessionHandle) -> Result<(), SessionError> {
        self.sessions.insert(handle.id.clone(), handle.values.clone()).await;
        Ok(())
    }
}
