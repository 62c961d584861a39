//! Multi-turn session state and persistence.
//!
//! Sessions are owned here and referenced by id everywhere else. Every
//! mutation persists the session document to the KV store under
//! `session:{id}` with a TTL renewed on each access; reads go through an
//! in-memory cache that is updated on writes. A KV failure during a
//! mutation is logged and surfaced as a non-fatal warning; the
//! in-memory copy stays authoritative for the rest of the process
//! lifetime. Turn appends are serialized per session, so appending turn
//! k+1 always sees turn k committed.

pub mod policy;
pub mod prompt;

pub use policy::{derive_policy, PolicyFloors, RoutingPolicy};
pub use prompt::{context_prompt, DEFAULT_CONTEXT_WINDOW};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::approval::SandboxLevel;
use crate::consensus::QualityTier;
use crate::error::SessionError;
use crate::kv::KvStore;

/// One committed turn of a session. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    /// 1-based, contiguous turn index.
    pub turn_index: u32,
    /// The user query for this turn.
    pub query: String,
    /// Winner of the turn's consensus.
    pub winner_provider_id: String,
    /// The winning content.
    pub content: String,
    /// Combined confidence of the turn's consensus.
    pub confidence: f64,
    /// Quality banding of the turn's consensus.
    pub quality: QualityTier,
    /// Providers invoked on this turn.
    pub provider_ids_used: Vec<String>,
    /// Vendors invoked on this turn, for rotation.
    pub vendors_used: Vec<String>,
    /// When the turn was committed.
    pub created_at: DateTime<Utc>,
}

/// Everything needed to append a turn; the index is assigned internally.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub query: String,
    pub winner_provider_id: String,
    pub content: String,
    pub confidence: f64,
    pub quality: QualityTier,
    pub provider_ids_used: Vec<String>,
    pub vendors_used: Vec<String>,
}

/// A durable conversation across analyses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session id.
    pub session_id: String,
    /// Conversation id shared with external transcript stores.
    pub conversation_id: String,
    /// Owning user, when known; indexes the `user_sessions:{user}` set.
    pub user_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last access time; TTL is renewed from here.
    pub last_touched_at: DateTime<Utc>,
    /// Committed turns, indices `1..=n` with no gaps.
    pub turns: Vec<TurnRecord>,
    /// Preferred model hint, if any.
    pub model: Option<String>,
    /// Sandbox level tool calls in this session run under.
    pub sandbox_level: SandboxLevel,
}

fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

fn user_sessions_key(user_id: &str) -> String {
    format!("user_sessions:{user_id}")
}

/// Owns session state: cache, per-session append locks, persistence.
pub struct SessionManager {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
    cache: RwLock<HashMap<String, Session>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionManager {
    /// Create a manager persisting to `kv` with the given session TTL.
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self {
            kv,
            ttl,
            cache: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn append_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("session lock table poisoned");
        Arc::clone(
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    fn cache_put(&self, session: &Session) {
        self.cache
            .write()
            .expect("session cache poisoned")
            .insert(session.session_id.clone(), session.clone());
    }

    /// Persist best-effort: a KV failure downgrades to a warning and the
    /// cached copy stays authoritative.
    async fn persist(&self, session: &Session) {
        let bytes = match serde_json::to_vec(session) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(session_id = %session.session_id, error = %e, "Failed to serialize session");
                return;
            }
        };
        if let Err(e) = self
            .kv
            .set(&session_key(&session.session_id), &bytes, Some(self.ttl))
            .await
        {
            tracing::warn!(
                session_id = %session.session_id,
                error = %e,
                "Session persistence failed, keeping in-memory copy authoritative"
            );
        }
    }

    /// Create a new session and persist it.
    pub async fn create(
        &self,
        user_id: Option<&str>,
        sandbox_level: SandboxLevel,
    ) -> Result<Session, SessionError> {
        let now = Utc::now();
        let session = Session {
            session_id: uuid::Uuid::new_v4().to_string(),
            conversation_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.map(str::to_string),
            created_at: now,
            last_touched_at: now,
            turns: Vec::new(),
            model: None,
            sandbox_level,
        };

        self.cache_put(&session);
        self.persist(&session).await;
        if let Some(user) = user_id {
            if let Err(e) = self
                .kv
                .set_add_member(&user_sessions_key(user), &session.session_id)
                .await
            {
                tracing::warn!(user = %user, error = %e, "Failed to index session for user");
            }
        }

        tracing::info!(session_id = %session.session_id, "Session created");
        Ok(session)
    }

    /// Load a session, extending its TTL on access.
    pub async fn load(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        if let Some(session) = self
            .cache
            .read()
            .expect("session cache poisoned")
            .get(session_id)
        {
            return Ok(Some(session.clone()));
        }

        let Some(bytes) = self.kv.get(&session_key(session_id)).await? else {
            return Ok(None);
        };
        let mut session: Session = serde_json::from_slice(&bytes)?;
        session.last_touched_at = Utc::now();

        self.cache_put(&session);
        self.persist(&session).await;
        Ok(Some(session))
    }

    /// Append a turn; the turn index is assigned and contiguous.
    pub async fn append_turn(
        &self,
        session_id: &str,
        input: TurnInput,
    ) -> Result<TurnRecord, SessionError> {
        let lock = self.append_lock(session_id);
        let _guard = lock.lock().await;

        let mut session =
            self.load(session_id)
                .await?
                .ok_or_else(|| SessionError::NotFound {
                    session_id: session_id.to_string(),
                })?;

        let turn = TurnRecord {
            turn_index: session.turns.len() as u32 + 1,
            query: input.query,
            winner_provider_id: input.winner_provider_id,
            content: input.content,
            confidence: input.confidence,
            quality: input.quality,
            provider_ids_used: input.provider_ids_used,
            vendors_used: input.vendors_used,
            created_at: Utc::now(),
        };
        session.turns.push(turn.clone());
        session.last_touched_at = turn.created_at;

        self.cache_put(&session);
        self.persist(&session).await;

        tracing::debug!(
            session_id = %session_id,
            turn_index = turn.turn_index,
            "Turn appended"
        );
        Ok(turn)
    }

    /// Derive the routing policy for the next turn.
    pub fn policy_for(&self, session: &Session, floors: &PolicyFloors) -> RoutingPolicy {
        derive_policy(session, floors)
    }

    /// Delete a session everywhere.
    pub async fn delete(&self, session_id: &str) -> Result<(), SessionError> {
        let user_id = {
            let mut cache = self.cache.write().expect("session cache poisoned");
            cache.remove(session_id).and_then(|s| s.user_id)
        };

        self.kv.delete(&session_key(session_id)).await?;
        if let Some(user) = user_id {
            if let Err(e) = self
                .kv
                .set_remove_member(&user_sessions_key(&user), session_id)
                .await
            {
                tracing::warn!(user = %user, error = %e, "Failed to unindex session for user");
            }
        }

        self.locks
            .lock()
            .expect("session lock table poisoned")
            .remove(session_id);

        tracing::info!(session_id = %session_id, "Session deleted");
        Ok(())
    }

    /// Session ids belonging to a user.
    pub async fn sessions_for_user(&self, user_id: &str) -> Result<Vec<String>, SessionError> {
        Ok(self.kv.set_members(&user_sessions_key(user_id)).await?)
    }
}
