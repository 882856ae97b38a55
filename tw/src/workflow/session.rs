//! Sessions and the process-wide session registry
//!
//! A session is created on the first request under a new id, accumulates
//! its todo and transition history across requests, and is destroyed by the
//! idle sweeper after the configured timeout.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::Todo;

use super::state::WorkflowState;

/// Bounded per-session transition history size.
pub const TRANSITION_HISTORY_LIMIT: usize = 64;

/// One recorded state transition.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionRecord {
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub at: DateTime<Utc>,
}

/// Per-session state retained between requests.
pub struct Session {
    pub id: String,
    /// State the last run ended in (DEV parks here awaiting the password).
    pub state: WorkflowState,
    pub todo: Option<Todo>,
    pub last_analysis: Option<String>,
    pub awaiting_password: bool,
    pub cancel: CancellationToken,
    transitions: VecDeque<TransitionRecord>,
    pub created_at: Instant,
    pub last_active: Instant,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            id: id.into(),
            state: WorkflowState::WorkflowStart,
            todo: None,
            last_analysis: None,
            awaiting_password: false,
            cancel: CancellationToken::new(),
            transitions: VecDeque::new(),
            created_at: now,
            last_active: now,
        }
    }

    /// Append transitions, evicting the oldest past the bound.
    pub fn record_transitions(&mut self, records: impl IntoIterator<Item = TransitionRecord>) {
        for record in records {
            if self.transitions.len() >= TRANSITION_HISTORY_LIMIT {
                self.transitions.pop_front();
            }
            self.transitions.push_back(record);
        }
    }

    pub fn transitions(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.transitions.iter()
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }

    /// Flag every suspension point in this session's work to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Process-wide session map with idle expiry.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
    idle_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
        })
    }

    /// Fetch an existing session or create one under this id.
    pub async fn get_or_create(&self, id: &str) -> Arc<Mutex<Session>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(id) {
            return Arc::clone(session);
        }
        debug!(session_id = id, "registry: creating session");
        let session = Arc::new(Mutex::new(Session::new(id)));
        sessions.insert(id.to_string(), Arc::clone(&session));
        session
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Cancel a session's in-flight work.
    pub async fn cancel(&self, id: &str) -> bool {
        match self.get(id).await {
            Some(session) => {
                session.lock().await.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Drop sessions idle past the timeout. Returns how many were removed.
    pub async fn sweep_idle(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let mut expired = Vec::new();
        for (id, session) in sessions.iter() {
            if let Ok(session) = session.try_lock() {
                if session.idle_for() >= self.idle_timeout {
                    expired.push(id.clone());
                }
            }
        }
        for id in &expired {
            if let Some(session) = sessions.remove(id) {
                if let Ok(session) = session.try_lock() {
                    session.cancel();
                }
                info!(session_id = %id, "registry: expired idle session");
            }
        }
        expired.len()
    }

    /// Run the idle sweeper until the token is cancelled.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        registry.sweep_idle().await;
                    }
                }
            }
        });
    }
}
