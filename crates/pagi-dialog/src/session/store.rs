use super::{DialogSession, SessionState};
use crate::error::{DialogError, DialogResult};
use crate::message::InboundMessage;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

type SharedSession = Arc<RwLock<DialogSession>>;

/// Owner of every live session. Each session sits behind its own lock so the
/// decode threads and the dispatch path never lose each other's updates.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, SharedSession>,
    by_site: DashMap<String, String>,
    terminated: DashMap<String, (DialogSession, DateTime<Utc>)>,
    pre_sessions: DashMap<String, InboundMessage>,
    revive_pending: DashMap<String, String>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn shared(&self, session_id: &str) -> DialogResult<SharedSession> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DialogError::SessionNotFound(session_id.to_string()))
    }

    fn with_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut DialogSession) -> T,
    ) -> DialogResult<T> {
        let shared = self.shared(session_id)?;
        let mut guard = shared.write().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&mut guard))
    }

    /// Remember the wakeword message for a device until its session starts.
    pub fn pre_session(&self, site_id: &str, message: InboundMessage) {
        debug!(site_id, "Pre-session registered");
        self.pre_sessions.insert(site_id.to_string(), message);
    }

    /// Start a new session for a device. This is the only way sessions are created.
    ///
    /// A pending pre-session message is attached first; a planned revival
    /// carries the context of the terminated session over.
    pub fn create(&self, site_id: &str, message: Option<&InboundMessage>) -> DialogSession {
        let session_id = uuid::Uuid::new_v4().to_string();
        let mut session = DialogSession::new(site_id);
        session.session_id = session_id.clone();

        if let Some((_, pre)) = self.pre_sessions.remove(site_id) {
            session.extend(&pre, None);
        }

        if let Some((_, prior_id)) = self.revive_pending.remove(site_id) {
            if let Some(mut prior) = self.terminated.get_mut(&prior_id) {
                session.revive_old_session(&prior.0);
                prior.0.state = SessionState::Revived;
                info!(session_id = %session_id, prior = %prior_id, "♻️ Session revived");
            }
        }

        if let Some(msg) = message {
            session.extend(msg, None);
        }
        // A message may carry a different device field; the creating site wins.
        session.site_id = site_id.to_string();

        self.by_site.insert(site_id.to_string(), session_id.clone());
        self.sessions
            .insert(session_id.clone(), Arc::new(RwLock::new(session.clone())));
        info!(session_id = %session_id, site_id, "🆕 Session created");
        session
    }

    /// Snapshot of a live session.
    pub fn get(&self, session_id: &str) -> Option<DialogSession> {
        let shared = self.shared(session_id).ok()?;
        let guard = shared.read().unwrap_or_else(PoisonError::into_inner);
        Some(guard.clone())
    }

    pub fn get_by_site(&self, site_id: &str) -> Option<DialogSession> {
        let id = self.by_site.get(site_id).map(|e| e.value().clone())?;
        self.get(&id)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn extend(&self, session_id: &str, message: &InboundMessage) -> DialogResult<DialogSession> {
        self.with_session(session_id, |s| {
            s.extend(message, Some(session_id));
            s.clone()
        })
    }

    pub fn update(&self, session_id: &str, message: &InboundMessage) -> DialogResult<DialogSession> {
        self.with_session(session_id, |s| {
            s.update(message);
            s.clone()
        })
    }

    pub fn add_to_history(&self, session_id: &str, intent: &str) -> DialogResult<()> {
        self.with_session(session_id, |s| s.add_to_history(intent))
    }

    pub fn set_intent_filter(&self, session_id: &str, filter: Vec<String>) -> DialogResult<()> {
        self.with_session(session_id, |s| s.intent_filter = filter)
    }

    /// Returns the new count.
    pub fn increment_not_understood(&self, session_id: &str) -> DialogResult<u32> {
        self.with_session(session_id, |s| {
            s.not_understood += 1;
            s.not_understood
        })
    }

    pub fn reset_not_understood(&self, session_id: &str) -> DialogResult<()> {
        self.with_session(session_id, |s| s.not_understood = 0)
    }

    /// Move a session to `next`. Re-entering the current state is a no-op.
    /// Returns the state the session was in.
    pub fn transition(&self, session_id: &str, next: SessionState) -> DialogResult<SessionState> {
        self.with_session(session_id, |s| {
            let from = s.state;
            if from == next {
                return Ok(from);
            }
            if !from.can_transition_to(next) {
                return Err(DialogError::InvalidTransition {
                    session_id: session_id.to_string(),
                    from,
                    to: next,
                });
            }
            s.state = next;
            debug!(session_id, %from, to = %next, "Session transition");
            Ok(from)
        })?
    }

    /// Terminate and remove a session. Its final snapshot stays available for revival.
    pub fn remove(&self, session_id: &str) -> Option<DialogSession> {
        let (_, shared) = self.sessions.remove(session_id)?;
        let mut session = shared
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        session.state = SessionState::Ended;

        self.by_site
            .remove_if(&session.site_id, |_, id| id == session_id);
        self.terminated
            .insert(session_id.to_string(), (session.clone(), Utc::now()));
        info!(session_id, site_id = %session.site_id, "🛑 Session removed");
        Some(session)
    }

    /// The next session started on `site_id` resumes the context of `session_id`.
    pub fn plan_revival(&self, site_id: &str, session_id: &str) {
        self.revive_pending
            .insert(site_id.to_string(), session_id.to_string());
    }

    pub fn terminated(&self, session_id: &str) -> Option<DialogSession> {
        self.terminated.get(session_id).map(|e| e.value().0.clone())
    }

    /// Drop terminated snapshots older than `max_age` that no revival is waiting on.
    pub fn purge_terminated(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let before = self.terminated.len();
        self.terminated.retain(|id, (_, ended_at)| {
            *ended_at > cutoff || self.revive_pending.iter().any(|p| p.value() == id)
        });
        before - self.terminated.len()
    }
}
