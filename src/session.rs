//! Conversation sessions
//!
//! A session owns its bounded turn history. The pipeline holds the history
//! lock for a whole turn; tokio's mutex is fair, so queries from one session
//! are answered in arrival order.

use crate::models::ConversationTurn;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, MutexGuard, RwLock};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: VecDeque<ConversationTurn>,
    max_turns: usize,
}

impl ConversationHistory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns: max_turns.max(1),
        }
    }

    /// Append a turn, dropping the oldest past `max_turns`
    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    /// The `count` most recent turns, oldest first
    pub fn recent(&self, count: usize) -> Vec<ConversationTurn> {
        let skip = self.turns.len().saturating_sub(count);
        self.turns.iter().skip(skip).cloned().collect()
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

pub struct Session {
    id: Uuid,
    history: Mutex<ConversationHistory>,
    closed: watch::Sender<bool>,
}

impl Session {
    pub fn new(max_turns: usize) -> Self {
        Self::with_id(Uuid::new_v4(), max_turns)
    }

    pub fn with_id(id: Uuid, max_turns: usize) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id,
            history: Mutex::new(ConversationHistory::new(max_turns)),
            closed,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Signal an in-flight turn to stop. Idempotent.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once `close` has been called
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Exclusive access for the duration of one pipeline turn
    pub(crate) async fn lock_history(&self) -> MutexGuard<'_, ConversationHistory> {
        self.history.lock().await
    }

    pub async fn history(&self) -> Vec<ConversationTurn> {
        self.history.lock().await.turns().cloned().collect()
    }

    pub async fn turn_count(&self) -> usize {
        self.history.lock().await.len()
    }
}

/// Sessions idle this long are dropped on the next insert
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_MAX_SESSIONS: usize = 1000;

struct Entry {
    session: Arc<Session>,
    last_used: Instant,
}

impl Entry {
    fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            last_used: Instant::now(),
        }
    }

    /// Only the registry holds it, so no turn is running
    fn is_idle(&self) -> bool {
        Arc::strong_count(&self.session) == 1
    }
}

/// Live sessions keyed by id. Idle sessions expire after `idle_ttl`, and
/// the least recently used idle ones are evicted to stay under `capacity`.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Entry>>,
    max_turns: usize,
    idle_ttl: Duration,
    capacity: usize,
}

impl SessionRegistry {
    pub fn new(max_turns: usize) -> Self {
        Self::with_limits(max_turns, DEFAULT_IDLE_TTL, DEFAULT_MAX_SESSIONS)
    }

    pub fn with_limits(max_turns: usize, idle_ttl: Duration, capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_turns,
            idle_ttl,
            capacity: capacity.max(1),
        }
    }

    pub async fn open(&self) -> Arc<Session> {
        let session = Arc::new(Session::new(self.max_turns));
        let mut sessions = self.sessions.write().await;
        self.evict(&mut sessions);
        sessions.insert(session.id(), Entry::new(Arc::clone(&session)));
        info!(session_id = %session.id(), "Session opened");
        session
    }

    /// Reuse a known id, or register it (or a fresh one) as a new session
    pub async fn get_or_open(&self, id: Option<Uuid>) -> Arc<Session> {
        let Some(id) = id else {
            return self.open().await;
        };

        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(&id) {
            entry.last_used = Instant::now();
            return Arc::clone(&entry.session);
        }

        self.evict(&mut sessions);
        let session = Arc::new(Session::with_id(id, self.max_turns));
        sessions.insert(id, Entry::new(Arc::clone(&session)));
        info!(session_id = %id, "Session opened");
        session
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&id).map(|entry| Arc::clone(&entry.session))
    }

    /// Remove the session and cancel any turn still running on it
    pub async fn close(&self, id: Uuid) -> bool {
        match self.sessions.write().await.remove(&id) {
            Some(entry) => {
                entry.session.close();
                info!(session_id = %id, "Session closed");
                true
            }
            None => false,
        }
    }

    /// Close and drop every session
    pub async fn clear(&self) {
        let drained: Vec<Arc<Session>> = self.sessions.write().await.drain().map(|(_, e)| e.session).collect();
        for session in &drained {
            session.close();
        }
        info!(count = drained.len(), "Sessions cleared");
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Make room for one more session. Sessions with a turn in flight are never evicted.
    fn evict(&self, sessions: &mut HashMap<Uuid, Entry>) {
        let now = Instant::now();
        let mut expired: Vec<Uuid> = sessions
            .iter()
            .filter(|(_, entry)| entry.is_idle() && now.duration_since(entry.last_used) >= self.idle_ttl)
            .map(|(id, _)| *id)
            .collect();

        let remaining = sessions.len() - expired.len();
        if remaining >= self.capacity {
            let mut idle: Vec<(Instant, Uuid)> = sessions
                .iter()
                .filter(|(id, entry)| entry.is_idle() && !expired.contains(*id))
                .map(|(id, entry)| (entry.last_used, *id))
                .collect();
            idle.sort();
            expired.extend(idle.into_iter().take(remaining + 1 - self.capacity).map(|(_, id)| id));
        }

        if expired.is_empty() {
            return;
        }

        for id in &expired {
            if let Some(entry) = sessions.remove(id) {
                entry.session.close();
            }
        }
        info!(evicted = expired.len(), live = sessions.len(), "Idle sessions evicted");
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut history = ConversationHistory::new(3);
        for i in 0..5 {
            history.push(ConversationTurn::new(format!("q{}", i), format!("a{}", i)));
        }
        assert_eq!(history.len(), 3);

        let recent = history.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].query, "q3");
        assert_eq!(recent[1].query, "q4");
        assert_eq!(history.recent(10).len(), 3);
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let session = Arc::new(Session::new(10));
        assert!(!session.is_closed());

        let waiter = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.closed().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        session.close();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
        assert!(session.is_closed());

        // Already closed resolves immediately
        tokio::time::timeout(Duration::from_millis(50), session.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_registry_lifecycle() {
        let registry = SessionRegistry::new(10);
        let session = registry.open().await;
        assert_eq!(registry.len().await, 1);

        let same = registry.get_or_open(Some(session.id())).await;
        assert!(Arc::ptr_eq(&session, &same));

        let named = Uuid::new_v4();
        let reopened = registry.get_or_open(Some(named)).await;
        assert_eq!(reopened.id(), named);
        assert_eq!(registry.len().await, 2);

        assert!(registry.close(session.id()).await);
        assert!(session.is_closed());
        assert!(!registry.close(session.id()).await);
        assert!(registry.get(session.id()).await.is_none());

        registry.clear().await;
        assert!(registry.is_empty().await);
        assert!(reopened.is_closed());
    }

    #[tokio::test]
    async fn test_idle_sessions_expire() {
        let registry = SessionRegistry::with_limits(10, Duration::from_millis(20), 100);
        let stale = registry.open().await.id();
        let busy = registry.open().await;
        assert_eq!(registry.len().await, 2);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let fresh = registry.open().await;

        assert!(registry.get(stale).await.is_none());
        assert!(registry.get(busy.id()).await.is_some());
        assert!(!busy.is_closed());
        assert!(registry.get(fresh.id()).await.is_some());
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let registry = SessionRegistry::with_limits(10, DEFAULT_IDLE_TTL, 2);
        let first = registry.open().await.id();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = registry.open().await.id();
        tokio::time::sleep(Duration::from_millis(2)).await;

        // Touching the first makes the second the oldest
        drop(registry.get_or_open(Some(first)).await);
        tokio::time::sleep(Duration::from_millis(2)).await;
        let third = registry.get_or_open(Some(Uuid::new_v4())).await;

        assert_eq!(registry.len().await, 2);
        assert!(registry.get(first).await.is_some());
        assert!(registry.get(second).await.is_none());
        assert!(registry.get(third.id()).await.is_some());
    }

    #[tokio::test]
    async fn test_anonymous_sessions_stay_bounded() {
        let registry = SessionRegistry::with_limits(10, DEFAULT_IDLE_TTL, 5);
        for _ in 0..200 {
            drop(registry.get_or_open(None).await);
        }
        assert_eq!(registry.len().await, 5);
    }
}
