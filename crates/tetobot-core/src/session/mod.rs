use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::types::Message;

/// Default number of turns kept per user.
pub const DEFAULT_MAX_TURNS: usize = 40;

/// Upper bound on the idle sweeper period.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct SessionEntry {
    turns: VecDeque<Message>,
    last_active: Instant,
}

/// In-process conversation memory keyed by user ID.
///
/// Each user gets a FIFO of at most `max_turns` turns; pushing past the cap
/// drops the oldest entries. Nothing is persisted.
pub struct SessionMemory {
    sessions: DashMap<String, SessionEntry>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    max_turns: usize,
}

impl Default for SessionMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }
}

impl SessionMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            locks: DashMap::new(),
            max_turns: max_turns.max(1),
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Append a turn, creating the session on first use, then trim the
    /// oldest turns down to the cap.
    pub fn append(&self, id: &str, turn: Message) {
        let mut entry = self
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| SessionEntry {
                turns: VecDeque::with_capacity(self.max_turns + 1),
                last_active: Instant::now(),
            });
        entry.turns.push_back(turn);
        while entry.turns.len() > self.max_turns {
            entry.turns.pop_front();
        }
        entry.last_active = Instant::now();
    }

    /// Snapshot of a user's turns, oldest first. Empty if unknown.
    pub fn get(&self, id: &str) -> Vec<Message> {
        self.sessions
            .get(id)
            .map(|e| e.turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of turns stored for a user.
    pub fn len(&self, id: &str) -> usize {
        self.sessions.get(id).map(|e| e.turns.len()).unwrap_or(0)
    }

    /// Number of users with stored turns.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Acquire the per-user lock. Holding it serializes work for one user
    /// so their turns are recorded in arrival order.
    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(id.to_string()).or_default().clone();
        lock.lock_owned().await
    }

    /// Drop sessions untouched for longer than `ttl`. Sessions whose lock is
    /// held or awaited are kept. Returns how many were removed.
    pub fn prune_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();

        self.sessions.retain(|id, entry| {
            let in_use = self
                .locks
                .get(id)
                .map(|l| Arc::strong_count(l.value()) > 1)
                .unwrap_or(false);
            in_use || now.duration_since(entry.last_active) <= ttl
        });
        self.locks
            .retain(|id, l| Arc::strong_count(l) > 1 || self.sessions.contains_key(id));

        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            debug!("Pruned {} idle session(s)", removed);
        }
        removed
    }
}

/// Periodically prune sessions idle longer than `ttl`.
pub fn spawn_idle_sweeper(memory: Arc<SessionMemory>, ttl: Duration) -> JoinHandle<()> {
    let period = ttl.min(MAX_SWEEP_INTERVAL).max(Duration::from_secs(1));
    info!("Session idle expiry enabled: ttl={:?}, sweep every {:?}", ttl, period);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            memory.prune_idle(ttl);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn texts(memory: &SessionMemory, id: &str) -> Vec<String> {
        memory
            .get(id)
            .iter()
            .map(|m| m.text().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_unknown_user_is_empty() {
        let memory = SessionMemory::default();
        assert!(memory.get("U1").is_empty());
        assert_eq!(memory.len("U1"), 0);
        assert_eq!(memory.session_count(), 0);
    }

    #[test]
    fn test_append_creates_session_lazily() {
        let memory = SessionMemory::default();
        memory.append("U1", Message::user("hello"));
        memory.append("U1", Message::assistant("hi"));

        let turns = memory.get("U1");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(memory.session_count(), 1);
    }

    #[test]
    fn test_cap_drops_oldest_first() {
        let memory = SessionMemory::new(40);
        for i in 0..100 {
            memory.append("U1", Message::user(format!("msg {i}")));
            assert!(memory.len("U1") <= 40);
        }
        let kept = texts(&memory, "U1");
        assert_eq!(kept.len(), 40);
        assert_eq!(kept[0], "msg 60");
        assert_eq!(kept[39], "msg 99");
        // order preserved
        for (i, t) in kept.iter().enumerate() {
            assert_eq!(t, &format!("msg {}", 60 + i));
        }
    }

    #[test]
    fn test_users_are_isolated() {
        let memory = SessionMemory::new(2);
        memory.append("U1", Message::user("a"));
        memory.append("U2", Message::user("b"));
        memory.append("U2", Message::user("c"));
        memory.append("U2", Message::user("d"));
        assert_eq!(texts(&memory, "U1"), vec!["a"]);
        assert_eq!(texts(&memory, "U2"), vec!["c", "d"]);
    }

    #[test]
    fn test_zero_cap_is_clamped() {
        let memory = SessionMemory::new(0);
        memory.append("U1", Message::user("a"));
        memory.append("U1", Message::user("b"));
        assert_eq!(memory.max_turns(), 1);
        assert_eq!(texts(&memory, "U1"), vec!["b"]);
    }

    #[test]
    fn test_get_returns_snapshot() {
        let memory = SessionMemory::default();
        memory.append("U1", Message::user("a"));
        let snapshot = memory.get("U1");
        memory.append("U1", Message::user("b"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(memory.len("U1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_idle_removes_stale_sessions() {
        let memory = SessionMemory::default();
        memory.append("old", Message::user("a"));
        tokio::time::advance(Duration::from_secs(120)).await;
        memory.append("fresh", Message::user("b"));

        let removed = memory.prune_idle(Duration::from_secs(60));
        assert_eq!(removed, 1);
        assert!(memory.get("old").is_empty());
        assert_eq!(memory.len("fresh"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_keeps_locked_sessions() {
        let memory = SessionMemory::default();
        memory.append("busy", Message::user("a"));
        let guard = memory.lock("busy").await;
        tokio::time::advance(Duration::from_secs(120)).await;

        assert_eq!(memory.prune_idle(Duration::from_secs(60)), 0);
        drop(guard);
        assert_eq!(memory.prune_idle(Duration::from_secs(60)), 1);
    }

    #[tokio::test]
    async fn test_lock_serializes_same_user() {
        let memory = Arc::new(SessionMemory::default());
        let guard = memory.lock("U1").await;

        let m = memory.clone();
        let waiter = tokio::spawn(async move {
            let _g = m.lock("U1").await;
            m.append("U1", Message::user("second"));
        });

        tokio::task::yield_now().await;
        memory.append("U1", Message::user("first"));
        drop(guard);
        waiter.await.unwrap();

        assert_eq!(texts(&memory, "U1"), vec!["first", "second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_prunes_in_background() {
        let memory = Arc::new(SessionMemory::default());
        memory.append("U1", Message::user("a"));
        let handle = spawn_idle_sweeper(memory.clone(), Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(memory.session_count(), 0);
        handle.abort();
    }
}
