//! In-memory, per-thread conversation store
//!
//! ```text
//! threads: HashMap<thread_id, ThreadState { turns, last_used }>
//!          ├── LRU eviction past max_threads
//!          └── idle expiry past idle_ttl (checked on every access)
//!          (threads with a turn in flight are never evicted or expired)
//! locks:   HashMap<thread_id, Arc<tokio::Mutex<()>>>
//!          └── one agent turn per thread at a time
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use super::Turn;
use crate::metrics::MEMORY_THREADS_ACTIVE;

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Threads kept before the least recently used is evicted
    pub max_threads: usize,
    /// Threads untouched for this long are dropped
    pub idle_ttl: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_threads: 1000,
            idle_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub threads: usize,
    pub turns: usize,
}

struct ThreadState {
    turns: Vec<Turn>,
    last_used: Instant,
}

/// Held for the duration of one agent turn on a thread
pub struct ThreadGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Thread id → append-only turn log
pub struct MemoryStore {
    config: MemoryConfig,
    threads: Mutex<HashMap<String, ThreadState>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Recover the map from a poisoned lock; every mutation below is a
/// single insert/remove/push, so the data stays consistent.
fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MemoryStore {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            threads: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Every turn of a thread in append order; empty for unseen ids
    pub fn load(&self, thread_id: &str) -> Vec<Turn> {
        let mut threads = relock(&self.threads);
        self.expire_idle(&mut threads);
        match threads.get_mut(thread_id) {
            Some(state) => {
                state.last_used = Instant::now();
                state.turns.clone()
            }
            None => Vec::new(),
        }
    }

    pub fn append(&self, thread_id: &str, turn: Turn) {
        self.append_all(thread_id, vec![turn]);
    }

    /// Append several turns so that no reader sees only some of them
    pub fn append_all(&self, thread_id: &str, turns: Vec<Turn>) {
        let mut threads = relock(&self.threads);
        self.expire_idle(&mut threads);

        let state = threads.entry(thread_id.to_string()).or_insert_with(|| ThreadState {
            turns: Vec::new(),
            last_used: Instant::now(),
        });
        state.turns.extend(turns);
        state.last_used = Instant::now();

        self.evict_lru(&mut threads, thread_id);
        MEMORY_THREADS_ACTIVE.set(threads.len() as i64);
    }

    /// Forget a thread; true if it existed
    ///
    /// Does not wait for a turn in flight; see [`MemoryStore::reset_after_turn`].
    pub fn reset(&self, thread_id: &str) -> bool {
        let mut threads = relock(&self.threads);
        let existed = threads.remove(thread_id).is_some();
        MEMORY_THREADS_ACTIVE.set(threads.len() as i64);
        if existed {
            debug!(thread_id, "Thread reset");
        }
        existed
    }

    pub fn stats(&self) -> MemoryStats {
        let threads = relock(&self.threads);
        MemoryStats {
            threads: threads.len(),
            turns: threads.values().map(|t| t.turns.len()).sum(),
        }
    }

    /// Forget a thread once any turn running on it has finished
    ///
    /// A reset in the middle of a turn would leave the turn's later appends
    /// in a fresh thread that does not start with a user turn.
    pub async fn reset_after_turn(&self, thread_id: &str) -> bool {
        let _guard = self.lock(thread_id).await;
        self.reset(thread_id)
    }

    /// Serialize work on one thread; other threads are unaffected
    pub async fn lock(&self, thread_id: &str) -> ThreadGuard {
        let mutex = {
            let mut locks = relock(&self.locks);
            // Entries only referenced by the registry have no holder or waiter
            locks.retain(|id, m| id == thread_id || Arc::strong_count(m) > 1);
            Arc::clone(locks.entry(thread_id.to_string()).or_default())
        };
        ThreadGuard {
            _guard: mutex.lock_owned().await,
        }
    }

    /// Ids with a turn in flight (their lock is held)
    fn busy_threads(&self) -> HashSet<String> {
        relock(&self.locks)
            .iter()
            .filter(|(_, m)| m.try_lock().is_err())
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn expire_idle(&self, threads: &mut HashMap<String, ThreadState>) {
        let ttl = self.config.idle_ttl;
        if threads.values().all(|state| state.last_used.elapsed() <= ttl) {
            return;
        }
        let busy = self.busy_threads();
        let before = threads.len();
        threads.retain(|id, state| state.last_used.elapsed() <= ttl || busy.contains(id));
        let expired = before - threads.len();
        if expired > 0 {
            debug!(expired, "Expired idle threads");
            MEMORY_THREADS_ACTIVE.set(threads.len() as i64);
        }
    }

    fn evict_lru(&self, threads: &mut HashMap<String, ThreadState>, keep: &str) {
        if threads.len() <= self.config.max_threads.max(1) {
            return;
        }
        let busy = self.busy_threads();
        while threads.len() > self.config.max_threads.max(1) {
            let oldest = threads
                .iter()
                .filter(|(id, _)| id.as_str() != keep && !busy.contains(id.as_str()))
                .min_by_key(|(_, state)| state.last_used)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    debug!(thread_id = %id, "Evicted least recently used thread");
                    threads.remove(&id);
                }
                None => break,
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Role;

    fn store(max_threads: usize, idle_ttl: Duration) -> MemoryStore {
        MemoryStore::new(MemoryConfig { max_threads, idle_ttl })
    }

    #[test]
    fn test_unseen_thread_is_empty() {
        let store = MemoryStore::default();
        assert!(store.load("nobody").is_empty());
        assert_eq!(store.stats().threads, 0);
    }

    #[test]
    fn test_append_preserves_order_and_load_is_idempotent() {
        let store = MemoryStore::default();
        store.append("t1", Turn::user("hi"));
        store.append("t1", Turn::assistant("hello"));
        store.append("t1", Turn::user("hi"));

        let first = store.load("t1");
        let second = store.load("t1");
        assert_eq!(first, second);
        let roles: Vec<Role> = first.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        // no deduplication
        assert_eq!(first[0].content, first[2].content);
    }

    #[test]
    fn test_threads_are_isolated() {
        let store = MemoryStore::default();
        store.append("a", Turn::user("for a"));
        store.append("b", Turn::user("for b"));

        assert_eq!(store.load("a").len(), 1);
        assert_eq!(store.load("a")[0].content, "for a");
        assert_eq!(store.stats(), MemoryStats { threads: 2, turns: 2 });
    }

    #[test]
    fn test_append_all_is_one_batch() {
        let store = MemoryStore::default();
        store.append_all(
            "t",
            vec![
                Turn::tool_call("c1", "weather", serde_json::json!({"query": "Oslo"})),
                Turn::tool_result("c1", "weather", "cold", false),
            ],
        );
        let turns = store.load("t");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].role, Role::ToolResult);
    }

    #[test]
    fn test_lru_eviction() {
        let store = store(2, Duration::from_secs(60));
        store.append("a", Turn::user("1"));
        std::thread::sleep(Duration::from_millis(2));
        store.append("b", Turn::user("2"));
        std::thread::sleep(Duration::from_millis(2));
        // touching "a" makes "b" the oldest
        store.load("a");
        std::thread::sleep(Duration::from_millis(2));
        store.append("c", Turn::user("3"));

        assert_eq!(store.stats().threads, 2);
        assert!(store.load("b").is_empty());
        assert_eq!(store.load("a").len(), 1);
        assert_eq!(store.load("c").len(), 1);
    }

    #[test]
    fn test_idle_expiry() {
        let store = store(10, Duration::from_millis(20));
        store.append("old", Turn::user("1"));
        std::thread::sleep(Duration::from_millis(40));

        assert!(store.load("old").is_empty());
        assert_eq!(store.stats().threads, 0);
    }

    #[test]
    fn test_reset() {
        let store = MemoryStore::default();
        store.append("t", Turn::user("1"));
        assert!(store.reset("t"));
        assert!(!store.reset("t"));
        assert!(store.load("t").is_empty());
    }

    #[tokio::test]
    async fn test_lock_serializes_same_thread_only() {
        let store = Arc::new(MemoryStore::default());
        let guard = store.lock("t").await;

        // another thread id is free
        let other = tokio::time::timeout(Duration::from_millis(50), store.lock("u")).await;
        assert!(other.is_ok());

        // the same thread id waits
        let same = tokio::time::timeout(Duration::from_millis(50), store.lock("t")).await;
        assert!(same.is_err());

        drop(guard);
        let same = tokio::time::timeout(Duration::from_millis(50), store.lock("t")).await;
        assert!(same.is_ok());
    }

    #[tokio::test]
    async fn test_reset_waits_for_turn_in_flight() {
        let store = Arc::new(MemoryStore::default());
        let guard = store.lock("t").await;
        store.append("t", Turn::user("question"));

        let reset = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.reset_after_turn("t").await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!reset.is_finished());

        // the turn finishes undisturbed
        store.append("t", Turn::assistant("answer"));
        assert_eq!(store.load("t").len(), 2);
        drop(guard);

        assert!(reset.await.unwrap());
        assert!(store.load("t").is_empty());
    }

    #[tokio::test]
    async fn test_busy_thread_survives_eviction_and_expiry() {
        let store = store(1, Duration::from_millis(20));
        let _guard = store.lock("busy").await;
        store.append("busy", Turn::user("1"));
        std::thread::sleep(Duration::from_millis(40));

        store.append("other", Turn::user("2"));
        assert_eq!(store.load("busy").len(), 1);
        assert_eq!(store.load("other").len(), 1);
    }
}
