//! Per (agent, session) tool-call budgets.
//!
//! Counters only ever grow for the lifetime of a session. Concurrent callers
//! for the same key race on atomics, never on a lock held across the check.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitExceeded {
    ToolCalls(u32),
    Writes(u32),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub tool_calls: u32,
    pub writes: u32,
}

#[derive(Default)]
struct Counters {
    calls: AtomicU32,
    writes: AtomicU32,
}

type Key = (String, String);

pub struct RateLimiter {
    max_tool_calls: u32,
    max_writes: u32,
    counters: RwLock<HashMap<Key, Arc<Counters>>>,
}

impl RateLimiter {
    pub fn new(max_tool_calls: u32, max_writes: u32) -> Self {
        Self {
            max_tool_calls,
            max_writes,
            counters: RwLock::new(HashMap::new()),
        }
    }

    fn counters(&self, agent_id: &str, session_id: &str) -> Arc<Counters> {
        let key = (agent_id.to_string(), session_id.to_string());
        if let Some(existing) = self.counters.read().get(&key) {
            return Arc::clone(existing);
        }
        Arc::clone(self.counters.write().entry(key).or_default())
    }

    /// Reserve one call (and one write, for write-class tools). A refused
    /// call consumes nothing.
    pub fn try_acquire(
        &self,
        agent_id: &str,
        session_id: &str,
        is_write: bool,
    ) -> Result<(), RateLimitExceeded> {
        let counters = self.counters(agent_id, session_id);
        let max_calls = self.max_tool_calls;
        let max_writes = self.max_writes;

        counters
            .calls
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max_calls).then_some(n + 1)
            })
            .map_err(|_| RateLimitExceeded::ToolCalls(max_calls))?;

        if is_write {
            let reserved = counters
                .writes
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < max_writes).then_some(n + 1)
                });
            if reserved.is_err() {
                counters.calls.fetch_sub(1, Ordering::AcqRel);
                return Err(RateLimitExceeded::Writes(max_writes));
            }
        }

        Ok(())
    }

    pub fn usage(&self, agent_id: &str, session_id: &str) -> Usage {
        let key = (agent_id.to_string(), session_id.to_string());
        self.counters
            .read()
            .get(&key)
            .map(|c| Usage {
                tool_calls: c.calls.load(Ordering::Acquire),
                writes: c.writes.load(Ordering::Acquire),
            })
            .unwrap_or_default()
    }

    /// Forget the counters of a finished session.
    pub fn release_session(&self, session_id: &str) {
        self.counters.write().retain(|(_, s), _| s != session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_ceiling_applies_to_every_tool() {
        let limiter = RateLimiter::new(3, 2);
        for _ in 0..3 {
            limiter.try_acquire("a", "s", false).unwrap();
        }
        assert_eq!(limiter.try_acquire("a", "s", false), Err(RateLimitExceeded::ToolCalls(3)));
        assert_eq!(limiter.try_acquire("a", "s", true), Err(RateLimitExceeded::ToolCalls(3)));
    }

    #[test]
    fn write_ceiling_leaves_reads_available() {
        let limiter = RateLimiter::new(10, 2);
        limiter.try_acquire("a", "s", true).unwrap();
        limiter.try_acquire("a", "s", true).unwrap();
        assert_eq!(limiter.try_acquire("a", "s", true), Err(RateLimitExceeded::Writes(2)));
        limiter.try_acquire("a", "s", false).unwrap();

        // the refused write did not consume a call
        assert_eq!(limiter.usage("a", "s"), Usage { tool_calls: 3, writes: 2 });
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(1, 1);
        limiter.try_acquire("a", "s1", false).unwrap();
        limiter.try_acquire("a", "s2", false).unwrap();
        limiter.try_acquire("b", "s1", false).unwrap();
        assert!(limiter.try_acquire("a", "s1", false).is_err());
    }

    #[test]
    fn release_session_resets_only_that_session() {
        let limiter = RateLimiter::new(1, 1);
        limiter.try_acquire("a", "s1", false).unwrap();
        limiter.try_acquire("a", "s2", false).unwrap();
        limiter.release_session("s1");
        assert_eq!(limiter.usage("a", "s1"), Usage::default());
        assert_eq!(limiter.usage("a", "s2").tool_calls, 1);
    }

    #[test]
    fn concurrent_callers_never_exceed_the_ceiling() {
        let limiter = Arc::new(RateLimiter::new(100, 100));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| limiter.try_acquire("a", "s", false).is_ok())
                        .count()
                })
            })
            .collect();

        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 100);
        assert_eq!(limiter.usage("a", "s").tool_calls, 100);
    }
}
