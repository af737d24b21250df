//! Audit logging — append-only record of permission denials.
//!
//! Approvals are silent; only denials are recorded. Entries are kept in a
//! bounded in-memory ring and forwarded to every configured sink.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

pub const DEFAULT_AUDIT_CAPACITY: usize = 1000;

/// A single denial record. Never mutated after it is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionDenial {
    pub agent_id: String,
    pub session_id: String,
    pub tool_name: String,
    /// Which rule fired (for operators, not for the agent)
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DenialStats {
    pub total: usize,
    /// Most denied first
    pub by_tool: Vec<(String, usize)>,
    pub by_agent: Vec<(String, usize)>,
}

/// Trait for audit log sinks (where denials are written).
pub trait AuditSink: Send + Sync {
    fn record(&self, denial: &PermissionDenial);
}

pub struct AuditLogger {
    entries: Mutex<VecDeque<PermissionDenial>>,
    capacity: usize,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entry_count", &self.count())
            .field("capacity", &self.capacity)
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

impl AuditLogger {
    /// Create a new audit logger with no sinks.
    pub fn new(capacity: usize) -> Self {
        Self::with_sinks(capacity, Vec::new())
    }

    /// Create a new audit logger with the given sinks.
    pub fn with_sinks(capacity: usize, sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            sinks,
        }
    }

    pub fn log(&self, denial: PermissionDenial) {
        for sink in &self.sinks {
            sink.record(&denial);
        }

        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(denial);
    }

    /// Newest first, optionally for one agent.
    pub fn recent_denials(&self, limit: usize, agent_id: Option<&str>) -> Vec<PermissionDenial> {
        self.entries
            .lock()
            .iter()
            .rev()
            .filter(|d| agent_id.is_none_or(|a| d.agent_id == a))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn denial_stats(&self) -> DenialStats {
        let entries = self.entries.lock();
        let mut by_tool: HashMap<&str, usize> = HashMap::new();
        let mut by_agent: HashMap<&str, usize> = HashMap::new();
        for d in entries.iter() {
            *by_tool.entry(d.tool_name.as_str()).or_default() += 1;
            *by_agent.entry(d.agent_id.as_str()).or_default() += 1;
        }
        DenialStats {
            total: entries.len(),
            by_tool: ranked(by_tool),
            by_agent: ranked(by_agent),
        }
    }

    /// Count of stored entries.
    pub fn count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

fn ranked(counts: HashMap<&str, usize>) -> Vec<(String, usize)> {
    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

/// A tracing-based audit sink that logs denials via `tracing::warn!`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, denial: &PermissionDenial) {
        tracing::warn!(
            agent = %denial.agent_id,
            session = %denial.session_id,
            tool = %denial.tool_name,
            reason = %denial.reason,
            path = ?denial.path,
            "AUDIT"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn denial(agent: &str, tool: &str) -> PermissionDenial {
        PermissionDenial {
            agent_id: agent.into(),
            session_id: "s1".into(),
            tool_name: tool.into(),
            reason: "test".into(),
            path: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn recent_denials_newest_first() {
        let logger = AuditLogger::default();
        logger.log(denial("a1", "code_write"));
        logger.log(denial("a2", "build"));
        logger.log(denial("a1", "git_commit"));

        let recent = logger.recent_denials(10, None);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].tool_name, "git_commit");

        let for_a1 = logger.recent_denials(1, Some("a1"));
        assert_eq!(for_a1.len(), 1);
        assert_eq!(for_a1[0].tool_name, "git_commit");
    }

    #[test]
    fn stats_rank_by_count() {
        let logger = AuditLogger::default();
        logger.log(denial("a1", "code_write"));
        logger.log(denial("a1", "code_write"));
        logger.log(denial("a2", "build"));

        let stats = logger.denial_stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_tool[0], ("code_write".to_string(), 2));
        assert_eq!(stats.by_agent[0], ("a1".to_string(), 2));
    }

    #[test]
    fn ring_is_bounded() {
        let logger = AuditLogger::new(2);
        logger.log(denial("a1", "one"));
        logger.log(denial("a1", "two"));
        logger.log(denial("a1", "three"));
        assert_eq!(logger.count(), 2);
        assert_eq!(logger.recent_denials(5, None)[1].tool_name, "two");
    }

    #[test]
    fn custom_sink_receives_denials() {
        struct CountingSink {
            count: Arc<std::sync::atomic::AtomicUsize>,
        }
        impl AuditSink for CountingSink {
            fn record(&self, _denial: &PermissionDenial) {
                self.count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }

        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let logger = AuditLogger::with_sinks(
            10,
            vec![
                Box::new(CountingSink { count: count.clone() }),
                Box::new(TracingSink),
            ],
        );
        logger.log(denial("a", "t"));
        logger.log(denial("a", "t"));
        assert_eq!(count.load(std::sync::atomic::Ordering::Relaxed), 2);

        logger.clear();
        assert_eq!(logger.count(), 0);
    }
}
