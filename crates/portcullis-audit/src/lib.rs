//! # portcullis-audit
//!
//! Append-only, SHA-256 hash-chained ledger of finished requests.
//!
//! ## Overview
//!
//! [`InMemoryAuditSink`] implements
//! [`AuditSink`](portcullis_core::traits::AuditSink). Each request the policy
//! service finishes becomes a [`LedgerEvent`] linked to the previous one by
//! its hash, so editing, dropping or reordering a stored record is detected
//! by [`verify_chain`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use portcullis_audit::InMemoryAuditSink;
//!
//! let sink = Arc::new(InMemoryAuditSink::new("orders-api"));
//! let service = PolicyService::new(Arc::new(registry), sink.clone());
//! service.handle(ExecutionContext::new());
//!
//! assert!(sink.verify_integrity());
//! let export = sink.export_log();
//! ```

pub mod chain;
pub mod memory;
pub mod record;

pub use chain::{first_broken_link, hash_record, verify_chain};
pub use memory::InMemoryAuditSink;
pub use record::{LedgerEvent, LedgerExport, RequestRecord};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use chrono::Utc;

    use portcullis_contracts::{
        audit::{AuditEntry, AuditLevel, RequestId},
        outcome::{Outcome, Status},
    };
    use portcullis_core::traits::AuditSink;

    use super::{first_broken_link, verify_chain, InMemoryAuditSink, LedgerEvent};

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn entry(source: &str, message: &str) -> AuditEntry {
        AuditEntry {
            timestamp: Utc::now(),
            level: AuditLevel::Info,
            source: source.to_string(),
            message: message.to_string(),
        }
    }

    /// Write `n` requests, alternating success and quota denial.
    fn filled(n: usize) -> (InMemoryAuditSink, Vec<RequestId>) {
        let sink = InMemoryAuditSink::new("test-ledger");
        let mut ids = Vec::new();
        for i in 0..n {
            let id = RequestId::new();
            let outcome = if i % 2 == 0 {
                Outcome::success()
            } else {
                Outcome::falsified("quota 'orders' exceeded")
            };
            sink.write(&id, &outcome, &[entry("throughput-quota", &format!("request {}", i))]).unwrap();
            ids.push(id);
        }
        (sink, ids)
    }

    // ── Chain ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_hash_chain_integrity() {
        let (sink, _) = filled(3);
        assert_eq!(sink.len(), 3);
        assert!(sink.verify_integrity(), "chain must be valid after sequential writes");
    }

    #[test]
    fn test_genesis_and_sequence() {
        let (sink, _) = filled(3);
        let log = sink.export_log();

        assert_eq!(log.events[0].prev_hash, LedgerEvent::GENESIS_HASH);
        for (idx, event) in log.events.iter().enumerate() {
            assert_eq!(event.sequence, idx as u64);
            if idx > 0 {
                assert_eq!(event.prev_hash, log.events[idx - 1].this_hash);
            }
        }
    }

    #[test]
    fn test_verify_empty() {
        let sink = InMemoryAuditSink::new("empty");
        assert!(sink.is_empty());
        assert!(sink.verify_integrity());
        assert!(verify_chain(&[]));
        assert_eq!(sink.export_log().terminal_hash, "");
    }

    // ── Tamper detection ──────────────────────────────────────────────────────

    /// Rewriting a stored outcome breaks the chain at that record.
    #[test]
    fn test_outcome_tamper_detected() {
        let (sink, _) = filled(3);
        sink.state.lock().events[1].record.outcome = Outcome::success();

        assert!(!sink.verify_integrity());
        assert_eq!(first_broken_link(&sink.export_log().events), Some(1));
    }

    #[test]
    fn test_entry_tamper_detected() {
        let (sink, _) = filled(3);
        sink.state.lock().events[2].record.entries.clear();
        assert_eq!(first_broken_link(&sink.export_log().events), Some(2));
    }

    /// Dropping a record breaks linkage even though every hash is intact.
    #[test]
    fn test_removed_record_detected() {
        let (sink, _) = filled(4);
        let mut events = sink.export_log().events;
        events.remove(1);
        assert_eq!(first_broken_link(&events), Some(1));
    }

    #[test]
    fn test_reordered_records_detected() {
        let (sink, _) = filled(3);
        let mut events = sink.export_log().events;
        events.swap(0, 1);
        assert!(!verify_chain(&events));
    }

    // ── Export ────────────────────────────────────────────────────────────────

    #[test]
    fn test_export_log() {
        let (sink, ids) = filled(3);
        let log = sink.export_log();

        assert_eq!(log.ledger, "test-ledger");
        assert_eq!(log.events.len(), 3);
        assert_eq!(log.terminal_hash, log.events.last().unwrap().this_hash);

        let record = sink.record(&ids[1]).unwrap();
        assert_eq!(record.outcome.status, Status::Falsified);
        assert_eq!(record.entries[0].message, "request 1");
        assert!(sink.record(&RequestId::new()).is_none());
    }

    /// An exported ledger survives a JSON round trip and still verifies.
    #[test]
    fn test_export_serializes() {
        let (sink, _) = filled(2);
        let json = serde_json::to_string(&sink.export_log()).unwrap();
        let restored: super::LedgerExport = serde_json::from_str(&json).unwrap();
        assert!(verify_chain(&restored.events));
    }

    // ── Concurrency ───────────────────────────────────────────────────────────

    #[test]
    fn test_concurrent_writes_form_one_chain() {
        let sink = Arc::new(InMemoryAuditSink::new("concurrent"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sink = sink.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        sink.write(&RequestId::new(), &Outcome::success(), &[]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(sink.len(), 200);
        assert!(sink.verify_integrity());
    }
}
