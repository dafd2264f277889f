//! In-memory `AuditSink`.
//!
//! Every finished request becomes one `LedgerEvent` appended to a single
//! chain shared by all requests. Writes are serialized by a mutex, so the
//! chain order is the order in which requests finished.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use portcullis_contracts::{
    audit::{AuditEntry, RequestId},
    error::GatewayResult,
    outcome::Outcome,
};
use portcullis_core::traits::AuditSink;

use crate::{
    chain::{first_broken_link, hash_record},
    record::{LedgerEvent, LedgerExport, RequestRecord},
};

pub(crate) struct LedgerState {
    pub(crate) events: Vec<LedgerEvent>,
    pub(crate) last_hash: String,
}

pub struct InMemoryAuditSink {
    ledger: String,
    pub(crate) state: Arc<Mutex<LedgerState>>,
}

impl InMemoryAuditSink {
    pub fn new(ledger: impl Into<String>) -> Self {
        Self {
            ledger: ledger.into(),
            state: Arc::new(Mutex::new(LedgerState {
                events: Vec::new(),
                last_hash: LedgerEvent::GENESIS_HASH.to_string(),
            })),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The record written for `request_id`, if any.
    pub fn record(&self, request_id: &RequestId) -> Option<RequestRecord> {
        self.state
            .lock()
            .events
            .iter()
            .find(|e| &e.record.request_id == request_id)
            .map(|e| e.record.clone())
    }

    pub fn export_log(&self) -> LedgerExport {
        let state = self.state.lock();
        LedgerExport {
            ledger: self.ledger.clone(),
            events: state.events.clone(),
            exported_at: Utc::now(),
            terminal_hash: state.events.last().map(|e| e.this_hash.clone()).unwrap_or_default(),
        }
    }

    pub fn verify_integrity(&self) -> bool {
        first_broken_link(&self.state.lock().events).is_none()
    }
}

impl AuditSink for InMemoryAuditSink {
    /// Append one request to the chain.
    ///
    /// Fails with `AuditWriteFailed` only when the record cannot be
    /// serialized; the chain is left unchanged in that case.
    fn write(&self, request_id: &RequestId, outcome: &Outcome, entries: &[AuditEntry]) -> GatewayResult<()> {
        let record = RequestRecord {
            request_id: request_id.clone(),
            outcome: outcome.clone(),
            entries: entries.to_vec(),
            recorded_at: Utc::now(),
        };

        let mut state = self.state.lock();
        let sequence = state.events.len() as u64;
        let prev_hash = state.last_hash.clone();
        let this_hash = hash_record(&self.ledger, sequence, &record, &prev_hash)?;

        state.events.push(LedgerEvent {
            sequence,
            ledger: self.ledger.clone(),
            record,
            prev_hash,
            this_hash: this_hash.clone(),
        });
        state.last_hash = this_hash;

        debug!(
            ledger = %self.ledger,
            request_id = %request_id,
            sequence,
            status = %outcome.status,
            "request audited"
        );
        Ok(())
    }
}
