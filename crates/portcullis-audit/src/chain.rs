//! Hash-chain primitives.
//!
//! Hash input layout, in order:
//!   1. ledger name as UTF-8
//!   2. sequence as 8-byte little-endian
//!   3. prev_hash as UTF-8 (64 hex chars)
//!   4. compact JSON of the record

use sha2::{Digest, Sha256};

use portcullis_contracts::error::{GatewayError, GatewayResult};

use crate::record::{LedgerEvent, RequestRecord};

/// SHA-256 of one ledger event, as lowercase hex.
pub fn hash_record(ledger: &str, sequence: u64, record: &RequestRecord, prev_hash: &str) -> GatewayResult<String> {
    let record_json = serde_json::to_vec(record).map_err(|e| GatewayError::AuditWriteFailed {
        reason: format!("record for request {} is not serializable: {}", record.request_id, e),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(ledger.as_bytes());
    hasher.update(sequence.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(&record_json);

    Ok(hex::encode(hasher.finalize()))
}

/// Check linkage, hash correctness and sequence numbering for `events`.
///
/// Returns the index of the first bad event, or `None` if the chain holds.
/// An empty chain holds.
pub fn first_broken_link(events: &[LedgerEvent]) -> Option<usize> {
    let mut expected_prev = LedgerEvent::GENESIS_HASH;

    for (index, event) in events.iter().enumerate() {
        if event.sequence != index as u64 || event.prev_hash != expected_prev {
            return Some(index);
        }
        match hash_record(&event.ledger, event.sequence, &event.record, &event.prev_hash) {
            Ok(recomputed) if recomputed == event.this_hash => {}
            _ => return Some(index),
        }
        expected_prev = event.this_hash.as_str();
    }

    None
}

pub fn verify_chain(events: &[LedgerEvent]) -> bool {
    first_broken_link(events).is_none()
}
