//! Ledger record and export types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use portcullis_contracts::{
    audit::{AuditEntry, RequestId},
    outcome::Outcome,
};

/// What the gateway knows about one finished request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request_id: RequestId,
    pub outcome: Outcome,
    pub entries: Vec<AuditEntry>,
    pub recorded_at: DateTime<Utc>,
}

/// One link in the ledger's hash chain.
///
/// `this_hash` commits to the ledger name, `sequence`, `prev_hash` and the
/// canonical JSON of `record`. Editing any of them breaks the chain from
/// this link onward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub sequence: u64,
    pub ledger: String,
    pub record: RequestRecord,
    pub prev_hash: String,
    pub this_hash: String,
}

impl LedgerEvent {
    /// `prev_hash` of the first event.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";
}

/// A point-in-time copy of a ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerExport {
    pub ledger: String,
    pub events: Vec<LedgerEvent>,
    pub exported_at: DateTime<Utc>,
    /// `this_hash` of the last event, empty when there are none.
    pub terminal_hash: String,
}
