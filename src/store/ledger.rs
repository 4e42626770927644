//! Idempotency ledger.
//!
//! Append-only set of operation ids already applied remotely. Checked before
//! every remote attempt; written only after a remote call is confirmed
//! successful. Combined with the server-side `(operation_id, user_id)` dedup
//! this gives at-most-once remote effects across retries.
//!
//! Keys: `ledger/{operation_id}`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{OperationId, Timestamp};

use super::kv::{decode, encode, KvStore, StoreError};

const PREFIX: &str = "ledger/";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct LedgerRecord {
    operation_id: OperationId,
    applied_at: Timestamp,
}

#[derive(Clone)]
pub struct IdempotencyLedger {
    kv: Arc<dyn KvStore>,
}

impl IdempotencyLedger {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn key(operation_id: OperationId) -> String {
        format!("{PREFIX}{}", operation_id)
    }

    pub fn is_applied(&self, operation_id: OperationId) -> Result<bool, StoreError> {
        Ok(self.kv.get(&Self::key(operation_id))?.is_some())
    }

    pub fn record(&self, operation_id: OperationId, applied_at: Timestamp) -> Result<(), StoreError> {
        let record = LedgerRecord {
            operation_id,
            applied_at,
        };
        self.kv.put(&Self::key(operation_id), encode(&record)?)
    }

    pub fn applied_at(&self, operation_id: OperationId) -> Result<Option<Timestamp>, StoreError> {
        let key = Self::key(operation_id);
        match self.kv.get(&key)? {
            Some(bytes) => {
                let record: LedgerRecord = decode(&key, &bytes)?;
                Ok(Some(record.applied_at))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv::MemoryKv;

    #[test]
    fn record_then_is_applied() {
        let ledger = IdempotencyLedger::new(Arc::new(MemoryKv::new()));
        let op = OperationId::random();

        assert!(!ledger.is_applied(op).unwrap());
        ledger.record(op, Timestamp(100)).unwrap();
        assert!(ledger.is_applied(op).unwrap());
        assert_eq!(ledger.applied_at(op).unwrap(), Some(Timestamp(100)));
    }

    #[test]
    fn re_record_is_harmless() {
        let ledger = IdempotencyLedger::new(Arc::new(MemoryKv::new()));
        let op = OperationId::random();
        ledger.record(op, Timestamp(100)).unwrap();
        ledger.record(op, Timestamp(200)).unwrap();
        assert!(ledger.is_applied(op).unwrap());
    }
}
