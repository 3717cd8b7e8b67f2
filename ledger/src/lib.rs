// ledger/src/lib.rs
//! Storage layer for the commonpool engine: users, requests, the global
//! fund and the settlement log, behind one [`LedgerStore`] contract.
//!
//! Reads are plain getters. Every write goes through a [`WritePlan`] that the
//! adapter applies atomically, with per-record version checks.
pub mod adapters;
pub mod error;
pub mod fund;
pub mod money;
pub mod plan;
pub mod request;
pub mod transaction;
pub mod user;

pub use error::StoreError;
pub use fund::GlobalFund;
pub use money::Money;
pub use plan::{Expectation, Operation, WritePlan};
pub use request::{Request, RequestKind, RequestStatus, RequestType, Resolution};
pub use transaction::{TransactionLogEntry, settlement_key};
pub use user::User;

use async_trait::async_trait;
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

pub(crate) fn hash_key(key: &str) -> String {
    blake3::hash(key.as_bytes()).to_hex().to_string()
}

/// Ledger store contract
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Apply the complete plan atomically.
    /// Implementors MUST:
    /// 1. Check every expectation in `plan.expectations()` before writing
    /// 2. Fail with `VersionConflict` (and write nothing) on any mismatch
    /// 3. Fail with `Duplicate` (and write nothing) if a log id already exists
    /// 4. Store each put record with its version incremented by one
    async fn execute_plan(&self, plan: &WritePlan) -> Result<(), StoreError>;

    // READ OPERATIONS
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn get_users(&self) -> Result<Vec<User>, StoreError>;
    async fn count_users(&self) -> Result<u64, StoreError>;
    async fn get_request(&self, id: Uuid) -> Result<Option<Request>, StoreError>;
    async fn get_requests(&self) -> Result<Vec<Request>, StoreError>;
    /// `None` until the fund has been saved for the first time.
    async fn get_global_fund(&self) -> Result<Option<GlobalFund>, StoreError>;
    async fn get_transaction_log(&self) -> Result<Vec<TransactionLogEntry>, StoreError>;

    // BULK WRITES
    async fn save_users(&self, users: &[User]) -> Result<(), StoreError> {
        let mut plan = WritePlan::new();
        for user in users {
            plan.add(Operation::PutUser { user: user.clone() });
        }
        self.execute_plan(&plan).await
    }

    async fn save_requests(&self, requests: &[Request]) -> Result<(), StoreError> {
        let mut plan = WritePlan::new();
        for request in requests {
            plan.add(Operation::PutRequest {
                request: request.clone(),
            });
        }
        self.execute_plan(&plan).await
    }

    async fn save_global_fund(&self, fund: &GlobalFund) -> Result<(), StoreError> {
        self.execute_plan(&WritePlan::new().put_fund(fund.clone()))
            .await
    }

    async fn append_transaction_log(&self, entry: &TransactionLogEntry) -> Result<(), StoreError> {
        self.execute_plan(&WritePlan::new().append_log(entry.clone()))
            .await
    }
}

/// Shared handle to a store adapter that records plan metrics.
#[derive(Clone)]
pub struct LedgerSystem {
    adapter: Arc<dyn LedgerStore>,
}

impl LedgerSystem {
    pub fn new(adapter: Box<dyn LedgerStore>) -> Self {
        Self {
            adapter: adapter.into(),
        }
    }

    pub fn from_arc(adapter: Arc<dyn LedgerStore>) -> Self {
        Self { adapter }
    }

    /// Get adapter reference
    pub fn adapter(&self) -> &dyn LedgerStore {
        self.adapter.as_ref()
    }

    /// Get adapter Arc
    pub fn adapter_arc(&self) -> Arc<dyn LedgerStore> {
        Arc::clone(&self.adapter)
    }

    pub async fn execute(&self, plan: &WritePlan) -> Result<(), StoreError> {
        let start = Instant::now();
        let result = self.adapter.execute_plan(plan).await;

        histogram!("ledger.plan.duration_ms").record(start.elapsed().as_secs_f64() * 1000.0);
        counter!("ledger.plans.total",
            "status" => match &result {
                Ok(()) => "success",
                Err(e) if e.is_version_conflict() => "conflict",
                Err(_) => "failed",
            }
        )
        .increment(1);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_key_is_hex_blake3() {
        let key = hash_key("settlement:abc");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(key, hash_key("settlement:abd"));
    }
}
