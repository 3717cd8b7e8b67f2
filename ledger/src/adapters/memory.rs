// ledger/src/adapters/memory.rs
use crate::{
    Expectation, GlobalFund, LedgerStore, Operation, Request, StoreError, TransactionLogEntry,
    User, WritePlan,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    users: BTreeMap<Uuid, User>,
    requests: BTreeMap<Uuid, Request>,
    fund: Option<GlobalFund>,
    transactions: Vec<TransactionLogEntry>,
    transaction_ids: HashSet<String>,
}

impl MemoryState {
    fn stored_version(&self, expectation: &Expectation) -> u64 {
        match expectation {
            Expectation::User { id, .. } => self.users.get(id).map_or(0, |u| u.version),
            Expectation::Request { id, .. } => self.requests.get(id).map_or(0, |r| r.version),
            Expectation::Fund { .. } => self.fund.as_ref().map_or(0, |f| f.version),
        }
    }
}

/// In-process store. A single mutex around all state makes every plan atomic.
///
/// `Clone` shares the underlying state.
#[derive(Clone, Default)]
pub struct MemoryAdapter {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check(state: &MemoryState, plan: &WritePlan) -> Result<(), StoreError> {
    for expectation in plan.expectations() {
        let found = state.stored_version(&expectation);
        let (entity, id, expected) = match expectation {
            Expectation::User { id, version } => ("user", id, version),
            Expectation::Request { id, version } => ("request", id, version),
            Expectation::Fund { version } => ("fund", Uuid::nil(), version),
        };
        if found != expected {
            return Err(StoreError::VersionConflict {
                entity,
                id,
                expected,
                found,
            });
        }
    }

    let mut appended = HashSet::new();
    for op in plan.operations() {
        if let Operation::AppendLog { entry } = op {
            if state.transaction_ids.contains(&entry.id) || !appended.insert(entry.id.as_str()) {
                return Err(StoreError::Duplicate(format!("transaction {}", entry.id)));
            }
        }
    }

    Ok(())
}

#[async_trait]
impl LedgerStore for MemoryAdapter {
    async fn execute_plan(&self, plan: &WritePlan) -> Result<(), StoreError> {
        let mut state = self.lock();

        // Step 1: verify everything up front so a failure writes nothing
        check(&state, plan)?;

        // Step 2: apply
        for op in plan.operations() {
            match op {
                Operation::PutUser { user } => {
                    let mut stored = user.clone();
                    stored.version += 1;
                    state.users.insert(stored.id, stored);
                }
                Operation::PutRequest { request } => {
                    let mut stored = request.clone();
                    stored.version += 1;
                    state.requests.insert(stored.id, stored);
                }
                Operation::PutFund { fund } => {
                    let mut stored = fund.clone();
                    stored.version += 1;
                    state.fund = Some(stored);
                }
                Operation::AppendLog { entry } => {
                    state.transaction_ids.insert(entry.id.clone());
                    state.transactions.push(entry.clone());
                }
            }
        }

        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn get_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.lock().users.values().cloned().collect())
    }

    async fn count_users(&self) -> Result<u64, StoreError> {
        Ok(self.lock().users.len() as u64)
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<Request>, StoreError> {
        Ok(self.lock().requests.get(&id).cloned())
    }

    async fn get_requests(&self) -> Result<Vec<Request>, StoreError> {
        Ok(self.lock().requests.values().cloned().collect())
    }

    async fn get_global_fund(&self) -> Result<Option<GlobalFund>, StoreError> {
        Ok(self.lock().fund.clone())
    }

    async fn get_transaction_log(&self) -> Result<Vec<TransactionLogEntry>, StoreError> {
        Ok(self.lock().transactions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Money, RequestKind, Resolution};

    fn user(name: &str) -> User {
        User::new(name, format!("{}@example.com", name), Money::from_major(10_000))
    }

    #[tokio::test]
    async fn test_put_bumps_version() {
        let store = MemoryAdapter::new();
        let u = user("ravi");
        store.save_users(&[u.clone()]).await.unwrap();

        let stored = store.get_user(u.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);

        store.save_users(&[stored.clone()]).await.unwrap();
        assert_eq!(store.get_user(u.id).await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let store = MemoryAdapter::new();
        let u = user("meera");
        store.save_users(&[u.clone()]).await.unwrap();

        // Writing the never-persisted copy again must fail: stored version is 1
        let err = store.save_users(&[u.clone()]).await.unwrap_err();
        assert!(err.is_version_conflict());
    }

    #[tokio::test]
    async fn test_failed_plan_writes_nothing() {
        let store = MemoryAdapter::new();
        let u = user("kiran");
        store.save_users(&[u.clone()]).await.unwrap();

        let request = Request::new(u.id, RequestKind::Deposit, Money::from_major(5), "", 0);
        let plan = WritePlan::new()
            .put_request(request.clone())
            .put_fund(GlobalFund::new(Money::from_major(100)))
            // stale: stored user is at version 1
            .put_user(u.clone());

        assert!(store.execute_plan(&plan).await.is_err());
        assert!(store.get_request(request.id).await.unwrap().is_none());
        assert!(store.get_global_fund().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_log_entry_is_rejected() {
        let store = MemoryAdapter::new();
        let entry = TransactionLogEntry::settlement(
            Uuid::now_v7(),
            crate::RequestType::Loan,
            Uuid::now_v7(),
            Money::from_major(1),
            Resolution::Approved,
            chrono::Utc::now(),
        );

        store.append_transaction_log(&entry).await.unwrap();
        let err = store.append_transaction_log(&entry).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(store.get_transaction_log().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fund_absent_until_saved() {
        let store = MemoryAdapter::new();
        assert!(store.get_global_fund().await.unwrap().is_none());

        store
            .save_global_fund(&GlobalFund::new(Money::from_major(100_000)))
            .await
            .unwrap();
        let fund = store.get_global_fund().await.unwrap().unwrap();
        assert_eq!(fund.total_fund, Money::from_major(100_000));
        assert_eq!(fund.version, 1);
    }
}
