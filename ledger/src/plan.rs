// ledger/src/plan.rs
use crate::{GlobalFund, Request, TransactionLogEntry, User};
use uuid::Uuid;

/// One write inside a [`WritePlan`].
///
/// `Put*` operations are compare-and-swap on the record's `version`: the
/// stored version (0 when the record does not exist yet) must equal the
/// version carried here, and the record is stored as `version + 1`.
#[derive(Debug, Clone)]
pub enum Operation {
    PutUser { user: User },
    PutRequest { request: Request },
    PutFund { fund: GlobalFund },
    AppendLog { entry: TransactionLogEntry },
}

/// Which record a `Put*` operation expects to find, and at what version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    User { id: Uuid, version: u64 },
    Request { id: Uuid, version: u64 },
    Fund { version: u64 },
}

/// A batch of writes applied atomically by [`crate::LedgerStore::execute_plan`].
#[derive(Debug, Clone, Default)]
pub struct WritePlan {
    operations: Vec<Operation>,
}

impl WritePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_user(mut self, user: User) -> Self {
        self.operations.push(Operation::PutUser { user });
        self
    }

    pub fn put_request(mut self, request: Request) -> Self {
        self.operations.push(Operation::PutRequest { request });
        self
    }

    pub fn put_fund(mut self, fund: GlobalFund) -> Self {
        self.operations.push(Operation::PutFund { fund });
        self
    }

    pub fn append_log(mut self, entry: TransactionLogEntry) -> Self {
        self.operations.push(Operation::AppendLog { entry });
        self
    }

    pub fn add(&mut self, op: Operation) {
        self.operations.push(op);
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Version checks an adapter must pass before applying anything.
    pub fn expectations(&self) -> Vec<Expectation> {
        self.operations
            .iter()
            .filter_map(|op| match op {
                Operation::PutUser { user } => Some(Expectation::User {
                    id: user.id,
                    version: user.version,
                }),
                Operation::PutRequest { request } => Some(Expectation::Request {
                    id: request.id,
                    version: request.version,
                }),
                Operation::PutFund { fund } => Some(Expectation::Fund {
                    version: fund.version,
                }),
                Operation::AppendLog { .. } => None,
            })
            .collect()
    }
}
