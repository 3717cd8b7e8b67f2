//! # Commonpool
//!
//! A community micro-finance engine. Members submit loan and deposit
//! requests against a shared pool; every other member votes; once a
//! request reaches quorum it is settled exactly once, moving money between
//! the requester and the pool.
//!
//! ## What's inside
//!
//! ### Quorum voting
//! A request needs `ceil(eligible * 0.8)` approvals, where everyone except
//! the requester is eligible. The count is fixed when the request is
//! submitted. It is rejected as soon as approval becomes impossible (or,
//! optionally, once a rejection threshold is met).
//!
//! ### Exactly-once settlement
//! Settlement is a pure function over the request, the members and the
//! pool. The engine persists its result as one atomic [`ledger::WritePlan`]
//! with version checks on every record, under a per-request lock and a
//! single lock for money movement. The settlement log entry id is derived
//! from the request id, so a request can never be logged twice.
//!
//! ### Best-effort notifications
//! Submissions, votes, settlements and cancellations are handed to a
//! [`notify::Notifier`] on a detached task. Delivery never blocks or fails
//! an operation.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use commonpool::{Engine, VoteType};
//! use ledger::{Money, RequestKind, adapters::MemoryAdapter};
//!
//! let engine = Engine::new(Box::new(MemoryAdapter::new()));
//! let asha = engine.register_user("Asha", "asha@example.com").await?;
//! let bina = engine.register_user("Bina", "bina@example.com").await?;
//!
//! let request = engine
//!     .submit_request(asha.id, RequestKind::Deposit, Money::from_major(500), "savings")
//!     .await?;
//! let outcome = engine.cast_vote(request.id, bina.id, VoteType::Approve).await?;
//! ```
//!
//! ## Feature flags
//!
//! | Flag     | Default | Description                       |
//! |----------|---------|-----------------------------------|
//! | `sqlite` | ✓       | SQLite ledger adapter via sqlx    |

pub mod api;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod locks;
pub mod notify;
pub mod quorum;
pub mod retry;
pub mod settlement;
pub mod vote;

pub use ledger;

pub use crate::api::{HistoryFilter, MemberSummary, RequestDetail, RequestSummary};
pub use crate::config::{EngineConfig, FundPolicy, RejectionRule};
pub use crate::error::Error;
pub use crate::notify::{LogNotifier, NoopNotifier, Notification, Notifier};
pub use crate::quorum::QuorumPolicy;
pub use crate::vote::{VoteOutcome, VoteType};

use crate::locks::KeyedLocks;
use crate::retry::{CycleError, RetryPolicy};
use crate::settlement::{Finalization, SettlementRules};
use chrono::Utc;
use ledger::{
    GlobalFund, LedgerStore, LedgerSystem, Money, Request, RequestKind, Resolution, StoreError,
    TransactionLogEntry, User, WritePlan,
};
use metrics::{counter, histogram};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use uuid::Uuid;

/// The Engine is the entry point for every member-facing operation.
/// Cloning is cheap; clones share locks and the store.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Commonpool>,
}

pub struct Commonpool {
    ledger: LedgerSystem,
    config: EngineConfig,
    rules: SettlementRules,
    retry: RetryPolicy,
    notifier: Arc<dyn Notifier>,
    request_locks: KeyedLocks<Uuid>,
    /// Held by every cycle that may move money or change membership.
    ledger_lock: Mutex<()>,
}

/// A plan that made it to the store, with versions bumped to match.
struct Committed {
    request: Request,
    users: Vec<User>,
    fund: GlobalFund,
    finalization: Finalization,
}

fn find(users: &[User], id: Uuid) -> Option<&User> {
    users.iter().find(|u| u.id == id)
}

fn vote_outcome(
    request: Request,
    users: Vec<User>,
    global_fund: GlobalFund,
    resolution: Option<Resolution>,
    voter: &User,
) -> (VoteOutcome, Vec<User>) {
    let requester_balance = find(&users, request.user_id)
        .map(|u| u.account_balance)
        .unwrap_or(Money::ZERO);
    let voter_balance = find(&users, voter.id)
        .map(|u| u.account_balance)
        .unwrap_or(voter.account_balance);

    let outcome = VoteOutcome {
        request,
        global_fund,
        requester_balance,
        voter_balance,
        resolution,
    };
    (outcome, users)
}

fn validate_submission(kind: &RequestKind, amount: Money, details: &str) -> Result<(), Error> {
    if !amount.is_positive() {
        return Err(Error::Validation(
            "amount must be greater than zero".to_string(),
        ));
    }
    if details.trim().is_empty() {
        return Err(Error::Validation("details are required".to_string()));
    }
    if let RequestKind::Loan { title, category } = kind {
        if title.trim().is_empty() || category.trim().is_empty() {
            return Err(Error::Validation(
                "loan requests need a title and a category".to_string(),
            ));
        }
    }
    Ok(())
}

impl Engine {
    /// Engine with the default configuration and no notifications.
    pub fn new(adapter: Box<dyn LedgerStore>) -> Self {
        Self::with_config(adapter, EngineConfig::default())
    }

    /// `config` is used as given; load it through
    /// [`EngineConfig::from_file`] or [`EngineConfig::from_env`] to validate it.
    pub fn with_config(adapter: Box<dyn LedgerStore>, config: EngineConfig) -> Self {
        Self::from_parts(LedgerSystem::new(adapter), config, Arc::new(NoopNotifier))
    }

    pub fn from_parts(
        ledger: LedgerSystem,
        config: EngineConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inner: Arc::new(Commonpool {
                ledger,
                rules: SettlementRules::from_config(&config),
                retry: RetryPolicy::from_config(&config),
                config,
                notifier,
                request_locks: KeyedLocks::new(),
                ledger_lock: Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn ledger(&self) -> &LedgerSystem {
        &self.inner.ledger
    }

    // ==================== Store access ====================

    fn store(&self) -> &dyn LedgerStore {
        self.inner.ledger.adapter()
    }

    async fn read_users(&self) -> Result<Vec<User>, StoreError> {
        self.inner
            .retry
            .store("get_users", || self.store().get_users())
            .await
    }

    async fn read_requests(&self) -> Result<Vec<Request>, StoreError> {
        self.inner
            .retry
            .store("get_requests", || self.store().get_requests())
            .await
    }

    async fn read_request(&self, id: Uuid) -> Result<Option<Request>, StoreError> {
        self.inner
            .retry
            .store("get_request", || self.store().get_request(id))
            .await
    }

    /// The stored pool, or a fresh one holding `initial_fund` if none was
    /// ever saved.
    async fn load_fund(&self) -> Result<GlobalFund, StoreError> {
        let fund = self
            .inner
            .retry
            .store("get_global_fund", || self.store().get_global_fund())
            .await?;
        Ok(fund.unwrap_or_else(|| GlobalFund::new(self.inner.config.initial_fund)))
    }

    async fn commit(&self, plan: &WritePlan) -> Result<(), StoreError> {
        self.inner
            .retry
            .store("execute_plan", || self.inner.ledger.execute(plan))
            .await
    }

    fn notify(&self, notification: Notification) {
        notify::dispatch(
            Arc::clone(&self.inner.notifier),
            notification,
            self.inner.config.notify_timeout(),
        );
    }

    /// Persist `request` after giving settlement a chance to finalize it.
    ///
    /// The caller holds the request lock. The ledger lock is taken only when
    /// a threshold is met, and members are re-read under it so balances are
    /// never settled from a stale snapshot.
    async fn settle_and_commit(
        &self,
        mut request: Request,
        mut users: Vec<User>,
    ) -> Result<Committed, CycleError> {
        let eligible = QuorumPolicy::eligible_voters(users.len());
        let _ledger = match settlement::decide(&request, eligible, &self.inner.rules.quorum) {
            Some(_) => {
                let guard = self.inner.ledger_lock.lock().await;
                users = self.read_users().await?;
                Some(guard)
            }
            None => None,
        };
        let mut fund = self.load_fund().await?;

        let request_id = request.id;
        let finalization = settlement::try_finalize(
            &mut request,
            &mut users,
            &mut fund,
            &self.inner.rules,
            Utc::now(),
        )
        .inspect_err(|e| error!(%request_id, error = %e, "settlement aborted"))?;

        let mut plan = WritePlan::new().put_request(request.clone());
        if let Finalization::Settled {
            money_moved, entry, ..
        } = &finalization
        {
            if *money_moved {
                if let Some(requester) = find(&users, request.user_id) {
                    plan = plan.put_user(requester.clone());
                }
                plan = plan.put_fund(fund.clone());
            }
            plan = plan.append_log(entry.clone());
        }
        self.commit(&plan).await?;

        request.version += 1;
        if finalization.money_moved() {
            fund.version += 1;
            if let Some(requester) = users.iter_mut().find(|u| u.id == request.user_id) {
                requester.version += 1;
            }
        }

        if let Some(resolution) = finalization.resolution() {
            counter!("commonpool.settlements.total",
                "outcome" => settlement::outcome_label(resolution)
            )
            .increment(1);
            if finalization.money_moved() {
                histogram!("commonpool.settlement.amount",
                    "type" => request.request_type().as_str()
                )
                .record(request.amount.to_display());
            }
            info!(
                %request_id,
                resolution = resolution.as_str(),
                amount = %request.amount,
                fund = %fund.total_fund,
                "request settled"
            );
        }

        Ok(Committed {
            request,
            users,
            fund,
            finalization,
        })
    }

    fn notify_finalized(&self, request: &Request, users: &[User]) {
        if let Some(requester) = find(users, request.user_id) {
            self.notify(Notification::RequestFinalized {
                request: request.clone(),
                requester: requester.clone(),
                voters: request
                    .voters()
                    .filter_map(|id| find(users, id).cloned())
                    .collect(),
            });
        }
    }

    // ==================== Members ====================

    /// Register a member with the configured opening balance. Emails are
    /// unique, compared case-insensitively. The first registration also
    /// creates the pool.
    pub async fn register_user(&self, name: &str, email: &str) -> Result<User, Error> {
        let name = name.trim();
        let email = email.trim();
        if name.is_empty() {
            return Err(Error::Validation("name is required".to_string()));
        }
        if !email.contains('@') {
            return Err(Error::Validation("a valid email is required".to_string()));
        }

        let user = self
            .inner
            .retry
            .cycle("register_user", || self.register_once(name, email))
            .await?;

        info!(user_id = %user.id, balance = %user.account_balance, "member registered");
        self.notify(Notification::Registered { user: user.clone() });
        Ok(user)
    }

    async fn register_once(&self, name: &str, email: &str) -> Result<User, CycleError> {
        let _ledger = self.inner.ledger_lock.lock().await;

        let users = self.read_users().await?;
        if users.iter().any(|u| u.email.eq_ignore_ascii_case(email)) {
            return Err(Error::Conflict(format!("email {} is already registered", email)).into());
        }

        let mut user = User::new(name, email, self.inner.config.initial_balance);
        let mut plan = WritePlan::new().put_user(user.clone());
        let fund = self
            .inner
            .retry
            .store("get_global_fund", || self.store().get_global_fund())
            .await?;
        if fund.is_none() {
            plan = plan.put_fund(GlobalFund::new(self.inner.config.initial_fund));
        }
        self.commit(&plan).await?;

        user.version += 1;
        Ok(user)
    }

    pub async fn user(&self, id: Uuid) -> Result<User, Error> {
        self.inner
            .retry
            .store("get_user", || self.store().get_user(id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {}", id)))
    }

    pub async fn users(&self) -> Result<Vec<User>, Error> {
        Ok(self.read_users().await?)
    }

    // ==================== Requests ====================

    /// Open a loan or deposit for voting. `votes_required` is computed from
    /// the membership at this instant and never changes afterwards. In a
    /// community of one nobody can vote, so the request settles immediately.
    pub async fn submit_request(
        &self,
        user_id: Uuid,
        kind: RequestKind,
        amount: Money,
        details: &str,
    ) -> Result<Request, Error> {
        validate_submission(&kind, amount, details)?;
        let details = details.trim();

        let committed = self
            .inner
            .retry
            .cycle("submit_request", || {
                self.submit_once(user_id, &kind, amount, details)
            })
            .await?;
        let request = committed.request;
        let users = committed.users;

        counter!("commonpool.requests.total", "type" => request.request_type().as_str())
            .increment(1);
        info!(
            request_id = %request.id,
            %user_id,
            kind = %request.request_type(),
            amount = %request.amount,
            votes_required = request.votes_required,
            "request submitted"
        );

        if let Some(requester) = find(&users, user_id) {
            self.notify(Notification::RequestSubmitted {
                request: request.clone(),
                requester: requester.clone(),
                members: users.iter().filter(|u| u.id != user_id).cloned().collect(),
            });
        }
        if !request.is_pending() {
            self.notify_finalized(&request, &users);
        }

        Ok(request)
    }

    async fn submit_once(
        &self,
        user_id: Uuid,
        kind: &RequestKind,
        amount: Money,
        details: &str,
    ) -> Result<Committed, CycleError> {
        let users = self.read_users().await?;
        if find(&users, user_id).is_none() {
            return Err(Error::NotFound(format!("user {}", user_id)).into());
        }

        let eligible = QuorumPolicy::eligible_voters(users.len());
        let votes_required = self.inner.rules.quorum.required_approvals(eligible);
        let request = Request::new(user_id, kind.clone(), amount, details, votes_required);

        self.settle_and_commit(request, users).await
    }

    /// Record a vote and settle the request if it reached a threshold.
    ///
    /// Checks run in order and the first failure wins: the request exists,
    /// the voter exists, the request is pending, the voter is not the
    /// requester, the voter has not voted yet. A failed vote writes nothing.
    pub async fn cast_vote(
        &self,
        request_id: Uuid,
        voter_id: Uuid,
        vote: VoteType,
    ) -> Result<VoteOutcome, Error> {
        let guard = self.inner.request_locks.lock(request_id).await;
        let mut attempts = 0u32;
        let result = self
            .inner
            .retry
            .cycle("cast_vote", || {
                let rerun = attempts > 0;
                attempts += 1;
                self.vote_once(request_id, voter_id, vote, rerun)
            })
            .await;
        drop(guard);

        counter!("commonpool.votes.total",
            "vote" => vote.as_str(),
            "result" => match &result {
                Ok(_) => "recorded",
                Err(e) => e.code(),
            }
        )
        .increment(1);

        let (outcome, users) = result.inspect_err(|e| {
            debug!(%request_id, %voter_id, error = %e, "vote refused");
        })?;

        info!(
            %request_id,
            %voter_id,
            %vote,
            approvals = outcome.request.approvals(),
            rejections = outcome.request.rejections(),
            votes_required = outcome.request.votes_required,
            status = %outcome.request.status,
            "vote recorded"
        );

        if let (Some(requester), Some(voter)) = (
            find(&users, outcome.request.user_id),
            find(&users, voter_id),
        ) {
            self.notify(Notification::VoteReceived {
                request: outcome.request.clone(),
                requester: requester.clone(),
                voter: voter.clone(),
                vote,
            });
        }
        if outcome.finalized() {
            self.notify_finalized(&outcome.request, &users);
        }

        Ok(outcome)
    }

    /// One read-validate-write pass of a vote.
    ///
    /// On a re-run the previous attempt may have committed even though the
    /// store reported a failure. The request lock is held across attempts,
    /// so if the stored request already carries this exact vote it was ours,
    /// and the stored state is the outcome.
    async fn vote_once(
        &self,
        request_id: Uuid,
        voter_id: Uuid,
        vote: VoteType,
        rerun: bool,
    ) -> Result<(VoteOutcome, Vec<User>), CycleError> {
        let mut request = self
            .read_request(request_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("request {}", request_id)))?;
        let voter = self
            .inner
            .retry
            .store("get_user", || self.store().get_user(voter_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {}", voter_id)))?;

        if rerun && vote::is_recorded(&request, voter_id, vote) {
            debug!(%request_id, %voter_id, "vote already committed by an earlier attempt");
            let users = self.read_users().await?;
            let fund = self.load_fund().await?;
            let resolution = request.resolution;
            return Ok(vote_outcome(request, users, fund, resolution, &voter));
        }

        vote::record_vote(&mut request, voter_id, vote)?;

        let users = self.read_users().await?;
        let committed = self.settle_and_commit(request, users).await?;

        Ok(vote_outcome(
            committed.request,
            committed.users,
            committed.fund,
            committed.finalization.resolution(),
            &voter,
        ))
    }

    /// Withdraw a pending request. Only its owner may do this; no money
    /// moves and nothing is written to the transaction log.
    pub async fn cancel_request(&self, request_id: Uuid, user_id: Uuid) -> Result<Request, Error> {
        let guard = self.inner.request_locks.lock(request_id).await;
        let request = self
            .inner
            .retry
            .cycle("cancel_request", || self.cancel_once(request_id, user_id))
            .await?;
        drop(guard);

        counter!("commonpool.settlements.total", "outcome" => "cancelled").increment(1);
        info!(%request_id, %user_id, "request cancelled");

        match self.read_users().await {
            Ok(users) => {
                if let Some(requester) = find(&users, request.user_id) {
                    self.notify(Notification::RequestCancelled {
                        request: request.clone(),
                        requester: requester.clone(),
                        voters: request
                            .voters()
                            .filter_map(|id| find(&users, id).cloned())
                            .collect(),
                    });
                }
            }
            Err(e) => debug!(%request_id, error = %e, "skipping cancel notification"),
        }

        Ok(request)
    }

    async fn cancel_once(&self, request_id: Uuid, user_id: Uuid) -> Result<Request, CycleError> {
        let mut request = self
            .read_request(request_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("request {}", request_id)))?;

        lifecycle::cancel(&mut request, user_id, Utc::now())?;
        self.commit(&WritePlan::new().put_request(request.clone()))
            .await?;

        request.version += 1;
        Ok(request)
    }

    /// Re-run settlement on every pending request, e.g. after a failed
    /// settlement or a change in membership. Returns how many were settled.
    ///
    /// A request whose settlement breaks an invariant is logged and skipped;
    /// the sweep carries on with the rest.
    pub async fn reevaluate_pending(&self) -> Result<usize, Error> {
        let pending: Vec<Uuid> = self
            .read_requests()
            .await?
            .into_iter()
            .filter(|r| r.is_pending())
            .map(|r| r.id)
            .collect();

        let mut settled = 0;
        for request_id in pending {
            let guard = self.inner.request_locks.lock(request_id).await;
            let result = self
                .inner
                .retry
                .cycle("reevaluate_pending", || self.sweep_once(request_id))
                .await;
            drop(guard);

            match result {
                Ok(Some((request, users))) => {
                    settled += 1;
                    self.notify_finalized(&request, &users);
                }
                Ok(None) => {}
                Err(Error::Invariant(msg)) => {
                    error!(%request_id, error = %msg, "skipping request during sweep");
                }
                Err(e) => return Err(e),
            }
        }

        info!(settled, "pending requests re-evaluated");
        Ok(settled)
    }

    async fn sweep_once(
        &self,
        request_id: Uuid,
    ) -> Result<Option<(Request, Vec<User>)>, CycleError> {
        let Some(request) = self.read_request(request_id).await? else {
            return Ok(None);
        };
        let users = self.read_users().await?;
        let eligible = QuorumPolicy::eligible_voters(users.len());
        if settlement::decide(&request, eligible, &self.inner.rules.quorum).is_none() {
            return Ok(None);
        }

        let committed = self.settle_and_commit(request, users).await?;
        Ok(committed
            .finalization
            .resolution()
            .map(|_| (committed.request, committed.users)))
    }

    // ==================== Views ====================

    pub async fn global_fund(&self) -> Result<GlobalFund, Error> {
        Ok(self.load_fund().await?)
    }

    /// Pending requests in submission order.
    pub async fn pending_requests(&self) -> Result<Vec<RequestSummary>, Error> {
        let users = self.read_users().await?;
        let mut pending: Vec<Request> = self
            .read_requests()
            .await?
            .into_iter()
            .filter(|r| r.is_pending())
            .collect();
        pending.sort_by_key(|r| r.created_at);

        Ok(pending
            .into_iter()
            .map(|r| RequestSummary::new(r, &users))
            .collect())
    }

    /// Requests matching `filter`, most recently active first.
    pub async fn request_history(
        &self,
        filter: &HistoryFilter,
    ) -> Result<Vec<RequestSummary>, Error> {
        let users = self.read_users().await?;
        let mut requests: Vec<Request> = self
            .read_requests()
            .await?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        requests.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));

        Ok(requests
            .into_iter()
            .map(|r| RequestSummary::new(r, &users))
            .collect())
    }

    pub async fn request_detail(&self, request_id: Uuid) -> Result<RequestDetail, Error> {
        let request = self
            .read_request(request_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("request {}", request_id)))?;
        let users = self.read_users().await?;
        Ok(RequestDetail::new(request, &users))
    }

    pub async fn transactions(&self) -> Result<Vec<TransactionLogEntry>, Error> {
        Ok(self
            .inner
            .retry
            .store("get_transaction_log", || self.store().get_transaction_log())
            .await?)
    }
}
