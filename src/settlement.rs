//! Settlement: deciding and applying the terminal outcome of a pending
//! request.
//!
//! [`try_finalize`] is pure. It mutates the records it is handed and returns
//! the log entry to persist; the caller owns persistence, so a failed write
//! leaves nothing half-applied. The status guard makes it idempotent: a
//! request that already left `Pending` is returned untouched.

use crate::config::{EngineConfig, FundPolicy};
use crate::error::Error;
use crate::lifecycle;
use crate::quorum::QuorumPolicy;
use chrono::{DateTime, Utc};
use ledger::{GlobalFund, Money, Request, RequestKind, Resolution, TransactionLogEntry, User};

/// The quorum outcome, before any money checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approve,
    RejectByVote,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettlementRules {
    pub quorum: QuorumPolicy,
    pub fund_policy: FundPolicy,
}

impl SettlementRules {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            quorum: QuorumPolicy::from_config(config),
            fund_policy: config.fund_policy,
        }
    }
}

impl Default for SettlementRules {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Finalization {
    /// Still pending, or already terminal before the call.
    Unchanged,
    Settled {
        resolution: Resolution,
        /// Whether the requester balance and the fund were changed.
        money_moved: bool,
        entry: TransactionLogEntry,
    },
}

impl Finalization {
    pub fn resolution(&self) -> Option<Resolution> {
        match self {
            Finalization::Unchanged => None,
            Finalization::Settled { resolution, .. } => Some(*resolution),
        }
    }

    pub fn money_moved(&self) -> bool {
        matches!(
            self,
            Finalization::Settled {
                money_moved: true,
                ..
            }
        )
    }
}

/// Metric label for a resolution.
pub fn outcome_label(resolution: Resolution) -> &'static str {
    match resolution {
        Resolution::Approved => "approved",
        Resolution::RejectedByVote => "rejected_by_vote",
        Resolution::InsufficientFunds => "insufficient_funds",
        Resolution::InsufficientPool => "insufficient_pool",
        Resolution::Cancelled => "cancelled",
    }
}

/// Approval is checked first, so a vote that completes the quorum always
/// approves even if the rejection rule would also hold.
pub fn decide(request: &Request, eligible_voters: u32, quorum: &QuorumPolicy) -> Option<Verdict> {
    if !request.is_pending() {
        return None;
    }
    if quorum.is_approved(request.approvals(), request.votes_required) {
        Some(Verdict::Approve)
    } else if quorum.is_rejected(request.rejections(), eligible_voters, request.votes_required) {
        Some(Verdict::RejectByVote)
    } else {
        None
    }
}

fn overflow(request: &Request) -> Error {
    Error::Invariant(format!(
        "settling request {} for {} overflows a balance",
        request.id, request.amount
    ))
}

/// Evaluate `request` against the community in `users` and, if a threshold
/// is met, settle it.
///
/// `users` must contain every registered member; its length determines the
/// eligible voter count. A missing requester is an invariant violation and
/// leaves every record unchanged.
pub fn try_finalize(
    request: &mut Request,
    users: &mut [User],
    fund: &mut GlobalFund,
    rules: &SettlementRules,
    now: DateTime<Utc>,
) -> Result<Finalization, Error> {
    let eligible = QuorumPolicy::eligible_voters(users.len());
    let Some(verdict) = decide(request, eligible, &rules.quorum) else {
        return Ok(Finalization::Unchanged);
    };

    let requester = users
        .iter_mut()
        .find(|u| u.id == request.user_id)
        .ok_or_else(|| {
            Error::Invariant(format!(
                "requester {} of request {} does not exist",
                request.user_id, request.id
            ))
        })?;

    let amount = request.amount;
    // (resolution, new requester balance, new fund total) when money moves
    let (resolution, transfer): (Resolution, Option<(Money, Money)>) = match verdict {
        Verdict::RejectByVote => (Resolution::RejectedByVote, None),
        Verdict::Approve => match &request.kind {
            RequestKind::Loan { .. } => {
                if rules.fund_policy == FundPolicy::RejectIfInsufficient
                    && fund.total_fund < amount
                {
                    (Resolution::InsufficientPool, None)
                } else {
                    let balance = requester
                        .account_balance
                        .checked_add(amount)
                        .ok_or_else(|| overflow(request))?;
                    let total = fund
                        .total_fund
                        .checked_sub(amount)
                        .ok_or_else(|| overflow(request))?;
                    (Resolution::Approved, Some((balance, total)))
                }
            }
            RequestKind::Deposit => {
                if requester.account_balance < amount {
                    (Resolution::InsufficientFunds, None)
                } else {
                    let balance = requester
                        .account_balance
                        .checked_sub(amount)
                        .ok_or_else(|| overflow(request))?;
                    let total = fund
                        .total_fund
                        .checked_add(amount)
                        .ok_or_else(|| overflow(request))?;
                    (Resolution::Approved, Some((balance, total)))
                }
            }
        },
    };

    lifecycle::finalize(request, resolution, now)?;

    let money_moved = transfer.is_some();
    if let Some((balance, total)) = transfer {
        requester.account_balance = balance;
        fund.total_fund = total;
        fund.last_updated = now;
    }

    let entry = TransactionLogEntry::settlement(
        request.id,
        request.request_type(),
        request.user_id,
        amount,
        resolution,
        now,
    );

    Ok(Finalization::Settled {
        resolution,
        money_moved,
        entry,
    })
}
