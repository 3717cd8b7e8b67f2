// ledger/src/request.rs
use crate::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Status of a Request
/// State transitions are one-way: pending → approved | rejected
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Open for votes
    Pending,
    /// Quorum reached and the money moved
    Approved,
    /// Voted down, overridden at settlement, or cancelled by its owner
    Rejected,
}

impl RequestStatus {
    /// Check if this status can transition to another status
    pub fn can_transition_to(&self, target: RequestStatus) -> bool {
        match (self, target) {
            (RequestStatus::Pending, RequestStatus::Approved) => true,
            (RequestStatus::Pending, RequestStatus::Rejected) => true,
            // Approved and Rejected are terminal
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, RequestStatus::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request left `Pending`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Approved,
    /// Enough members rejected that approval became unreachable.
    RejectedByVote,
    /// Deposit quorum reached but the requester could not cover the amount.
    InsufficientFunds,
    /// Loan quorum reached but the pool could not cover the amount.
    InsufficientPool,
    Cancelled,
}

impl Resolution {
    pub fn status(&self) -> RequestStatus {
        match self {
            Resolution::Approved => RequestStatus::Approved,
            _ => RequestStatus::Rejected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Approved => "approved",
            Resolution::RejectedByVote => "rejected by vote",
            Resolution::InsufficientFunds => "insufficient funds",
            Resolution::InsufficientPool => "insufficient pool funds",
            Resolution::Cancelled => "cancelled",
        }
    }
}

/// Tag-only view of [`RequestKind`], used for filtering and the transaction log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Loan,
    Deposit,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Loan => "loan",
            RequestType::Deposit => "deposit",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "loan" => Ok(RequestType::Loan),
            "deposit" => Ok(RequestType::Deposit),
            other => Err(format!("unknown request type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RequestKind {
    /// Money flows from the pool to the requester.
    Loan { title: String, category: String },
    /// Money flows from the requester to the pool.
    Deposit,
}

impl RequestKind {
    pub fn request_type(&self) -> RequestType {
        match self {
            RequestKind::Loan { .. } => RequestType::Loan,
            RequestKind::Deposit => RequestType::Deposit,
        }
    }
}

/// A loan or deposit put to the community vote.
///
/// Invariants:
/// - `approved_by` and `rejected_by` hold each voter at most once and are disjoint
/// - `user_id` never appears in either list
/// - `votes_required` is fixed when the request is created
/// - once `status` leaves `Pending` the record is never modified again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: RequestKind,
    pub amount: Money,
    pub details: String,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    pub votes_required: u32,
    pub approved_by: Vec<Uuid>,
    pub rejected_by: Vec<Uuid>,
    #[serde(default)]
    pub version: u64,
}

impl Request {
    pub fn new(
        user_id: Uuid,
        kind: RequestKind,
        amount: Money,
        details: impl Into<String>,
        votes_required: u32,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            kind,
            amount,
            details: details.into(),
            status: RequestStatus::Pending,
            resolution: None,
            created_at: Utc::now(),
            processed_at: None,
            votes_required,
            approved_by: Vec::new(),
            rejected_by: Vec::new(),
            version: 0,
        }
    }

    pub fn request_type(&self) -> RequestType {
        self.kind.request_type()
    }

    pub fn is_pending(&self) -> bool {
        self.status.is_pending()
    }

    pub fn has_voted(&self, user: Uuid) -> bool {
        self.approved_by.contains(&user) || self.rejected_by.contains(&user)
    }

    pub fn approvals(&self) -> usize {
        self.approved_by.len()
    }

    pub fn rejections(&self) -> usize {
        self.rejected_by.len()
    }

    /// Every member who voted, approvers first.
    pub fn voters(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.approved_by.iter().chain(self.rejected_by.iter()).copied()
    }

    /// Most recent activity: when it was processed, else when it was created.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.processed_at.unwrap_or(self.created_at)
    }
}
