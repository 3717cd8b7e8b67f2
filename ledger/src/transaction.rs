// ledger/src/transaction.rs
use crate::{Money, RequestType, Resolution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit record written once when a request is settled.
///
/// `success` is true only when money actually moved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionLogEntry {
    pub id: String,
    pub request_id: Uuid,
    #[serde(rename = "type")]
    pub request_type: RequestType,
    pub user_id: Uuid,
    pub amount: Money,
    pub success: bool,
    pub resolution: Resolution,
    pub timestamp: DateTime<Utc>,
}

impl TransactionLogEntry {
    pub fn settlement(
        request_id: Uuid,
        request_type: RequestType,
        user_id: Uuid,
        amount: Money,
        resolution: Resolution,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: settlement_key(request_id),
            request_id,
            request_type,
            user_id,
            amount,
            success: resolution == Resolution::Approved,
            resolution,
            timestamp,
        }
    }
}

/// Deterministic log id for the settlement of `request_id`. A request can only
/// ever produce one entry under this key.
pub fn settlement_key(request_id: Uuid) -> String {
    crate::hash_key(&format!("settlement:{}", request_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settlement_key_is_stable() {
        let id = Uuid::now_v7();
        assert_eq!(settlement_key(id), settlement_key(id));
        assert_ne!(settlement_key(id), settlement_key(Uuid::now_v7()));
        assert_eq!(settlement_key(id).len(), 64);
    }

    #[test]
    fn test_success_follows_resolution() {
        let approved = TransactionLogEntry::settlement(
            Uuid::now_v7(),
            RequestType::Loan,
            Uuid::now_v7(),
            Money::from_major(5),
            Resolution::Approved,
            Utc::now(),
        );
        assert!(approved.success);

        let overridden = TransactionLogEntry::settlement(
            Uuid::now_v7(),
            RequestType::Deposit,
            Uuid::now_v7(),
            Money::from_major(5),
            Resolution::InsufficientFunds,
            Utc::now(),
        );
        assert!(!overridden.success);
    }
}
