// ledger/src/fund.rs
use crate::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The shared community pool. There is exactly one per store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalFund {
    pub total_fund: Money,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl GlobalFund {
    pub fn new(total_fund: Money) -> Self {
        Self {
            total_fund,
            last_updated: Utc::now(),
            version: 0,
        }
    }
}
