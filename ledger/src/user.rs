// ledger/src/user.rs
use crate::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub account_balance: Money,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>, balance: Money) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            email: email.into(),
            account_balance: balance,
            registered_at: Utc::now(),
            version: 0,
        }
    }
}
