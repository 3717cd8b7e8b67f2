use chrono::Utc;
use ledger::{Money, Request, RequestKind, Resolution, TransactionLogEntry, User};

pub mod test_sqlite;

/// Example: a member with a round opening balance
pub fn member(name: &str, balance: i64) -> User {
    User::new(
        name,
        format!("{}@example.com", name),
        Money::from_major(balance),
    )
}

/// Example: a loan needing four approvals
pub fn loan_for(user: &User, amount: i64) -> Request {
    Request::new(
        user.id,
        RequestKind::Loan {
            title: "Sewing machine".to_string(),
            category: "business".to_string(),
        },
        Money::from_major(amount),
        "tailoring shop",
        4,
    )
}

pub fn deposit_for(user: &User, amount: i64) -> Request {
    Request::new(
        user.id,
        RequestKind::Deposit,
        Money::from_major(amount),
        "monthly savings",
        4,
    )
}

pub fn settled(request: &Request, resolution: Resolution) -> TransactionLogEntry {
    TransactionLogEntry::settlement(
        request.id,
        request.request_type(),
        request.user_id,
        request.amount,
        resolution,
        Utc::now(),
    )
}
