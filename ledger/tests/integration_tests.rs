// ledger/tests/integration_tests.rs
use chrono::Utc;
use commonpool_ledger::{
    GlobalFund, LedgerStore, LedgerSystem, Money, Request, RequestKind, RequestStatus,
    Resolution, StoreError, TransactionLogEntry, User, WritePlan, adapters::MemoryAdapter,
    settlement_key,
};
use std::sync::Arc;

fn setup() -> Arc<LedgerSystem> {
    let adapter = Box::new(MemoryAdapter::new());
    Arc::new(LedgerSystem::new(adapter))
}

fn member(name: &str, balance: i64) -> User {
    User::new(
        name,
        format!("{}@example.com", name),
        Money::from_major(balance),
    )
}

fn loan(user: &User, amount: i64) -> Request {
    Request::new(
        user.id,
        RequestKind::Loan {
            title: "Seeds".to_string(),
            category: "agriculture".to_string(),
        },
        Money::from_major(amount),
        "planting season",
        4,
    )
}

fn settlement(request: &Request, resolution: Resolution) -> TransactionLogEntry {
    TransactionLogEntry::settlement(
        request.id,
        request.request_type(),
        request.user_id,
        request.amount,
        resolution,
        Utc::now(),
    )
}

#[tokio::test]
async fn test_bulk_saves_round_trip() {
    let system = setup();
    let store = system.adapter();
    let asha = member("asha", 10_000);
    let bina = member("bina", 5_000);

    store
        .save_users(&[asha.clone(), bina.clone()])
        .await
        .unwrap();
    assert_eq!(store.count_users().await.unwrap(), 2);

    let stored = store.get_user(asha.id).await.unwrap().unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(stored.account_balance, Money::from_major(10_000));

    let request = loan(&asha, 1_000);
    store.save_requests(&[request.clone()]).await.unwrap();
    let requests = store.get_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, request.kind);
    assert_eq!(requests[0].status, RequestStatus::Pending);

    assert!(store.get_global_fund().await.unwrap().is_none());
    store
        .save_global_fund(&GlobalFund::new(Money::from_major(100_000)))
        .await
        .unwrap();
    let fund = store.get_global_fund().await.unwrap().unwrap();
    assert_eq!(fund.total_fund, Money::from_major(100_000));
    assert_eq!(fund.version, 1);
}

#[tokio::test]
async fn test_settlement_plan_is_atomic() {
    let system = setup();
    let store = system.adapter();
    let asha = member("asha", 10_000);
    let request = loan(&asha, 1_000);
    store.save_users(&[asha.clone()]).await.unwrap();
    store.save_requests(&[request.clone()]).await.unwrap();
    store
        .save_global_fund(&GlobalFund::new(Money::from_major(100_000)))
        .await
        .unwrap();

    let mut requester = store.get_user(asha.id).await.unwrap().unwrap();
    let mut approved = store.get_request(request.id).await.unwrap().unwrap();
    let mut fund = store.get_global_fund().await.unwrap().unwrap();

    requester.account_balance = Money::from_major(11_000);
    approved.status = RequestStatus::Approved;
    approved.resolution = Some(Resolution::Approved);
    fund.total_fund = Money::from_major(99_000);
    let entry = settlement(&approved, Resolution::Approved);

    let plan = WritePlan::new()
        .put_request(approved.clone())
        .put_user(requester.clone())
        .put_fund(fund.clone())
        .append_log(entry.clone());
    system.execute(&plan).await.unwrap();

    // Replaying the same plan conflicts on every record and writes nothing
    let err = system.execute(&plan).await.unwrap_err();
    assert!(err.is_version_conflict());

    assert_eq!(
        store.get_user(asha.id).await.unwrap().unwrap().account_balance,
        Money::from_major(11_000)
    );
    assert_eq!(
        store.get_global_fund().await.unwrap().unwrap().total_fund,
        Money::from_major(99_000)
    );
    let log = store.get_transaction_log().await.unwrap();
    assert_eq!(log, vec![entry]);
}

#[tokio::test]
async fn test_duplicate_settlement_is_refused() {
    let system = setup();
    let store = system.adapter();
    let asha = member("asha", 10_000);
    let request = loan(&asha, 1_000);

    let first = settlement(&request, Resolution::Approved);
    store.append_transaction_log(&first).await.unwrap();

    // Same request, even with a different outcome, maps to the same key
    let second = settlement(&request, Resolution::RejectedByVote);
    assert_eq!(second.id, settlement_key(request.id));
    let err = store.append_transaction_log(&second).await.unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)));

    assert_eq!(store.get_transaction_log().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_stale_writer_loses() {
    let system = setup();
    let store = system.adapter();
    let asha = member("asha", 10_000);
    let request = loan(&asha, 1_000);
    store.save_requests(&[request.clone()]).await.unwrap();

    let mut first = store.get_request(request.id).await.unwrap().unwrap();
    let mut second = first.clone();
    let bina = member("bina", 0);
    let chetan = member("chetan", 0);

    first.approved_by.push(bina.id);
    system
        .execute(&WritePlan::new().put_request(first))
        .await
        .unwrap();

    second.approved_by.push(chetan.id);
    let err = system
        .execute(&WritePlan::new().put_request(second))
        .await
        .unwrap_err();
    match err {
        StoreError::VersionConflict {
            entity,
            expected,
            found,
            ..
        } => {
            assert_eq!(entity, "request");
            assert_eq!(expected, 1);
            assert_eq!(found, 2);
        }
        other => panic!("expected version conflict, got {}", other),
    }

    let stored = store.get_request(request.id).await.unwrap().unwrap();
    assert_eq!(stored.approved_by, vec![bina.id]);
}

#[tokio::test]
async fn test_adapters_share_state_through_clones() {
    let adapter = MemoryAdapter::new();
    let system = LedgerSystem::new(Box::new(adapter.clone()));

    system
        .adapter()
        .save_users(&[member("asha", 1)])
        .await
        .unwrap();
    assert_eq!(adapter.count_users().await.unwrap(), 1);
    assert_eq!(system.adapter_arc().count_users().await.unwrap(), 1);
}

#[tokio::test]
async fn test_empty_plan_is_a_no_op() {
    let system = setup();
    let plan = WritePlan::new();
    assert!(plan.is_empty());
    system.execute(&plan).await.unwrap();
    assert_eq!(system.adapter().count_users().await.unwrap(), 0);
}
