#[cfg(test)]
use super::*;
#[cfg(test)]
use ledger::{
    GlobalFund, LedgerStore, LedgerSystem, RequestStatus, StoreError, WritePlan,
    adapters::sqlite::SqliteAdapter,
};

#[cfg(test)]
async fn memory_adapter() -> SqliteAdapter {
    let adapter = SqliteAdapter::new_memory().await.unwrap();
    if let Err(err) = adapter.init_schema().await {
        panic!("Error: {:#?}", err);
    }
    adapter
}

#[tokio::test]
async fn test_adapter_init_schema_is_idempotent() {
    let adapter = memory_adapter().await;
    adapter.init_schema().await.unwrap();
    assert_eq!(adapter.count_users().await.unwrap(), 0);
}

#[tokio::test]
async fn test_adapter_users() {
    let adapter = memory_adapter().await;
    let asha = member("asha", 10_000);
    let bina = member("bina", 250);

    adapter
        .save_users(&[asha.clone(), bina.clone()])
        .await
        .unwrap();

    let stored = adapter.get_user(bina.id).await.unwrap().unwrap();
    assert_eq!(stored.name, "bina");
    assert_eq!(stored.account_balance, Money::from_major(250));
    assert_eq!(stored.version, 1);
    assert_eq!(adapter.count_users().await.unwrap(), 2);

    let all = adapter.get_users().await.unwrap();
    assert_eq!(
        all.iter().map(|u| u.id).collect::<Vec<_>>(),
        vec![asha.id, bina.id]
    );

    assert!(adapter.get_user(uuid::Uuid::now_v7()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_adapter_requests_keep_their_shape() {
    let adapter = memory_adapter().await;
    let asha = member("asha", 10_000);
    let mut request = loan_for(&asha, 1_000);
    request.approved_by.push(uuid::Uuid::now_v7());

    adapter.save_requests(&[request.clone()]).await.unwrap();

    let stored = adapter.get_request(request.id).await.unwrap().unwrap();
    assert_eq!(stored.kind, request.kind);
    assert_eq!(stored.approved_by, request.approved_by);
    assert_eq!(stored.votes_required, 4);
    assert_eq!(stored.status, RequestStatus::Pending);
    assert!(stored.processed_at.is_none());
    assert_eq!(stored.version, 1);
}

#[tokio::test]
async fn test_adapter_fund_is_a_singleton() {
    let adapter = memory_adapter().await;
    assert!(adapter.get_global_fund().await.unwrap().is_none());

    adapter
        .save_global_fund(&GlobalFund::new(Money::from_major(100_000)))
        .await
        .unwrap();

    // A second "new" fund is stale against the stored one
    let err = adapter
        .save_global_fund(&GlobalFund::new(Money::from_major(1)))
        .await
        .unwrap_err();
    assert!(err.is_version_conflict());

    let mut fund = adapter.get_global_fund().await.unwrap().unwrap();
    fund.total_fund = Money::from_major(-250);
    adapter.save_global_fund(&fund).await.unwrap();

    let fund = adapter.get_global_fund().await.unwrap().unwrap();
    assert_eq!(fund.total_fund, Money::from_major(-250));
    assert_eq!(fund.version, 2);
}

#[tokio::test]
async fn test_adapter_plan_rolls_back_on_conflict() {
    let adapter = memory_adapter().await;
    let system = LedgerSystem::new(Box::new(adapter));
    let store = system.adapter();

    let asha = member("asha", 10_000);
    let request = deposit_for(&asha, 500);
    store.save_users(&[asha.clone()]).await.unwrap();
    store.save_requests(&[request.clone()]).await.unwrap();

    let mut requester = store.get_user(asha.id).await.unwrap().unwrap();
    requester.account_balance = Money::from_major(9_500);
    let mut approved = store.get_request(request.id).await.unwrap().unwrap();
    approved.status = RequestStatus::Approved;

    // Fund version 5 does not exist: the whole plan must fail
    let mut fund = GlobalFund::new(Money::from_major(100_500));
    fund.version = 5;
    let plan = WritePlan::new()
        .put_user(requester)
        .put_request(approved)
        .put_fund(fund)
        .append_log(settled(&request, Resolution::Approved));

    let err = system.execute(&plan).await.unwrap_err();
    assert!(matches!(err, StoreError::VersionConflict { entity: "fund", .. }));

    assert_eq!(
        store.get_user(asha.id).await.unwrap().unwrap().account_balance,
        Money::from_major(10_000)
    );
    assert!(store.get_request(request.id).await.unwrap().unwrap().is_pending());
    assert!(store.get_transaction_log().await.unwrap().is_empty());
    assert!(store.get_global_fund().await.unwrap().is_none());
}

#[tokio::test]
async fn test_adapter_duplicate_settlement() {
    let adapter = memory_adapter().await;
    let asha = member("asha", 10_000);
    let request = loan_for(&asha, 100);

    adapter
        .append_transaction_log(&settled(&request, Resolution::Approved))
        .await
        .unwrap();
    let err = adapter
        .append_transaction_log(&settled(&request, Resolution::Approved))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)));

    let log = adapter.get_transaction_log().await.unwrap();
    assert_eq!(log.len(), 1);
    assert!(log[0].success);
}

#[tokio::test]
async fn test_adapter_from_pool() {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let adapter = SqliteAdapter::from_pool(pool);
    adapter.init_schema().await.unwrap();

    adapter.save_users(&[member("asha", 1)]).await.unwrap();
    assert_eq!(adapter.count_users().await.unwrap(), 1);
}

#[tokio::test]
async fn test_adapter_file_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool.db");
    let path = path.to_str().unwrap();
    let asha = member("asha", 10_000);

    {
        let adapter = SqliteAdapter::new_file(path).await.unwrap();
        adapter.init_schema().await.unwrap();
        adapter.save_users(&[asha.clone()]).await.unwrap();
        adapter
            .save_global_fund(&GlobalFund::new(Money::from_major(100_000)))
            .await
            .unwrap();
    }

    let reopened = SqliteAdapter::new_file(path).await.unwrap();
    reopened.init_schema().await.unwrap();
    let stored = reopened.get_user(asha.id).await.unwrap().unwrap();
    assert_eq!(stored.email, "asha@example.com");
    assert_eq!(
        reopened.get_global_fund().await.unwrap().unwrap().total_fund,
        Money::from_major(100_000)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_adapter_concurrent_plans_on_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("writers.db");
    let adapter = SqliteAdapter::new_file(path.to_str().unwrap())
        .await
        .unwrap();
    adapter.init_schema().await.unwrap();
    let adapter = std::sync::Arc::new(adapter);

    let asha = member("asha", 10_000);
    let requests: Vec<_> = (0..20).map(|_| loan_for(&asha, 100)).collect();
    adapter.save_requests(&requests).await.unwrap();

    // Each writer reads a version and bumps it inside its own plan
    let mut handles = Vec::new();
    for request in requests.clone() {
        let adapter = adapter.clone();
        handles.push(tokio::spawn(async move {
            let mut stored = adapter.get_request(request.id).await.unwrap().unwrap();
            stored.approved_by.push(uuid::Uuid::now_v7());
            adapter
                .execute_plan(&WritePlan::new().put_request(stored))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for request in &requests {
        let stored = adapter.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.approved_by.len(), 1);
    }
}
