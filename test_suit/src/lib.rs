mod adapter;

mod test_engine {
    use commonpool::{Engine, EngineConfig, Error, HistoryFilter, VoteType};
    use ledger::{
        Money, RequestKind, RequestStatus, Resolution, User, adapters::sqlite::SqliteAdapter,
    };
    use rand::seq::SliceRandom;

    async fn sqlite_engine() -> Engine {
        let adapter = SqliteAdapter::new_memory().await.unwrap();
        adapter.init_schema().await.unwrap();
        Engine::with_config(Box::new(adapter), EngineConfig::default())
    }

    async fn register(engine: &Engine, count: usize) -> Vec<User> {
        let mut users = Vec::new();
        for i in 0..count {
            users.push(
                engine
                    .register_user(&format!("Member {}", i), &format!("m{}@example.com", i))
                    .await
                    .unwrap(),
            );
        }
        users
    }

    fn loan() -> RequestKind {
        RequestKind::Loan {
            title: "Tractor share".to_string(),
            category: "agriculture".to_string(),
        }
    }

    #[tokio::test]
    async fn test_loan_lifecycle_on_sqlite() {
        let engine = sqlite_engine().await;
        let users = register(&engine, 5).await;
        let requester = users[0].id;

        let request = engine
            .submit_request(requester, loan(), Money::from_major(1_000), "harvest")
            .await
            .unwrap();
        assert_eq!(request.votes_required, 4);

        for (i, voter) in users[1..].iter().enumerate() {
            let outcome = engine
                .cast_vote(request.id, voter.id, VoteType::Approve)
                .await
                .unwrap();
            let expected = if i < 3 {
                RequestStatus::Pending
            } else {
                RequestStatus::Approved
            };
            assert_eq!(outcome.request.status, expected);
        }

        assert_eq!(
            engine.user(requester).await.unwrap().account_balance,
            Money::from_major(11_000)
        );
        assert_eq!(
            engine.global_fund().await.unwrap().total_fund,
            Money::from_major(99_000)
        );
        let log = engine.transactions().await.unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].success);
    }

    #[tokio::test]
    async fn test_deposit_override_on_sqlite() {
        let engine = sqlite_engine().await;
        let users = register(&engine, 5).await;
        let requester = users[0].id;

        let mut poor = engine.user(requester).await.unwrap();
        poor.account_balance = Money::from_major(200);
        engine.ledger().adapter().save_users(&[poor]).await.unwrap();

        let request = engine
            .submit_request(requester, RequestKind::Deposit, Money::from_major(500), "savings")
            .await
            .unwrap();
        let mut last = None;
        for voter in &users[1..] {
            last = Some(
                engine
                    .cast_vote(request.id, voter.id, VoteType::Approve)
                    .await
                    .unwrap(),
            );
        }

        let outcome = last.unwrap();
        assert_eq!(outcome.request.status, RequestStatus::Rejected);
        assert_eq!(outcome.resolution, Some(Resolution::InsufficientFunds));
        assert_eq!(outcome.requester_balance, Money::from_major(200));
        assert_eq!(
            engine.global_fund().await.unwrap().total_fund,
            Money::from_major(100_000)
        );
        assert!(!engine.transactions().await.unwrap()[0].success);
    }

    #[tokio::test]
    async fn test_shuffled_votes_settle_exactly_once() {
        let engine = sqlite_engine().await;
        let users = register(&engine, 11).await;
        let requester = users[0].id;
        let request = engine
            .submit_request(requester, loan(), Money::from_major(2_000), "harvest")
            .await
            .unwrap();
        assert_eq!(request.votes_required, 8);

        // 8 approvals and 2 rejections: approval is still reachable after
        // both rejections, so the order decides nothing but when it settles
        let mut ballots: Vec<(uuid::Uuid, VoteType)> = users[1..]
            .iter()
            .enumerate()
            .map(|(i, u)| {
                let vote = if i < 8 {
                    VoteType::Approve
                } else {
                    VoteType::Reject
                };
                (u.id, vote)
            })
            .collect();
        ballots.shuffle(&mut rand::rng());

        let mut settled_by = None;
        for (i, (voter, vote)) in ballots.into_iter().enumerate() {
            match engine.cast_vote(request.id, voter, vote).await {
                Ok(outcome) if outcome.finalized() => {
                    assert!(settled_by.is_none());
                    settled_by = Some(i);
                }
                Ok(_) => assert!(settled_by.is_none()),
                Err(Error::InvalidState(_)) => assert!(settled_by.is_some()),
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert!(settled_by.is_some());
        let detail = engine.request_detail(request.id).await.unwrap();
        assert_eq!(detail.request.status, RequestStatus::Approved);
        assert_eq!(
            engine.user(requester).await.unwrap().account_balance,
            Money::from_major(12_000)
        );
        assert_eq!(engine.transactions().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_votes_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busy.db");
        let adapter = SqliteAdapter::new_file(path.to_str().unwrap())
            .await
            .unwrap();
        adapter.init_schema().await.unwrap();
        let engine = Engine::new(Box::new(adapter));
        let users = register(&engine, 12).await;

        let mut requests = Vec::new();
        for i in 0..10 {
            let request = engine
                .submit_request(
                    users[i].id,
                    RequestKind::Deposit,
                    Money::from_major(50),
                    "weekly savings",
                )
                .await
                .unwrap();
            assert_eq!(request.votes_required, 9);
            requests.push(request);
        }

        // Three votes per request, far below quorum, all racing for the file
        let mut handles = Vec::new();
        for (i, request) in requests.iter().enumerate() {
            for offset in 1..=3 {
                let engine = engine.clone();
                let request_id = request.id;
                let voter = users[(i + offset) % users.len()].id;
                handles.push(tokio::spawn(async move {
                    engine.cast_vote(request_id, voter, VoteType::Approve).await
                }));
            }
        }

        let mut failures = Vec::new();
        for handle in handles {
            if let Err(e) = handle.await.unwrap() {
                failures.push(e);
            }
        }
        assert!(failures.is_empty(), "failed votes: {:?}", failures);

        for request in &requests {
            let detail = engine.request_detail(request.id).await.unwrap();
            assert_eq!(detail.request.approvals(), 3);
            assert_eq!(detail.request.status, RequestStatus::Pending);
        }
        assert!(engine.transactions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("community.db");
        let adapter = SqliteAdapter::new_file(path.to_str().unwrap())
            .await
            .unwrap();
        adapter.init_schema().await.unwrap();
        let engine = Engine::new(Box::new(adapter));
        let users = register(&engine, 2).await;

        let cancelled = engine
            .submit_request(users[0].id, loan(), Money::from_major(10), "first")
            .await
            .unwrap();
        engine
            .cancel_request(cancelled.id, users[0].id)
            .await
            .unwrap();
        let approved = engine
            .submit_request(users[1].id, RequestKind::Deposit, Money::from_major(10), "second")
            .await
            .unwrap();
        engine
            .cast_vote(approved.id, users[0].id, VoteType::Approve)
            .await
            .unwrap();

        let history = engine
            .request_history(&HistoryFilter::default())
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].request.id, approved.id);
        assert_eq!(history[0].requester_name, "Member 1");
        assert_eq!(history[1].request.resolution, Some(Resolution::Cancelled));

        let as_json = serde_json::to_value(&history[1]).unwrap();
        assert_eq!(as_json["status"], "rejected");
        assert_eq!(as_json["resolution"], "cancelled");

        assert!(engine.pending_requests().await.unwrap().is_empty());
        assert_eq!(engine.transactions().await.unwrap().len(), 1);
    }
}
