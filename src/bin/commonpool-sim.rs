//! Runs a small community through a loan and a deposit against an in-memory
//! ledger, logging every step.
//!
//! `RUST_LOG` controls verbosity; `COMMONPOOL_*` variables override the
//! engine configuration.

use commonpool::{Engine, EngineConfig, HistoryFilter, LogNotifier, VoteType};
use ledger::{LedgerSystem, Money, RequestKind, adapters::MemoryAdapter};
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = EngineConfig::from_env()?;
    info!(?config, "starting simulation");

    let engine = Engine::from_parts(
        LedgerSystem::new(Box::new(MemoryAdapter::new())),
        config,
        Arc::new(LogNotifier),
    );

    let mut members = Vec::new();
    for (name, email) in [
        ("Asha", "asha@example.com"),
        ("Bina", "bina@example.com"),
        ("Chetan", "chetan@example.com"),
        ("Devi", "devi@example.com"),
        ("Esha", "esha@example.com"),
    ] {
        members.push(engine.register_user(name, email).await?);
    }
    let requester = &members[0];
    let voters = &members[1..];

    let loan = engine
        .submit_request(
            requester.id,
            RequestKind::Loan {
                title: "Sewing machine".to_string(),
                category: "business".to_string(),
            },
            Money::from_major(1_000),
            "A second machine for the tailoring shop",
        )
        .await?;

    for voter in voters {
        let outcome = engine
            .cast_vote(loan.id, voter.id, VoteType::Approve)
            .await?;
        info!(
            voter = %voter.name,
            status = %outcome.request.status,
            fund = %outcome.global_fund.total_fund,
            "loan vote"
        );
        if outcome.finalized() {
            break;
        }
    }

    let deposit = engine
        .submit_request(
            voters[0].id,
            RequestKind::Deposit,
            Money::from_major(500),
            "Monthly savings",
        )
        .await?;
    let outcome = engine
        .cast_vote(deposit.id, voters[1].id, VoteType::Reject)
        .await?;
    info!(status = %outcome.request.status, "deposit vote");

    let fund = engine.global_fund().await?;
    info!(fund = %fund.total_fund, "final pool");
    for summary in engine.request_history(&HistoryFilter::default()).await? {
        info!(
            request_id = %summary.request.id,
            requester = %summary.requester_name,
            kind = %summary.request.request_type(),
            amount = %summary.request.amount,
            status = %summary.request.status,
            "history"
        );
    }
    for entry in engine.transactions().await? {
        info!(
            request_id = %entry.request_id,
            success = entry.success,
            resolution = entry.resolution.as_str(),
            "transaction"
        );
    }

    // Let detached notification tasks drain before the runtime shuts down
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    Ok(())
}
