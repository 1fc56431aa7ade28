// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::clock::FakeClock;
use crate::matcher::ExactMatcher;
use crate::pool::PoolConfig;
use munchkin_storage::{list_wal_files, Action, WalFile, WalFileManager, WalManagerConfig};
use tempfile::tempdir;

const RULE: &str = r#"{"kind":["order"]}"#;
const EVENT: &[u8] = br#"{"kind":"order"}"#;

fn pipeline_with(
    journal: Option<Journal>,
    clock: FakeClock,
    checkout_timeout: Option<Duration>,
) -> MutationPipeline<ExactMatcher, FakeClock> {
    // One replica so every operation sees the same state.
    let pool = MatcherPool::new(
        &ExactMatcher::new(),
        PoolConfig {
            size: 1,
            checkout_timeout,
        },
    )
    .unwrap();
    MutationPipeline::new(pool, journal, Watermark::default(), clock)
}

fn pipeline(clock: FakeClock) -> MutationPipeline<ExactMatcher, FakeClock> {
    pipeline_with(None, clock, Some(Duration::from_secs(1)))
}

fn journal(dir: &std::path::Path) -> Journal {
    let manager = WalFileManager::new(WalManagerConfig {
        dir: dir.to_path_buf(),
        prefix: "mwal-".to_string(),
        max_entries_per_file: 100,
    })
    .unwrap();
    Journal::spawn(Arc::new(manager))
}

fn logged(dir: &std::path::Path) -> Vec<WalEntry> {
    let mut out = Vec::new();
    for name in list_wal_files(dir, "mwal-").unwrap() {
        let mut file = WalFile::open(&name.path).unwrap();
        out.extend(file.entries().map(Result::unwrap));
    }
    out
}

#[tokio::test]
async fn add_then_match_then_delete() {
    let p = pipeline(FakeClock::new(100));

    let added = p.add_rule("orders", RULE).await.unwrap();
    assert_eq!(added, 100);
    assert_eq!(p.match_event(EVENT).await.unwrap(), vec!["orders"]);

    let deleted = p.delete_rule("orders").await.unwrap();
    assert!(deleted > added);
    assert!(p.match_event(EVENT).await.unwrap().is_empty());
    assert_eq!(p.watermark(), deleted);
}

#[tokio::test]
async fn local_timestamps_increase_when_clock_stalls_or_goes_back() {
    let clock = FakeClock::new(500);
    let p = pipeline(clock.clone());

    let first = p.add_rule("a", RULE).await.unwrap();
    let second = p.add_rule("b", RULE).await.unwrap();
    clock.set(10);
    let third = p.delete_rule("a").await.unwrap();

    assert_eq!(first, 500);
    assert_eq!(second, 501);
    assert_eq!(third, 502);
    assert_eq!(p.watermark(), 502);
}

#[tokio::test]
async fn local_timestamp_follows_replicated_watermark() {
    let p = pipeline(FakeClock::new(5));
    p.apply_entry(&WalEntry::add(1_000, "peer", RULE)).await.unwrap();

    let local = p.add_rule("mine", RULE).await.unwrap();
    assert_eq!(local, 1_001);
}

#[tokio::test]
async fn validation_failure_changes_nothing() {
    let p = pipeline(FakeClock::new(100));

    let err = p.add_rule("", RULE).await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation(ValidationError::EmptyKey)));
    let err = p.add_rule("k", "").await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation(ValidationError::EmptyPattern)));
    assert_eq!(p.watermark(), 0);
}

#[tokio::test]
async fn engine_rejection_is_not_logged() {
    let dir = tempdir().unwrap();
    let p = pipeline_with(Some(journal(dir.path())), FakeClock::new(100), None);

    let err = p.add_rule("k", "not json").await.unwrap_err();
    assert!(matches!(err, PipelineError::Matcher(_)));
    assert_eq!(p.watermark(), 0);

    p.journal().unwrap().flush().await;
    assert!(logged(dir.path()).is_empty());
}

#[tokio::test]
async fn local_mutations_are_journaled_in_order() {
    let dir = tempdir().unwrap();
    let p = pipeline_with(Some(journal(dir.path())), FakeClock::new(100), None);

    let t1 = p.add_rule("a", RULE).await.unwrap();
    let t2 = p.delete_rule("a").await.unwrap();
    p.journal().unwrap().close().await.unwrap();

    let entries = logged(dir.path());
    assert_eq!(
        entries,
        vec![WalEntry::add(t1, "a", RULE), WalEntry::delete(t2, "a")]
    );
}

#[tokio::test]
async fn stale_entry_is_a_no_op() {
    let p = pipeline(FakeClock::new(100));
    p.add_rule("a", RULE).await.unwrap();
    let before = p.watermark();

    let outcome = p.apply_entry(&WalEntry::delete(before, "a")).await.unwrap();
    assert_eq!(outcome, ApplyOutcome::Stale);
    assert_eq!(outcome.ack(), 0);

    let outcome = p.apply_entry(&WalEntry::delete(before - 1, "a")).await.unwrap();
    assert_eq!(outcome, ApplyOutcome::Stale);

    assert_eq!(p.watermark(), before);
    assert_eq!(p.match_event(EVENT).await.unwrap(), vec!["a"]);
}

#[tokio::test]
async fn fresh_entry_keeps_its_timestamp_and_acks_local_time() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::new(7_777);
    let p = pipeline_with(Some(journal(dir.path())), clock, None);

    let entry = WalEntry::add(50, "peer-rule", RULE);
    let outcome = p.apply_entry(&entry).await.unwrap();

    assert_eq!(outcome, ApplyOutcome::Applied { timestamp: 7_777 });
    assert_eq!(p.watermark(), 50);
    assert_eq!(p.match_event(EVENT).await.unwrap(), vec!["peer-rule"]);

    p.journal().unwrap().close().await.unwrap();
    assert_eq!(logged(dir.path()), vec![entry]);
}

#[tokio::test]
async fn replicated_legacy_delete_is_accepted() {
    let p = pipeline(FakeClock::new(1));
    p.apply_entry(&WalEntry::add(10, "k", RULE)).await.unwrap();

    let legacy = WalEntry {
        timestamp: 11,
        key: b"k".to_vec(),
        pattern: b"-".to_vec(),
        action: Action::Delete,
    };
    assert!(matches!(
        p.apply_entry(&legacy).await.unwrap(),
        ApplyOutcome::Applied { .. }
    ));
    assert!(p.match_event(EVENT).await.unwrap().is_empty());
}

#[tokio::test]
async fn only_local_entries_are_published() {
    let p = pipeline(FakeClock::new(100));
    let mut feed = p.subscribe_local();

    p.apply_entry(&WalEntry::add(50, "remote", RULE)).await.unwrap();
    let ts = p.add_rule("local", RULE).await.unwrap();

    let published = feed.recv().await.unwrap();
    assert_eq!(published, WalEntry::add(ts, "local", RULE));
    assert!(feed.try_recv().is_err());
}

#[tokio::test]
async fn delete_pattern_is_not_implemented() {
    let p = pipeline(FakeClock::new(100));
    let err = p.delete_pattern("k", RULE).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotImplemented(_)));
}

#[tokio::test]
async fn submit_completes_within_wait() {
    let p = Arc::new(pipeline(FakeClock::new(100)));
    let outcome = p
        .submit(Mutation::add("k", RULE), Duration::from_secs(5))
        .await;
    assert!(matches!(outcome, Submission::Completed { timestamp: 100 }));
}

#[tokio::test]
async fn submit_reports_failures() {
    let p = Arc::new(pipeline(FakeClock::new(100)));

    let outcome = p.submit(Mutation::delete(""), Duration::from_secs(5)).await;
    assert!(matches!(outcome, Submission::Failed(PipelineError::Validation(_))));

    let outcome = p
        .submit(Mutation::add("k", "[]"), Duration::from_secs(5))
        .await;
    assert!(matches!(outcome, Submission::Failed(PipelineError::Matcher(_))));
}

#[tokio::test]
async fn submit_accepts_and_finishes_in_background() {
    let p = Arc::new(pipeline_with(None, FakeClock::new(100), None));
    let held = p.pool().checkout().await.unwrap();

    let outcome = p
        .submit(Mutation::add("slow", RULE), Duration::from_millis(20))
        .await;
    assert!(matches!(outcome, Submission::Accepted));
    assert_eq!(p.watermark(), 0);

    drop(held);
    for _ in 0..100 {
        if p.watermark() == 100 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(p.watermark(), 100);
    assert_eq!(p.match_event(EVENT).await.unwrap(), vec!["slow"]);
}

#[tokio::test]
async fn exhausted_pool_surfaces_as_pool_error() {
    let p = pipeline_with(None, FakeClock::new(100), Some(Duration::from_millis(10)));
    let _held = p.pool().checkout().await.unwrap();

    let err = p.add_rule("k", RULE).await.unwrap_err();
    assert!(matches!(err, PipelineError::Pool(PoolError::Exhausted(_))));
}
