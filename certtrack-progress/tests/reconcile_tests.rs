//! Integration tests for the reconciliation engine

mod helpers;

use tokio_util::sync::CancellationToken;

use certtrack_progress::reconcile::{FeedChallenge, FeedRecord};
use certtrack_progress::store::{ProgressFilter, ProgressStore};
use helpers::{TestEngine, CERT_KEY};

fn feed(user: &str, lessons: &[&str]) -> FeedRecord {
    FeedRecord {
        user_id: user.to_string(),
        completed_challenges: lessons
            .iter()
            .map(|id| FeedChallenge {
                id: id.to_string(),
                completed_date: Some(1_717_000_000_000),
            })
            .collect(),
    }
}

#[tokio::test]
async fn test_feed_ahead_of_local() {
    let t = TestEngine::new().await;
    let (core, _) = t.enroll("u1").await;
    t.complete(core, "basic-html", "html-1").await;
    t.complete(core, "basic-html", "html-2").await;

    let report = t
        .engine
        .reconciler
        .run(
            &[feed("u1", &["html-1", "html-2", "html-3"])],
            &ProgressFilter::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.discrepancies.len(), 1);
    let d = &report.discrepancies[0];
    assert_eq!(d.user_id, "u1");
    assert_eq!(d.certification, CERT_KEY);
    assert_eq!(d.module, "basic-html");
    assert_eq!(d.extra_in_feed, vec!["html-3"]);
    assert!(d.extra_local.is_empty());
    assert_eq!(d.count_delta, 1);
    assert!(!report.cancelled);
}

#[tokio::test]
async fn test_matching_sets_report_nothing() {
    let t = TestEngine::new().await;
    let (core, _) = t.enroll("u1").await;
    t.complete(core, "basic-html", "html-1").await;

    let report = t
        .engine
        .reconciler
        .run(
            &[feed("u1", &["html-1"])],
            &ProgressFilter::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(report.discrepancies.is_empty());
    assert_eq!(report.users_processed, 1);
    assert_eq!(report.modules_checked, 1);
}

#[tokio::test]
async fn test_completed_modules_are_not_rechecked() {
    let t = TestEngine::new().await;
    let (core, _) = t.enroll("u1").await;
    t.complete(core, "survey-form", "survey-1").await;
    t.complete(core, "basic-html", "html-1").await;

    // The feed knows nothing about survey-form, which is completed locally
    let report = t
        .engine
        .reconciler
        .run(
            &[feed("u1", &["html-1"])],
            &ProgressFilter::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(report.discrepancies.is_empty());
    assert_eq!(report.modules_checked, 1);
}

#[tokio::test]
async fn test_user_missing_from_feed_reports_local_extras() {
    let t = TestEngine::new().await;
    let (core, _) = t.enroll("u1").await;
    t.complete(core, "basic-html", "html-1").await;

    let report = t
        .engine
        .reconciler
        .run(&[], &ProgressFilter::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.discrepancies.len(), 1);
    assert_eq!(report.discrepancies[0].extra_local, vec!["html-1"]);
    assert_eq!(report.discrepancies[0].count_delta, -1);
}

#[tokio::test]
async fn test_unmapped_feed_lessons_are_collected() {
    let t = TestEngine::new().await;
    let (core, _) = t.enroll("u1").await;
    t.complete(core, "basic-html", "html-1").await;

    let report = t
        .engine
        .reconciler
        .run(
            &[feed("u1", &["html-1", "retired-lesson"])],
            &ProgressFilter::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(report.discrepancies.is_empty());
    assert!(report.unmapped_lessons.contains("retired-lesson"));
}

#[tokio::test]
async fn test_output_is_deterministic_and_ordered() {
    let t = TestEngine::new().await;
    for user in ["u3", "u1", "u2"] {
        let (core, projects) = t.enroll(user).await;
        t.complete(core, "basic-html", "html-1").await;
        t.complete(core, "css-flexbox", "flex-1").await;
        t.complete(projects, "applied-accessibility", "a11y-1").await;
    }
    let records = vec![feed("u2", &["html-2"]), feed("u1", &["flex-2"])];

    let first = t
        .engine
        .reconciler
        .run(&records, &ProgressFilter::default(), &CancellationToken::new())
        .await
        .unwrap();
    let second = t
        .engine
        .reconciler
        .run(&records, &ProgressFilter::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(first.discrepancies, second.discrepancies);
    let keys: Vec<_> = first
        .discrepancies
        .iter()
        .map(|d| (d.user_id.clone(), d.module.clone()))
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    assert_eq!(first.users_processed, 3);
    assert_eq!(first.modules_checked, 9);
}

#[tokio::test]
async fn test_user_filter_limits_scan() {
    let t = TestEngine::new().await;
    for user in ["u1", "u2"] {
        let (core, _) = t.enroll(user).await;
        t.complete(core, "basic-html", "html-1").await;
    }

    let report = t
        .engine
        .reconciler
        .run(&[], &ProgressFilter::for_user("u2"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.users_processed, 1);
    assert!(report.discrepancies.iter().all(|d| d.user_id == "u2"));
}

#[tokio::test]
async fn test_cancelled_run_returns_partial_report() {
    let t = TestEngine::new().await;
    let (core, _) = t.enroll("u1").await;
    t.complete(core, "basic-html", "html-1").await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = t
        .engine
        .reconciler
        .run(&[], &ProgressFilter::default(), &cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.users_processed, 0);
    assert!(report.discrepancies.is_empty());
}

#[tokio::test]
async fn test_reconciliation_never_writes() {
    let t = TestEngine::new().await;
    let (core, _) = t.enroll("u1").await;
    t.complete(core, "basic-html", "html-1").await;
    let before = t.store.get_progress(core).await.unwrap();

    t.engine
        .reconciler
        .run(
            &[feed("u1", &["html-1", "html-2", "html-3"])],
            &ProgressFilter::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(t.store.get_progress(core).await.unwrap(), before);
}
