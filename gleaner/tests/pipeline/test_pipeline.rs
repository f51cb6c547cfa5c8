//! End-to-end pipeline runs over mock collaborators.

use std::collections::HashSet;
use std::sync::Arc;

use gleaner::agents::mock::{FailingRanker, MockEvaluator, MockThreadDiscoverer};
use gleaner::agents::ranker::EngineRanker;
use gleaner::orchestrator::Orchestrator;
use gleaner::search::mock::MockSearcher;
use gleaner::session::manifest;
use gleaner::types::{RunStatus, ThreadStatus};
use tokio_util::sync::CancellationToken;

use super::common;

#[tokio::test(flavor = "multi_thread")]
async fn test_happy_path_reaches_goal_and_ranks() {
    let output = tempfile::tempdir().unwrap();
    let posts = common::posts(15);

    let orchestrator = Orchestrator::new(Arc::new(MockSearcher::new()))
        .with_thread_discoverer(common::single_round_discoverer(posts.clone()))
        .with_evaluator(Arc::new(common::keeping_evaluator(&posts)))
        .with_extractor(Arc::new(common::extractor()))
        .with_ranker(Arc::new(EngineRanker));

    let outcome = orchestrator
        .run(common::config(10, output.path()), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);

    let manifest = manifest::load(&outcome.session_dir).unwrap().unwrap();
    let counts = manifest.counts_by_status();

    // Goal reached; early stop may leave surplus threads unprocessed.
    assert!(counts.toward_goal() >= 10);
    assert_eq!(counts.failed, 0);
    assert_eq!(counts.skipped, 0);
    assert_eq!(manifest.runs.last().unwrap().status, RunStatus::Completed);

    // Ranked threads carry scored entries within bounds.
    for ts in &manifest.threads {
        if ts.status == ThreadStatus::Ranked {
            assert!(!ts.entries.is_empty());
            for entry in &ts.entries {
                let score = entry.rank_score.expect("ranked entry has a score");
                assert!((0.0..=100.0).contains(&score));
            }
        }
    }

    // Unique post ids across the manifest.
    let ids: HashSet<&str> = manifest.threads.iter().map(|t| t.post_id.as_str()).collect();
    assert_eq!(ids.len(), manifest.threads.len());

    // Atomic save leaves no staging file behind.
    assert!(outcome.session_dir.join("manifest.json").exists());
    assert!(!outcome.session_dir.join("manifest.json.tmp").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_skip_and_fail_paths() {
    let output = tempfile::tempdir().unwrap();
    let posts = common::posts(4);

    let evaluator = common::keeping_evaluator(&posts[..2])
        .skipping("p2", "meta discussion, no recommendations")
        .failing("p3");

    let orchestrator = Orchestrator::new(Arc::new(MockSearcher::new()))
        .with_thread_discoverer(common::single_round_discoverer(posts.clone()))
        .with_evaluator(Arc::new(evaluator))
        .with_extractor(Arc::new(common::extractor()));

    let outcome = orchestrator
        .run(common::config(10, output.path()), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);

    let manifest = manifest::load(&outcome.session_dir).unwrap().unwrap();

    let skipped = manifest.find_thread("p2").unwrap();
    assert_eq!(skipped.status, ThreadStatus::Skipped);
    assert_eq!(
        skipped.skip_reason.as_deref(),
        Some("meta discussion, no recommendations")
    );

    let failed = manifest.find_thread("p3").unwrap();
    assert_eq!(failed.status, ThreadStatus::Failed);
    assert!(failed.error.as_deref().unwrap().contains("evaluation failed"));

    for id in ["p0", "p1"] {
        let extracted = manifest.find_thread(id).unwrap();
        assert_eq!(extracted.status, ThreadStatus::Extracted);
        assert!(!extracted.entries.is_empty());
        assert!(extracted.extracted_at.is_some());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_evaluator_failures_retry_once() {
    let output = tempfile::tempdir().unwrap();
    let posts = common::posts(1);

    let evaluator = MockEvaluator::new().failing("p0");
    let calls_handle = Arc::new(evaluator);

    let orchestrator = Orchestrator::new(Arc::new(MockSearcher::new()))
        .with_thread_discoverer(common::single_round_discoverer(posts))
        .with_evaluator(calls_handle.clone())
        .with_extractor(Arc::new(common::extractor()));

    orchestrator
        .run(common::config(10, output.path()), CancellationToken::new())
        .await
        .unwrap();

    // Two attempts for the failing thread, then terminal failure.
    assert_eq!(calls_handle.calls.lock().unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_no_evaluator_fetches_threads_directly() {
    let output = tempfile::tempdir().unwrap();
    let posts = common::posts(3);

    let mut searcher = MockSearcher::new();
    for p in &posts {
        searcher.insert_thread(common::thread_for(p));
    }

    let orchestrator = Orchestrator::new(Arc::new(searcher))
        .with_thread_discoverer(common::single_round_discoverer(posts.clone()))
        .with_extractor(Arc::new(common::extractor()));

    let outcome = orchestrator
        .run(common::config(3, output.path()), CancellationToken::new())
        .await
        .unwrap();

    let manifest = manifest::load(&outcome.session_dir).unwrap().unwrap();
    assert!(manifest.counts_by_status().toward_goal() >= 3);

    // Canonical thread payloads were persisted by the workers.
    for p in &posts {
        let path = outcome.session_dir.join(format!("thread_{}.json", p.id));
        assert!(path.exists());
        let data = std::fs::read_to_string(path).unwrap();
        let thread: gleaner::types::Thread = serde_json::from_str(&data).unwrap();
        assert_eq!(thread.post.id, p.id);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_circuit_breaker_stops_after_dead_first_round() {
    let output = tempfile::tempdir().unwrap();
    let posts = common::posts(5);

    let mut evaluator = MockEvaluator::new();
    for p in &posts {
        evaluator = evaluator.skipping(&p.id, "not relevant");
    }

    // More rounds with fresh threads are available; the breaker must stop
    // after the first.
    let second_round: Vec<_> = (0..5).map(|i| common::post(&format!("q{}", i))).collect();
    let third_round: Vec<_> = (0..5).map(|i| common::post(&format!("z{}", i))).collect();
    let discoverer = Arc::new(MockThreadDiscoverer::new(vec![
        posts.clone(),
        second_round,
        third_round,
    ]));

    let orchestrator = Orchestrator::new(Arc::new(MockSearcher::new()))
        .with_thread_discoverer(discoverer)
        .with_evaluator(Arc::new(evaluator))
        .with_extractor(Arc::new(common::extractor()));

    let outcome = orchestrator
        .run(common::config(10, output.path()), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);

    let manifest = manifest::load(&outcome.session_dir).unwrap().unwrap();
    let counts = manifest.counts_by_status();
    assert_eq!(counts.extracted, 0);
    assert_eq!(counts.skipped, 5);
    // No second round was attempted.
    assert_eq!(manifest.threads.len(), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ranker_failure_degrades_without_failing_run() {
    let output = tempfile::tempdir().unwrap();
    let posts = common::posts(3);

    let orchestrator = Orchestrator::new(Arc::new(MockSearcher::new()))
        .with_thread_discoverer(common::single_round_discoverer(posts.clone()))
        .with_evaluator(Arc::new(common::keeping_evaluator(&posts)))
        .with_extractor(Arc::new(common::extractor()))
        .with_ranker(Arc::new(FailingRanker));

    let outcome = orchestrator
        .run(common::config(3, output.path()), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);

    let manifest = manifest::load(&outcome.session_dir).unwrap().unwrap();
    // Extraction survived; nothing was ranked and no scores were written.
    let counts = manifest.counts_by_status();
    assert!(counts.extracted >= 3);
    assert_eq!(counts.ranked, 0);
    for ts in &manifest.threads {
        for entry in &ts.entries {
            assert!(entry.rank_score.is_none());
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_discovery_failure_on_first_round_is_fatal() {
    let output = tempfile::tempdir().unwrap();

    // No agentic discoverer and the whole-site search errors out.
    let searcher = MockSearcher {
        error: Some("transport down".to_string()),
        ..Default::default()
    };
    let orchestrator =
        Orchestrator::new(Arc::new(searcher)).with_extractor(Arc::new(common::extractor()));

    let mut config = common::config(10, output.path());
    config.subreddits.clear();

    let result = orchestrator.run(config, CancellationToken::new()).await;
    assert!(result.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_subreddit_discovery_runs_once_and_persists() {
    let output = tempfile::tempdir().unwrap();
    let posts = common::posts(3);

    let orchestrator = Orchestrator::new(Arc::new(MockSearcher::new()))
        .with_subreddit_discoverer(Arc::new(
            gleaner::agents::mock::MockSubredditDiscoverer::new(&[
                "r/Travel",
                "familytravel",
                "solotravel",
                "bad name!",
            ]),
        ))
        .with_thread_discoverer(common::single_round_discoverer(posts.clone()))
        .with_evaluator(Arc::new(common::keeping_evaluator(&posts)))
        .with_extractor(Arc::new(common::extractor()));

    // Query only: community discovery must run and its result persist.
    let mut config = common::config(3, output.path());
    config.subreddits.clear();

    let outcome = orchestrator
        .run(config, CancellationToken::new())
        .await
        .unwrap();

    let manifest = manifest::load(&outcome.session_dir).unwrap().unwrap();
    assert!(manifest.discovered_subreddits);
    assert_eq!(
        manifest.subreddits,
        vec!["travel", "familytravel", "solotravel"]
    );
}
