//! Cancellation, resume, and crash-safety behavior.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use claude_runner::OutputSink;
use gleaner::agents::mock::{MockEvaluator, MockExtractor, MockThreadDiscoverer};
use gleaner::agents::FieldExtractor;
use gleaner::orchestrator::Orchestrator;
use gleaner::schema::Form;
use gleaner::search::mock::MockSearcher;
use gleaner::session::manifest::{self, new_manifest};
use gleaner::types::{
    ExtractionResult, FormRef, RunStatus, Thread, ThreadState, ThreadStatus,
};
use tokio_util::sync::CancellationToken;

use super::common;

/// Extractor that sleeps per thread so cancellation can land mid-pipeline.
struct SlowExtractor {
    inner: MockExtractor,
    delay: Duration,
}

#[async_trait]
impl FieldExtractor for SlowExtractor {
    async fn extract(
        &self,
        thread: &Thread,
        form: &Form,
        output: Option<OutputSink>,
    ) -> Result<ExtractionResult> {
        tokio::time::sleep(self.delay).await;
        self.inner.extract(thread, form, output).await
    }
}

fn extracted_ids(dir: &std::path::Path) -> HashSet<String> {
    let manifest = manifest::load(dir).unwrap().unwrap();
    manifest
        .threads
        .iter()
        .filter(|t| matches!(t.status, ThreadStatus::Extracted | ThreadStatus::Ranked))
        .map(|t| t.post_id.clone())
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancellation_saves_state_and_resume_completes() {
    let output = tempfile::tempdir().unwrap();
    let posts = common::posts(10);

    let build = |delay_ms: u64| {
        Orchestrator::new(Arc::new(MockSearcher::new()))
            .with_thread_discoverer(Arc::new(MockThreadDiscoverer::new(vec![posts.clone()])))
            .with_evaluator(Arc::new(common::keeping_evaluator(&posts)))
            .with_extractor(Arc::new(SlowExtractor {
                inner: common::extractor(),
                delay: Duration::from_millis(delay_ms),
            }))
    };

    // First run: cancel while extraction is in flight.
    let cancel = CancellationToken::new();
    let canceller = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            cancel.cancel();
        }
    });

    let mut config = common::config(10, output.path());
    config.workers = 2;
    let outcome = build(100).run(config, cancel).await.unwrap();
    canceller.await.unwrap();
    assert_eq!(outcome.status, RunStatus::Interrupted);

    let manifest = manifest::load(&outcome.session_dir).unwrap().unwrap();
    assert_eq!(manifest.runs.last().unwrap().status, RunStatus::Interrupted);
    let first_extracted = extracted_ids(&outcome.session_dir);
    assert!(first_extracted.len() < 10, "cancellation landed too late");

    // Second run over the same session: completes and the extracted set is a
    // superset of the first run's.
    let mut config = common::config(10, output.path());
    config.session = Some(outcome.session_dir.clone());
    let outcome2 = build(0).run(config, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome2.status, RunStatus::Completed);
    assert_eq!(outcome2.session_dir, outcome.session_dir);

    let second_extracted = extracted_ids(&outcome.session_dir);
    assert!(second_extracted.is_superset(&first_extracted));
    assert!(second_extracted.len() >= 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resume_feeds_collected_threads_without_reevaluation() {
    let output = tempfile::tempdir().unwrap();
    let session_dir = output.path().join("resumed-session");

    // Seed a session with two collected threads and their canonical
    // payloads, as a cancelled earlier run would leave behind.
    let posts = common::posts(2);
    let mut manifest = new_manifest(
        FormRef {
            title: "Family Vacation Ideas".to_string(),
            path: "forms/vacation.json".to_string(),
            hash: "cafe0123".to_string(),
        },
        "family vacation",
        vec!["travel".to_string()],
    );
    for p in &posts {
        manifest.add_thread(ThreadState::from_post(p));
        manifest.mark_collected(&p.id);
    }
    manifest::save(&session_dir, &mut manifest).unwrap();
    for p in &posts {
        std::fs::write(
            session_dir.join(format!("thread_{}.json", p.id)),
            serde_json::to_string_pretty(&common::thread_for(p)).unwrap(),
        )
        .unwrap();
    }

    let evaluator = Arc::new(MockEvaluator::new());
    let orchestrator = Orchestrator::new(Arc::new(MockSearcher::new()))
        .with_thread_discoverer(Arc::new(MockThreadDiscoverer::new(vec![vec![]])))
        .with_evaluator(evaluator.clone())
        .with_extractor(Arc::new(common::extractor()));

    let mut config = common::config(2, output.path());
    config.session = Some(session_dir.clone());
    let outcome = orchestrator
        .run(config, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);

    // Collected threads went straight to extraction.
    assert!(evaluator.calls.lock().unwrap().is_empty());
    let ids = extracted_ids(&session_dir);
    assert_eq!(ids.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_corrupt_canonical_thread_file_is_refetched() {
    let output = tempfile::tempdir().unwrap();
    let session_dir = output.path().join("corrupt-session");

    let posts = common::posts(1);
    let mut manifest = new_manifest(
        FormRef {
            title: "Family Vacation Ideas".to_string(),
            path: "forms/vacation.json".to_string(),
            hash: "cafe0123".to_string(),
        },
        "family vacation",
        vec!["travel".to_string()],
    );
    manifest.add_thread(ThreadState::from_post(&posts[0]));
    manifest.mark_collected(&posts[0].id);
    manifest::save(&session_dir, &mut manifest).unwrap();

    // A corrupt canonical payload forces a refetch through the searcher.
    let thread_path = session_dir.join(format!("thread_{}.json", posts[0].id));
    std::fs::write(&thread_path, "{definitely not json").unwrap();

    let mut searcher = MockSearcher::new();
    searcher.insert_thread(common::thread_for(&posts[0]));
    let searcher = Arc::new(searcher);

    let orchestrator = Orchestrator::new(searcher.clone())
        .with_thread_discoverer(Arc::new(MockThreadDiscoverer::new(vec![vec![]])))
        .with_extractor(Arc::new(common::extractor()));

    let mut config = common::config(1, output.path());
    config.session = Some(session_dir.clone());
    let outcome = orchestrator
        .run(config, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);

    // The refetch happened and the canonical payload was rewritten valid.
    assert_eq!(
        searcher.fetched.lock().unwrap().as_slice(),
        &[posts[0].permalink.clone()]
    );
    let rewritten: Thread =
        serde_json::from_str(&std::fs::read_to_string(&thread_path).unwrap()).unwrap();
    assert_eq!(rewritten.post.id, posts[0].id);

    let ids = extracted_ids(&session_dir);
    assert!(ids.contains(&posts[0].id));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rerun_of_completed_session_is_idempotent() {
    let output = tempfile::tempdir().unwrap();
    let posts = common::posts(5);

    let build = || {
        Orchestrator::new(Arc::new(MockSearcher::new()))
            .with_thread_discoverer(Arc::new(MockThreadDiscoverer::new(vec![
                posts.clone(),
                vec![],
            ])))
            .with_evaluator(Arc::new(common::keeping_evaluator(&posts)))
            .with_extractor(Arc::new(common::extractor()))
    };

    let outcome = build()
        .run(common::config(5, output.path()), CancellationToken::new())
        .await
        .unwrap();
    let first = extracted_ids(&outcome.session_dir);
    assert!(first.len() >= 5);

    let mut config = common::config(5, output.path());
    config.session = Some(outcome.session_dir.clone());
    build().run(config, CancellationToken::new()).await.unwrap();

    let second = extracted_ids(&outcome.session_dir);
    assert!(second.is_superset(&first));

    let manifest = manifest::load(&outcome.session_dir).unwrap().unwrap();
    assert_eq!(manifest.runs.len(), 2);
    assert!(manifest
        .runs
        .iter()
        .all(|r| r.status == RunStatus::Completed));
}
