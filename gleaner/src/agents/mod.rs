//! Collaborator interfaces for the model-assisted pipeline phases, plus the
//! Claude-backed implementations.
//!
//! The orchestrator only depends on the traits here; concrete agents drive
//! the `claude` CLI through the [`claude_runner::AgentRunner`] seam so tests
//! can substitute scripted runners.

pub mod discovery;
pub mod evaluation;
pub mod extraction;
pub mod json;
pub mod mock;
pub mod prompts;
pub mod ranker;
pub mod thread_discovery;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use claude_runner::OutputSink;
use serde::{Deserialize, Serialize};

use crate::ranking::{RankInput, RankOutput};
use crate::schema::Form;
use crate::types::{ExtractionResult, Post, Thread, ThreadState};

/// Evaluator verdict for a single thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Keep,
    #[serde(other)]
    Skip,
}

/// Result of evaluating one thread.
#[derive(Debug, Clone, Deserialize)]
pub struct EvalResult {
    #[serde(default)]
    pub post_id: String,
    pub verdict: Verdict,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub estimated_entries: i64,
    #[serde(default)]
    pub thread_saved: bool,
}

/// Finds communities likely to contain threads matching a form.
#[async_trait]
pub trait SubredditDiscoverer: Send + Sync {
    async fn discover_subreddits(&self, form: &Form, query: &str) -> Result<Vec<String>>;
}

/// Finds candidate threads across communities. May write
/// `discovery_results.json` into the session directory.
#[async_trait]
pub trait ThreadDiscoverer: Send + Sync {
    async fn discover_threads(
        &self,
        form: &Form,
        query: &str,
        subreddits: &[String],
        limit: usize,
        session_dir: &Path,
    ) -> Result<Vec<Post>>;
}

/// Judges whether a thread is worth extracting. On a `keep` verdict the
/// evaluator persists the canonical `thread_<postid>.json` into the session
/// directory.
#[async_trait]
pub trait ThreadEvaluator: Send + Sync {
    async fn evaluate_thread(
        &self,
        form: &Form,
        state: &ThreadState,
        session_dir: &Path,
    ) -> Result<EvalResult>;
}

/// Extracts structured entries from a thread. Streaming model output goes to
/// `output` when provided (the shared extraction log).
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    async fn extract(
        &self,
        thread: &Thread,
        form: &Form,
        output: Option<OutputSink>,
    ) -> Result<ExtractionResult>;
}

/// Ranks extracted entries.
#[async_trait]
pub trait EntryRanker: Send + Sync {
    async fn rank_entries(&self, form: &Form, inputs: &[RankInput]) -> Result<Vec<RankOutput>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_unknown_maps_to_skip() {
        let keep: Verdict = serde_json::from_str(r#""keep""#).unwrap();
        let skip: Verdict = serde_json::from_str(r#""skip""#).unwrap();
        let other: Verdict = serde_json::from_str(r#""maybe""#).unwrap();
        assert_eq!(keep, Verdict::Keep);
        assert_eq!(skip, Verdict::Skip);
        assert_eq!(other, Verdict::Skip);
    }
}
