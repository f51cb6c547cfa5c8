//! Mock collaborators for tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use claude_runner::{AgentRunner, OutputSink, RunOptions, RunResult};

use crate::ranking::{RankInput, RankOutput};
use crate::schema::Form;
use crate::session;
use crate::types::{
    Entry, ExtractionResult, FieldScalar, FieldValue, Post, Thread, ThreadState,
};

use super::{
    EntryRanker, EvalResult, FieldExtractor, SubredditDiscoverer, ThreadDiscoverer,
    ThreadEvaluator, Verdict,
};

/// Returns a fixed list of community names.
pub struct MockSubredditDiscoverer {
    pub names: Vec<String>,
    pub error: Option<String>,
}

impl MockSubredditDiscoverer {
    pub fn new(names: &[&str]) -> Self {
        MockSubredditDiscoverer {
            names: names.iter().map(|s| s.to_string()).collect(),
            error: None,
        }
    }
}

#[async_trait]
impl SubredditDiscoverer for MockSubredditDiscoverer {
    async fn discover_subreddits(&self, _form: &Form, _query: &str) -> Result<Vec<String>> {
        if let Some(err) = &self.error {
            bail!("{}", err);
        }
        Ok(self.names.clone())
    }
}

/// Serves one batch of posts per discovery round.
pub struct MockThreadDiscoverer {
    rounds: Mutex<VecDeque<Vec<Post>>>,
}

impl MockThreadDiscoverer {
    pub fn new(rounds: Vec<Vec<Post>>) -> Self {
        MockThreadDiscoverer {
            rounds: Mutex::new(rounds.into()),
        }
    }
}

#[async_trait]
impl ThreadDiscoverer for MockThreadDiscoverer {
    async fn discover_threads(
        &self,
        _form: &Form,
        _query: &str,
        _subreddits: &[String],
        _limit: usize,
        _session_dir: &Path,
    ) -> Result<Vec<Post>> {
        match self.rounds.lock().unwrap().pop_front() {
            Some(posts) => Ok(posts),
            None => bail!("no threads found in discovery results"),
        }
    }
}

/// Evaluator with per-thread verdicts. Keeps persist the canonical thread
/// JSON like the real evaluator does.
#[derive(Default)]
pub struct MockEvaluator {
    pub threads: HashMap<String, Thread>,
    pub skip: HashMap<String, String>,
    pub fail: HashSet<String>,
    pub calls: Mutex<Vec<String>>,
}

impl MockEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keep(mut self, thread: Thread) -> Self {
        self.threads.insert(thread.post.id.clone(), thread);
        self
    }

    pub fn skipping(mut self, post_id: &str, reason: &str) -> Self {
        self.skip.insert(post_id.to_string(), reason.to_string());
        self
    }

    pub fn failing(mut self, post_id: &str) -> Self {
        self.fail.insert(post_id.to_string());
        self
    }
}

#[async_trait]
impl ThreadEvaluator for MockEvaluator {
    async fn evaluate_thread(
        &self,
        _form: &Form,
        state: &ThreadState,
        session_dir: &Path,
    ) -> Result<EvalResult> {
        self.calls.lock().unwrap().push(state.post_id.clone());

        if self.fail.contains(&state.post_id) {
            bail!("evaluator crashed on {}", state.post_id);
        }

        if let Some(reason) = self.skip.get(&state.post_id) {
            return Ok(EvalResult {
                post_id: state.post_id.clone(),
                verdict: Verdict::Skip,
                reason: reason.clone(),
                estimated_entries: 0,
                thread_saved: false,
            });
        }

        let mut thread_saved = false;
        if let Some(thread) = self.threads.get(&state.post_id) {
            let path = session::thread_path(session_dir, &state.post_id);
            std::fs::create_dir_all(session_dir)?;
            std::fs::write(&path, serde_json::to_string_pretty(thread)?)?;
            thread_saved = true;
        }

        Ok(EvalResult {
            post_id: state.post_id.clone(),
            verdict: Verdict::Keep,
            reason: "relevant".to_string(),
            estimated_entries: 1,
            thread_saved,
        })
    }
}

/// Extractor with canned results per post id; unknown threads produce one
/// entry derived from the thread title.
#[derive(Default)]
pub struct MockExtractor {
    pub results: HashMap<String, ExtractionResult>,
    pub fail: HashSet<String>,
    pub primary_field: String,
}

impl MockExtractor {
    pub fn new(primary_field: &str) -> Self {
        MockExtractor {
            primary_field: primary_field.to_string(),
            ..Default::default()
        }
    }

    pub fn with_result(mut self, post_id: &str, result: ExtractionResult) -> Self {
        self.results.insert(post_id.to_string(), result);
        self
    }

    pub fn failing(mut self, post_id: &str) -> Self {
        self.fail.insert(post_id.to_string());
        self
    }
}

#[async_trait]
impl FieldExtractor for MockExtractor {
    async fn extract(
        &self,
        thread: &Thread,
        _form: &Form,
        _output: Option<OutputSink>,
    ) -> Result<ExtractionResult> {
        if self.fail.contains(&thread.post.id) {
            bail!("extractor crashed on {}", thread.post.id);
        }
        if let Some(result) = self.results.get(&thread.post.id) {
            return Ok(result.clone());
        }
        Ok(ExtractionResult {
            entries: vec![Entry {
                fields: vec![FieldValue {
                    id: self.primary_field.clone(),
                    value: Some(FieldScalar::Text(thread.post.title.clone())),
                    confidence: 0.9,
                    ..Default::default()
                }],
                ..Default::default()
            }],
        })
    }
}

/// Ranker that fails every invocation, for degradation tests.
pub struct FailingRanker;

#[async_trait]
impl EntryRanker for FailingRanker {
    async fn rank_entries(&self, _form: &Form, _inputs: &[RankInput]) -> Result<Vec<RankOutput>> {
        bail!("ranking agent unavailable")
    }
}

/// Scripted [`AgentRunner`]: pops one canned response per invocation.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: Mutex<VecDeque<Result<String, String>>>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, text: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(text.to_string()));
        self
    }

    pub fn fail_next(self, error: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(error.to_string()));
        self
    }
}

#[async_trait]
impl AgentRunner for ScriptedRunner {
    async fn run(&self, prompt: &str, _opts: RunOptions) -> Result<RunResult> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(RunResult { text }),
            Some(Err(error)) => bail!("{}", error),
            None => bail!("scripted runner exhausted"),
        }
    }
}

/// Build the flattened rank inputs the engine-only path would see; test
/// helper mirroring the orchestrator's collection step.
pub fn rank_inputs_for(manifest: &crate::types::Manifest) -> Vec<RankInput> {
    let mut inputs = Vec::new();
    for ts in &manifest.threads {
        if ts.status != crate::types::ThreadStatus::Extracted {
            continue;
        }
        for (j, entry) in ts.entries.iter().enumerate() {
            inputs.push(RankInput {
                thread_post_id: ts.post_id.clone(),
                entry_index: j,
                entry: entry.clone(),
                thread_score: ts.score,
                num_comments: ts.num_comments,
            });
        }
    }
    inputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ranker::HybridRanker;
    use crate::ranking;
    use crate::schema::{Field, FieldKind};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn form() -> Form {
        Form {
            title: "T".to_string(),
            description: String::new(),
            search_hints: Vec::new(),
            fields: vec![Field {
                id: "name".to_string(),
                kind: FieldKind::String,
                question: "?".to_string(),
                search_hints: Vec::new(),
                required: true,
                internal: false,
            }],
        }
    }

    fn one_input() -> Vec<RankInput> {
        vec![RankInput {
            thread_post_id: "t1".to_string(),
            entry_index: 0,
            entry: Entry {
                fields: vec![FieldValue {
                    id: "name".to_string(),
                    value: Some(FieldScalar::Text("Kyoto".to_string())),
                    confidence: 0.8,
                    ..Default::default()
                }],
                ..Default::default()
            },
            thread_score: 10,
            num_comments: 5,
        }]
    }

    #[tokio::test]
    async fn test_hybrid_ranker_applies_assessments() {
        let runner = Arc::new(ScriptedRunner::new().respond(
            r#"[{"index": 0, "flags": ["low_effort"], "penalty": 20, "reason": "thin"}]"#,
        ));
        let ranker = HybridRanker::new(runner, "haiku", CancellationToken::new());
        let outputs = ranker.rank_entries(&form(), &one_input()).await.unwrap();
        assert_eq!(outputs[0].penalty, -20.0);
        assert_eq!(outputs[0].flags, vec!["low_effort".to_string()]);
    }

    #[tokio::test]
    async fn test_hybrid_ranker_degrades_on_agent_failure() {
        let runner = Arc::new(ScriptedRunner::new().fail_next("model down"));
        let ranker = HybridRanker::new(runner, "haiku", CancellationToken::new());
        let outputs = ranker.rank_entries(&form(), &one_input()).await.unwrap();
        // Engine scores survive, no flags added.
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].penalty, 0.0);
        assert!(outputs[0].flags.is_empty());
    }

    #[tokio::test]
    async fn test_hybrid_ranker_empty_response_means_clean() {
        let runner =
            Arc::new(ScriptedRunner::new().respond("Everything looks reasonable to me."));
        let ranker = HybridRanker::new(runner, "haiku", CancellationToken::new());
        let outputs = ranker.rank_entries(&form(), &one_input()).await.unwrap();
        assert_eq!(outputs[0].penalty, 0.0);
    }

    #[test]
    fn test_rank_inputs_collects_extracted_only() {
        let mut manifest = crate::session::manifest::new_manifest(
            crate::types::FormRef::default(),
            "q",
            vec![],
        );
        let post = |id: &str| Post {
            id: id.to_string(),
            permalink: format!("/r/x/comments/{}/", id),
            ..Default::default()
        };
        manifest.add_thread(ThreadState::from_post(&post("a")));
        manifest.add_thread(ThreadState::from_post(&post("b")));
        manifest.set_entries("a", vec![Entry::default(), Entry::default()]);

        let inputs = rank_inputs_for(&manifest);
        assert_eq!(inputs.len(), 2);
        assert!(inputs.iter().all(|i| i.thread_post_id == "a"));
        assert_eq!(inputs[1].entry_index, 1);
    }

    #[test]
    fn test_engine_stages_compose() {
        let inputs = one_input();
        let mut outputs = ranking::score_algorithmic(&form(), &inputs);
        ranking::apply_diversity_penalty(&form(), &inputs, &mut outputs);
        ranking::apply_thread_saturation(&inputs, &mut outputs);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].penalty, 0.0);
    }
}
