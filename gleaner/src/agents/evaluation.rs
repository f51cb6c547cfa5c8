//! Per-thread evaluation agent.
//!
//! The agent fetches the thread through the gleaner CLI, judges it against
//! the form, and writes `eval_<postid>.json` (plus, on a keep verdict, the
//! canonical `thread_<postid>.json`) into the session directory.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use claude_runner::{AgentRunner, RunOptions};
use tokio_util::sync::CancellationToken;

use crate::schema::Form;
use crate::session;
use crate::types::ThreadState;

use super::{discovery::current_exe_string, prompts, EvalResult, ThreadEvaluator};

const MAX_TURNS: u32 = 10;

pub struct ClaudeEvaluator {
    runner: Arc<dyn AgentRunner>,
    model: String,
    cancel: CancellationToken,
}

impl ClaudeEvaluator {
    pub fn new(runner: Arc<dyn AgentRunner>, model: &str, cancel: CancellationToken) -> Self {
        ClaudeEvaluator {
            runner,
            model: model.to_string(),
            cancel,
        }
    }
}

#[async_trait]
impl ThreadEvaluator for ClaudeEvaluator {
    async fn evaluate_thread(
        &self,
        form: &Form,
        state: &ThreadState,
        session_dir: &Path,
    ) -> Result<EvalResult> {
        let executable = current_exe_string()?;
        let eval_path = session::eval_path(session_dir, &state.post_id);
        let thread_path = session::thread_path(session_dir, &state.post_id);

        let prompt =
            prompts::evaluate_thread(form, state, &executable, &eval_path, &thread_path);

        self.runner
            .run(
                &prompt,
                RunOptions {
                    model: Some(self.model.clone()),
                    max_turns: Some(MAX_TURNS),
                    allowed_tools: vec![
                        format!("Bash({} *)", executable),
                        format!("Bash(* > {})", thread_path.display()),
                        format!("Write({}/*)", session_dir.display()),
                    ],
                    cancel: self.cancel.clone(),
                    ..Default::default()
                },
            )
            .await
            .context("calling thread evaluation agent")?;

        parse_eval_file(&eval_path)
    }
}

/// Parse the verdict file the agent wrote.
pub fn parse_eval_file(path: &Path) -> Result<EvalResult> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading eval result: {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("parsing eval result: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Verdict;

    #[test]
    fn test_parse_eval_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eval_abc.json");
        std::fs::write(
            &path,
            r#"{"post_id": "abc", "verdict": "keep", "reason": "rich answers",
               "estimated_entries": 4, "thread_saved": true}"#,
        )
        .unwrap();

        let result = parse_eval_file(&path).unwrap();
        assert_eq!(result.post_id, "abc");
        assert_eq!(result.verdict, Verdict::Keep);
        assert_eq!(result.estimated_entries, 4);
        assert!(result.thread_saved);
    }

    #[test]
    fn test_parse_eval_file_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(parse_eval_file(&dir.path().join("eval_zzz.json")).is_err());
    }
}
