//! Agentic thread discovery.
//!
//! The agent searches through the gleaner CLI and writes its findings to
//! `discovery_results.json` in the session directory; the core parses that
//! file rather than the agent's chat output.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use claude_runner::{AgentRunner, RunOptions};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::schema::Form;
use crate::session;
use crate::types::Post;

use super::{discovery::current_exe_string, prompts, ThreadDiscoverer};

const MAX_TURNS: u32 = 25;

/// The JSON structure the agent writes to `discovery_results.json`.
#[derive(Debug, Deserialize)]
pub struct DiscoveryResults {
    #[serde(default)]
    pub posts: Vec<DiscoveredPost>,
    #[serde(default)]
    pub search_log: Vec<SearchLogEntry>,
}

#[derive(Debug, Deserialize)]
pub struct DiscoveredPost {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub subreddit: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: i64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchLogEntry {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub subreddit: String,
    #[serde(default)]
    pub results: i64,
}

pub struct ClaudeThreadDiscoverer {
    runner: Arc<dyn AgentRunner>,
    model: String,
    cancel: CancellationToken,
}

impl ClaudeThreadDiscoverer {
    pub fn new(runner: Arc<dyn AgentRunner>, model: &str, cancel: CancellationToken) -> Self {
        ClaudeThreadDiscoverer {
            runner,
            model: model.to_string(),
            cancel,
        }
    }
}

#[async_trait]
impl ThreadDiscoverer for ClaudeThreadDiscoverer {
    async fn discover_threads(
        &self,
        form: &Form,
        query: &str,
        subreddits: &[String],
        limit: usize,
        session_dir: &Path,
    ) -> Result<Vec<Post>> {
        std::fs::create_dir_all(session_dir).with_context(|| {
            format!("creating session dir: {}", session_dir.display())
        })?;

        let executable = current_exe_string()?;
        let output_path = session::discovery_path(session_dir);
        let prompt =
            prompts::discover_threads(form, query, subreddits, limit, &executable, &output_path);

        self.runner
            .run(
                &prompt,
                RunOptions {
                    model: Some(self.model.clone()),
                    max_turns: Some(MAX_TURNS),
                    allowed_tools: vec![
                        format!("Bash({} *)", executable),
                        format!("Write({}/*)", session_dir.display()),
                    ],
                    cancel: self.cancel.clone(),
                    ..Default::default()
                },
            )
            .await
            .context("calling thread discovery agent")?;

        parse_results_file(&output_path)
    }
}

/// Parse a `discovery_results.json` file into posts, logging the agent's
/// search activity.
pub fn parse_results_file(path: &Path) -> Result<Vec<Post>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading discovery results: {}", path.display()))?;
    let results: DiscoveryResults = serde_json::from_str(&data)
        .with_context(|| format!("parsing discovery results: {}", path.display()))?;

    if results.posts.is_empty() {
        bail!("no threads found in discovery results");
    }

    for entry in &results.search_log {
        println!(
            "  Searched r/{} for '{}': {} results",
            entry.subreddit, entry.query, entry.results
        );
    }

    Ok(results
        .posts
        .into_iter()
        .map(|p| Post {
            id: p.id,
            title: p.title,
            permalink: p.permalink,
            subreddit: p.subreddit,
            score: p.score,
            num_comments: p.num_comments,
            ..Default::default()
        })
        .collect())
}
