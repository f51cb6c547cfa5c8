//! Subreddit discovery agent.
//!
//! The model's answer shape drifts between runs, so parsing is an ordered
//! chain of attempts over the same text: object-with-list, object-of-strings,
//! list-of-objects, list-of-strings, and finally a scan for `r/name`
//! mentions in freeform prose.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use claude_runner::{AgentRunner, RunOptions};
use tokio_util::sync::CancellationToken;

use crate::schema::Form;

use super::{json, prompts, SubredditDiscoverer};

const MAX_TURNS: u32 = 15;

/// Subreddit discoverer driving a model agent that searches through the
/// gleaner CLI.
pub struct ClaudeSubredditDiscoverer {
    runner: Arc<dyn AgentRunner>,
    model: String,
    cancel: CancellationToken,
}

impl ClaudeSubredditDiscoverer {
    pub fn new(runner: Arc<dyn AgentRunner>, model: &str, cancel: CancellationToken) -> Self {
        ClaudeSubredditDiscoverer {
            runner,
            model: model.to_string(),
            cancel,
        }
    }
}

#[async_trait]
impl SubredditDiscoverer for ClaudeSubredditDiscoverer {
    async fn discover_subreddits(&self, form: &Form, query: &str) -> Result<Vec<String>> {
        let executable = current_exe_string()?;
        let prompt = prompts::discover_subreddits(form, query, &executable);

        let result = self
            .runner
            .run(
                &prompt,
                RunOptions {
                    model: Some(self.model.clone()),
                    max_turns: Some(MAX_TURNS),
                    allowed_tools: vec![format!("Bash({} *)", executable)],
                    cancel: self.cancel.clone(),
                    ..Default::default()
                },
            )
            .await
            .context("calling subreddit discovery agent")?;

        let names = parse_subreddit_response(&result.text)?;
        let normalized = normalize_subreddit_names(names);
        if normalized.is_empty() {
            bail!("no usable subreddits in discovery response");
        }
        Ok(normalized)
    }
}

pub(crate) fn current_exe_string() -> Result<String> {
    let exe = std::env::current_exe().context("resolving executable path")?;
    Ok(exe.to_string_lossy().into_owned())
}

/// Parse subreddit names out of a model response, trying progressively
/// looser shapes.
pub fn parse_subreddit_response(response: &str) -> Result<Vec<String>> {
    let cleaned = json::strip_code_fences(response);

    // Shape 1 + 2: a JSON object, either {"subreddits": [...]} or a direct
    // name → description map.
    if let Ok(value) = json::parse_object::<serde_json::Value>(&cleaned) {
        if let Some(list) = value.get("subreddits") {
            let names = names_from_list(list);
            if !names.is_empty() {
                return Ok(names);
            }
        } else if let Some(map) = value.as_object() {
            // A direct name → description map.
            let names: Vec<String> = map
                .iter()
                .filter(|(_, v)| v.is_string())
                .map(|(k, _)| k.clone())
                .collect();
            if !names.is_empty() {
                return Ok(names);
            }
        }
    }

    // Shape 3 + 4: a bare JSON list of objects or strings.
    if let Ok(Some(items)) = json::parse_array::<serde_json::Value>(&cleaned) {
        let names = names_from_list(&serde_json::Value::Array(items));
        if !names.is_empty() {
            return Ok(names);
        }
    }

    // Shape 5: freeform text with r/name mentions.
    let names = scan_subreddit_mentions(&cleaned);
    if !names.is_empty() {
        return Ok(names);
    }

    bail!("no subreddits found in response");
}

fn names_from_list(list: &serde_json::Value) -> Vec<String> {
    let Some(items) = list.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            if let Some(s) = item.as_str() {
                return Some(s.to_string());
            }
            item.get("name")
                .and_then(|n| n.as_str())
                .map(|s| s.to_string())
        })
        .collect()
}

fn scan_subreddit_mentions(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    for token in text.split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ')' | '(')) {
        let token = token.trim_start_matches('/');
        if let Some(name) = token.strip_prefix("r/") {
            let name: String = name
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            if !name.is_empty() {
                names.push(name);
            }
        }
    }
    names
}

/// Normalize discovered community names: strip `r/` prefixes, lowercase,
/// keep only names matching `[a-z0-9_]{2,21}`, and deduplicate
/// case-insensitively while preserving order.
pub fn normalize_subreddit_names(names: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for name in names {
        let name = name.trim().to_lowercase();
        let name = name
            .trim_start_matches('/')
            .trim_start_matches("r/")
            .to_string();
        if name.len() < 2 || name.len() > 21 {
            continue;
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            continue;
        }
        if seen.insert(name.clone()) {
            out.push(name);
        }
    }
    out
}
