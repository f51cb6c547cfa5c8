//! One-shot Claude CLI runner.
//!
//! Spawns `claude -p <prompt> --output-format stream-json` as a subprocess,
//! streams assistant text as it arrives, and returns the final result text.
//! Agent implementations depend on the [`AgentRunner`] trait so tests can
//! substitute scripted runners.

use std::process::Stdio;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

// Streaming output is printed dim so it reads as background activity.
const COLOR_DIM: &str = "\x1b[90m";
const COLOR_RESET: &str = "\x1b[0m";

/// Destination for streamed assistant text (e.g. a shared extraction log).
pub type OutputSink = Arc<Mutex<dyn std::io::Write + Send>>;

/// Options for a single CLI invocation.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Model identifier passed verbatim via `--model`.
    pub model: Option<String>,
    /// Cap on agent turns (`--max-turns`).
    pub max_turns: Option<u32>,
    /// Tool patterns passed via `--allowedTools`.
    pub allowed_tools: Vec<String>,
    /// When set, streamed text goes to this sink instead of stdout.
    pub output: Option<OutputSink>,
    /// Cancels the invocation; the child process is killed.
    pub cancel: CancellationToken,
}

impl RunOptions {
    pub fn with_model(model: impl Into<String>) -> Self {
        RunOptions {
            model: Some(model.into()),
            ..Default::default()
        }
    }
}

/// Final output of an invocation.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// The `result` event payload: the agent's final response text.
    pub text: String,
}

/// Executes one prompt against a language-model agent and returns its final
/// response text.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, prompt: &str, opts: RunOptions) -> Result<RunResult>;
}

/// One line of the CLI's `stream-json` output.
#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    message: Option<StreamMessage>,
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

/// Runner backed by the `claude` CLI binary.
#[derive(Debug, Clone, Default)]
pub struct ClaudeCli;

impl ClaudeCli {
    pub fn new() -> Self {
        ClaudeCli
    }
}

fn build_args(prompt: &str, opts: &RunOptions) -> Vec<String> {
    let mut args = vec![
        "-p".to_string(),
        prompt.to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
    ];
    for tool in &opts.allowed_tools {
        args.push("--allowedTools".to_string());
        args.push(tool.clone());
    }
    if let Some(max_turns) = opts.max_turns {
        args.push("--max-turns".to_string());
        args.push(max_turns.to_string());
    }
    if let Some(model) = &opts.model {
        args.push("--model".to_string());
        args.push(model.clone());
    }
    args
}

fn emit(opts: &RunOptions, text: &str) {
    match &opts.output {
        Some(sink) => {
            if let Ok(mut w) = sink.lock() {
                let _ = w.write_all(text.as_bytes());
            }
        }
        None => print!("{}{}{}", COLOR_DIM, text, COLOR_RESET),
    }
}

#[async_trait]
impl AgentRunner for ClaudeCli {
    async fn run(&self, prompt: &str, opts: RunOptions) -> Result<RunResult> {
        let args = build_args(prompt, &opts);
        let mut child = Command::new("claude")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("starting claude")?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("claude stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("claude stderr not captured"))?;

        // Drain stderr concurrently so a chatty child cannot block on a full
        // pipe while we read stdout.
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut result_text = String::new();
        loop {
            tokio::select! {
                _ = opts.cancel.cancelled() => {
                    let _ = child.start_kill();
                    bail!("agent invocation cancelled");
                }
                line = lines.next_line() => {
                    let Some(line) = line.context("reading claude output")? else {
                        break;
                    };
                    let Ok(event) = serde_json::from_str::<StreamEvent>(&line) else {
                        continue;
                    };
                    match event.kind.as_str() {
                        "assistant" => {
                            if let Some(message) = &event.message {
                                for block in &message.content {
                                    if block.kind == "text" {
                                        if let Some(text) = &block.text {
                                            emit(&opts, text);
                                        }
                                    }
                                }
                            }
                        }
                        // The final result event supersedes streamed text.
                        "result" => {
                            if let Some(result) = event.result {
                                if !result.is_empty() {
                                    result_text = result;
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        emit(&opts, "\n");

        let stderr_text = stderr_task.await.unwrap_or_default();
        let status = child.wait().await.context("waiting for claude")?;
        if !status.success() {
            if opts.cancel.is_cancelled() {
                bail!("agent invocation cancelled");
            }
            bail!(
                "claude exited with {}: {}",
                status,
                stderr_text.trim()
            );
        }

        Ok(RunResult { text: result_text })
    }
}
