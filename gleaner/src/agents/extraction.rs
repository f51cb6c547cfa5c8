//! Field extraction agent.
//!
//! The thread is inlined into the prompt, the model answers with one JSON
//! object, and the parsed entries are typed against the form. Streaming model
//! output is mirrored into the shared extraction log.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use claude_runner::{AgentRunner, OutputSink, RunOptions};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::schema::Form;
use crate::types::{Entry, Evidence, ExtractionResult, FieldScalar, FieldValue, Thread};

use super::{json, prompts, FieldExtractor};

// The sentinel comment id the extraction prompt uses for quotes taken from
// the post body rather than a comment.
const POST_CONTENT_SENTINEL: &str = "post_content";

pub struct ClaudeExtractor {
    runner: Arc<dyn AgentRunner>,
    model: String,
    cancel: CancellationToken,
}

impl ClaudeExtractor {
    pub fn new(runner: Arc<dyn AgentRunner>, model: &str, cancel: CancellationToken) -> Self {
        ClaudeExtractor {
            runner,
            model: model.to_string(),
            cancel,
        }
    }
}

#[async_trait]
impl FieldExtractor for ClaudeExtractor {
    async fn extract(
        &self,
        thread: &Thread,
        form: &Form,
        output: Option<OutputSink>,
    ) -> Result<ExtractionResult> {
        let prompt = prompts::extract(thread, form);

        let result = self
            .runner
            .run(
                &prompt,
                RunOptions {
                    model: Some(self.model.clone()),
                    output,
                    cancel: self.cancel.clone(),
                    ..Default::default()
                },
            )
            .await
            .context("calling extraction agent")?;

        let mut parsed = parse_response(&result.text, form)?;
        populate_links(&mut parsed, &thread.post.permalink);
        Ok(parsed)
    }
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    entries: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    fields: Vec<RawField>,
}

#[derive(Debug, Deserialize)]
struct RawField {
    id: String,
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    evidence: Vec<Evidence>,
}

/// Parse the model's JSON response into typed entries. Fields the form does
/// not define are dropped; values whose dynamic type contradicts the declared
/// field type are rejected to null; confidence is clamped to [0, 1].
pub fn parse_response(response: &str, form: &Form) -> Result<ExtractionResult> {
    let raw: RawResponse = json::parse_object(response).context("extracting entries JSON")?;

    let mut result = ExtractionResult::default();
    for raw_entry in raw.entries {
        let mut fields = Vec::with_capacity(raw_entry.fields.len());
        for f in raw_entry.fields {
            let Some(field) = form.field(&f.id) else {
                continue;
            };
            let value = coerce_value(f.value, field.kind);
            fields.push(FieldValue {
                id: f.id,
                value,
                confidence: f.confidence.clamp(0.0, 1.0),
                evidence: f.evidence,
                links: Vec::new(),
            });
        }
        result.entries.push(Entry {
            fields,
            ..Default::default()
        });
    }

    Ok(result)
}

fn coerce_value(value: serde_json::Value, kind: crate::schema::FieldKind) -> Option<FieldScalar> {
    if value.is_null() {
        return None;
    }
    let scalar: FieldScalar = serde_json::from_value(value).ok()?;
    // A type mismatch keeps the entry but nulls the value.
    kind.accepts(&scalar).then_some(scalar)
}

/// Build per-field and per-entry comment links from evidence:
/// `<thread_permalink><comment_id>/` for every unique comment id, skipping
/// the post-content sentinel.
pub fn populate_links(result: &mut ExtractionResult, post_permalink: &str) {
    if post_permalink.is_empty() {
        return;
    }
    let base = if post_permalink.ends_with('/') {
        post_permalink.to_string()
    } else {
        format!("{}/", post_permalink)
    };

    for entry in &mut result.entries {
        let mut entry_links: Vec<String> = Vec::new();
        for field in &mut entry.fields {
            let mut field_links: Vec<String> = Vec::new();
            for ev in &field.evidence {
                let Some(cid) = ev.comment_id.as_deref() else {
                    continue;
                };
                if cid.is_empty() || cid == POST_CONTENT_SENTINEL {
                    continue;
                }
                let link = format!("{}{}/", base, cid);
                if !field_links.contains(&link) {
                    field_links.push(link.clone());
                }
                if !entry_links.contains(&link) {
                    entry_links.push(link);
                }
            }
            field.links = field_links;
        }
        entry.links = entry_links;
    }
}
