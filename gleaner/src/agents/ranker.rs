//! Hybrid entry ranker: the deterministic engine plus one model-assisted
//! quality pass.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use claude_runner::{AgentRunner, RunOptions};
use tokio_util::sync::CancellationToken;

use crate::ranking::{self, Assessment, RankInput, RankOutput};
use crate::schema::Form;

use super::{json, prompts, EntryRanker};

pub struct HybridRanker {
    runner: Arc<dyn AgentRunner>,
    model: String,
    cancel: CancellationToken,
}

impl HybridRanker {
    pub fn new(runner: Arc<dyn AgentRunner>, model: &str, cancel: CancellationToken) -> Self {
        HybridRanker {
            runner,
            model: model.to_string(),
            cancel,
        }
    }

    async fn assess(
        &self,
        form: &Form,
        inputs: &[RankInput],
        outputs: &[RankOutput],
    ) -> Result<Vec<Assessment>> {
        let prompt = prompts::rank(form, inputs, outputs);
        let result = self
            .runner
            .run(
                &prompt,
                RunOptions {
                    model: Some(self.model.clone()),
                    cancel: self.cancel.clone(),
                    ..Default::default()
                },
            )
            .await
            .context("calling ranking agent")?;

        // An answer with no JSON array means nothing was flagged.
        let assessments = json::parse_array(&result.text)
            .context("parsing quality assessments")?
            .unwrap_or_default();
        Ok(assessments)
    }
}

#[async_trait]
impl EntryRanker for HybridRanker {
    async fn rank_entries(&self, form: &Form, inputs: &[RankInput]) -> Result<Vec<RankOutput>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut outputs = ranking::score_algorithmic(form, inputs);
        ranking::apply_diversity_penalty(form, inputs, &mut outputs);
        ranking::apply_thread_saturation(inputs, &mut outputs);

        match self.assess(form, inputs, &outputs).await {
            Ok(assessments) => {
                ranking::apply_assessments(&mut outputs, &assessments);
            }
            // The model pass is best-effort: keep the deterministic scores.
            Err(e) => {
                println!("  Warning: quality assessment failed: {:#}", e);
                println!("  Using algorithmic scores only");
            }
        }

        Ok(outputs)
    }
}

/// Engine-only ranker: the deterministic stages with no model pass.
#[derive(Debug, Default)]
pub struct EngineRanker;

#[async_trait]
impl EntryRanker for EngineRanker {
    async fn rank_entries(&self, form: &Form, inputs: &[RankInput]) -> Result<Vec<RankOutput>> {
        let mut outputs = ranking::score_algorithmic(form, inputs);
        ranking::apply_diversity_penalty(form, inputs, &mut outputs);
        ranking::apply_thread_saturation(inputs, &mut outputs);
        Ok(outputs)
    }
}
