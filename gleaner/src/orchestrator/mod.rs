//! Pipeline orchestration: session setup, phase dispatch, and the streaming
//! discover → evaluate → extract pipeline, followed by one ranking pass.

mod pipeline;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::agents::{
    discovery::normalize_subreddit_names, EntryRanker, FieldExtractor, SubredditDiscoverer,
    ThreadDiscoverer, ThreadEvaluator,
};
use crate::ranking::RankInput;
use crate::schema::Form;
use crate::search::{Searcher, SortOrder};
use crate::session::{self, manifest};
use crate::types::{FormRef, Manifest, RunStatus, ThreadStatus};

pub const DEFAULT_WORKERS: usize = 10;
pub const MAX_WORKERS: usize = 50;

/// Configuration for one extraction run.
#[derive(Clone)]
pub struct RunConfig {
    pub form: Form,
    pub form_path: String,
    pub query: String,
    pub subreddits: Vec<String>,
    /// Target number of extracted threads.
    pub limit: usize,
    pub sort: SortOrder,
    pub output_dir: PathBuf,
    /// Resume this session directory instead of deriving a fresh one.
    pub session: Option<PathBuf>,
    /// Concurrent pipeline workers, clamped to [1, 50].
    pub workers: usize,
    // Model identifiers per phase; opaque, handed verbatim to the runners.
    pub discovery_model: String,
    pub eval_model: String,
    pub extract_model: String,
    pub rank_model: String,
}

impl RunConfig {
    pub fn new(form: Form, form_path: &str) -> Self {
        RunConfig {
            form,
            form_path: form_path.to_string(),
            query: String::new(),
            subreddits: Vec::new(),
            limit: 20,
            sort: SortOrder::Hot,
            output_dir: PathBuf::from("./output"),
            session: None,
            workers: DEFAULT_WORKERS,
            discovery_model: "opus".to_string(),
            eval_model: "opus".to_string(),
            extract_model: "haiku".to_string(),
            rank_model: "haiku".to_string(),
        }
    }
}

/// How a run ended. Cancellation is terminal but not an error; the session
/// stays resumable either way.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub session_dir: PathBuf,
    pub status: RunStatus,
}

/// Drives the end-to-end extraction pipeline over one session.
pub struct Orchestrator {
    searcher: Arc<dyn Searcher>,
    subreddit_discoverer: Option<Arc<dyn SubredditDiscoverer>>,
    thread_discoverer: Option<Arc<dyn ThreadDiscoverer>>,
    evaluator: Option<Arc<dyn ThreadEvaluator>>,
    extractor: Option<Arc<dyn FieldExtractor>>,
    ranker: Option<Arc<dyn EntryRanker>>,
}

impl Orchestrator {
    pub fn new(searcher: Arc<dyn Searcher>) -> Self {
        Orchestrator {
            searcher,
            subreddit_discoverer: None,
            thread_discoverer: None,
            evaluator: None,
            extractor: None,
            ranker: None,
        }
    }

    pub fn with_subreddit_discoverer(mut self, d: Arc<dyn SubredditDiscoverer>) -> Self {
        self.subreddit_discoverer = Some(d);
        self
    }

    pub fn with_thread_discoverer(mut self, d: Arc<dyn ThreadDiscoverer>) -> Self {
        self.thread_discoverer = Some(d);
        self
    }

    pub fn with_evaluator(mut self, e: Arc<dyn ThreadEvaluator>) -> Self {
        self.evaluator = Some(e);
        self
    }

    pub fn with_extractor(mut self, e: Arc<dyn FieldExtractor>) -> Self {
        self.extractor = Some(e);
        self
    }

    pub fn with_ranker(mut self, r: Arc<dyn EntryRanker>) -> Self {
        self.ranker = Some(r);
        self
    }

    /// Execute the full pipeline. Returns the session directory and the
    /// terminal run status; per-thread failures do not fail the run.
    pub async fn run(&self, mut config: RunConfig, cancel: CancellationToken) -> Result<RunOutcome> {
        let session_dir = match &config.session {
            Some(dir) => dir.clone(),
            None => {
                let slug = if !config.query.is_empty() {
                    session::slug::from_query(&config.query)
                } else if let Some(first) = config.subreddits.first() {
                    session::slug::from_title(first)
                } else {
                    session::slug::from_query("")
                };
                config.output_dir.join(slug)
            }
        };

        let mut manifest = match manifest::load(&session_dir).context("loading manifest")? {
            Some(existing) => {
                println!("Resuming session: {}", session_dir.display());
                existing
            }
            None => {
                let form_ref = FormRef {
                    title: config.form.title.clone(),
                    path: config.form_path.clone(),
                    hash: config.form.hash().context("hashing form")?,
                };
                println!("Creating new session: {}", session_dir.display());
                manifest::new_manifest(form_ref, &config.query, config.subreddits.clone())
            }
        };

        let invocation_id = format!("run-{}", Utc::now().timestamp());
        manifest.start_run(&invocation_id);
        manifest::save(&session_dir, &mut manifest).context("saving manifest")?;

        let run_start = Instant::now();

        // Phase 0: community discovery, skipped when communities are already
        // known.
        if !config.query.is_empty() && config.subreddits.is_empty() {
            if manifest.discovered_subreddits && !manifest.subreddits.is_empty() {
                println!(
                    "Reusing {} previously discovered subreddits",
                    manifest.subreddits.len()
                );
                config.subreddits = manifest.subreddits.clone();
            } else if let Some(discoverer) = &self.subreddit_discoverer {
                println!("\n=== Phase 0: Community Discovery ===");
                let phase_start = Instant::now();
                match discoverer
                    .discover_subreddits(&config.form, &config.query)
                    .await
                {
                    Err(e) => {
                        println!("  Warning: subreddit discovery failed: {:#}", e);
                        println!("  Falling back to searching all of Reddit");
                    }
                    Ok(discovered) => {
                        let discovered = normalize_subreddit_names(discovered);
                        if !discovered.is_empty() {
                            println!("Discovered {} subreddits:", discovered.len());
                            for name in &discovered {
                                println!("  r/{}", name);
                            }
                            config.subreddits = discovered.clone();
                            manifest.subreddits = discovered;
                            manifest.discovered_subreddits = true;
                            manifest::save(&session_dir, &mut manifest)
                                .context("saving manifest")?;
                        }
                    }
                }
                println!(
                    "  Discovery completed in {}",
                    format_duration(phase_start.elapsed())
                );
            }
        }

        // Streaming pipeline: thread discovery feeding evaluate + extract
        // workers across rounds.
        let pipeline_start = Instant::now();
        let pipeline = pipeline::run_pipeline(
            self,
            &config,
            manifest,
            session_dir.clone(),
            cancel.clone(),
        )
        .await;

        let (mut manifest, processed) = match pipeline {
            Ok(result) => result,
            Err(e) => return Err(e.context("pipeline")),
        };

        if cancel.is_cancelled() {
            manifest.complete_run(RunStatus::Interrupted, processed);
            manifest::save(&session_dir, &mut manifest).context("saving manifest")?;
            return Ok(RunOutcome {
                session_dir,
                status: RunStatus::Interrupted,
            });
        }
        println!(
            "  Pipeline completed in {}",
            format_duration(pipeline_start.elapsed())
        );

        // Ranking runs once over everything extracted; a ranker failure
        // degrades the run, it does not fail it.
        if let Some(ranker) = &self.ranker {
            println!("\n=== Ranking ===");
            let phase_start = Instant::now();
            match self.rank_entries(ranker, &config, &mut manifest).await {
                Ok(ranked) => {
                    manifest::save(&session_dir, &mut manifest).context("saving manifest")?;
                    println!(
                        "  Ranked {} entries ({})",
                        ranked,
                        format_duration(phase_start.elapsed())
                    );
                }
                Err(e) => {
                    if cancel.is_cancelled() {
                        manifest.complete_run(RunStatus::Interrupted, processed);
                        manifest::save(&session_dir, &mut manifest)
                            .context("saving manifest")?;
                        return Ok(RunOutcome {
                            session_dir,
                            status: RunStatus::Interrupted,
                        });
                    }
                    println!("  Warning: ranking failed: {:#}", e);
                    println!("  Continuing without ranking");
                }
            }
        }

        manifest.complete_run(RunStatus::Completed, processed);
        manifest::save(&session_dir, &mut manifest).context("saving final manifest")?;

        let counts = manifest.counts_by_status();
        println!(
            "\n=== Complete ({}) ===",
            format_duration(run_start.elapsed())
        );
        println!("Session: {}", session_dir.display());
        println!("Threads: {} total", manifest.threads.len());
        println!("  - Ranked: {}", counts.ranked);
        println!("  - Extracted: {}", counts.extracted);
        println!("  - Collected: {}", counts.collected);
        println!("  - Skipped: {}", counts.skipped);
        println!("  - Failed: {}", counts.failed);

        Ok(RunOutcome {
            session_dir,
            status: RunStatus::Completed,
        })
    }

    /// Collect every entry from extracted threads, rank them, and write the
    /// scores back into the manifest.
    async fn rank_entries(
        &self,
        ranker: &Arc<dyn EntryRanker>,
        config: &RunConfig,
        manifest: &mut Manifest,
    ) -> Result<usize> {
        let mut inputs = Vec::new();
        for ts in &manifest.threads {
            if ts.status != ThreadStatus::Extracted || ts.entries.is_empty() {
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

        if inputs.is_empty() {
            println!("  No entries to rank");
            return Ok(0);
        }

        let thread_count = manifest
            .threads
            .iter()
            .filter(|t| t.status == ThreadStatus::Extracted)
            .count();
        println!(
            "  Ranking {} entries from {} threads",
            inputs.len(),
            thread_count
        );

        let outputs = ranker.rank_entries(&config.form, &inputs).await?;

        for out in &outputs {
            let Some(idx) = manifest.find_thread_index(&out.thread_post_id) else {
                continue;
            };
            let thread = &mut manifest.threads[idx];
            let Some(entry) = thread.entries.get_mut(out.entry_index) else {
                continue;
            };
            entry.rank_score = Some(out.final_score);
            if !out.flags.is_empty() {
                entry.rank_flags = out.flags.clone();
            }
            if let Some(reason) = &out.reason {
                entry.rank_reason = Some(reason.clone());
            }
        }

        let ranked_ids: Vec<String> = manifest
            .threads
            .iter()
            .filter(|t| t.status == ThreadStatus::Extracted && !t.entries.is_empty())
            .map(|t| t.post_id.clone())
            .collect();
        for post_id in ranked_ids {
            manifest.mark_ranked(&post_id);
        }

        Ok(outputs.len())
    }
}

pub(crate) fn truncate(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        return s.to_string();
    }
    let cut: String = s.chars().take(n.saturating_sub(3)).collect();
    format!("{}...", cut)
}

pub(crate) fn format_duration(d: Duration) -> String {
    if d < Duration::from_secs(1) {
        return format!("{}ms", d.as_millis());
    }
    if d < Duration::from_secs(60) {
        return format!("{:.1}s", d.as_secs_f64());
    }
    let secs = d.as_secs();
    format!("{}m{:02}s", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 50), "short");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(120)), "120ms");
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m05s");
    }
}
