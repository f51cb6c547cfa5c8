//! The streaming pipeline: a persistent worker pool fed by multi-round
//! discovery over one bounded channel, with a periodic manifest saver.
//!
//! Accounting rules:
//! - `fed` counts items actually pushed into the channel; the feeder uses a
//!   non-blocking send and drops surplus items when the channel is full, so
//!   early-exiting workers can never wedge the driver.
//! - `done` is incremented only after an item reaches a terminal-for-the-item
//!   status (skipped, failed, or extracted), never at dequeue.
//! - A round completes when `done >= fed`, the extraction goal is met, or the
//!   run is cancelled.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use claude_runner::OutputSink;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::schema::Form;
use crate::search::Searcher;
use crate::session::{self, manifest};
use crate::types::{Manifest, Post, Thread, ThreadState, ThreadStatus};

use super::{format_duration, truncate, Orchestrator, RunConfig, MAX_WORKERS};

const CHANNEL_CAPACITY: usize = 200;
const MAX_ROUNDS: usize = 3;
const OVERPROVISION_FACTOR: usize = 3;
const SAVE_INTERVAL: Duration = Duration::from_secs(5);
const ROUND_POLL: Duration = Duration::from_millis(500);
const EVAL_ATTEMPTS: usize = 2;
const THREAD_COMMENT_LIMIT: usize = 100;

/// One unit of pipeline work: a thread plus whether it still needs the
/// evaluation step (false for already-collected threads on resume).
struct WorkItem {
    state: ThreadState,
    needs_eval: bool,
}

/// State shared between the driver, the workers, and the periodic saver.
struct Shared {
    manifest: Mutex<Manifest>,
    dirty: AtomicBool,
    fed: AtomicU64,
    done: AtomicU64,
    extracted: AtomicU64,
    save_error: Mutex<Option<String>>,
    session_dir: PathBuf,
    limit: usize,
}

impl Shared {
    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    fn counts(&self) -> manifest::StatusCounts {
        self.manifest.lock().unwrap().counts_by_status()
    }

    fn goal_met(&self) -> bool {
        self.counts().toward_goal() >= self.limit
    }
}

/// Serialize under the manifest lock, write the snapshot outside it.
fn save_snapshot(shared: &Shared) -> Result<()> {
    let data = {
        let mut m = shared.manifest.lock().unwrap();
        m.updated_at = Utc::now();
        serde_json::to_string_pretty(&*m).context("serializing manifest")?
    };
    manifest::write_snapshot(&shared.session_dir, &data)
}

struct WorkerCtx {
    shared: Arc<Shared>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<WorkItem>>>,
    searcher: Arc<dyn Searcher>,
    evaluator: Option<Arc<dyn crate::agents::ThreadEvaluator>>,
    extractor: Arc<dyn crate::agents::FieldExtractor>,
    form: Arc<Form>,
    log_sink: OutputSink,
    cancel: CancellationToken,
}

/// Run the streaming pipeline to completion (or cancellation). Returns the
/// manifest and the number of threads whose extraction succeeded.
pub(super) async fn run_pipeline(
    orch: &Orchestrator,
    config: &RunConfig,
    manifest: Manifest,
    session_dir: PathBuf,
    cancel: CancellationToken,
) -> Result<(Manifest, u64)> {
    let extractor = orch
        .extractor
        .clone()
        .ok_or_else(|| anyhow!("no extractor configured"))?;

    let workers = config.workers.clamp(1, MAX_WORKERS);

    let log_path = session::extraction_log_path(&session_dir);
    let log_file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(&log_path)
        .with_context(|| format!("creating extraction log: {}", log_path.display()))?;
    let log_sink: OutputSink = Arc::new(Mutex::new(log_file));

    let shared = Arc::new(Shared {
        manifest: Mutex::new(manifest),
        dirty: AtomicBool::new(false),
        fed: AtomicU64::new(0),
        done: AtomicU64::new(0),
        extracted: AtomicU64::new(0),
        save_error: Mutex::new(None),
        session_dir: session_dir.clone(),
        limit: config.limit,
    });

    // Periodic saver: batches disk writes instead of saving per mutation. A
    // final forced save runs at shutdown; its error fails the pipeline.
    let saver_shutdown = CancellationToken::new();
    let saver = tokio::spawn({
        let shared = shared.clone();
        let shutdown = saver_shutdown.clone();
        async move {
            let mut ticker = tokio::time::interval(SAVE_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if shared.dirty.swap(false, Ordering::SeqCst) {
                            if let Err(e) = save_snapshot(&shared) {
                                *shared.save_error.lock().unwrap() = Some(format!("{:#}", e));
                            }
                        }
                    }
                    _ = shutdown.cancelled() => {
                        return save_snapshot(&shared);
                    }
                }
            }
        }
    });

    // The work channel and the persistent worker pool.
    let (tx, rx) = mpsc::channel::<WorkItem>(CHANNEL_CAPACITY);
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    let form = Arc::new(config.form.clone());

    let mut worker_handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let ctx = WorkerCtx {
            shared: shared.clone(),
            rx: rx.clone(),
            searcher: orch.searcher.clone(),
            evaluator: orch.evaluator.clone(),
            extractor: extractor.clone(),
            form: form.clone(),
            log_sink: log_sink.clone(),
            cancel: cancel.clone(),
        };
        worker_handles.push(tokio::spawn(worker_loop(ctx)));
    }

    // Resume case: already-collected threads go straight to extraction.
    let mut fed_ids: HashSet<String> = HashSet::new();
    let collected = shared
        .manifest
        .lock()
        .unwrap()
        .threads_in(ThreadStatus::Collected);
    for ts in collected {
        fed_ids.insert(ts.post_id.clone());
        feed(
            &tx,
            &shared,
            WorkItem {
                state: ts,
                needs_eval: false,
            },
        );
    }

    let rounds_result = drive_rounds(orch, config, &shared, &tx, &mut fed_ids, &cancel).await;

    // Closing the channel lets idle workers drain out.
    drop(tx);
    for handle in worker_handles {
        if let Err(e) = handle.await {
            println!("  Warning: worker task failed: {}", e);
        }
    }

    saver_shutdown.cancel();
    let final_save = saver
        .await
        .unwrap_or_else(|e| Err(anyhow!("saver task failed: {}", e)));
    if let Some(err) = shared.save_error.lock().unwrap().take() {
        println!("  Warning: periodic manifest save failed during run: {}", err);
    }
    final_save.context("final manifest save")?;

    if let Err(e) = rounds_result {
        // A fatal round error fails the run; record it before bailing so the
        // session reflects the terminal state.
        {
            let mut m = shared.manifest.lock().unwrap();
            let extracted = shared.extracted.load(Ordering::SeqCst);
            m.complete_run(crate::types::RunStatus::Failed, extracted);
        }
        let _ = save_snapshot(&shared);
        return Err(e);
    }

    println!("Extraction log: {}", log_path.display());

    let extracted = shared.extracted.load(Ordering::SeqCst);
    let shared = Arc::try_unwrap(shared)
        .map_err(|_| anyhow!("pipeline tasks still hold shared state"))?;
    let manifest = match shared.manifest.into_inner() {
        Ok(m) => m,
        Err(poisoned) => poisoned.into_inner(),
    };
    Ok((manifest, extracted))
}

/// Discovery + feed loop: up to [`MAX_ROUNDS`] rounds, each topping the
/// session up to the overprovision target and feeding unfed pending threads
/// to the workers. Only a round-0 discovery failure is fatal.
async fn drive_rounds(
    orch: &Orchestrator,
    config: &RunConfig,
    shared: &Arc<Shared>,
    tx: &mpsc::Sender<WorkItem>,
    fed_ids: &mut HashSet<String>,
    cancel: &CancellationToken,
) -> Result<()> {
    for round in 0..MAX_ROUNDS {
        if cancel.is_cancelled() {
            break;
        }

        let counts = shared.counts();
        if counts.toward_goal() >= config.limit {
            println!(
                "Already have {} extracted threads (target: {})",
                counts.toward_goal(),
                config.limit
            );
            break;
        }

        if round > 0 {
            println!(
                "\n=== Retry round {}: need more threads (have {} extracted, need {}) ===",
                round + 1,
                counts.toward_goal(),
                config.limit
            );
        }

        println!("\n=== Thread Discovery ===");
        let discovery_start = Instant::now();
        let overprovision_target = config.limit * OVERPROVISION_FACTOR;
        let remaining = overprovision_target.saturating_sub(counts.actionable());

        if remaining == 0 {
            println!(
                "Already have {} actionable threads (target: {}), skipping discovery",
                counts.actionable(),
                overprovision_target
            );
        } else {
            match find_threads(orch, config, remaining, shared, cancel).await {
                Err(e) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if round == 0 {
                        return Err(e.context("discovery"));
                    }
                    println!("  Warning: discovery failed: {:#}", e);
                    break;
                }
                Ok(posts) => {
                    let mut added = 0;
                    {
                        let mut m = shared.manifest.lock().unwrap();
                        for post in posts {
                            if added >= remaining {
                                break;
                            }
                            if m.add_thread(ThreadState::from_post(&post)) {
                                added += 1;
                            }
                        }
                    }
                    shared.mark_dirty();
                    println!("Added {} new threads to session", added);
                }
            }
        }
        println!(
            "  Discovery completed in {}",
            format_duration(discovery_start.elapsed())
        );

        // Feed threads this driver has not pushed before.
        let new_items: Vec<ThreadState> = {
            let m = shared.manifest.lock().unwrap();
            m.threads
                .iter()
                .filter(|t| t.status == ThreadStatus::Pending && !fed_ids.contains(&t.post_id))
                .cloned()
                .collect()
        };
        if new_items.is_empty() && round > 0 {
            println!("No new threads to process, stopping");
            break;
        }

        println!("\n=== Evaluate & Extract ===");
        println!(
            "Feeding {} threads to {} workers",
            new_items.len(),
            config.workers.clamp(1, MAX_WORKERS)
        );
        let phase_start = Instant::now();
        for ts in new_items {
            if cancel.is_cancelled() {
                break;
            }
            fed_ids.insert(ts.post_id.clone());
            feed(
                tx,
                shared,
                WorkItem {
                    state: ts,
                    needs_eval: true,
                },
            );
        }

        // Wait for this round's items before deciding on another round.
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if shared.done.load(Ordering::SeqCst) >= shared.fed.load(Ordering::SeqCst) {
                break;
            }
            if shared.goal_met() {
                break;
            }
            tokio::time::sleep(ROUND_POLL).await;
        }
        println!(
            "  Evaluate & Extract completed in {} ({} extracted)",
            format_duration(phase_start.elapsed()),
            shared.extracted.load(Ordering::SeqCst)
        );
        let counts = shared.counts();
        println!(
            "  Round status: {} extracted, {} skipped, {} failed, {} pending",
            counts.extracted, counts.skipped, counts.failed, counts.pending
        );

        // Circuit breaker: a first round where everything died means more
        // rounds would only repeat the failure.
        if round == 0 && shared.extracted.load(Ordering::SeqCst) == 0 {
            let total = counts.terminal() + counts.extracted;
            if total > 0 && counts.terminal() == total {
                println!(
                    "\n=== Circuit breaker: all {} threads failed or were skipped with 0 extracted. Aborting. ===",
                    counts.terminal()
                );
                break;
            }
        }
    }

    Ok(())
}

/// Non-blocking feed. Skips once the goal is met and drops on a full channel;
/// `fed` only counts successful sends so round accounting stays consistent.
fn feed(tx: &mpsc::Sender<WorkItem>, shared: &Shared, item: WorkItem) {
    if shared.goal_met() {
        return;
    }
    match tx.try_send(item) {
        Ok(()) => {
            shared.fed.fetch_add(1, Ordering::SeqCst);
        }
        Err(mpsc::error::TrySendError::Full(item)) => {
            println!(
                "  Work channel full, dropping surplus thread {}",
                item.state.post_id
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}

/// Discover new threads through the agentic discoverer, falling back to
/// direct API search.
async fn find_threads(
    orch: &Orchestrator,
    config: &RunConfig,
    remaining: usize,
    shared: &Shared,
    cancel: &CancellationToken,
) -> Result<Vec<Post>> {
    if let Some(discoverer) = &orch.thread_discoverer {
        println!(
            "Agent discovering {} threads across {:?}",
            remaining, config.subreddits
        );
        let discovered = cancellable(
            cancel,
            discoverer.discover_threads(
                &config.form,
                &config.query,
                &config.subreddits,
                remaining,
                &shared.session_dir,
            ),
        )
        .await;
        match discovered {
            Ok(posts) => return Ok(posts),
            Err(e) => {
                if cancel.is_cancelled() {
                    return Err(e);
                }
                println!("  Warning: agentic discovery failed: {:#}", e);
                println!("  Falling back to direct search");
            }
        }
    }
    search_direct(orch, config, remaining, cancel).await
}

/// Direct API discovery: query search (across subreddits in parallel) or
/// subreddit listing when no query was given.
async fn search_direct(
    orch: &Orchestrator,
    config: &RunConfig,
    remaining: usize,
    cancel: &CancellationToken,
) -> Result<Vec<Post>> {
    if !config.query.is_empty() && config.subreddits.is_empty() {
        println!("Searching all of Reddit for: {}", config.query);
        let posts = cancellable(
            cancel,
            orch.searcher.search(&config.query, "all", remaining),
        )
        .await?;
        println!("  Found {} posts", posts.len());
        return Ok(posts);
    }

    let mut tasks = FuturesUnordered::new();
    for sub in &config.subreddits {
        let searcher = orch.searcher.clone();
        let query = config.query.clone();
        let sort = config.sort;
        let sub = sub.clone();
        tasks.push(async move {
            let result = if query.is_empty() {
                println!("Listing r/{} ({})", sub, sort);
                searcher.list_subreddit(&sub, sort, remaining).await
            } else {
                println!("Searching r/{} for: {}", sub, query);
                searcher.search(&query, &sub, remaining).await
            };
            (sub, result)
        });
    }

    let mut posts = Vec::new();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = tasks.next() => next,
        };
        let Some((sub, result)) = next else { break };
        match result {
            Ok(sub_posts) => {
                println!("  Found {} posts in r/{}", sub_posts.len(), sub);
                posts.extend(sub_posts);
            }
            Err(e) => println!("  Warning: search failed for r/{}: {:#}", sub, e),
        }
    }
    Ok(posts)
}

async fn worker_loop(ctx: WorkerCtx) {
    loop {
        if ctx.cancel.is_cancelled() {
            return;
        }
        // Early stop: once the goal is met, workers stop consuming.
        if ctx.shared.goal_met() {
            return;
        }

        let item = tokio::select! {
            _ = ctx.cancel.cancelled() => return,
            item = recv_item(&ctx.rx) => item,
        };
        let Some(item) = item else { return };
        process_item(&ctx, item).await;
    }
}

async fn recv_item(
    rx: &Arc<tokio::sync::Mutex<mpsc::Receiver<WorkItem>>>,
) -> Option<WorkItem> {
    rx.lock().await.recv().await
}

/// Evaluate (when needed) then extract one thread, driving it to a
/// terminal-for-the-item status.
async fn process_item(ctx: &WorkerCtx, item: WorkItem) {
    let ts = item.state;

    if item.needs_eval {
        if let Some(evaluator) = &ctx.evaluator {
            match evaluate_with_retry(ctx, evaluator, &ts).await {
                Err(e) => {
                    finish_failed(ctx, &ts, &format!("evaluation failed: {:#}", e));
                    return;
                }
                Ok(result) if result.verdict != crate::agents::Verdict::Keep => {
                    finish_skipped(ctx, &ts, &result.reason);
                    return;
                }
                Ok(_) => {
                    // The evaluator claims to have persisted the canonical
                    // thread JSON; an invalid payload is treated as missing
                    // and refetched by the extraction step.
                    let path = session::thread_path(&ctx.shared.session_dir, &ts.post_id);
                    if let Ok(data) = std::fs::read_to_string(&path) {
                        let valid = parse_thread_payload(&data)
                            .map(|t| t.post.id == ts.post_id)
                            .unwrap_or(false);
                        if !valid {
                            let _ = std::fs::remove_file(&path);
                        }
                    }
                }
            }
        } else {
            // No evaluator: fetch the thread directly.
            let thread = match cancellable(
                &ctx.cancel,
                ctx.searcher.get_thread(&ts.permalink, THREAD_COMMENT_LIMIT),
            )
            .await
            {
                Ok(thread) => thread,
                Err(e) => {
                    finish_failed(ctx, &ts, &format!("thread fetch failed: {:#}", e));
                    return;
                }
            };

            // Thread JSON is written outside the manifest lock.
            if let Err(e) = write_canonical_thread(ctx, &ts, &thread) {
                finish_failed(ctx, &ts, &format!("{:#}", e));
                return;
            }
        }

        {
            let mut m = ctx.shared.manifest.lock().unwrap();
            m.mark_collected(&ts.post_id);
        }
        ctx.shared.mark_dirty();
    }

    // Extraction step.
    let thread = match load_thread_for_extraction(ctx, &ts).await {
        Ok(thread) => thread,
        Err(e) => {
            finish_failed(ctx, &ts, &format!("thread load failed: {:#}", e));
            return;
        }
    };

    let mut result = match ctx
        .extractor
        .extract(&thread, &ctx.form, Some(ctx.log_sink.clone()))
        .await
    {
        Ok(result) => result,
        Err(e) => {
            finish_failed(ctx, &ts, &format!("extraction failed: {:#}", e));
            return;
        }
    };

    // Evidence links are derived here so every extractor implementation gets
    // them; repopulating what an extractor already built is a no-op.
    crate::agents::extraction::populate_links(&mut result, &thread.post.permalink);

    let entry_count = result.entries.len();
    {
        let mut m = ctx.shared.manifest.lock().unwrap();
        m.set_entries(&ts.post_id, result.entries);
    }
    ctx.shared.mark_dirty();
    let extracted = ctx.shared.extracted.fetch_add(1, Ordering::SeqCst) + 1;
    ctx.shared.done.fetch_add(1, Ordering::SeqCst);
    println!(
        "  [{} extracted] {} ({} entries)",
        extracted,
        truncate(&ts.title, 50),
        entry_count
    );
}

/// Up to [`EVAL_ATTEMPTS`] evaluator calls, removing the previous eval and
/// thread files between attempts.
async fn evaluate_with_retry(
    ctx: &WorkerCtx,
    evaluator: &Arc<dyn crate::agents::ThreadEvaluator>,
    ts: &ThreadState,
) -> Result<crate::agents::EvalResult> {
    let mut last_err = None;
    for attempt in 0..EVAL_ATTEMPTS {
        if attempt > 0 {
            let _ = std::fs::remove_file(session::eval_path(&ctx.shared.session_dir, &ts.post_id));
            let _ =
                std::fs::remove_file(session::thread_path(&ctx.shared.session_dir, &ts.post_id));
        }
        match evaluator
            .evaluate_thread(&ctx.form, ts, &ctx.shared.session_dir)
            .await
        {
            Ok(result) => return Ok(result),
            Err(e) => last_err = Some(e),
        }
        if ctx.cancel.is_cancelled() {
            break;
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("evaluation failed")))
}

fn write_canonical_thread(ctx: &WorkerCtx, ts: &ThreadState, thread: &Thread) -> Result<()> {
    let path = session::thread_path(&ctx.shared.session_dir, &ts.post_id);
    let data = serde_json::to_string_pretty(thread).context("thread marshal failed")?;
    std::fs::write(&path, data).context("thread write failed")?;
    Ok(())
}

/// Read the canonical thread JSON; refetch and rewrite it when missing or
/// malformed. Extraction never runs on an invalid payload.
async fn load_thread_for_extraction(ctx: &WorkerCtx, ts: &ThreadState) -> Result<Thread> {
    let path = session::thread_path(&ctx.shared.session_dir, &ts.post_id);
    match std::fs::read_to_string(&path) {
        Ok(data) => match parse_thread_payload(&data) {
            Ok(thread) => return Ok(thread),
            Err(e) => println!(
                "  [{}] thread payload invalid ({:#}), refetching canonical JSON",
                ts.post_id, e
            ),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => println!(
            "  [{}] thread payload unreadable ({}), refetching canonical JSON",
            ts.post_id, e
        ),
    }

    let thread = cancellable(
        &ctx.cancel,
        ctx.searcher.get_thread(&ts.permalink, THREAD_COMMENT_LIMIT),
    )
    .await
    .context("refetch failed")?;

    let data = serde_json::to_string_pretty(&thread).context("serializing canonical thread JSON")?;
    std::fs::write(&path, data).context("writing canonical thread JSON")?;
    println!(
        "  [{}] refetched thread and wrote canonical payload",
        ts.post_id
    );
    Ok(thread)
}

fn parse_thread_payload(data: &str) -> Result<Thread> {
    let thread: Thread = serde_json::from_str(data)?;
    if thread.post.id.is_empty() || thread.post.permalink.is_empty() {
        bail!("missing post id/permalink in payload");
    }
    Ok(thread)
}

/// Mark a thread failed and account the item as done. Cancellation is not a
/// thread failure: the item stays in its current status for resume.
fn finish_failed(ctx: &WorkerCtx, ts: &ThreadState, error: &str) {
    if ctx.cancel.is_cancelled() {
        ctx.shared.done.fetch_add(1, Ordering::SeqCst);
        return;
    }
    {
        let mut m = ctx.shared.manifest.lock().unwrap();
        m.mark_failed(&ts.post_id, error);
    }
    ctx.shared.mark_dirty();
    let n = ctx.shared.done.fetch_add(1, Ordering::SeqCst) + 1;
    let total = ctx.shared.fed.load(Ordering::SeqCst);
    println!(
        "  [{}/{}] {} → {}",
        n,
        total,
        truncate(&ts.title, 50),
        error
    );
}

fn finish_skipped(ctx: &WorkerCtx, ts: &ThreadState, reason: &str) {
    {
        let mut m = ctx.shared.manifest.lock().unwrap();
        m.mark_skipped(&ts.post_id, reason);
    }
    ctx.shared.mark_dirty();
    let n = ctx.shared.done.fetch_add(1, Ordering::SeqCst) + 1;
    let total = ctx.shared.fed.load(Ordering::SeqCst);
    println!(
        "  [{}/{}] {} → SKIP: {}",
        n,
        total,
        truncate(&ts.title, 50),
        reason
    );
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => bail!("cancelled"),
        res = fut => res,
    }
}
