use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use claude_runner::ClaudeCli;
use tokio_util::sync::CancellationToken;

use gleaner::agents::{
    discovery::ClaudeSubredditDiscoverer, evaluation::ClaudeEvaluator,
    extraction::ClaudeExtractor, ranker::HybridRanker,
    thread_discovery::ClaudeThreadDiscoverer,
};
use gleaner::cli::{Cli, Command, LsArgs, RunArgs, RunsCommand, SearchArgs, ThreadArgs};
use gleaner::orchestrator::{Orchestrator, RunConfig};
use gleaner::search::{reddit::RedditSearcher, Searcher, SortOrder};
use gleaner::session::manifest;
use gleaner::types::{Manifest, Post, RunStatus};
use gleaner::{results, schema};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run(args) => cmd_run(args).await,
        Command::Search(args) => cmd_search(args).await,
        Command::Ls(args) => cmd_ls(args).await,
        Command::Thread(args) => cmd_thread(args).await,
        Command::Runs { command } => match command {
            RunsCommand::Ls { output } => cmd_runs_ls(&output),
            RunsCommand::Show {
                target,
                output,
                all,
                max_results,
            } => cmd_runs_show(&target, &output, all, max_results),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let form = schema::load_form(&args.form)?;

    // Infer a query from the form when neither a query nor explicit
    // subreddits were given.
    let mut query = args.query.clone();
    if query.is_empty() && args.subreddits.is_empty() {
        query = form
            .search_hints
            .first()
            .cloned()
            .unwrap_or_else(|| form.title.clone());
        println!("Using query from form: {}", query);
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\nInterrupted, saving progress...");
                cancel.cancel();
            }
        }
    });

    let runner = Arc::new(ClaudeCli::new());
    let searcher = Arc::new(RedditSearcher::new());
    let orchestrator = Orchestrator::new(searcher)
        .with_subreddit_discoverer(Arc::new(ClaudeSubredditDiscoverer::new(
            runner.clone(),
            &args.discovery_model,
            cancel.clone(),
        )))
        .with_thread_discoverer(Arc::new(ClaudeThreadDiscoverer::new(
            runner.clone(),
            &args.discovery_model,
            cancel.clone(),
        )))
        .with_evaluator(Arc::new(ClaudeEvaluator::new(
            runner.clone(),
            &args.eval_model,
            cancel.clone(),
        )))
        .with_extractor(Arc::new(ClaudeExtractor::new(
            runner.clone(),
            &args.extract_model,
            cancel.clone(),
        )))
        .with_ranker(Arc::new(HybridRanker::new(
            runner,
            &args.rank_model,
            cancel.clone(),
        )));

    let config = RunConfig {
        query,
        subreddits: args.subreddits.clone(),
        limit: args.limit,
        sort: args.sort.parse()?,
        output_dir: args.output.clone(),
        session: args.session.clone(),
        workers: args.workers,
        discovery_model: args.discovery_model.clone(),
        eval_model: args.eval_model.clone(),
        extract_model: args.extract_model.clone(),
        rank_model: args.rank_model.clone(),
        ..RunConfig::new(form, &args.form)
    };

    let outcome = orchestrator.run(config, cancel).await?;
    if outcome.status == RunStatus::Interrupted {
        println!(
            "Session saved. Resume with: gleaner run --form {} --session {}",
            args.form,
            outcome.session_dir.display()
        );
        return Ok(());
    }

    cmd_runs_show(
        &outcome.session_dir.display().to_string(),
        &args.output,
        false,
        10,
    )
}

async fn cmd_search(args: SearchArgs) -> Result<()> {
    let searcher = RedditSearcher::new();
    let subreddit = args.subreddit.as_deref().unwrap_or("all");
    let posts = searcher.search(&args.query, subreddit, args.limit).await?;
    let posts = filter_nsfw(posts, args.no_nsfw);
    print_posts(&posts, args.json)
}

async fn cmd_ls(args: LsArgs) -> Result<()> {
    let searcher = RedditSearcher::new();
    let sort: SortOrder = args.sort.parse()?;
    let posts = searcher
        .list_subreddit(&args.subreddit, sort, args.limit)
        .await?;
    let posts = filter_nsfw(posts, args.no_nsfw);
    print_posts(&posts, args.json)
}

async fn cmd_thread(args: ThreadArgs) -> Result<()> {
    let searcher = RedditSearcher::new();
    let thread = searcher.get_thread(&args.permalink, args.comments).await?;
    println!("{}", serde_json::to_string_pretty(&thread)?);
    Ok(())
}

fn filter_nsfw(posts: Vec<Post>, exclude: bool) -> Vec<Post> {
    if !exclude {
        return posts;
    }
    posts.into_iter().filter(|p| !p.nsfw).collect()
}

fn print_posts(posts: &[Post], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(posts)?);
        return Ok(());
    }
    for p in posts {
        let nsfw_tag = if p.nsfw { " [NSFW]" } else { "" };
        println!("{}{}", p.title, nsfw_tag);
        println!(
            "  ↑ {}  💬 {}  r/{}  ({})",
            p.score, p.num_comments, p.subreddit, p.domain
        );
        println!("  https://reddit.com{}\n", p.permalink);
    }
    if posts.is_empty() {
        println!("No results found.");
    }
    Ok(())
}

fn cmd_runs_ls(output: &Path) -> Result<()> {
    let entries = match std::fs::read_dir(output) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("No output directory found. Run an extraction first.");
            return Ok(());
        }
        Err(e) => return Err(e).context("reading output directory"),
    };

    let mut sessions: Vec<(String, Manifest)> = Vec::new();
    for entry in entries.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        if let Ok(Some(manifest)) = manifest::load(&entry.path()) {
            sessions.push((entry.file_name().to_string_lossy().into_owned(), manifest));
        }
    }

    if sessions.is_empty() {
        println!("No runs found.");
        return Ok(());
    }
    sessions.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at));

    println!("\nRuns");
    println!("{}", "─".repeat(80));
    for (name, m) in &sessions {
        let counts = m.counts_by_status();
        let status = m
            .runs
            .last()
            .map(|r| match r.status {
                RunStatus::Running => "running",
                RunStatus::Completed => "done",
                RunStatus::Interrupted => "interrupted",
                RunStatus::Failed => "failed",
            })
            .unwrap_or("empty");
        println!(
            "{}  [{}]  {} threads ({} ranked, {} extracted, {} skipped, {} failed)",
            name,
            status,
            m.threads.len(),
            counts.ranked,
            counts.extracted,
            counts.skipped,
            counts.failed
        );
        println!(
            "  {} · created {}",
            m.form.title,
            m.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn cmd_runs_show(target: &str, output: &Path, show_internal: bool, max_results: usize) -> Result<()> {
    let session_dir = resolve_session_dir(target, output)?;
    let manifest = manifest::load(&session_dir)
        .context("loading manifest")?
        .with_context(|| format!("no manifest found in {}", session_dir.display()))?;

    // Prefer the original form for field metadata; fall back to deriving
    // fields from the extracted data.
    let form = schema::load_form(&manifest.form.path).ok();
    let view = results::collect(&manifest, form.as_ref(), show_internal);

    println!("\n{}", view.title);
    if !view.query.is_empty() {
        println!(" Query: {}", view.query);
    }
    println!(" {} threads extracted\n", view.threads_extracted);

    if view.entries.is_empty() {
        println!("No extracted results yet.");
        return Ok(());
    }

    let shown = if max_results == 0 {
        view.entries.len()
    } else {
        max_results.min(view.entries.len())
    };
    for (i, ranked) in view.entries[..shown].iter().enumerate() {
        match ranked.entry.rank_score {
            Some(score) => println!("#{} (score {:.0})", i + 1, score),
            None => println!("#{}", i + 1),
        }
        for field in &view.fields {
            let Some(fv) = ranked.entry.fields.iter().find(|fv| fv.id == field.id) else {
                continue;
            };
            let value = match &fv.value {
                Some(v) => v.display_string(),
                None => "—".to_string(),
            };
            println!("  {}: {} ({:.0}%)", field.id, value, fv.confidence * 100.0);
        }
        if !ranked.entry.rank_flags.is_empty() {
            println!("  flags: {}", ranked.entry.rank_flags.join(", "));
        }
        if let Some(reason) = &ranked.entry.rank_reason {
            println!("  note: {}", reason);
        }
        println!(
            "  from: {} (r/{})",
            ranked.thread.title, ranked.thread.subreddit
        );
        println!("  https://reddit.com{}\n", ranked.thread.permalink);
    }
    if shown < view.entries.len() {
        println!(
            "… {} more (use -n 0 to show all)",
            view.entries.len() - shown
        );
    }
    Ok(())
}

/// Resolve a session directory from a full path, a name under the output
/// directory, or a unique name prefix.
fn resolve_session_dir(target: &str, output: &Path) -> Result<PathBuf> {
    let direct = PathBuf::from(target);
    if direct.join("manifest.json").exists() {
        return Ok(direct);
    }
    let nested = output.join(target);
    if nested.join("manifest.json").exists() {
        return Ok(nested);
    }
    if let Ok(entries) = std::fs::read_dir(output) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(target) && entry.path().join("manifest.json").exists() {
                return Ok(entry.path());
            }
        }
    }
    bail!(
        "no run found matching {:?}; run 'gleaner runs ls' to see available runs",
        target
    );
}
