//! Prompt builders for every agent phase.
//!
//! Discovery and evaluation agents operate through the gleaner binary itself
//! (`search`, `ls`, `thread` subcommands), so their prompts embed the
//! executable path and the exact output contract the core parses afterwards.

use std::path::Path;

use crate::ranking::{RankInput, RankOutput};
use crate::schema::Form;
use crate::types::{Thread, ThreadState};

fn field_lines(form: &Form) -> String {
    form.fields
        .iter()
        .map(|f| {
            format!(
                "- {} ({}{}): {}",
                f.id,
                f.kind.as_str(),
                if f.required { ", required" } else { "" },
                f.question
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt for the subreddit discovery agent.
pub fn discover_subreddits(form: &Form, query: &str, executable: &str) -> String {
    format!(
        r#"You are helping find the best subreddits to mine for structured data.

# Extraction goal
Form: {title}
Description: {description}
Search hints: {hints}
Query: {query}

# Tools
Search Reddit with the CLI:
  {executable} search "<query>" --json
  {executable} search "<query>" -r <subreddit> --json

# Task
Run a handful of searches with different phrasings drawn from the goal above.
Look at which subreddits the strongest results come from, then pick the 3-6
communities most likely to contain threads where people answer questions like
the form fields.

Respond with ONLY this JSON:
{{"subreddits": [{{"name": "subredditname", "reason": "why this community fits"}}]}}
"#,
        title = form.title,
        description = form.description,
        hints = form.search_hints.join(", "),
        query = query,
        executable = executable,
    )
}

/// Prompt for the thread discovery agent.
pub fn discover_threads(
    form: &Form,
    query: &str,
    subreddits: &[String],
    limit: usize,
    executable: &str,
    output_path: &Path,
) -> String {
    format!(
        r#"You are finding discussion threads worth mining for structured data.

# Extraction goal
Form: {title}
Description: {description}
Search hints: {hints}
Fields to extract:
{fields}

Query: {query}
Subreddits to cover: {subreddits}
Target: up to {limit} threads.

# Tools
  {executable} search "<query>" -r <subreddit> --json
  {executable} ls <subreddit> --sort top --json

# Task
Search each subreddit with several phrasings (and list top posts where search
is weak). Prefer threads whose comments actually answer the form fields:
recommendation and experience threads with many substantive comments, not
news or memes. Deduplicate by post id.

Write your findings to {output_path} as JSON:
{{
  "posts": [
    {{"id": "...", "title": "...", "permalink": "...", "subreddit": "...",
      "score": 0, "num_comments": 0, "reason": "why this thread"}}
  ],
  "search_log": [
    {{"query": "...", "subreddit": "...", "results": 0}}
  ]
}}
"#,
        title = form.title,
        description = form.description,
        hints = form.search_hints.join(", "),
        fields = field_lines(form),
        query = query,
        subreddits = subreddits.join(", "),
        limit = limit,
        executable = executable,
        output_path = output_path.display(),
    )
}

/// Prompt for the per-thread evaluation agent.
pub fn evaluate_thread(
    form: &Form,
    state: &ThreadState,
    executable: &str,
    eval_path: &Path,
    thread_path: &Path,
) -> String {
    format!(
        r#"You are deciding whether one discussion thread is worth extracting.

# Extraction goal
Form: {title}
Description: {description}
Fields to extract:
{fields}

# Thread
Title: {thread_title}
Permalink: {permalink}
Post id: {post_id}

# Task
1. Fetch the thread and save the canonical payload:
   {executable} thread "{permalink}" > {thread_path}
2. Read enough of it to judge whether its comments contain concrete answers
   to the fields above. A thread is a "keep" when it would yield at least one
   complete entry; skip meta discussions, jokes, and unanswered questions.
3. Write your verdict to {eval_path} as JSON:
   {{"post_id": "{post_id}", "verdict": "keep" or "skip", "reason": "...",
     "estimated_entries": 0, "thread_saved": true or false}}
"#,
        title = form.title,
        description = form.description,
        fields = field_lines(form),
        thread_title = state.title,
        permalink = state.permalink,
        post_id = state.post_id,
        executable = executable,
        thread_path = thread_path.display(),
        eval_path = eval_path.display(),
    )
}

/// Prompt for the field extraction agent. The whole thread is inlined, so no
/// tools are needed.
pub fn extract(thread: &Thread, form: &Form) -> String {
    let mut comments = String::new();
    for comment in thread.flattened_comments() {
        comments.push_str(&format!(
            "[comment_id:{}][{} points] u/{}:\n{}\n\n",
            comment.id, comment.score, comment.author, comment.body
        ));
    }

    format!(
        r#"Extract structured entries from this discussion thread.

# Form
Title: {title}
Description: {description}
Fields:
{fields}

# Thread
Title: {thread_title} (r/{subreddit}, {score} points, by u/{author})
Post content:
{post_content}

# Comments
{comments}

# Task
Each distinct item recommended or described in the thread is one entry (one
destination, one product, one answer). For every entry fill the form fields:
- "value" typed per the field ("string" → string, "number" → number,
  "boolean" → boolean, "array" → array of strings); use null when the thread
  does not answer the question.
- "confidence" in [0, 1] reflecting how directly the thread supports the value.
- "evidence": short quotes; set "comment_id" to the id from the comment
  header, or "post_content" when quoting the post itself.

Respond with ONLY this JSON:
{{"entries": [{{"fields": [{{"id": "...", "value": ..., "confidence": 0.0,
  "evidence": [{{"text": "...", "comment_id": "...", "author": "..."}}]}}]}}]}}
"#,
        title = form.title,
        description = form.description,
        fields = field_lines(form),
        thread_title = thread.post.title,
        subreddit = thread.post.subreddit,
        score = thread.post.score,
        author = thread.post.author,
        post_content = thread.post.selftext,
        comments = comments,
    )
}

/// Prompt for the ranking quality-assessment agent.
pub fn rank(form: &Form, inputs: &[RankInput], outputs: &[RankOutput]) -> String {
    let mut entries = String::new();
    for (i, input) in inputs.iter().enumerate() {
        let fields: Vec<String> = input
            .entry
            .fields
            .iter()
            .map(|fv| {
                let value = fv
                    .value
                    .as_ref()
                    .map(|v| serde_json::to_string(v).unwrap_or_default())
                    .unwrap_or_else(|| "null".to_string());
                format!("    {}: {} (confidence {:.2})", fv.id, value, fv.confidence)
            })
            .collect();
        entries.push_str(&format!(
            "- index {} (algorithmic score {:.1}):\n{}\n",
            i,
            outputs[i].algo_score,
            fields.join("\n")
        ));
    }

    format!(
        r#"You are reviewing extracted entries for quality problems.

# Form
Title: {title}
Description: {description}
Fields:
{fields}

# Entries
{entries}

# Task
Flag only entries with real problems, using these flags:
spam, joke, outdated, off_topic, low_effort, duplicate.
Assign each flagged entry a penalty between 10 and 50 (larger = worse).
Entries without problems must not appear in your answer.

Respond with ONLY a JSON array (empty array if nothing is flagged):
[{{"index": 0, "flags": ["spam"], "penalty": 30, "reason": "..."}}]
"#,
        title = form.title,
        description = form.description,
        fields = field_lines(form),
        entries = entries,
    )
}
