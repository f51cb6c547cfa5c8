//! Reddit JSON API client.
//!
//! Uses the public `.json` endpoints; no authentication. Transport failures
//! surface as errors and transition the affected thread to `failed` upstream.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::types::{Comment, Post, Thread};

use super::{Searcher, SortOrder};

const BASE_URL: &str = "https://www.reddit.com";
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)";

pub struct RedditSearcher {
    client: reqwest::Client,
}

impl RedditSearcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .expect("building HTTP client");
        RedditSearcher { client }
    }
}

impl Default for RedditSearcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Listing response shape for post endpoints.
#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    #[serde(default)]
    data: Post,
}

#[async_trait]
impl Searcher for RedditSearcher {
    async fn search(&self, query: &str, subreddit: &str, limit: usize) -> Result<Vec<Post>> {
        let url = format!(
            "{}/r/{}/search.json?q={}&limit={}&restrict_sr=1&raw_json=1",
            BASE_URL,
            subreddit,
            urlencode(query),
            limit
        );
        self.fetch_posts(&url).await
    }

    async fn list_subreddit(
        &self,
        subreddit: &str,
        sort: SortOrder,
        limit: usize,
    ) -> Result<Vec<Post>> {
        let url = format!(
            "{}/r/{}/{}.json?limit={}&raw_json=1",
            BASE_URL,
            subreddit,
            sort.as_str(),
            limit
        );
        self.fetch_posts(&url).await
    }

    async fn get_thread(&self, permalink: &str, comment_limit: usize) -> Result<Thread> {
        let permalink = normalize_permalink(permalink);
        let url = format!(
            "{}{}.json?limit={}&raw_json=1&depth=10",
            BASE_URL, permalink, comment_limit
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("fetching thread: {}", permalink))?;
        if !resp.status().is_success() {
            bail!("HTTP {} fetching thread {}", resp.status(), permalink);
        }

        let payload: Vec<serde_json::Value> = resp
            .json()
            .await
            .with_context(|| format!("decoding thread JSON: {}", permalink))?;

        parse_thread(&payload, &permalink)
    }
}

impl RedditSearcher {
    async fn fetch_posts(&self, url: &str) -> Result<Vec<Post>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .context("fetching posts")?;
        if !resp.status().is_success() {
            bail!("HTTP {} fetching posts", resp.status());
        }
        let listing: Listing = resp.json().await.context("decoding post listing")?;
        Ok(listing.data.children.into_iter().map(|c| c.data).collect())
    }
}

fn normalize_permalink(permalink: &str) -> String {
    let trimmed = permalink
        .trim_start_matches("https://reddit.com")
        .trim_start_matches("https://www.reddit.com");
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Parse the two-listing thread payload: element 0 holds the post, element 1
/// the comment forest.
fn parse_thread(payload: &[serde_json::Value], permalink: &str) -> Result<Thread> {
    let mut thread = Thread::default();

    if let Some(post_data) = payload
        .first()
        .and_then(|v| v.pointer("/data/children/0/data"))
    {
        thread.post =
            serde_json::from_value(post_data.clone()).context("decoding thread post")?;
        thread.post.permalink = permalink.to_string();
    }

    if let Some(children) = payload
        .get(1)
        .and_then(|v| v.pointer("/data/children"))
        .and_then(|v| v.as_array())
    {
        thread.comments = parse_comments(children, 0);
    }

    Ok(thread)
}

/// Recursively parse comments and their replies. Non-comment children
/// (`more` stubs) are skipped; `replies` is either a nested listing or an
/// empty string.
fn parse_comments(children: &[serde_json::Value], depth: u32) -> Vec<Comment> {
    let mut comments = Vec::new();
    for child in children {
        if child.get("kind").and_then(|k| k.as_str()) != Some("t1") {
            continue;
        }
        let Some(data) = child.get("data") else {
            continue;
        };

        let mut comment = Comment {
            id: str_field(data, "id"),
            body: str_field(data, "body"),
            author: str_field(data, "author"),
            score: data.get("score").and_then(|v| v.as_i64()).unwrap_or(0),
            created: data
                .get("created_utc")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
            permalink: str_field(data, "permalink"),
            replies: Vec::new(),
            depth,
        };

        if let Some(reply_children) = data
            .pointer("/replies/data/children")
            .and_then(|v| v.as_array())
        {
            comment.replies = parse_comments(reply_children, depth + 1);
        }

        comments.push(comment);
    }
    comments
}

fn str_field(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_permalink() {
        assert_eq!(
            normalize_permalink("https://www.reddit.com/r/travel/comments/abc/"),
            "/r/travel/comments/abc/"
        );
        assert_eq!(
            normalize_permalink("r/travel/comments/abc/"),
            "/r/travel/comments/abc/"
        );
        assert_eq!(
            normalize_permalink("/r/travel/comments/abc/"),
            "/r/travel/comments/abc/"
        );
    }

    #[test]
    fn test_urlencode() {
        assert_eq!(urlencode("family vacation"), "family+vacation");
        assert_eq!(urlencode("a&b"), "a%26b");
        assert_eq!(urlencode("safe-chars_1.2~"), "safe-chars_1.2~");
    }

    #[test]
    fn test_parse_thread_payload() {
        let payload: Vec<serde_json::Value> = serde_json::from_str(
            r#"[
            {"data": {"children": [{"kind": "t3", "data": {
                "id": "abc", "title": "Best trips?", "score": 120,
                "num_comments": 2, "selftext": "Looking for ideas",
                "author": "asker", "subreddit": "travel",
                "permalink": "/r/travel/comments/abc/"
            }}]}},
            {"data": {"children": [
                {"kind": "t1", "data": {
                    "id": "c1", "body": "Go to Kyoto", "author": "u1", "score": 40,
                    "replies": {"data": {"children": [
                        {"kind": "t1", "data": {"id": "c2", "body": "Seconded", "author": "u2", "score": 5, "replies": ""}}
                    ]}}
                }},
                {"kind": "more", "data": {"count": 3}}
            ]}}
        ]"#,
        )
        .unwrap();

        let thread = parse_thread(&payload, "/r/travel/comments/abc/").unwrap();
        assert_eq!(thread.post.id, "abc");
        assert_eq!(thread.post.permalink, "/r/travel/comments/abc/");
        assert_eq!(thread.comments.len(), 1);
        assert_eq!(thread.comments[0].id, "c1");
        assert_eq!(thread.comments[0].depth, 0);
        assert_eq!(thread.comments[0].replies.len(), 1);
        assert_eq!(thread.comments[0].replies[0].id, "c2");
        assert_eq!(thread.comments[0].replies[0].depth, 1);
    }

    #[test]
    fn test_parse_thread_empty_payload() {
        let thread = parse_thread(&[], "/r/x/comments/y/").unwrap();
        assert!(thread.post.id.is_empty());
        assert!(thread.comments.is_empty());
    }
}
