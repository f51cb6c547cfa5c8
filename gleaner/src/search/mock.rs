//! In-memory searcher for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::types::{Post, Thread};

use super::{Searcher, SortOrder};

/// Searcher serving canned posts and threads.
#[derive(Default)]
pub struct MockSearcher {
    pub posts: Vec<Post>,
    pub threads: HashMap<String, Thread>,
    /// When set, every call fails with this message.
    pub error: Option<String>,
    /// Permalinks fetched through `get_thread`, for asserting refetches.
    pub fetched: Mutex<Vec<String>>,
}

impl MockSearcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_posts(posts: Vec<Post>) -> Self {
        MockSearcher {
            posts,
            ..Default::default()
        }
    }

    pub fn insert_thread(&mut self, thread: Thread) {
        self.threads
            .insert(thread.post.permalink.clone(), thread);
    }

    fn take(&self, limit: usize) -> Vec<Post> {
        self.posts.iter().take(limit).cloned().collect()
    }
}

#[async_trait]
impl Searcher for MockSearcher {
    async fn search(&self, _query: &str, _subreddit: &str, limit: usize) -> Result<Vec<Post>> {
        if let Some(err) = &self.error {
            bail!("{}", err);
        }
        Ok(self.take(limit))
    }

    async fn list_subreddit(
        &self,
        _subreddit: &str,
        _sort: SortOrder,
        limit: usize,
    ) -> Result<Vec<Post>> {
        if let Some(err) = &self.error {
            bail!("{}", err);
        }
        Ok(self.take(limit))
    }

    async fn get_thread(&self, permalink: &str, _comment_limit: usize) -> Result<Thread> {
        if let Some(err) = &self.error {
            bail!("{}", err);
        }
        self.fetched.lock().unwrap().push(permalink.to_string());
        match self.threads.get(permalink) {
            Some(thread) => Ok(thread.clone()),
            None => bail!("no such thread: {}", permalink),
        }
    }
}
