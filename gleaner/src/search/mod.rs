//! Searching and fetching community content.

pub mod mock;
pub mod reddit;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Post, Thread};

/// Listing sort order for subreddit browsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Hot,
    New,
    Top,
    Rising,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Hot => "hot",
            SortOrder::New => "new",
            SortOrder::Top => "top",
            SortOrder::Rising => "rising",
        }
    }
}

impl std::str::FromStr for SortOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hot" => Ok(SortOrder::Hot),
            "new" => Ok(SortOrder::New),
            "top" => Ok(SortOrder::Top),
            "rising" => Ok(SortOrder::Rising),
            other => anyhow::bail!("unknown sort order: {} (expected hot|new|top|rising)", other),
        }
    }
}

impl std::fmt::Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Searches and fetches discussion content.
#[async_trait]
pub trait Searcher: Send + Sync {
    /// Search a subreddit (or `all`) for posts matching a query.
    async fn search(&self, query: &str, subreddit: &str, limit: usize) -> Result<Vec<Post>>;

    /// List posts from a subreddit with the given sort.
    async fn list_subreddit(
        &self,
        subreddit: &str,
        sort: SortOrder,
        limit: usize,
    ) -> Result<Vec<Post>>;

    /// Fetch a complete thread with comments.
    async fn get_thread(&self, permalink: &str, comment_limit: usize) -> Result<Thread>;
}
