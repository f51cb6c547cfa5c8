//! Shared fixtures for pipeline integration tests.

use std::sync::Arc;

use gleaner::agents::mock::{MockEvaluator, MockExtractor, MockThreadDiscoverer};
use gleaner::orchestrator::RunConfig;
use gleaner::schema::{Field, FieldKind, Form};
use gleaner::types::{Comment, Post, Thread};

/// Reference form: one required string field plus one array field.
pub fn vacation_form() -> Form {
    Form {
        title: "Family Vacation Ideas".to_string(),
        description: "Destinations recommended for families".to_string(),
        search_hints: vec!["family vacation".to_string()],
        fields: vec![
            Field {
                id: "destination".to_string(),
                kind: FieldKind::String,
                question: "What destination is recommended?".to_string(),
                search_hints: Vec::new(),
                required: true,
                internal: false,
            },
            Field {
                id: "activities".to_string(),
                kind: FieldKind::Array,
                question: "What activities are mentioned?".to_string(),
                search_hints: Vec::new(),
                required: false,
                internal: false,
            },
        ],
    }
}

pub fn post(id: &str) -> Post {
    Post {
        id: id.to_string(),
        title: format!("Trip report {}", id),
        permalink: format!("/r/travel/comments/{}/", id),
        subreddit: "travel".to_string(),
        score: 150,
        num_comments: 40,
        ..Default::default()
    }
}

pub fn posts(n: usize) -> Vec<Post> {
    (0..n).map(|i| post(&format!("p{}", i))).collect()
}

pub fn thread_for(p: &Post) -> Thread {
    Thread {
        post: p.clone(),
        comments: vec![Comment {
            id: format!("c_{}", p.id),
            body: format!("You should visit Destination {}", p.id),
            author: "traveler".to_string(),
            score: 10,
            ..Default::default()
        }],
    }
}

/// Evaluator that keeps (and persists) every one of the given posts.
pub fn keeping_evaluator(posts: &[Post]) -> MockEvaluator {
    let mut evaluator = MockEvaluator::new();
    for p in posts {
        evaluator = evaluator.keep(thread_for(p));
    }
    evaluator
}

pub fn extractor() -> MockExtractor {
    MockExtractor::new("destination")
}

pub fn single_round_discoverer(posts: Vec<Post>) -> Arc<MockThreadDiscoverer> {
    Arc::new(MockThreadDiscoverer::new(vec![posts]))
}

/// A run config over a temp output directory with explicit subreddits (no
/// community discovery phase).
pub fn config(limit: usize, output_dir: &std::path::Path) -> RunConfig {
    let mut config = RunConfig::new(vacation_form(), "forms/vacation.json");
    config.query = "family vacation".to_string();
    config.subreddits = vec!["travel".to_string()];
    config.limit = limit;
    config.output_dir = output_dir.to_path_buf();
    config.workers = 4;
    config
}
