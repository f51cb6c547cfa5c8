//! Core data model shared across the pipeline: posts, threads, extracted
//! entries, and the session manifest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Manifest schema version written by this build. Readers refuse to load
/// manifests with a different version.
pub const MANIFEST_VERSION: u32 = 1;

/// A post as returned by the Reddit listing/search API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub score: i64,
    pub num_comments: i64,
    pub domain: String,
    pub permalink: String,
    pub selftext: String,
    pub url: String,
    pub author: String,
    pub subreddit: String,
    #[serde(rename = "over_18")]
    pub nsfw: bool,
    #[serde(rename = "created_utc")]
    pub created: f64,
}

/// A comment with its nested replies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Comment {
    pub id: String,
    pub body: String,
    pub author: String,
    pub score: i64,
    #[serde(rename = "created_utc")]
    pub created: f64,
    pub permalink: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<Comment>,
    pub depth: u32,
}

/// A complete discussion thread: the root post plus its comment tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Thread {
    pub post: Post,
    pub comments: Vec<Comment>,
}

impl Thread {
    /// Flatten the comment tree into a depth-first list.
    pub fn flattened_comments(&self) -> Vec<&Comment> {
        fn walk<'a>(comments: &'a [Comment], out: &mut Vec<&'a Comment>) {
            for c in comments {
                out.push(c);
                walk(&c.replies, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.comments, &mut out);
        out
    }
}

/// Dynamic value of an extracted field. Extraction crosses a model/JSON
/// boundary, so values arrive as untyped scalars and are checked against the
/// declared [`crate::schema::FieldKind`] after parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldScalar {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl FieldScalar {
    /// Render the scalar as display text (used for primary-field clustering).
    pub fn display_string(&self) -> String {
        match self {
            FieldScalar::Bool(b) => b.to_string(),
            FieldScalar::Number(n) => n.to_string(),
            FieldScalar::Text(s) => s.clone(),
            FieldScalar::List(items) => items.join(", "),
        }
    }
}

/// A quote from the thread supporting an extracted value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Evidence {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
}

/// One extracted field value with confidence and supporting evidence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldValue {
    pub id: String,
    pub value: Option<FieldScalar>,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Evidence>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
}

/// A single distinct item extracted from a thread (one destination, one
/// product, one recommendation), realized as an ordered list of field values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entry {
    pub fields: Vec<FieldValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rank_flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_reason: Option<String>,
}

impl Entry {
    /// Value of the given field, if present and non-null.
    pub fn field_value(&self, id: &str) -> Option<&FieldScalar> {
        self.fields
            .iter()
            .find(|fv| fv.id == id)
            .and_then(|fv| fv.value.as_ref())
    }
}

/// All entries extracted from a single thread.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub entries: Vec<Entry>,
}

/// Lifecycle of a candidate thread inside a session.
///
/// Transitions are monotonic along `pending → collected → extracted → ranked`;
/// `skipped` and `failed` are terminal and reachable from any non-terminal
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    Pending,
    Collected,
    Extracted,
    Ranked,
    Skipped,
    Failed,
}

impl ThreadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ThreadStatus::Skipped | ThreadStatus::Failed)
    }

    /// Position on the forward path; terminals have no rank.
    fn rank(self) -> Option<u8> {
        match self {
            ThreadStatus::Pending => Some(0),
            ThreadStatus::Collected => Some(1),
            ThreadStatus::Extracted => Some(2),
            ThreadStatus::Ranked => Some(3),
            ThreadStatus::Skipped | ThreadStatus::Failed => None,
        }
    }

    /// Whether the state machine permits moving from `self` to `to`.
    pub fn can_transition(self, to: ThreadStatus) -> bool {
        match (self.rank(), to.rank()) {
            // Terminal states never move again.
            (None, _) => false,
            // Any non-terminal state may fail or be skipped.
            (Some(_), None) => true,
            (Some(from), Some(to)) => to > from,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ThreadStatus::Pending => "pending",
            ThreadStatus::Collected => "collected",
            ThreadStatus::Extracted => "extracted",
            ThreadStatus::Ranked => "ranked",
            ThreadStatus::Skipped => "skipped",
            ThreadStatus::Failed => "failed",
        }
    }
}

/// Extraction state of a single candidate thread; the unit of pipeline
/// progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadState {
    pub post_id: String,
    pub permalink: String,
    pub title: String,
    pub subreddit: String,
    pub score: i64,
    pub num_comments: i64,
    pub status: ThreadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<Entry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ThreadState {
    /// A fresh pending state for a discovered post.
    pub fn from_post(post: &Post) -> Self {
        ThreadState {
            post_id: post.id.clone(),
            permalink: post.permalink.clone(),
            title: post.title.clone(),
            subreddit: post.subreddit.clone(),
            score: post.score,
            num_comments: post.num_comments,
            status: ThreadStatus::Pending,
            collected_at: None,
            extracted_at: None,
            entries: Vec::new(),
            skip_reason: None,
            error: None,
        }
    }
}

/// Reference to the form a session was created from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormRef {
    pub title: String,
    pub path: String,
    pub hash: String,
}

/// Terminal status of a single pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

/// Metadata about one invocation of the pipeline over a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub invocation_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub threads_processed: u64,
}

/// The entire state of an extraction session as a single serializable record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub form: FormRef,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub query: String,
    pub subreddits: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub discovered_subreddits: bool,
    pub threads: Vec<ThreadState>,
    pub runs: Vec<RunLog>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_monotonicity() {
        use ThreadStatus::*;
        assert!(Pending.can_transition(Collected));
        assert!(Collected.can_transition(Extracted));
        assert!(Extracted.can_transition(Ranked));
        assert!(Pending.can_transition(Extracted));
        assert!(!Extracted.can_transition(Collected));
        assert!(!Ranked.can_transition(Extracted));
    }

    #[test]
    fn test_terminal_states_are_final() {
        use ThreadStatus::*;
        for from in [Pending, Collected, Extracted, Ranked] {
            assert!(from.can_transition(Skipped));
            assert!(from.can_transition(Failed));
        }
        for to in [Pending, Collected, Extracted, Ranked, Skipped, Failed] {
            assert!(!Skipped.can_transition(to));
            assert!(!Failed.can_transition(to));
        }
    }

    #[test]
    fn test_field_scalar_untagged_roundtrip() {
        let cases = [
            (r#"true"#, FieldScalar::Bool(true)),
            (r#"42.5"#, FieldScalar::Number(42.5)),
            (r#""hiking""#, FieldScalar::Text("hiking".to_string())),
            (
                r#"["a","b"]"#,
                FieldScalar::List(vec!["a".to_string(), "b".to_string()]),
            ),
        ];
        for (json, expected) in cases {
            let parsed: FieldScalar = serde_json::from_str(json).unwrap();
            assert_eq!(parsed, expected);
        }
    }

    #[test]
    fn test_flattened_comments_depth_first() {
        let thread = Thread {
            post: Post::default(),
            comments: vec![Comment {
                id: "a".to_string(),
                replies: vec![Comment {
                    id: "b".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }],
        };
        let flat: Vec<&str> = thread
            .flattened_comments()
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(flat, vec!["a", "b"]);
    }
}
