//! Projection of a session manifest into ranked, displayable results.
//!
//! The manifest on disk is the exchange format; this module flattens its
//! extracted entries into a view sorted by rank score that external renderers
//! (and the `runs show` command) consume.

use crate::schema::{Field, FieldKind, Form};
use crate::types::{Entry, FieldScalar, Manifest, ThreadStatus};

/// Source-thread summary attached to each projected entry.
#[derive(Debug, Clone)]
pub struct ThreadSummary {
    pub post_id: String,
    pub title: String,
    pub permalink: String,
    pub subreddit: String,
}

/// One entry paired with its source thread.
#[derive(Debug, Clone)]
pub struct RankedEntry {
    pub entry: Entry,
    pub thread: ThreadSummary,
}

/// The projected view of a session's results.
#[derive(Debug, Clone)]
pub struct SessionResults {
    pub title: String,
    pub query: String,
    pub threads_extracted: usize,
    /// Fields to display, in form order, internal fields already filtered.
    pub fields: Vec<Field>,
    /// Entries sorted by rank score descending; unscored entries last.
    pub entries: Vec<RankedEntry>,
}

/// Collect extracted and ranked entries from a manifest into a sorted view.
///
/// `form` supplies field metadata; when the original form file is gone, pass
/// `None` and the fields are derived from the extracted data instead.
pub fn collect(manifest: &Manifest, form: Option<&Form>, show_internal: bool) -> SessionResults {
    let derived;
    let form = match form {
        Some(form) => form,
        None => {
            derived = derive_form(manifest);
            &derived
        }
    };

    let fields: Vec<Field> = form
        .fields
        .iter()
        .filter(|f| show_internal || !f.internal)
        .cloned()
        .collect();

    let mut threads_extracted = 0;
    let mut entries = Vec::new();
    for ts in &manifest.threads {
        if !matches!(ts.status, ThreadStatus::Extracted | ThreadStatus::Ranked)
            || ts.entries.is_empty()
        {
            continue;
        }
        threads_extracted += 1;
        for entry in &ts.entries {
            entries.push(RankedEntry {
                entry: entry.clone(),
                thread: ThreadSummary {
                    post_id: ts.post_id.clone(),
                    title: ts.title.clone(),
                    permalink: ts.permalink.clone(),
                    subreddit: ts.subreddit.clone(),
                },
            });
        }
    }

    entries.sort_by(|a, b| match (a.entry.rank_score, b.entry.rank_score) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Equal),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });

    SessionResults {
        title: manifest.form.title.clone(),
        query: manifest.query.clone(),
        threads_extracted,
        fields,
        entries,
    }
}

/// Reconstruct a minimal form from extraction data, used when the form file
/// referenced by the manifest no longer exists.
pub fn derive_form(manifest: &Manifest) -> Form {
    let mut fields: Vec<Field> = Vec::new();
    for ts in &manifest.threads {
        for entry in &ts.entries {
            for fv in &entry.fields {
                if fields.iter().any(|f| f.id == fv.id) {
                    continue;
                }
                let kind = match &fv.value {
                    Some(FieldScalar::Number(_)) => FieldKind::Number,
                    Some(FieldScalar::Bool(_)) => FieldKind::Boolean,
                    Some(FieldScalar::List(_)) => FieldKind::Array,
                    _ => FieldKind::String,
                };
                fields.push(Field {
                    id: fv.id.clone(),
                    kind,
                    question: fv.id.replace('_', " "),
                    search_hints: Vec::new(),
                    required: false,
                    internal: false,
                });
            }
        }
    }

    Form {
        title: manifest.form.title.clone(),
        description: String::new(),
        search_hints: Vec::new(),
        fields,
    }
}
