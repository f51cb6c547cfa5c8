//! Manifest store: crash-safe persistence plus the mutation primitives the
//! pipeline needs.
//!
//! Saves are atomic: the manifest is serialized, written to a sibling `.tmp`
//! path, and renamed over the canonical file. The rename is the only step
//! that may briefly leave the canonical path absent, so readers must tolerate
//! a missing file.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Utc;

use crate::types::{
    Entry, FormRef, Manifest, RunLog, RunStatus, ThreadState, ThreadStatus, MANIFEST_VERSION,
};

use super::manifest_path;

/// Create a new empty manifest for a fresh session.
pub fn new_manifest(form: FormRef, query: &str, subreddits: Vec<String>) -> Manifest {
    let now = Utc::now();
    Manifest {
        version: MANIFEST_VERSION,
        form,
        query: query.to_string(),
        subreddits,
        discovered_subreddits: false,
        threads: Vec::new(),
        runs: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

/// Load a manifest from a session directory.
///
/// Returns `Ok(None)` when no manifest exists yet. A manifest that exists but
/// fails to parse, or carries an unknown schema version, is a corrupt session
/// and surfaces as an error.
pub fn load(session_dir: &Path) -> Result<Option<Manifest>> {
    let path = manifest_path(session_dir);
    let data = match std::fs::read_to_string(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("reading manifest: {}", path.display()))
        }
    };

    let manifest: Manifest = serde_json::from_str(&data)
        .with_context(|| format!("parsing manifest: {}", path.display()))?;
    if manifest.version != MANIFEST_VERSION {
        bail!(
            "unsupported manifest version {} (expected {}): {}",
            manifest.version,
            MANIFEST_VERSION,
            path.display()
        );
    }

    Ok(Some(manifest))
}

/// Save a manifest to a session directory with an atomic tmp-then-rename
/// write. Bumps `updated_at`.
pub fn save(session_dir: &Path, manifest: &mut Manifest) -> Result<()> {
    manifest.updated_at = Utc::now();
    let data = serde_json::to_string_pretty(manifest).context("serializing manifest")?;
    write_snapshot(session_dir, &data)
}

/// Write an already-serialized manifest snapshot atomically. Split out so the
/// pipeline can serialize under the manifest lock and perform file I/O
/// outside it.
pub fn write_snapshot(session_dir: &Path, data: &str) -> Result<()> {
    std::fs::create_dir_all(session_dir).with_context(|| {
        format!("creating session directory: {}", session_dir.display())
    })?;

    let path = manifest_path(session_dir);
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, data)
        .with_context(|| format!("writing manifest: {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, &path)
        .with_context(|| format!("renaming manifest: {}", path.display()))?;
    Ok(())
}

impl Manifest {
    pub fn find_thread(&self, post_id: &str) -> Option<&ThreadState> {
        self.threads.iter().find(|t| t.post_id == post_id)
    }

    pub fn find_thread_index(&self, post_id: &str) -> Option<usize> {
        self.threads.iter().position(|t| t.post_id == post_id)
    }

    /// Append a new thread. Refuses duplicates by post id.
    pub fn add_thread(&mut self, thread: ThreadState) -> bool {
        if self.find_thread(&thread.post_id).is_some() {
            return false;
        }
        self.threads.push(thread);
        self.updated_at = Utc::now();
        true
    }

    /// Move a thread to a new status, enforcing the state machine. Returns
    /// false if the thread is unknown or the transition is not allowed.
    pub fn set_status(&mut self, post_id: &str, status: ThreadStatus) -> bool {
        let Some(idx) = self.find_thread_index(post_id) else {
            return false;
        };
        if !self.threads[idx].status.can_transition(status) {
            return false;
        }
        self.threads[idx].status = status;
        self.updated_at = Utc::now();
        true
    }

    /// Mark a thread collected, recording the collection timestamp.
    pub fn mark_collected(&mut self, post_id: &str) -> bool {
        let Some(idx) = self.find_thread_index(post_id) else {
            return false;
        };
        if !self.threads[idx].status.can_transition(ThreadStatus::Collected) {
            return false;
        }
        self.threads[idx].status = ThreadStatus::Collected;
        self.threads[idx].collected_at = Some(Utc::now());
        self.updated_at = Utc::now();
        true
    }

    /// Store extracted entries, transitioning the thread to `extracted`.
    pub fn set_entries(&mut self, post_id: &str, entries: Vec<Entry>) -> bool {
        let Some(idx) = self.find_thread_index(post_id) else {
            return false;
        };
        if !self.threads[idx].status.can_transition(ThreadStatus::Extracted) {
            return false;
        }
        let now = Utc::now();
        self.threads[idx].entries = entries;
        self.threads[idx].status = ThreadStatus::Extracted;
        self.threads[idx].extracted_at = Some(now);
        self.updated_at = now;
        true
    }

    pub fn mark_ranked(&mut self, post_id: &str) -> bool {
        self.set_status(post_id, ThreadStatus::Ranked)
    }

    /// Skip a thread, recording the evaluator's reason.
    pub fn mark_skipped(&mut self, post_id: &str, reason: &str) -> bool {
        let Some(idx) = self.find_thread_index(post_id) else {
            return false;
        };
        if !self.threads[idx].status.can_transition(ThreadStatus::Skipped) {
            return false;
        }
        self.threads[idx].status = ThreadStatus::Skipped;
        self.threads[idx].skip_reason = Some(reason.to_string());
        self.updated_at = Utc::now();
        true
    }

    /// Fail a thread, recording the error string.
    pub fn mark_failed(&mut self, post_id: &str, error: &str) -> bool {
        let Some(idx) = self.find_thread_index(post_id) else {
            return false;
        };
        if !self.threads[idx].status.can_transition(ThreadStatus::Failed) {
            return false;
        }
        self.threads[idx].status = ThreadStatus::Failed;
        self.threads[idx].error = Some(error.to_string());
        self.updated_at = Utc::now();
        true
    }

    pub fn counts_by_status(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for t in &self.threads {
            match t.status {
                ThreadStatus::Pending => counts.pending += 1,
                ThreadStatus::Collected => counts.collected += 1,
                ThreadStatus::Extracted => counts.extracted += 1,
                ThreadStatus::Ranked => counts.ranked += 1,
                ThreadStatus::Skipped => counts.skipped += 1,
                ThreadStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn threads_in(&self, status: ThreadStatus) -> Vec<ThreadState> {
        self.threads
            .iter()
            .filter(|t| t.status == status)
            .cloned()
            .collect()
    }

    /// Append a new running run-log entry.
    pub fn start_run(&mut self, invocation_id: &str) {
        let now = Utc::now();
        self.runs.push(RunLog {
            invocation_id: invocation_id.to_string(),
            started_at: now,
            completed_at: None,
            status: RunStatus::Running,
            threads_processed: 0,
        });
        self.updated_at = now;
    }

    /// Set the terminal status on the most recent run-log entry.
    pub fn complete_run(&mut self, status: RunStatus, threads_processed: u64) {
        let Some(run) = self.runs.last_mut() else {
            return;
        };
        let now = Utc::now();
        run.completed_at = Some(now);
        run.status = status;
        run.threads_processed = threads_processed;
        self.updated_at = now;
    }
}

/// Thread counts per status over the current manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub collected: usize,
    pub extracted: usize,
    pub ranked: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl StatusCounts {
    /// Threads that still can or already did produce entries.
    pub fn actionable(&self) -> usize {
        self.pending + self.collected + self.extracted + self.ranked
    }

    /// Threads counting toward the extraction goal.
    pub fn toward_goal(&self) -> usize {
        self.extracted + self.ranked
    }

    pub fn terminal(&self) -> usize {
        self.skipped + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Post;

    fn sample_manifest() -> Manifest {
        new_manifest(
            FormRef {
                title: "Test".to_string(),
                path: "forms/test.json".to_string(),
                hash: "deadbeef".to_string(),
            },
            "test query",
            vec!["travel".to_string()],
        )
    }

    fn thread(id: &str) -> ThreadState {
        ThreadState::from_post(&Post {
            id: id.to_string(),
            title: format!("Thread {}", id),
            permalink: format!("/r/travel/comments/{}/", id),
            subreddit: "travel".to_string(),
            score: 100,
            num_comments: 25,
            ..Default::default()
        })
    }

    #[test]
    fn test_load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_load_corrupt_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(manifest_path(dir.path()), "{not json").unwrap();
        assert!(load(dir.path()).is_err());
    }

    #[test]
    fn test_load_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = sample_manifest();
        save(dir.path(), &mut manifest).unwrap();

        let data = std::fs::read_to_string(manifest_path(dir.path())).unwrap();
        let bumped = data.replacen("\"version\": 1", "\"version\": 99", 1);
        std::fs::write(manifest_path(dir.path()), bumped).unwrap();
        assert!(load(dir.path()).is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = sample_manifest();
        manifest.add_thread(thread("abc"));
        manifest.start_run("run-1");
        save(dir.path(), &mut manifest).unwrap();

        let loaded = load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.threads.len(), 1);
        assert_eq!(loaded.threads[0].post_id, "abc");
        assert_eq!(loaded.threads[0].status, ThreadStatus::Pending);
        assert_eq!(loaded.runs.len(), 1);
        assert_eq!(loaded.runs[0].status, RunStatus::Running);
    }

    #[test]
    fn test_save_leaves_no_tmp_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = sample_manifest();
        save(dir.path(), &mut manifest).unwrap();
        assert!(manifest_path(dir.path()).exists());
        assert!(!manifest_path(dir.path()).with_extension("json.tmp").exists());
    }

    #[test]
    fn test_add_thread_refuses_duplicates() {
        let mut manifest = sample_manifest();
        assert!(manifest.add_thread(thread("abc")));
        assert!(!manifest.add_thread(thread("abc")));
        assert_eq!(manifest.threads.len(), 1);
    }

    #[test]
    fn test_set_entries_transitions_to_extracted() {
        let mut manifest = sample_manifest();
        manifest.add_thread(thread("abc"));
        manifest.mark_collected("abc");
        assert!(manifest.set_entries("abc", vec![Entry::default()]));

        let t = manifest.find_thread("abc").unwrap();
        assert_eq!(t.status, ThreadStatus::Extracted);
        assert!(t.extracted_at.is_some());
        assert_eq!(t.entries.len(), 1);
    }

    #[test]
    fn test_status_machine_enforced() {
        let mut manifest = sample_manifest();
        manifest.add_thread(thread("abc"));
        manifest.mark_skipped("abc", "not relevant");
        // Terminal: nothing moves it again.
        assert!(!manifest.mark_collected("abc"));
        assert!(!manifest.set_entries("abc", vec![Entry::default()]));
        assert!(!manifest.mark_failed("abc", "boom"));
        assert_eq!(
            manifest.find_thread("abc").unwrap().skip_reason.as_deref(),
            Some("not relevant")
        );
    }

    #[test]
    fn test_counts_by_status() {
        let mut manifest = sample_manifest();
        manifest.add_thread(thread("a"));
        manifest.add_thread(thread("b"));
        manifest.add_thread(thread("c"));
        manifest.mark_collected("a");
        manifest.set_entries("a", vec![Entry::default()]);
        manifest.mark_failed("b", "fetch failed");

        let counts = manifest.counts_by_status();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.extracted, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.actionable(), 2);
        assert_eq!(counts.toward_goal(), 1);
    }

    #[test]
    fn test_complete_run_updates_last() {
        let mut manifest = sample_manifest();
        manifest.start_run("run-1");
        manifest.start_run("run-2");
        manifest.complete_run(RunStatus::Interrupted, 4);

        assert_eq!(manifest.runs[0].status, RunStatus::Running);
        assert_eq!(manifest.runs[1].status, RunStatus::Interrupted);
        assert_eq!(manifest.runs[1].threads_processed, 4);
        assert!(manifest.runs[1].completed_at.is_some());
    }
}
