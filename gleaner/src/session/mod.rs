//! Session directory layout and persistent state.
//!
//! A session is a directory holding the manifest plus every derived artifact
//! for one run configuration:
//!
//! ```text
//! <output>/<slug-timestamp>/
//!   manifest.json             canonical session state (atomic writes)
//!   discovery_results.json    written by the thread discoverer each round
//!   thread_<postid>.json      canonical thread payload per kept thread
//!   eval_<postid>.json        evaluator verdict per evaluated thread
//!   extraction.log            concatenated streaming model output
//! ```

pub mod manifest;
pub mod slug;

use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const DISCOVERY_FILE: &str = "discovery_results.json";
pub const EXTRACTION_LOG_FILE: &str = "extraction.log";

pub fn manifest_path(session_dir: &Path) -> PathBuf {
    session_dir.join(MANIFEST_FILE)
}

pub fn discovery_path(session_dir: &Path) -> PathBuf {
    session_dir.join(DISCOVERY_FILE)
}

pub fn extraction_log_path(session_dir: &Path) -> PathBuf {
    session_dir.join(EXTRACTION_LOG_FILE)
}

/// Canonical thread payload for a kept thread.
pub fn thread_path(session_dir: &Path, post_id: &str) -> PathBuf {
    session_dir.join(format!("thread_{}.json", post_id))
}

/// Evaluator verdict file for an evaluated thread.
pub fn eval_path(session_dir: &Path, post_id: &str) -> PathBuf {
    session_dir.join(format!("eval_{}.json", post_id))
}
