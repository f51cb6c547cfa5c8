//! Integration tests for the streaming extraction pipeline:
//! - End-to-end runs over mock collaborators
//! - Skip/fail/circuit-breaker paths
//! - Cancellation, resume, and crash-safe persistence

mod pipeline {
    mod common;
    mod test_pipeline;
    mod test_resume;
}
