//! JSON extraction from model output.
//!
//! Models wrap JSON in markdown fences, preface it with prose, or append
//! commentary; these helpers dig the payload out before parsing.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;

/// Remove markdown code-fence lines (```json … ```) so the JSON inside can
/// be parsed cleanly.
pub fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extract and parse the first top-level JSON object in a model response.
pub fn parse_object<T: DeserializeOwned>(response: &str) -> Result<T> {
    let cleaned = strip_code_fences(response);
    let start = cleaned.find('{');
    let end = cleaned.rfind('}');
    let (Some(start), Some(end)) = (start, end) else {
        bail!("no JSON object found in response");
    };
    if end < start {
        bail!("no JSON object found in response");
    }
    serde_json::from_str(&cleaned[start..=end]).context("parsing JSON from response")
}

/// Extract and parse a top-level JSON array in a model response. Returns
/// `None` when the response contains no array at all, a valid outcome for
/// agents that report nothing to flag.
pub fn parse_array<T: DeserializeOwned>(response: &str) -> Result<Option<Vec<T>>> {
    let cleaned = strip_code_fences(response);
    let start = cleaned.find('[');
    let end = cleaned.rfind(']');
    let (Some(start), Some(end)) = (start, end) else {
        return Ok(None);
    };
    if end < start {
        return Ok(None);
    }
    let parsed =
        serde_json::from_str(&cleaned[start..=end]).context("parsing JSON array from response")?;
    Ok(Some(parsed))
}
