//! Session directory naming.

use chrono::Utc;

fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut last_dash = true;
    for ch in input.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_matches('-').to_string()
}

fn timestamp() -> String {
    Utc::now().format("%Y%m%d-%H%M%S").to_string()
}

/// Derive a session directory name from a search query: the first four
/// slug-safe words plus a timestamp suffix.
pub fn from_query(query: &str) -> String {
    if query.is_empty() {
        return format!("session-{}", timestamp());
    }
    let words: Vec<&str> = query.split_whitespace().take(4).collect();
    let slug = slugify(&words.join("-"));
    if slug.is_empty() {
        return format!("session-{}", timestamp());
    }
    format!("{}-{}", slug, timestamp())
}

/// Derive a session directory name from a title (first explicit subreddit or
/// form title).
pub fn from_title(title: &str) -> String {
    let slug = slugify(title);
    if slug.is_empty() {
        return format!("session-{}", timestamp());
    }
    format!("{}-{}", slug, timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_query_takes_four_words() {
        let slug = from_query("best family vacation spots in europe");
        assert!(slug.starts_with("best-family-vacation-spots-"));
    }

    #[test]
    fn test_from_query_strips_punctuation() {
        let slug = from_query("what's the best?");
        assert!(slug.starts_with("what-s-the-best-"));
    }

    #[test]
    fn test_empty_query_falls_back() {
        assert!(from_query("").starts_with("session-"));
        assert!(from_query("!!!").starts_with("session-"));
    }

    #[test]
    fn test_from_title() {
        assert!(from_title("TravelHacks").starts_with("travelhacks-"));
    }
}
