//! Per-search term matching against raw post payloads.
//!
//! A connection's combined predicate is the union of its member searches'
//! terms, so every delivered item must be re-matched locally to find which
//! member searches it belongs to.

use driftnet_common::{FilterTerm, StreamItem, TermKind};

/// Whether any term in the group matches the item.
pub fn matches_any(terms: &[FilterTerm], item: &StreamItem) -> bool {
    terms.iter().any(|term| term_matches(term, item))
}

pub fn term_matches(term: &FilterTerm, item: &StreamItem) -> bool {
    let payload = &item.payload;
    let text = post_text(payload).unwrap_or_default().to_lowercase();
    let value = term.value.to_lowercase();

    match term.kind {
        TermKind::Keyword => text.contains(&value),
        TermKind::Hashtag => {
            hashtags(payload).any(|tag| tag.eq_ignore_ascii_case(&term.value))
                || text.contains(&format!("#{value}"))
        }
        TermKind::User => {
            author(payload)
                .map(|name| name.eq_ignore_ascii_case(&term.value))
                .unwrap_or(false)
                || mentions(payload).any(|name| name.eq_ignore_ascii_case(&term.value))
                || text.contains(&format!("@{value}"))
        }
    }
}

/// Extended posts carry the full text in a nested field.
fn post_text(payload: &serde_json::Value) -> Option<&str> {
    payload
        .pointer("/extended_tweet/full_text")
        .or_else(|| payload.get("full_text"))
        .or_else(|| payload.get("text"))
        .and_then(|v| v.as_str())
}

fn author(payload: &serde_json::Value) -> Option<&str> {
    payload.pointer("/user/screen_name").and_then(|v| v.as_str())
}

fn hashtags(payload: &serde_json::Value) -> impl Iterator<Item = &str> {
    payload
        .pointer("/entities/hashtags")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .filter_map(|h| h.get("text").and_then(|v| v.as_str()))
}

fn mentions(payload: &serde_json::Value) -> impl Iterator<Item = &str> {
    payload
        .pointer("/entities/user_mentions")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .filter_map(|m| m.get("screen_name").and_then(|v| v.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn item(payload: serde_json::Value) -> StreamItem {
        StreamItem {
            upstream_id: "1".to_string(),
            payload,
            received_at: Utc::now(),
        }
    }

    #[test]
    fn keyword_matches_case_insensitively() {
        let post = item(json!({"text": "Obama speaks tonight"}));
        assert!(term_matches(&FilterTerm::keyword("obama"), &post));
        assert!(!term_matches(&FilterTerm::keyword("biden"), &post));
    }

    #[test]
    fn hashtag_matches_entities_and_text() {
        let with_entities = item(json!({
            "text": "election night",
            "entities": {"hashtags": [{"text": "Election2020"}]}
        }));
        assert!(term_matches(&FilterTerm::hashtag("election2020"), &with_entities));

        let text_only = item(json!({"text": "watching #debate live"}));
        assert!(term_matches(&FilterTerm::hashtag("debate"), &text_only));
    }

    #[test]
    fn user_matches_author_and_mentions() {
        let post = item(json!({
            "text": "quoting @SomeBody here",
            "user": {"screen_name": "potus"},
            "entities": {"user_mentions": [{"screen_name": "SomeBody"}]}
        }));
        assert!(term_matches(&FilterTerm::user("POTUS"), &post));
        assert!(term_matches(&FilterTerm::user("somebody"), &post));
        assert!(!term_matches(&FilterTerm::user("nobody"), &post));
    }

    #[test]
    fn extended_text_is_preferred() {
        let post = item(json!({
            "text": "truncated…",
            "extended_tweet": {"full_text": "the full obama text"}
        }));
        assert!(matches_any(&[FilterTerm::keyword("obama")], &post));
    }
}
