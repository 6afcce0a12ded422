use chrono::{DateTime, Utc};

use crate::telegram::TgMessage;

/// Candidates fetched from the discussion group per lookup.
pub const SEARCH_WINDOW: usize = 5;
const SIMILARITY_THRESHOLD: f64 = 0.75;
const PREFIX_LEN: usize = 20;
const TIMESTAMP_SLACK_SECS: i64 = 60;

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            current[j + 1] = (prev[j + 1] + 1).min(current[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

/// Normalized similarity in `[0, 1]` over the first 20 characters.
pub fn prefix_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().take(PREFIX_LEN).collect();
    let b: Vec<char> = b.chars().take(PREFIX_LEN).collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / longest as f64
}

/// Locates the linked-group echo of a channel post: exact text match first,
/// then prefix similarity, then a timestamp within ±60 s, then the latest
/// candidate. Candidates arrive newest first.
pub fn find_echo<'a>(
    source_text: &str,
    source_date: DateTime<Utc>,
    candidates: &'a [TgMessage],
) -> Option<&'a TgMessage> {
    if candidates.is_empty() {
        return None;
    }

    if let Some(exact) = candidates
        .iter()
        .find(|m| !source_text.is_empty() && m.text == source_text)
    {
        return Some(exact);
    }

    if let Some(similar) = candidates.iter().find(|m| {
        !source_text.is_empty()
            && prefix_similarity(&m.text, source_text) >= SIMILARITY_THRESHOLD
    }) {
        return Some(similar);
    }

    if let Some(close) = candidates
        .iter()
        .find(|m| (m.date - source_date).num_seconds().abs() <= TIMESTAMP_SLACK_SECS)
    {
        return Some(close);
    }

    candidates.first()
}

/// The `?comment=` deep link attached as a button on the forwarded copy.
pub fn comment_link(channel_username: Option<&str>, channel_id: i64, group_message_id: i32) -> String {
    match channel_username {
        Some(username) => format!("https://t.me/{username}/1?comment={group_message_id}"),
        None => {
            let internal = {
                let abs = channel_id.abs().to_string();
                abs.strip_prefix("100").map(|s| s.to_string()).unwrap_or(abs)
            };
            format!("https://t.me/c/{internal}/1?comment={group_message_id}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candidate(id: i32, text: &str, offset_secs: i64) -> TgMessage {
        TgMessage {
            id,
            chat_id: -100999,
            grouped_id: None,
            date: chrono::Utc
                .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
                .unwrap()
                + chrono::Duration::seconds(offset_secs),
            text: text.to_string(),
            media: None,
            sender: None,
            buttons: Vec::new(),
            chat_username: None,
            is_channel_post: false,
        }
    }

    fn base_date() -> DateTime<Utc> {
        chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn identical_strings_have_similarity_one() {
        assert_eq!(prefix_similarity("hello world", "hello world"), 1.0);
    }

    #[test]
    fn similarity_only_considers_the_prefix() {
        let a = format!("same prefix here....{}", "x".repeat(100));
        let b = format!("same prefix here....{}", "y".repeat(100));
        assert_eq!(prefix_similarity(&a, &b), 1.0);
    }

    #[test]
    fn exact_match_wins_over_similarity() {
        let candidates = vec![
            candidate(1, "breaking news today!", 500),
            candidate(2, "the message text", 500),
        ];
        let found = find_echo("the message text", base_date(), &candidates).unwrap();
        assert_eq!(found.id, 2);
    }

    #[test]
    fn similar_prefix_matches_when_no_exact_hit() {
        let candidates = vec![
            candidate(1, "completely different", 500),
            candidate(2, "the message text with a longer tail", 500),
        ];
        let found = find_echo("the message text!!", base_date(), &candidates).unwrap();
        assert_eq!(found.id, 2);
    }

    #[test]
    fn timestamp_window_matches_when_text_does_not() {
        let candidates = vec![
            candidate(1, "unrelated a", 400),
            candidate(2, "unrelated b", 30),
        ];
        let found = find_echo("source text", base_date(), &candidates).unwrap();
        assert_eq!(found.id, 2);
    }

    #[test]
    fn latest_candidate_is_the_last_resort() {
        let candidates = vec![
            candidate(9, "unrelated a", 700),
            candidate(8, "unrelated b", 800),
        ];
        let found = find_echo("source text", base_date(), &candidates).unwrap();
        assert_eq!(found.id, 9);
        assert!(find_echo("x", base_date(), &[]).is_none());
    }

    #[test]
    fn comment_links_cover_public_and_private_channels() {
        assert_eq!(
            comment_link(Some("chan"), -1001234, 55),
            "https://t.me/chan/1?comment=55"
        );
        assert_eq!(
            comment_link(None, -1001234, 55),
            "https://t.me/c/1234/1?comment=55"
        );
    }
}
