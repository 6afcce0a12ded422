use regex::Regex;
use tracing::warn;

use crate::models::{ForwardMode, Keyword, Rule};

fn matches(keyword: &Keyword, text: &str) -> bool {
    if keyword.is_regex {
        match Regex::new(&keyword.text) {
            Ok(re) => re.is_match(text),
            Err(e) => {
                // One broken pattern never fails the whole evaluation.
                warn!(pattern = %keyword.text, error = %e, "skipping invalid keyword regex");
                false
            }
        }
    } else {
        text.to_lowercase().contains(&keyword.text.to_lowercase())
    }
}

fn match_any(list: &[&Keyword], text: &str) -> bool {
    list.iter().any(|k| matches(k, text))
}

/// The four-way forward decision over whitelist and blacklist matches.
/// An empty whitelist under a mode that requires a whitelist match counts
/// as no match.
pub fn should_forward(rule: &Rule, keywords: &[Keyword], check_text: &str) -> bool {
    let whitelist: Vec<&Keyword> = keywords.iter().filter(|k| !k.is_blacklist).collect();
    let blacklist: Vec<&Keyword> = keywords.iter().filter(|k| k.is_blacklist).collect();

    let white_hit = match_any(&whitelist, check_text);
    let black_hit = match_any(&blacklist, check_text);

    match rule.forward_mode {
        ForwardMode::Whitelist => white_hit && (!rule.reverse_blacklist || black_hit),
        ForwardMode::Blacklist => !black_hit && (!rule.reverse_whitelist || !white_hit),
        ForwardMode::WhitelistThenBlacklist => {
            white_hit
                && if rule.reverse_blacklist {
                    black_hit
                } else {
                    !black_hit
                }
        }
        ForwardMode::BlacklistThenWhitelist => {
            !black_hit
                && if rule.reverse_whitelist {
                    !white_hit
                } else {
                    white_hit
                }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{
        AddMode, ExtensionFilterMode, HandleMode, MessageMode, PreviewMode, Rule,
    };

    pub(crate) fn test_rule() -> Rule {
        Rule {
            id: 1,
            source_chat_id: 1,
            target_chat_id: 2,
            enabled: true,
            use_bot_account: true,
            handle_mode: HandleMode::Forward,
            only_rss: false,
            add_mode: AddMode::Whitelist,
            forward_mode: ForwardMode::Blacklist,
            reverse_blacklist: false,
            reverse_whitelist: false,
            is_filter_user_info: false,
            is_keyword_after_ai: false,
            replace_enabled: false,
            message_mode: MessageMode::Markdown,
            preview_mode: PreviewMode::Off,
            include_original_link: false,
            original_link_template: None,
            include_sender: false,
            userinfo_template: None,
            include_time: false,
            time_template: None,
            delete_original: false,
            delay_enabled: false,
            delay_seconds: 0,
            media_type_filter_enabled: false,
            media_size_filter_enabled: false,
            max_media_size_mb: 10.0,
            notify_on_oversize: false,
            extension_filter_enabled: false,
            extension_filter_mode: ExtensionFilterMode::Blacklist,
            media_allow_text: true,
            ai_enabled: false,
            ai_model: None,
            ai_prompt: None,
            ai_upload_image: false,
            summary_enabled: false,
            summary_time: "07:00".to_string(),
            summary_prompt: None,
            pin_summary: false,
            comment_button_enabled: false,
            sync_enabled: false,
            push_enabled: false,
            only_push: false,
        }
    }

    fn keyword(text: &str, is_regex: bool, is_blacklist: bool) -> Keyword {
        Keyword {
            id: 0,
            rule_id: 1,
            text: text.to_string(),
            is_regex,
            is_blacklist,
        }
    }

    fn rule_with(mode: ForwardMode, reverse_blacklist: bool, reverse_whitelist: bool) -> Rule {
        Rule {
            forward_mode: mode,
            reverse_blacklist,
            reverse_whitelist,
            ..test_rule()
        }
    }

    #[test]
    fn whitelist_match_forwards() {
        // Scenario: whitelist=["alpha"], text "Alpha release today".
        let rule = rule_with(ForwardMode::Whitelist, false, false);
        let keywords = vec![keyword("alpha", false, false)];
        assert!(should_forward(&rule, &keywords, "Alpha release today"));
        assert!(!should_forward(&rule, &keywords, "beta only"));
    }

    #[test]
    fn whitelist_with_reverse_blacklist_requires_both_hits() {
        let rule = rule_with(ForwardMode::Whitelist, true, false);
        let keywords = vec![keyword("alpha", false, false), keyword("draft", false, true)];
        assert!(!should_forward(&rule, &keywords, "Alpha release"));
        assert!(should_forward(&rule, &keywords, "Alpha draft release"));
    }

    #[test]
    fn blacklist_blocks_on_hit() {
        let rule = rule_with(ForwardMode::Blacklist, false, false);
        let keywords = vec![keyword("spam", false, true)];
        assert!(should_forward(&rule, &keywords, "regular message"));
        assert!(!should_forward(&rule, &keywords, "SPAM inside"));
    }

    #[test]
    fn blacklist_with_reverse_whitelist_also_blocks_whitelist_hits() {
        let rule = rule_with(ForwardMode::Blacklist, false, true);
        let keywords = vec![keyword("ok", false, false), keyword("bad", false, true)];
        assert!(should_forward(&rule, &keywords, "plain"));
        assert!(!should_forward(&rule, &keywords, "ok though"));
        assert!(!should_forward(&rule, &keywords, "bad one"));
    }

    #[test]
    fn whitelist_then_blacklist_filters_in_order() {
        let rule = rule_with(ForwardMode::WhitelistThenBlacklist, false, false);
        let keywords = vec![keyword("news", false, false), keyword("ad", false, true)];
        assert!(should_forward(&rule, &keywords, "news today"));
        assert!(!should_forward(&rule, &keywords, "news with ad"));
        assert!(!should_forward(&rule, &keywords, "nothing relevant"));

        let reversed = rule_with(ForwardMode::WhitelistThenBlacklist, true, false);
        assert!(should_forward(&reversed, &keywords, "news with ad"));
        assert!(!should_forward(&reversed, &keywords, "news today"));
    }

    #[test]
    fn blacklist_then_whitelist_filters_in_order() {
        let rule = rule_with(ForwardMode::BlacklistThenWhitelist, false, false);
        let keywords = vec![keyword("news", false, false), keyword("ad", false, true)];
        assert!(should_forward(&rule, &keywords, "news today"));
        assert!(!should_forward(&rule, &keywords, "ad news"));
        assert!(!should_forward(&rule, &keywords, "unrelated"));

        let reversed = rule_with(ForwardMode::BlacklistThenWhitelist, false, true);
        assert!(should_forward(&reversed, &keywords, "unrelated"));
        assert!(!should_forward(&reversed, &keywords, "news today"));
    }

    #[test]
    fn empty_whitelist_counts_as_no_match() {
        let rule = rule_with(ForwardMode::Whitelist, false, false);
        assert!(!should_forward(&rule, &[], "anything"));

        let rule = rule_with(ForwardMode::BlacklistThenWhitelist, false, false);
        assert!(!should_forward(&rule, &[], "anything"));
    }

    #[test]
    fn regex_keywords_use_regex_search() {
        let rule = rule_with(ForwardMode::Whitelist, false, false);
        let keywords = vec![keyword(r"v\d+\.\d+", true, false)];
        assert!(should_forward(&rule, &keywords, "released v1.2 today"));
        assert!(!should_forward(&rule, &keywords, "released soon"));
    }

    #[test]
    fn invalid_regex_is_skipped_not_fatal() {
        let rule = rule_with(ForwardMode::Whitelist, false, false);
        let keywords = vec![keyword("[unclosed", true, false), keyword("ok", false, false)];
        assert!(should_forward(&rule, &keywords, "ok text"));
        assert!(!should_forward(&rule, &keywords, "other text"));
    }

    #[test]
    fn substring_match_is_case_insensitive() {
        let rule = rule_with(ForwardMode::Blacklist, false, false);
        let keywords = vec![keyword("Secret", false, true)];
        assert!(!should_forward(&rule, &keywords, "a SECRET plan"));
    }
}
