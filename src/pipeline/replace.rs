use regex::Regex;

use crate::models::ReplaceRule;

/// Applies replace-rules in definition order. A `".*"` pattern swaps the
/// whole text for its replacement and terminates the chain; any other
/// pattern is a regex substitution. Broken patterns are skipped and
/// reported.
pub fn apply(rules: &[ReplaceRule], text: &str) -> (String, Vec<String>) {
    let mut out = text.to_string();
    let mut errors = Vec::new();

    for rule in rules {
        if rule.pattern == ".*" {
            out = rule.replacement.clone();
            break;
        }
        match Regex::new(&rule.pattern) {
            Ok(re) => {
                out = re.replace_all(&out, rule.replacement.as_str()).into_owned();
            }
            Err(e) => {
                errors.push(format!("replace pattern {:?}: {e}", rule.pattern));
            }
        }
    }

    (out, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str, replacement: &str) -> ReplaceRule {
        ReplaceRule {
            id: 0,
            rule_id: 1,
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
        }
    }

    #[test]
    fn regex_rules_substitute_in_order() {
        let rules = vec![rule("foo", "bar"), rule("bar", "baz")];
        let (out, errors) = apply(&rules, "say foo");
        assert_eq!(out, "say baz");
        assert!(errors.is_empty());
    }

    #[test]
    fn full_text_rule_replaces_everything_and_terminates() {
        // The ".*" rule wins even with later rules present.
        let rules = vec![rule("foo", "bar"), rule(".*", "REDACTED"), rule("RED", "X")];
        let (out, _) = apply(&rules, "hello foo world");
        assert_eq!(out, "REDACTED");
    }

    #[test]
    fn broken_pattern_is_skipped_and_reported() {
        let rules = vec![rule("[bad", "x"), rule("foo", "bar")];
        let (out, errors) = apply(&rules, "foo here");
        assert_eq!(out, "bar here");
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn capture_groups_are_available_in_replacements() {
        let rules = vec![rule(r"(\w+)@example\.com", "$1@redacted")];
        let (out, _) = apply(&rules, "mail bob@example.com now");
        assert_eq!(out, "mail bob@redacted now");
    }
}
