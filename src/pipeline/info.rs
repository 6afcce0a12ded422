use chrono_tz::Tz;

use crate::models::Rule;
use crate::telegram::TgMessage;

const DEFAULT_USERINFO_TEMPLATE: &str = "{name}:\n";
const DEFAULT_TIME_TEMPLATE: &str = "\n\n{time}";
const DEFAULT_ORIGINAL_LINK_TEMPLATE: &str = "\n\n{original_link}";

/// Public t.me link for a message: username form for public chats, the
/// `/c/<internal>` form for private channels.
pub fn message_link(message: &TgMessage) -> String {
    if let Some(username) = &message.chat_username {
        return format!("https://t.me/{username}/{}", message.id);
    }
    let internal = {
        let abs = message.chat_id.abs().to_string();
        abs.strip_prefix("100").map(|s| s.to_string()).unwrap_or(abs)
    };
    format!("https://t.me/c/{internal}/{}", message.id)
}

/// Substitutes the supported placeholders into a template.
fn render(template: &str, name: &str, id: i64, time: &str, original_link: &str) -> String {
    template
        .replace("{name}", name)
        .replace("{id}", &id.to_string())
        .replace("{time}", time)
        .replace("{original_link}", original_link)
}

/// Composes the three decoration strings. Each is empty when its include
/// flag is off.
pub fn compose(rule: &Rule, message: &TgMessage, tz: Tz) -> (String, String, String) {
    let (sender_name, sender_id) = message
        .sender
        .as_ref()
        .map(|s| (s.name.clone(), s.id))
        .unwrap_or_default();
    let time = message
        .date
        .with_timezone(&tz)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();
    let link = message_link(message);

    let sender_info = if rule.include_sender {
        let template = rule
            .userinfo_template
            .as_deref()
            .unwrap_or(DEFAULT_USERINFO_TEMPLATE);
        render(template, &sender_name, sender_id, &time, &link)
    } else {
        String::new()
    };

    let time_info = if rule.include_time {
        let template = rule.time_template.as_deref().unwrap_or(DEFAULT_TIME_TEMPLATE);
        render(template, &sender_name, sender_id, &time, &link)
    } else {
        String::new()
    };

    let original_link = if rule.include_original_link {
        let template = rule
            .original_link_template
            .as_deref()
            .unwrap_or(DEFAULT_ORIGINAL_LINK_TEMPLATE);
        render(template, &sender_name, sender_id, &time, &link)
    } else {
        String::new()
    };

    (sender_info, time_info, original_link)
}

/// Display string prepended to `check_text` when `is_filter_user_info` is
/// set: the keyword filter then sees the sender as well.
pub fn sender_check_prefix(message: &TgMessage) -> String {
    message
        .sender
        .as_ref()
        .map(|s| format!("{} {}: ", s.name, s.id))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::keyword::tests::test_rule;
    use crate::telegram::TgSender;
    use chrono::TimeZone;
    use chrono_tz::Tz;

    fn message() -> TgMessage {
        TgMessage {
            id: 42,
            chat_id: -1001234567890,
            grouped_id: None,
            date: chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            text: "body".to_string(),
            media: None,
            sender: Some(TgSender {
                id: 777,
                name: "Ada".to_string(),
            }),
            buttons: Vec::new(),
            chat_username: None,
            is_channel_post: true,
        }
    }

    #[test]
    fn private_channel_links_use_internal_id() {
        assert_eq!(
            message_link(&message()),
            "https://t.me/c/1234567890/42"
        );
    }

    #[test]
    fn public_chat_links_use_username() {
        let mut msg = message();
        msg.chat_username = Some("somechannel".to_string());
        assert_eq!(message_link(&msg), "https://t.me/somechannel/42");
    }

    #[test]
    fn include_flags_gate_each_decoration() {
        let tz: Tz = "Asia/Shanghai".parse().unwrap();
        let rule = test_rule();
        let (sender, time, link) = compose(&rule, &message(), tz);
        assert!(sender.is_empty() && time.is_empty() && link.is_empty());

        let rule = crate::models::Rule {
            include_sender: true,
            include_time: true,
            include_original_link: true,
            ..test_rule()
        };
        let (sender, time, link) = compose(&rule, &message(), tz);
        assert_eq!(sender, "Ada:\n");
        // 12:00 UTC is 20:00 in Shanghai.
        assert_eq!(time, "\n\n2024-05-01 20:00:00");
        assert_eq!(link, "\n\nhttps://t.me/c/1234567890/42");
    }

    #[test]
    fn custom_templates_support_all_placeholders() {
        let tz: Tz = "UTC".parse().unwrap();
        let rule = crate::models::Rule {
            include_sender: true,
            userinfo_template: Some("[{name}|{id}] at {time} ({original_link}) ".to_string()),
            ..test_rule()
        };
        let (sender, _, _) = compose(&rule, &message(), tz);
        assert_eq!(
            sender,
            "[Ada|777] at 2024-05-01 12:00:00 (https://t.me/c/1234567890/42) "
        );
    }
}
