use crate::models::{ExtensionFilterMode, MediaTypeFlags, Rule};
use crate::telegram::{MediaKind, TgMedia};
use crate::utils::{extension_of, size_mb};

/// Per-item outcome of the media filters.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaVerdict {
    /// Passed every filter; download and forward.
    Pass,
    /// Blocked by the media-type filter.
    RejectedType,
    /// Blocked by the extension filter.
    RejectedExtension,
    /// Above the size cap; recorded as skipped when notification is on,
    /// otherwise rejects the message.
    Oversize { filename: String, size_mb: f64 },
}

fn type_blocked(flags: &MediaTypeFlags, kind: MediaKind) -> bool {
    match kind {
        MediaKind::Photo => flags.photo,
        MediaKind::Document => flags.document,
        MediaKind::Video => flags.video,
        MediaKind::Audio => flags.audio,
        MediaKind::Voice => flags.voice,
    }
}

pub fn display_name(media: &TgMedia) -> String {
    media.filename.clone().unwrap_or_else(|| {
        match media.kind {
            MediaKind::Photo => "photo",
            MediaKind::Document => "document",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Voice => "voice",
        }
        .to_string()
    })
}

/// Applies the rule's media filters to one item. Link previews never get
/// here; the stage treats them as text.
pub fn evaluate(
    rule: &Rule,
    flags: &MediaTypeFlags,
    extensions: &[String],
    media: &TgMedia,
) -> MediaVerdict {
    if rule.media_type_filter_enabled && type_blocked(flags, media.kind) {
        return MediaVerdict::RejectedType;
    }

    if rule.extension_filter_enabled {
        let ext = extension_of(media.filename.as_deref());
        let listed = extensions.iter().any(|e| e == &ext);
        let rejected = match rule.extension_filter_mode {
            ExtensionFilterMode::Blacklist => listed,
            ExtensionFilterMode::Whitelist => !listed,
        };
        if rejected {
            return MediaVerdict::RejectedExtension;
        }
    }

    if rule.media_size_filter_enabled {
        let mb = size_mb(media.size_bytes);
        if mb > rule.max_media_size_mb {
            return MediaVerdict::Oversize {
                filename: display_name(media),
                size_mb: mb,
            };
        }
    }

    MediaVerdict::Pass
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::keyword::tests::test_rule;

    fn media(kind: MediaKind, size_bytes: i64, filename: Option<&str>) -> TgMedia {
        TgMedia {
            kind,
            size_bytes,
            filename: filename.map(|s| s.to_string()),
            mime_type: None,
            file_id: None,
            is_link_preview: false,
        }
    }

    #[test]
    fn type_filter_blocks_flagged_kinds() {
        let rule = Rule {
            media_type_filter_enabled: true,
            ..test_rule()
        };
        let flags = MediaTypeFlags {
            rule_id: 1,
            video: true,
            ..Default::default()
        };

        let verdict = evaluate(&rule, &flags, &[], &media(MediaKind::Video, 100, None));
        assert_eq!(verdict, MediaVerdict::RejectedType);

        let verdict = evaluate(&rule, &flags, &[], &media(MediaKind::Photo, 100, None));
        assert_eq!(verdict, MediaVerdict::Pass);
    }

    #[test]
    fn extension_blacklist_rejects_listed() {
        let rule = Rule {
            extension_filter_enabled: true,
            extension_filter_mode: ExtensionFilterMode::Blacklist,
            ..test_rule()
        };
        let extensions = vec!["exe".to_string()];
        let flags = MediaTypeFlags::default();

        let verdict = evaluate(
            &rule,
            &flags,
            &extensions,
            &media(MediaKind::Document, 10, Some("setup.EXE")),
        );
        assert_eq!(verdict, MediaVerdict::RejectedExtension);

        let verdict = evaluate(
            &rule,
            &flags,
            &extensions,
            &media(MediaKind::Document, 10, Some("notes.pdf")),
        );
        assert_eq!(verdict, MediaVerdict::Pass);
    }

    #[test]
    fn extension_whitelist_rejects_unlisted() {
        let rule = Rule {
            extension_filter_enabled: true,
            extension_filter_mode: ExtensionFilterMode::Whitelist,
            ..test_rule()
        };
        let extensions = vec!["pdf".to_string()];
        let flags = MediaTypeFlags::default();

        let verdict = evaluate(
            &rule,
            &flags,
            &extensions,
            &media(MediaKind::Document, 10, Some("report.pdf")),
        );
        assert_eq!(verdict, MediaVerdict::Pass);

        let verdict = evaluate(
            &rule,
            &flags,
            &extensions,
            &media(MediaKind::Document, 10, Some("report.docx")),
        );
        assert_eq!(verdict, MediaVerdict::RejectedExtension);
    }

    #[test]
    fn no_extension_sentinel_matches_bare_files() {
        let rule = Rule {
            extension_filter_enabled: true,
            extension_filter_mode: ExtensionFilterMode::Blacklist,
            ..test_rule()
        };
        let extensions = vec!["no-extension".to_string()];
        let flags = MediaTypeFlags::default();

        let verdict = evaluate(
            &rule,
            &flags,
            &extensions,
            &media(MediaKind::Document, 10, Some("Makefile")),
        );
        assert_eq!(verdict, MediaVerdict::RejectedExtension);
    }

    #[test]
    fn oversize_reports_rounded_megabytes() {
        let rule = Rule {
            media_size_filter_enabled: true,
            max_media_size_mb: 10.0,
            ..test_rule()
        };
        let flags = MediaTypeFlags::default();

        let verdict = evaluate(
            &rule,
            &flags,
            &[],
            &media(MediaKind::Video, 50 * 1024 * 1024, Some("clip.mp4")),
        );
        assert_eq!(
            verdict,
            MediaVerdict::Oversize {
                filename: "clip.mp4".to_string(),
                size_mb: 50.0,
            }
        );
    }

    #[test]
    fn within_cap_passes() {
        let rule = Rule {
            media_size_filter_enabled: true,
            max_media_size_mb: 10.0,
            ..test_rule()
        };
        let flags = MediaTypeFlags::default();
        let verdict = evaluate(
            &rule,
            &flags,
            &[],
            &media(MediaKind::Photo, 5 * 1024 * 1024, None),
        );
        assert_eq!(verdict, MediaVerdict::Pass);
    }
}
