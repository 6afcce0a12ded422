use base64::Engine;
use chrono::DateTime;

use crate::models::RssConfig;

use super::store::{Entry, EntryMedia, RssStore};

/// Images below this size are embedded inline as data URIs.
const INLINE_IMAGE_LIMIT: u64 = 1024 * 1024;

pub fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn rfc2822(published: &str) -> String {
    DateTime::parse_from_rfc3339(published)
        .map(|dt| dt.to_rfc2822())
        .unwrap_or_else(|_| published.to_string())
}

/// MIME by extension; the transport rarely supplies a trustworthy type.
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "ogg" | "oga" => "audio/ogg",
        "opus" => "audio/opus",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "json" => "application/json",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        _ => "application/octet-stream",
    }
}

fn is_image(media: &EntryMedia) -> bool {
    media.mime_type.starts_with("image/")
}

/// HTML body for one item: the text plus its images, inlined as base64 when
/// small enough to embed, referenced by URL otherwise.
fn content_html(store: &RssStore, media_base_url: &str, entry: &Entry) -> String {
    let mut html = String::new();
    if !entry.content.is_empty() {
        html.push_str("<p>");
        html.push_str(&xml_escape(&entry.content).replace('\n', "<br/>"));
        html.push_str("</p>");
    }

    for media in &entry.media {
        if !is_image(media) {
            continue;
        }
        let absolute = format!("{media_base_url}{}", media.url);
        let path = store.media_path(entry.rule_id, &media.filename);

        let inlined = std::fs::metadata(&path)
            .ok()
            .filter(|meta| meta.len() < INLINE_IMAGE_LIMIT)
            .and_then(|_| std::fs::read(&path).ok())
            .map(|bytes| {
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                format!(
                    "<img src=\"data:{};base64,{}\"/>",
                    media.mime_type, encoded
                )
            });

        match inlined {
            Some(img) => html.push_str(&img),
            None => html.push_str(&format!("<img src=\"{}\"/>", xml_escape(&absolute))),
        }
    }
    html
}

/// Renders a rule's entries as an RSS 2.0 document, newest first.
pub fn render_feed(
    store: &RssStore,
    config: &RssConfig,
    base_url: &str,
    media_base_url: &str,
    mut entries: Vec<Entry>,
) -> String {
    entries.sort_by(|a, b| b.published.cmp(&a.published));

    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(
        "<rss version=\"2.0\" xmlns:content=\"http://purl.org/rss/1.0/modules/content/\">\n",
    );
    xml.push_str("<channel>\n");
    xml.push_str(&format!("<title>{}</title>\n", xml_escape(&config.title)));
    xml.push_str(&format!(
        "<link>{}/rss/feed/{}</link>\n",
        xml_escape(base_url),
        config.rule_id
    ));
    xml.push_str(&format!(
        "<description>{}</description>\n",
        xml_escape(&config.description)
    ));
    xml.push_str(&format!(
        "<language>{}</language>\n",
        xml_escape(&config.language)
    ));

    for entry in &entries {
        xml.push_str("<item>\n");
        xml.push_str(&format!("<title>{}</title>\n", xml_escape(&entry.title)));
        xml.push_str(&format!("<link>{}</link>\n", xml_escape(&entry.link)));
        xml.push_str(&format!(
            "<pubDate>{}</pubDate>\n",
            xml_escape(&rfc2822(&entry.published))
        ));
        xml.push_str(&format!("<author>{}</author>\n", xml_escape(&entry.author)));
        xml.push_str(&format!(
            "<guid isPermaLink=\"false\">{}</guid>\n",
            xml_escape(&entry.id)
        ));

        let html = content_html(store, media_base_url, entry);
        xml.push_str(&format!(
            "<content:encoded><![CDATA[{html}]]></content:encoded>\n"
        ));

        for media in &entry.media {
            let absolute = format!("{media_base_url}{}", media.url);
            xml.push_str(&format!(
                "<enclosure url=\"{}\" length=\"{}\" type=\"{}\"/>\n",
                xml_escape(&absolute),
                media.size,
                xml_escape(&media.mime_type)
            ));
        }

        xml.push_str("</item>\n");
    }

    xml.push_str("</channel>\n</rss>\n");
    xml
}
