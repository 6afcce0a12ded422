use std::path::Path;

/// Strips path separators and control characters so a transport-provided
/// name is safe to join onto a local directory.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = cleaned.trim_matches(|c| c == '.' || c == ' ').to_string();
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed
    }
}

/// Bytes → MB, rounded to 2 decimals (1 MB = 1 048 576 bytes).
pub fn size_mb(bytes: i64) -> f64 {
    let mb = bytes as f64 / 1_048_576.0;
    (mb * 100.0).round() / 100.0
}

/// Lowercased extension without the dot, or the no-extension sentinel.
pub fn extension_of(filename: Option<&str>) -> String {
    filename
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_else(|| crate::models::NO_EXTENSION.to_string())
}

/// Splits text into parts of at most `limit` characters, preferring to break
/// at line boundaries.
pub fn split_text(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > limit && current_len > 0 {
            parts.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if line_len > limit {
            // A single oversized line is chunked hard.
            let mut chunk = String::new();
            let mut chunk_len = 0usize;
            for c in line.chars() {
                if chunk_len == limit {
                    parts.push(std::mem::take(&mut chunk));
                    chunk_len = 0;
                }
                chunk.push(c);
                chunk_len += 1;
            }
            if chunk_len > 0 {
                current = chunk;
                current_len = chunk_len;
            }
        } else {
            current.push_str(line);
            current_len += line_len;
        }
    }

    if current_len > 0 {
        parts.push(current);
    }
    parts
}

/// Drops stale files from the transient media directory. Pipelines remove
/// their own downloads; this sweeps whatever a crash left behind.
pub async fn clear_temp_dir(dir: &Path) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            let _ = tokio::fs::remove_file(entry.path()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_separators_and_control_chars() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_filename("re:port|v1?.pdf"), "re_port_v1_.pdf");
        assert_eq!(sanitize_filename(""), "file");
        assert_eq!(sanitize_filename("..."), "file");
    }

    #[test]
    fn size_mb_rounds_to_two_decimals() {
        assert_eq!(size_mb(1_048_576), 1.0);
        assert_eq!(size_mb(52_428_800), 50.0);
        assert_eq!(size_mb(1_572_864), 1.5);
        assert_eq!(size_mb(123_456), 0.12);
    }

    #[test]
    fn extension_lowercases_and_falls_back_to_sentinel() {
        assert_eq!(extension_of(Some("video.MP4")), "mp4");
        assert_eq!(extension_of(Some("archive.tar.GZ")), "gz");
        assert_eq!(extension_of(Some("README")), "no-extension");
        assert_eq!(extension_of(None), "no-extension");
    }

    #[test]
    fn split_text_keeps_short_text_whole() {
        assert_eq!(split_text("hello", 100), vec!["hello"]);
    }

    #[test]
    fn split_text_prefers_line_boundaries() {
        let text = "aaaa\nbbbb\ncccc";
        let parts = split_text(text, 10);
        assert_eq!(parts, vec!["aaaa\nbbbb\n", "cccc"]);
    }

    #[test]
    fn split_text_chunks_single_long_line() {
        let text = "x".repeat(25);
        let parts = split_text(&text, 10);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.chars().count() <= 10));
        assert_eq!(parts.concat(), text);
    }
}
