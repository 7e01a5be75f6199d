// EPUB text extraction

use super::{ExtractionError, TextExtractor};
use std::path::Path;

/// Reads the spine in reading order and converts each XHTML section to text.
pub struct EpubExtractor;

impl TextExtractor for EpubExtractor {
    fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let mut doc = epub::doc::EpubDoc::new(path).map_err(|e| ExtractionError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let spine = doc.spine.clone();
        let mut sections = Vec::new();

        for spine_item in spine.iter() {
            let Some((content_bytes, _mime)) = doc.get_resource(&spine_item.idref) else {
                log::warn!("Skipping unreadable section {}", spine_item.idref);
                continue;
            };

            let html = String::from_utf8_lossy(&content_bytes);
            let text = section_text(&html);
            if !text.is_empty() {
                sections.push(text);
            }
        }

        if sections.is_empty() {
            return Err(ExtractionError::Empty {
                path: path.to_path_buf(),
            });
        }

        Ok(sections.join("\n\n"))
    }

    fn name(&self) -> &'static str {
        "EPUB"
    }
}

/// Plain text of one section, its heading read first as a sentence.
fn section_text(html: &str) -> String {
    let body = html_to_text(html);
    if body.is_empty() {
        return body;
    }

    match extract_heading(html) {
        Some(title) if !body.starts_with(&title) => format!("{}. {}", title, body),
        _ => body,
    }
}

/// First h1 or h2 heading, tags stripped.
fn extract_heading(html: &str) -> Option<String> {
    let html_lower = html.to_ascii_lowercase();

    for tag in ["h1", "h2"] {
        let open = format!("<{}", tag);
        let close = format!("</{}>", tag);

        let Some(start) = html_lower.find(&open) else {
            continue;
        };
        let Some(tag_end) = html_lower[start..].find('>') else {
            continue;
        };
        let content_start = start + tag_end + 1;
        let Some(end) = html_lower[content_start..].find(&close) else {
            continue;
        };

        let title = strip_html_tags(&html[content_start..content_start + end]);
        let title = title.trim();
        if !title.is_empty() {
            return Some(title.to_string());
        }
    }

    None
}

fn strip_html_tags(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;

    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }

    result
}

fn html_to_text(html: &str) -> String {
    let text = html2text::from_read(html.as_bytes(), 1000);

    let joined = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    decode_entities(&joined)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&rsquo;", "'")
        .replace("&lsquo;", "'")
        .replace("&rdquo;", "\"")
        .replace("&ldquo;", "\"")
        .replace("&hellip;", "...")
        .replace("&amp;", "&")
}
