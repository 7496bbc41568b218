//! CK-002: Response sanitizer — strip conversational wrapping from model output.
//!
//! Boundary trimming only, never parsing. Leading/trailing code fences are
//! peeled until none remain, then the text is sliced from the first `{` to
//! the last `}`. A missing brace pair leaves the text as-is; the caller's
//! structured parse reports the failure.

const FENCE: &str = "```";

/// Language tags that may sit alone on the line after a bare fence.
const LANG_TAGS: &[&str] = &["json", "jsonc", "json5", "javascript", "js", "text", "txt"];

/// Strip code fences and surrounding prose from a model reply.
pub fn sanitize(raw: &str) -> String {
    let mut text = raw.trim();

    loop {
        if let Some(rest) = text.strip_prefix(FENCE) {
            text = drop_fence_header(rest).trim();
            continue;
        }
        if let Some(rest) = text.strip_suffix(FENCE) {
            text = rest.trim();
            continue;
        }
        break;
    }

    match (text.find('{'), text.rfind('}')) {
        (Some(open), Some(close)) if open < close => text[open..=close].to_string(),
        _ => text.to_string(),
    }
}

/// Drop what follows an opening fence marker on its line (a language tag),
/// plus a lone language-tag line after a bare fence.
fn drop_fence_header(after_marker: &str) -> &str {
    let (first_line, remainder) = match after_marker.find('\n') {
        Some(nl) => (&after_marker[..nl], &after_marker[nl + 1..]),
        None => (after_marker, ""),
    };

    let tag = first_line.trim();
    if tag.is_empty() {
        return strip_tag_line(remainder);
    }
    if is_lang_tag(tag) {
        return remainder;
    }
    // Single-line fence like ```{"a":1}``` — keep the payload.
    after_marker
}

fn strip_tag_line(text: &str) -> &str {
    let (line, rest) = match text.find('\n') {
        Some(nl) => (&text[..nl], &text[nl + 1..]),
        None => (text, ""),
    };
    if LANG_TAGS.contains(&line.trim().to_ascii_lowercase().as_str()) {
        rest
    } else {
        text
    }
}

fn is_lang_tag(tag: &str) -> bool {
    tag.len() <= 16
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '+' || c == '_')
}
