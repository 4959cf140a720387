//! Message body sanitization: HTML tags are stripped and their text kept,
//! `script` and `style` elements lose their contents too, and bare `http(s)`
//! URLs become anchors carrying only `href`, `title` and `target`. Any stray
//! `<` or `>` left over is escaped.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

fn url_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"https?://[^\s<>"']+"#).ok())
        .as_ref()
}

fn raw_text_element_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").ok())
        .as_ref()
}

fn tag_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?s)<!--.*?-->|</?[A-Za-z][^<>]*>").ok())
        .as_ref()
}

/// Remove markup, keeping the text between tags.
fn strip_tags(raw: &str) -> Cow<'_, str> {
    let (Some(elements), Some(tags)) = (raw_text_element_pattern(), tag_pattern()) else {
        return Cow::Borrowed(raw);
    };
    match elements.replace_all(raw, "") {
        Cow::Borrowed(text) => tags.replace_all(text, ""),
        Cow::Owned(text) => Cow::Owned(tags.replace_all(&text, "").into_owned()),
    }
}

fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
}

/// Trailing punctuation belongs to the sentence, not the link.
fn split_trailing(url: &str) -> (&str, &str) {
    let trimmed = url.trim_end_matches(&['.', ',', ';', ':', '!', '?', ')'][..]);
    url.split_at(trimmed.len())
}

pub fn sanitize_body(raw: &str) -> String {
    let stripped = strip_tags(raw);
    let raw = stripped.trim();
    let mut out = String::with_capacity(raw.len());
    let Some(pattern) = url_pattern() else {
        escape_into(&mut out, raw);
        return out;
    };

    let mut rest = 0;
    for found in pattern.find_iter(raw) {
        let (url, tail) = split_trailing(found.as_str());
        escape_into(&mut out, &raw[rest..found.start()]);
        if url.len() > "https://".len() {
            let mut escaped = String::new();
            escape_into(&mut escaped, url);
            out.push_str(&format!(
                r#"<a href="{escaped}" title="{escaped}" target="_blank">{escaped}</a>"#
            ));
        } else {
            escape_into(&mut out, url);
        }
        escape_into(&mut out, tail);
        rest = found.end();
    }
    escape_into(&mut out, &raw[rest..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_stripped_and_text_kept() {
        assert_eq!(sanitize_body("<b>hi</b> <i>there</i>"), "hi there");
        assert_eq!(sanitize_body(r#"<a href="javascript:x()" onclick="y()">click</a>"#), "click");
        assert_eq!(sanitize_body("a<!-- note -->b"), "ab");
    }

    #[test]
    fn script_and_style_contents_are_dropped() {
        assert_eq!(sanitize_body("<script>alert('x')</script>ok"), "ok");
        assert_eq!(sanitize_body("<STYLE type=\"text/css\">p { color: red }</STYLE>ok"), "ok");
    }

    #[test]
    fn stray_brackets_are_escaped() {
        assert_eq!(sanitize_body("1 < 2 && 3 > 2"), "1 &lt; 2 &amp;&amp; 3 &gt; 2");
    }

    #[test]
    fn bare_urls_are_linked() {
        assert_eq!(
            sanitize_body("see https://example.com/a?b=1&c=2."),
            "see <a href=\"https://example.com/a?b=1&amp;c=2\" title=\"https://example.com/a?b=1&amp;c=2\" target=\"_blank\">https://example.com/a?b=1&amp;c=2</a>."
        );
    }

    #[test]
    fn injected_attributes_do_not_survive() {
        let out = sanitize_body(r#"http://x.io" onclick="evil()"#);
        assert!(out.starts_with(r#"<a href="http://x.io" title="http://x.io" target="_blank">"#));
        assert!(!out.contains(r#"onclick=""#));
    }

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(sanitize_body("hello there"), "hello there");
    }
}
