//! Turns an upstream article page into an embeddable HTML fragment.
//!
//! The upstream hides its article body behind a handful of fixed tricks
//! (lazy-loaded images, `opacity: 0` and `visibility: hidden` until scripts
//! run). The rewrites target exactly those.
//!
//! Steps, in order:
//! 1. Parse the page with `scraper` and serialize the content container
//! 2. Rewrite `data-src=` to `src=`, strip hiding declarations
//! 3. Prepend [`STYLE_PRELUDE`]
//! 4. Minify: unquote simple attribute values, collapse whitespace
//!
//! The parser recovers from any input, so sanitizing never fails. Running the
//! sanitizer over its own output yields the same bytes.

use crate::errors::BackfillError;
use crate::utils::truncate_for_log;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, instrument};

/// Class selector of the node holding the article body.
pub const CONTENT_SELECTOR: &str = ".rich_media_content";

/// Fixed presentation rules prepended to every fragment.
pub const STYLE_PRELUDE: &str = "<style> .rich_media_content {overflow: hidden;color: #222;font-size: 17px;word-wrap: break-word;-webkit-hyphens: auto;-ms-hyphens: auto;hyphens: auto;text-align: justify;position: relative;z-index: 0;}.rich_media_content {font-size: 18px;}</style>";

const LAZY_SRC: &str = "data-src=";
static HIDDEN_OPACITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"opacity:\s*0\s*(?:!important\s*)?;").unwrap());
static HIDDEN_VISIBILITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"visibility:\s*hidden\s*(?:!important\s*)?;").unwrap());

/// Elements whose text content is kept byte-for-byte by the minifier.
const PRESERVE_TAGS: &[&str] = &["pre", "listing", "textarea", "script", "style"];
const RAW_TEXT_TAGS: &[&str] = &["textarea", "script", "style"];

/// The parser drops one newline directly after these start tags.
const LEADING_NEWLINE_TAGS: &[&str] = &["pre", "textarea", "listing"];

/// Whitespace next to these tags never renders.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "body", "caption", "center", "col",
    "colgroup", "dd", "details", "dialog", "dir", "div", "dl", "dt", "fieldset", "figcaption",
    "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "head", "header", "hgroup",
    "hr", "html", "li", "link", "listing", "main", "menu", "meta", "nav", "ol", "optgroup",
    "option", "p", "pre", "script", "section", "style", "summary", "table", "tbody", "td",
    "tfoot", "th", "thead", "title", "tr", "ul",
];

/// Extracts and cleans the article container.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    container: Selector,
}

impl Sanitizer {
    /// Build a sanitizer extracting the node matched by `selector`.
    ///
    /// # Errors
    ///
    /// [`BackfillError::Parse`] if `selector` is not valid CSS.
    pub fn new(selector: &str) -> Result<Self, BackfillError> {
        let container = Selector::parse(selector)
            .map_err(|e| BackfillError::Parse(format!("invalid selector {selector:?}: {e}")))?;
        Ok(Self { container })
    }

    /// Sanitize a raw page body into a stored fragment.
    ///
    /// A page without the content container, including a body with no markup
    /// at all, still yields a fragment made of the style prelude alone.
    #[instrument(level = "debug", skip_all, fields(bytes = raw.len()))]
    pub fn sanitize(&self, raw: &str) -> String {
        let document = Html::parse_document(raw);
        let extracted = document
            .select(&self.container)
            .next()
            .map(|el| el.html())
            .unwrap_or_default();
        if extracted.is_empty() {
            debug!(
                preview = %truncate_for_log(raw, 200),
                "Content container not found; emitting prelude only"
            );
        }

        let rewritten = rewrite(&extracted);
        let mut content = String::with_capacity(STYLE_PRELUDE.len() + rewritten.len());
        content.push_str(STYLE_PRELUDE);
        content.push_str(&rewritten);

        minify(&content)
    }
}

/// Undo lazy loading and script-gated hiding.
fn rewrite(html: &str) -> String {
    let html = html.replace(LAZY_SRC, "src=");
    let html = HIDDEN_OPACITY.replace_all(&html, "");
    HIDDEN_VISIBILITY.replace_all(&html, "").into_owned()
}

/// Minify serialized HTML.
///
/// Only ASCII whitespace is collapsible. A whitespace-only run touching a
/// [`BLOCK_TAGS`] element, a comment or either end of the input is dropped;
/// between inline neighbours it becomes one space. Other runs collapse to
/// one space. Text inside [`PRESERVE_TAGS`] is left alone.
pub fn minify(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    let mut preserving: Option<String> = None;
    // Name of the last tag emitted; empty at the start and after comments.
    let mut prev = String::new();

    while !rest.is_empty() {
        // Raw-text elements end only at their own closing tag.
        if let Some(close) = preserving
            .as_deref()
            .filter(|name| RAW_TEXT_TAGS.contains(name))
            .map(|name| format!("</{name}"))
        {
            let end = rest.to_ascii_lowercase().find(&close).unwrap_or(rest.len());
            out.push_str(&rest[..end]);
            rest = &rest[end..];
            if rest.is_empty() {
                break;
            }
        }

        let Some(lt) = rest.find('<') else {
            push_text(&mut out, rest, preserving.is_some(), true);
            break;
        };
        let next = &rest[lt..];
        let at_block = is_block(&prev) || is_block(&tag_name(next).0);
        push_text(&mut out, &rest[..lt], preserving.is_some(), at_block);
        rest = next;

        if rest.starts_with("<!--") {
            let end = rest.find("-->").map(|i| i + 3).unwrap_or(rest.len());
            out.push_str(&rest[..end]);
            rest = &rest[end..];
            prev.clear();
            continue;
        }

        let end = tag_end(rest);
        let tag = &rest[..end];
        rest = &rest[end..];

        let (name, closing) = tag_name(tag);
        out.push_str(&minify_tag(tag));
        if !closing && LEADING_NEWLINE_TAGS.contains(&name.as_str()) && rest.starts_with('\n') {
            out.push('\n');
        }

        let closes_preserved = matches!(&preserving, Some(open) if closing && *open == name);
        if closes_preserved {
            preserving = None;
        } else if preserving.is_none() && !closing && PRESERVE_TAGS.contains(&name.as_str()) {
            preserving = Some(name.clone());
        }
        prev = name;
    }
    out
}

/// Comments and doctypes yield an empty name and count as boundaries.
fn is_block(name: &str) -> bool {
    name.is_empty() || BLOCK_TAGS.contains(&name)
}

fn push_text(out: &mut String, text: &str, verbatim: bool, at_block: bool) {
    if text.is_empty() {
        return;
    }
    if verbatim {
        out.push_str(text);
        return;
    }
    if text.chars().all(|c| c.is_ascii_whitespace()) {
        if !at_block {
            out.push(' ');
        }
        return;
    }
    let mut in_space = false;
    for c in text.chars() {
        if c.is_ascii_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
}

/// Byte length of the tag starting at `s[0] == '<'`, honouring quoted values.
fn tag_end(s: &str) -> usize {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return i + 1,
            (None, _) => {}
        }
    }
    s.len()
}

fn tag_name(tag: &str) -> (String, bool) {
    let inner = &tag[1..];
    let (closing, inner) = match inner.strip_prefix('/') {
        Some(stripped) => (true, stripped),
        None => (false, inner),
    };
    let name = inner
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    (name, closing)
}

/// Drop quotes around attribute values that need none.
fn minify_tag(tag: &str) -> String {
    let mut out = String::with_capacity(tag.len());
    let mut rest = tag;
    while let Some(eq) = rest.find('=') {
        out.push_str(&rest[..=eq]);
        rest = &rest[eq + 1..];
        let Some(q) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            continue;
        };
        let Some(close) = rest[1..].find(q) else {
            break;
        };
        let value = &rest[1..=close];
        if is_simple_value(value) {
            out.push_str(value);
        } else {
            out.push(q);
            out.push_str(value);
            out.push(q);
        }
        rest = &rest[close + 2..];
    }
    out.push_str(rest);
    out
}

fn is_simple_value(value: &str) -> bool {
    !value.is_empty()
        && !value.ends_with('/')
        && !value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '=' | '<' | '>' | '`'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> String {
        format!("<!DOCTYPE html><html><head><title>t</title></head><body>{body}</body></html>")
    }

    #[test]
    fn test_lazy_images_become_direct_sources() {
        let raw = page(
            r#"<div class="rich_media_content"><p><img data-src="https://img.test/a.png" class="img"></p></div>"#,
        );
        let out = Sanitizer::new(CONTENT_SELECTOR).unwrap().sanitize(&raw);
        assert!(out.contains("src=https://img.test/a.png"));
        assert!(!out.contains("data-src"));
    }

    #[test]
    fn test_hiding_declarations_are_stripped() {
        let raw = page(
            r#"<div class="rich_media_content" style="visibility: hidden; opacity: 0 !important;"><span style="opacity: 0;color: red;">x</span></div>"#,
        );
        let out = Sanitizer::new(CONTENT_SELECTOR).unwrap().sanitize(&raw);
        assert!(!out.contains("opacity: 0;"));
        assert!(!out.contains("opacity: 0 !important;"));
        assert!(!out.contains("visibility: hidden;"));
        assert!(out.contains("color: red;"));
    }

    #[test]
    fn test_non_zero_opacity_survives() {
        let raw = page(r#"<div class="rich_media_content"><p style="opacity: 0.5;">x</p></div>"#);
        let out = Sanitizer::new(CONTENT_SELECTOR).unwrap().sanitize(&raw);
        assert!(out.contains("opacity: 0.5;"));
    }

    #[test]
    fn test_prelude_then_container() {
        let raw = r#"<div class="rich_media_content">Hello</div>"#;
        let out = Sanitizer::new(CONTENT_SELECTOR).unwrap().sanitize(raw);
        assert_eq!(
            out,
            format!("{STYLE_PRELUDE}<div class=rich_media_content>Hello</div>")
        );
    }

    #[test]
    fn test_missing_container_yields_prelude_only() {
        let raw = page("<div class=\"other\">nope</div>");
        let out = Sanitizer::new(CONTENT_SELECTOR).unwrap().sanitize(&raw);
        assert_eq!(out, STYLE_PRELUDE);
    }

    #[test]
    fn test_body_without_markup_yields_prelude_only() {
        let sanitizer = Sanitizer::new(CONTENT_SELECTOR).unwrap();
        assert_eq!(sanitizer.sanitize("Hello"), STYLE_PRELUDE);
        assert_eq!(sanitizer.sanitize(""), STYLE_PRELUDE);
    }

    #[test]
    fn test_invalid_selector_rejected() {
        assert!(matches!(
            Sanitizer::new("<<<").unwrap_err(),
            BackfillError::Parse(_)
        ));
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let raw = page(
            r#"
            <div class="rich_media_content" id="js_content" style="visibility: hidden;">
                <p style="opacity: 0;">First   paragraph &amp; more</p>
                <p><img data-src="https://img.test/b.jpg?wx_fmt=jpeg&amp;tp=webp" data-ratio="0.75"></p>
                <pre>  keep   this  </pre>
                <a href="https://example.test/path/">link</a>
            </div>
            "#,
        );
        let sanitizer = Sanitizer::new(CONTENT_SELECTOR).unwrap();
        let once = sanitizer.sanitize(&raw);
        let twice = sanitizer.sanitize(&once);
        assert_eq!(once, twice);
        assert!(once.contains("<pre>  keep   this  </pre>"));
        assert!(once.contains("First paragraph &amp; more"));
    }

    fn assert_stable(body: &str) -> String {
        let sanitizer = Sanitizer::new(CONTENT_SELECTOR).unwrap();
        let once = sanitizer.sanitize(&page(body));
        assert_eq!(once, sanitizer.sanitize(&once), "unstable output for {body:?}");
        once
    }

    #[test]
    fn test_leading_newlines_in_pre_and_textarea_are_stable() {
        let out = assert_stable(
            "<div class=\"rich_media_content\"><pre>\n\nfoo</pre><textarea>\n\nbar</textarea></div>",
        );
        assert!(out.contains("<pre>\n\nfoo</pre>"));
        assert!(out.contains("<textarea>\n\nbar</textarea>"));

        let out = assert_stable("<div class=\"rich_media_content\"><pre>foo</pre></div>");
        assert!(out.contains("<pre>foo</pre>"));
    }

    #[test]
    fn test_ideographic_spaces_are_kept() {
        let out = assert_stable("<div class=\"rich_media_content\"><p>\u{3000}\u{3000}第一段</p></div>");
        assert!(out.contains("<p>\u{3000}\u{3000}第一段</p>"));
    }

    #[test]
    fn test_line_break_between_inline_elements_keeps_word_break() {
        let out = assert_stable(
            "<div class=\"rich_media_content\"><p><span>Hello</span>\n<span>world</span></p>\n</div>",
        );
        assert!(out.contains("<p><span>Hello</span> <span>world</span></p></div>"));
    }

    #[test]
    fn test_lazy_marker_removed_everywhere() {
        let out = assert_stable(
            "<div class=\"rich_media_content\"><p>see data-src=here</p><img data-src=\"a.png\"></div>",
        );
        assert!(!out.contains("data-src"));
        assert!(out.contains("<p>see src=here</p>"));
        assert!(out.contains("<img src=a.png>"));
    }

    #[test]
    fn test_entities_in_attributes_survive() {
        let raw = page(
            r#"<div class="rich_media_content"><img data-src="https://img.test/c?a=1&amp;b=2"></div>"#,
        );
        let out = Sanitizer::new(CONTENT_SELECTOR).unwrap().sanitize(&raw);
        assert!(out.contains(r#"src="https://img.test/c?a=1&amp;b=2""#));
    }

    #[test]
    fn test_minify_unquotes_simple_values_only() {
        let out = minify(r#"<a href="x.html" title="two words" data-e="">t</a>"#);
        assert_eq!(out, r#"<a href=x.html title="two words" data-e="">t</a>"#);
    }

    #[test]
    fn test_minify_keeps_trailing_slash_quoted() {
        let out = minify(r#"<a href="https://example.test/">t</a>"#);
        assert_eq!(out, r#"<a href="https://example.test/">t</a>"#);
    }

    #[test]
    fn test_minify_collapses_whitespace() {
        let out = minify("<div>\n  <p>a    b</p>\n</div> <span>c</span>\t<b>d</b>");
        assert_eq!(out, "<div><p>a b</p></div><span>c</span> <b>d</b>");
    }

    #[test]
    fn test_minify_only_collapses_ascii_whitespace() {
        let out = minify("<p>a\u{3000}\u{3000}b \u{a0} c\r\n\td</p>");
        assert_eq!(out, "<p>a\u{3000}\u{3000}b \u{a0} c d</p>");
    }

    #[test]
    fn test_minify_leaves_script_text_alone() {
        let html = "<script>if (a<b  && c) {}</script>\n<p>x</p>";
        assert_eq!(minify(html), "<script>if (a<b  && c) {}</script><p>x</p>");
    }

    #[test]
    fn test_minify_handles_gt_inside_quoted_value() {
        let out = minify(r#"<p title="a > b">x</p>"#);
        assert_eq!(out, r#"<p title="a > b">x</p>"#);
    }
}
