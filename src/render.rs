//! Markdown rendering and HTML sanitization for post bodies.
//!
//! Post content is stored as Markdown. Anything that leaves the server as HTML
//! goes through [`sanitize_html`], which strips scripts, inline event handlers
//! and `javascript:` URLs, and only keeps iframes that embed from a known
//! provider.

use std::borrow::Cow;

use pulldown_cmark::{Event, Options, Parser, html};

/// Hosts allowed as iframe sources. A host matches a domain exactly or as a
/// subdomain of it.
pub const TRUSTED_IFRAME_DOMAINS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "youtu.be",
    "vimeo.com",
    "player.vimeo.com",
    "codepen.io",
    "codesandbox.io",
    "jsfiddle.net",
    "replit.com",
    "github.com",
    "gist.github.com",
    "docs.google.com",
    "drive.google.com",
    "maps.google.com",
    "www.google.com",
    "store.steampowered.com",
    "steamcommunity.com",
];

const IFRAME_ATTRIBUTES: &[&str] = &["src", "width", "height", "frameborder", "allowfullscreen"];

fn markdown_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options
}

/// Renders Markdown to sanitized HTML.
pub fn render_markdown(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, markdown_options());
    let mut raw = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut raw, parser);
    sanitize_html(&raw)
}

/// Whether `src` is an absolute http(s) URL on a trusted embed host.
pub fn is_trusted_iframe_src(src: &str) -> bool {
    let Ok(parsed) = url::Url::parse(src) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();

    TRUSTED_IFRAME_DOMAINS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
}

/// Cleans untrusted HTML against an allow-list.
pub fn sanitize_html(input: &str) -> String {
    let mut builder = ammonia::Builder::default();
    builder
        .add_tags(["iframe", "input"])
        .add_tag_attributes("iframe", IFRAME_ATTRIBUTES)
        .add_tag_attributes("input", ["type", "checked", "disabled"])
        .add_tag_attributes("code", ["class"])
        .attribute_filter(|element, attribute, value| match (element, attribute) {
            ("iframe", "src") => {
                if is_trusted_iframe_src(value) {
                    Some(Cow::Borrowed(value))
                } else {
                    tracing::debug!(src = value, "dropping untrusted iframe source");
                    None
                }
            }
            ("iframe", "width" | "height") => {
                if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
                    Some(Cow::Borrowed(value))
                } else {
                    None
                }
            }
            ("input", "type") => (value == "checkbox").then_some(Cow::Borrowed(value)),
            _ => Some(Cow::Borrowed(value)),
        });

    builder.clean(input).to_string()
}

/// Escapes text for safe interpolation into HTML.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

/// URL slug from a title: lowercase ASCII alphanumerics joined by single dashes.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// A slug is valid when it is non-empty and only uses `[a-z0-9-]`.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Plain-text preview of a Markdown document, cut at `max_chars` characters.
pub fn excerpt(markdown: &str, max_chars: usize) -> String {
    let mut text = String::new();
    for event in Parser::new_ext(markdown, markdown_options()) {
        match event {
            Event::Text(t) | Event::Code(t) => {
                if !text.is_empty() && !text.ends_with(' ') {
                    text.push(' ');
                }
                text.push_str(t.trim());
            }
            Event::SoftBreak | Event::HardBreak => text.push(' '),
            _ => {}
        }
    }

    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.chars().count() <= max_chars {
        return text;
    }

    let mut cut: String = text.chars().take(max_chars).collect();
    if let Some(pos) = cut.rfind(' ') {
        cut.truncate(pos);
    }
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_basic_markdown() {
        let html = render_markdown("# Title\n\nSome **bold** text.");
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<strong>bold</strong>"));
    }

    #[test]
    fn renders_tables_and_strikethrough() {
        let html = render_markdown("| a | b |\n|---|---|\n| 1 | 2 |\n\n~~gone~~");
        assert!(html.contains("<table>"));
        assert!(html.contains("<del>gone</del>"));
    }

    #[test]
    fn strips_scripts_and_event_handlers() {
        let html = sanitize_html(
            r#"<p onclick="steal()">hi</p><script>alert(1)</script><a href="javascript:alert(1)">x</a>"#,
        );
        assert!(!html.contains("<script"));
        assert!(!html.contains("alert(1)"));
        assert!(!html.contains("onclick"));
        assert!(!html.contains("javascript:"));
        assert!(html.contains("<p>hi</p>"));
    }

    #[test]
    fn keeps_trusted_iframes() {
        let html = sanitize_html(
            r#"<iframe src="https://www.youtube.com/embed/abc" width="560" height="315" frameborder="0" allowfullscreen onload="x()"></iframe>"#,
        );
        assert!(html.contains(r#"src="https://www.youtube.com/embed/abc""#));
        assert!(html.contains(r#"width="560""#));
        assert!(!html.contains("onload"));
    }

    #[test]
    fn drops_untrusted_iframe_sources() {
        let html = sanitize_html(r#"<iframe src="https://evil.example.com/x"></iframe>"#);
        assert!(!html.contains("evil.example.com"));

        let html = sanitize_html(r#"<iframe src="not a url"></iframe>"#);
        assert!(!html.contains("not a url"));
    }

    #[test]
    fn trusted_domain_matching() {
        assert!(is_trusted_iframe_src("https://player.vimeo.com/video/1"));
        assert!(is_trusted_iframe_src("https://embed.codepen.io/pen/1"));
        assert!(!is_trusted_iframe_src("https://notyoutube.com/embed"));
        assert!(!is_trusted_iframe_src("https://youtube.com.evil.net/embed"));
        assert!(!is_trusted_iframe_src("javascript:alert(1)"));
        assert!(!is_trusted_iframe_src("/relative/path"));
    }

    #[test]
    fn rejects_non_numeric_iframe_dimensions() {
        let html = sanitize_html(
            r#"<iframe src="https://youtu.be/abc" width="100%;background:red" height="200"></iframe>"#,
        );
        assert!(!html.contains("background"));
        assert!(html.contains(r#"height="200""#));
    }

    #[test]
    fn escapes_html_specials() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#039;Jerry&#039;&lt;/a&gt;"
        );
    }

    #[test]
    fn slugify_collapses_and_trims() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  --Rust   2024 -- Edition--  "), "rust-2024-edition");
        assert_eq!(slugify("日本語"), "");
        assert!(is_valid_slug("rust-2024"));
        assert!(!is_valid_slug("Rust 2024"));
        assert!(!is_valid_slug("-leading"));
    }

    #[test]
    fn excerpt_strips_markup_and_truncates() {
        let md = "# Heading\n\nThis is **some** text with `code` and a [link](http://x)";
        assert_eq!(
            excerpt(md, 200),
            "Heading This is some text with code and a link"
        );

        let cut = excerpt("one two three four five", 12);
        assert_eq!(cut, "one two...");
    }
}
