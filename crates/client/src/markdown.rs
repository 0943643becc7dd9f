//! Markdown to display HTML for agent messages.

use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, TagEnd, html};

const BLOCKED_LINK_SCHEMES: [&str; 3] = ["javascript:", "vbscript:", "data:"];

/// Renders GitHub-flavoured markdown. Single newlines become line breaks, raw HTML is shown as
/// text, and links open in a new browsing context.
pub fn markdown_to_html(content: &str) -> String {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
    let events = Parser::new_ext(content, options).map(rewrite_event);

    let mut output = String::with_capacity(content.len() * 3 / 2);
    html::push_html(&mut output, events);
    output
}

fn rewrite_event(event: Event<'_>) -> Event<'_> {
    match event {
        Event::SoftBreak => Event::HardBreak,
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        Event::Start(Tag::Link {
            dest_url, title, ..
        }) => Event::InlineHtml(CowStr::from(link_open_tag(&dest_url, &title))),
        Event::End(TagEnd::Link) => Event::InlineHtml(CowStr::Borrowed("</a>")),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Image {
            link_type,
            dest_url: CowStr::from(safe_url(&dest_url).to_string()),
            title,
            id,
        }),
        other => other,
    }
}

fn link_open_tag(dest_url: &str, title: &str) -> String {
    let mut tag = format!("<a href=\"{}\"", escape_attribute(safe_url(dest_url)));
    if !title.is_empty() {
        tag.push_str(&format!(" title=\"{}\"", escape_attribute(title)));
    }
    tag.push_str(" target=\"_blank\" rel=\"noopener noreferrer\">");
    tag
}

fn safe_url(url: &str) -> &str {
    let normalized = url
        .trim()
        .chars()
        .filter(|character| !character.is_whitespace() && !character.is_control())
        .collect::<String>()
        .to_ascii_lowercase();

    if BLOCKED_LINK_SCHEMES
        .iter()
        .any(|scheme| normalized.starts_with(scheme))
    {
        "#"
    } else {
        url
    }
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for character in value.chars() {
        match character {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_basic_formatting() {
        let html = markdown_to_html("Hello **world** and `code`");
        assert_eq!(
            html,
            "<p>Hello <strong>world</strong> and <code>code</code></p>\n"
        );
    }

    #[test]
    fn single_newlines_become_breaks() {
        let html = markdown_to_html("first line\nsecond line");
        assert!(html.contains("first line<br />"));
        assert!(html.contains("second line"));
    }

    #[test]
    fn links_open_in_new_context() {
        let html = markdown_to_html("See [docs](https://example.com/a?b=1&c=2 \"Docs\").");
        assert!(html.contains(
            "<a href=\"https://example.com/a?b=1&amp;c=2\" title=\"Docs\" target=\"_blank\" rel=\"noopener noreferrer\">docs</a>"
        ));
    }

    #[test]
    fn autolinks_are_rewritten_too() {
        let html = markdown_to_html("<https://example.com>");
        assert!(html.contains("target=\"_blank\""));
        assert!(html.contains(">https://example.com</a>"));
    }

    #[test]
    fn script_links_are_neutralised() {
        let html = markdown_to_html("[click](javascript:alert(1)) [x](JaVaScRiPt:void(0))");
        assert!(!html.to_ascii_lowercase().contains("javascript:"));
        assert!(html.contains("href=\"#\""));
    }

    #[test]
    fn raw_html_is_escaped() {
        let html = markdown_to_html("<script>alert(1)</script>\n\nhi <b>there</b>");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("&lt;b&gt;"));
    }

    #[test]
    fn gfm_extensions_are_enabled() {
        let table = markdown_to_html("| a | b |\n|---|---|\n| 1 | 2 |");
        assert!(table.contains("<table>"));

        let struck = markdown_to_html("~~old~~ new");
        assert!(struck.contains("<del>old</del>"));

        let tasks = markdown_to_html("- [x] done\n- [ ] todo");
        assert!(tasks.contains("type=\"checkbox\""));
    }
}
