use ammonia::Builder;
use std::collections::HashSet;

/// Cleans rich article HTML down to a safe subset of tags and attributes.
/// Scripts, event handlers and `javascript:` links are removed.
pub fn sanitize_content(html_input: &str) -> String {
    let tags_to_allow = [
        "h1", "h2", "h3", "h4", "h5", "h6", "b", "strong", "i", "em", "u", "p", "br", "a", "ul", "ol", "li",
        "blockquote", "code", "pre", "hr", "img", "table", "thead", "tbody", "tr", "th", "td", "s", "del",
        "span", "div", "figure", "figcaption",
    ];
    let safe_tags = tags_to_allow.iter().cloned().collect::<HashSet<_>>();

    let safe_attributes = ["src", "href", "alt", "title", "class", "width", "height", "align", "colspan", "rowspan"];
    let generic_attributes = safe_attributes.iter().cloned().collect::<HashSet<_>>();

    Builder::new()
        .tags(safe_tags)
        .generic_attributes(generic_attributes)
        .link_rel(Some("nofollow noopener"))
        .clean(html_input)
        .to_string()
}

/// Strips every tag, leaving the text. Used for titles.
pub fn strip_all_html(input: &str) -> String {
    Builder::new().tags(HashSet::new()).clean(input).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_keeps_safe_markup_and_drops_scripts() {
        let cleaned = sanitize_content("<p onclick=\"x()\">Hello <strong>world</strong></p><script>alert(1)</script>");
        assert_eq!(cleaned, "<p>Hello <strong>world</strong></p>");
    }

    #[test]
    fn content_drops_javascript_links() {
        let cleaned = sanitize_content("<a href=\"javascript:alert(1)\">x</a>");
        assert!(!cleaned.contains("javascript"));
    }

    #[test]
    fn title_is_stripped_to_text() {
        assert_eq!(strip_all_html("<b>Schedule</b> update"), "Schedule update");
        assert_eq!(strip_all_html("<script>x</script>"), "");
    }
}
