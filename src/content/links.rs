use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Node, Selector};

const PLACEHOLDER_OPEN: char = '\u{E000}';
const PLACEHOLDER_CLOSE: char = '\u{E001}';
const UNLINKABLE_ELEMENTS: &[&str] = &["a", "script", "style"];

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("\u{E000}(\\d+)\u{E001}").expect("placeholder pattern"));

fn is_internal(href: &str, site_domain: Option<&str>) -> bool {
    if href.starts_with('/') {
        return true;
    }
    let Some(domain) = site_domain.filter(|domain| !domain.is_empty()) else {
        return false;
    };
    let lowered = href.to_ascii_lowercase();
    let Some(rest) = lowered
        .strip_prefix("https://")
        .or_else(|| lowered.strip_prefix("http://"))
    else {
        return false;
    };
    let rest = rest.strip_prefix("www.").unwrap_or(rest);
    rest.starts_with(&domain.to_ascii_lowercase())
}

/// Counts `(internal, external)` anchors carrying an `href`.
pub fn count_links(html: &str, site_domain: Option<&str>) -> (i64, i64) {
    let Ok(selector) = Selector::parse("a[href]") else {
        return (0, 0);
    };
    let fragment = Html::parse_fragment(html);

    let mut internal = 0;
    let mut external = 0;
    for anchor in fragment.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if is_internal(href, site_domain) {
            internal += 1;
        } else {
            external += 1;
        }
    }
    (internal, external)
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// A parsed HTML fragment whose text outside of anchors can gain new links.
///
/// Links are held as placeholders in the text nodes until [`LinkableHtml::into_html`]
/// serializes the tree, so later passes never match inside an inserted link.
pub struct LinkableHtml {
    fragment: Html,
    links: Vec<String>,
}

impl LinkableHtml {
    /// `None` when the input already carries placeholder characters.
    pub fn parse(html: &str) -> Option<Self> {
        if html.contains(PLACEHOLDER_OPEN) || html.contains(PLACEHOLDER_CLOSE) {
            return None;
        }
        Some(Self {
            fragment: Html::parse_fragment(html),
            links: Vec::new(),
        })
    }

    /// Links the first match of `pattern` in each eligible text node, stopping after `limit` links.
    pub fn link_first_matches(&mut self, pattern: &Regex, href: &str, limit: usize) -> usize {
        let text_nodes: Vec<_> = self
            .fragment
            .tree
            .root()
            .descendants()
            .filter(|node| node.value().is_text())
            .filter(|node| {
                node.ancestors().all(|ancestor| {
                    ancestor
                        .value()
                        .as_element()
                        .is_none_or(|element| !UNLINKABLE_ELEMENTS.contains(&element.name()))
                })
            })
            .map(|node| node.id())
            .collect();

        let mut added = 0;
        for id in text_nodes {
            if added >= limit {
                break;
            }
            let Some(mut node) = self.fragment.tree.get_mut(id) else {
                continue;
            };
            let Node::Text(text) = node.value() else {
                continue;
            };
            let Some(hit) = pattern.find(&text.text) else {
                continue;
            };

            let placeholder = format!("{}{}{}", PLACEHOLDER_OPEN, self.links.len(), PLACEHOLDER_CLOSE);
            let replaced = format!("{}{}{}", &text.text[..hit.start()], placeholder, &text.text[hit.end()..]);
            self.links.push(format!(
                r#"<a href="{}" class="internal-link">{}</a>"#,
                href,
                escape_text(hit.as_str())
            ));
            text.text.clear();
            text.text.push_slice(&replaced);
            added += 1;
        }
        added
    }

    pub fn into_html(self) -> String {
        let serialized = self.fragment.root_element().inner_html();
        PLACEHOLDER_RE
            .replace_all(&serialized, |captures: &regex::Captures| {
                captures[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| self.links.get(index))
                    .cloned()
                    .unwrap_or_default()
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_internal_and_external_links() {
        let html = r#"
            <p><a href="/blog/intro">intro</a>
            <a href="https://www.example.com/about">about</a>
            <A HREF='http://example.com'>home</A>
            <a href="https://other.org/x">other</a>
            <a name="anchor-without-href">skip</a>
            <abbr title="not a link">x</abbr></p>
        "#;
        assert_eq!(count_links(html, Some("example.com")), (3, 1));
    }

    #[test]
    fn without_domain_only_relative_links_are_internal() {
        let html = r#"<a href="/a">a</a><a href="https://example.com">b</a>"#;
        assert_eq!(count_links(html, None), (1, 1));
    }

    #[test]
    fn angle_brackets_in_attributes_do_not_split_tags() {
        let html = r#"<p><a title="a > b" href="https://external.example.org/x">ext</a></p>"#;
        assert_eq!(count_links(html, Some("mysite.com")), (0, 1));
    }

    #[test]
    fn linking_leaves_attributes_and_anchors_alone() {
        let pattern = Regex::new(r"(?i)\bprogramming\b").unwrap();
        let mut html = LinkableHtml::parse(
            r#"<img alt="x > programming tips" src="/a.png"><a href="/y">programming</a><script>var programming = 1;</script>"#,
        )
        .unwrap();
        assert_eq!(html.link_first_matches(&pattern, "/blog/target", 5), 0);
        let serialized = html.into_html();
        assert!(!serialized.contains("internal-link"));
        assert!(serialized.contains(r#"alt="x > programming tips""#));
    }

    #[test]
    fn links_are_escaped_and_placed_in_text() {
        let pattern = Regex::new(r"(?i)\bfish & chips\b").unwrap();
        let mut html = LinkableHtml::parse("<p>Try Fish &amp; Chips today</p>").unwrap();
        assert_eq!(html.link_first_matches(&pattern, "/blog/food", 5), 1);
        assert_eq!(
            html.into_html(),
            r#"<p>Try <a href="/blog/food" class="internal-link">Fish &amp; Chips</a> today</p>"#
        );
    }

    #[test]
    fn placeholder_characters_in_input_are_rejected() {
        assert!(LinkableHtml::parse("<p>\u{E000}0\u{E001}</p>").is_none());
    }
}
