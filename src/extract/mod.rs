pub mod blocked;
pub mod detail;
pub mod listing;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Node, Selector};
use url::Url;

/// Catalog id inside a product path: `/dp/B0XXXXXXXX` or `/gp/product/B0XXXXXXXX`.
static CATALOG_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(?:dp|gp/product)/([A-Z0-9]{10})(?:[^A-Za-z0-9]|$)").unwrap()
});

pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("bad built-in selector {css:?}: {e}"))
}

pub fn catalog_id(href: &str) -> Option<String> {
    CATALOG_ID_RE.captures(href).map(|c| c[1].to_string())
}

/// Every catalog id in the text, in order of appearance, duplicates included.
pub(crate) fn catalog_ids_in(text: &str) -> impl Iterator<Item = String> + '_ {
    CATALOG_ID_RE.captures_iter(text).map(|c| c[1].to_string())
}

pub fn is_catalog_id(s: &str) -> bool {
    s.len() == 10 && s.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

/// Canonical detail page for a catalog id on the same origin as `base`.
pub fn detail_url(base: &Url, id: &str) -> String {
    base.join(&format!("/dp/{id}"))
        .map(String::from)
        .unwrap_or_else(|_| format!("{}/dp/{id}", base.origin().ascii_serialization()))
}

pub fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Rendered text of an element, skipping script and style bodies.
pub fn visible_text(el: ElementRef) -> String {
    let mut parts = Vec::new();
    for node in el.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript" | "template"))
        });
        let t = text.trim();
        if !hidden && !t.is_empty() {
            parts.push(t);
        }
    }
    parts.join(" ")
}

/// First non-empty, whitespace-collapsed text matched by any of the selectors.
pub(crate) fn first_text(root: ElementRef, selectors: &[Selector]) -> Option<String> {
    selectors
        .iter()
        .flat_map(|s| root.select(s))
        .map(|el| collapse_ws(&visible_text(el)))
        .find(|t| !t.is_empty())
}
