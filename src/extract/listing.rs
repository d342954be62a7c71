use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::debug;
use url::Url;

use super::{catalog_id, catalog_ids_in, collapse_ws, detail_url, first_text, is_catalog_id, selector};

static LIST_CONTAINERS: LazyLock<Vec<Selector>> =
    LazyLock::new(|| vec![selector("ol#zg-ordered-list"), selector("ol.p13n-gridRow")]);
static LINKS: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));
static TRUNCATED_TITLE: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    vec![
        selector(".p13n-sc-truncate"),
        selector(".p13n-sc-truncated"),
        selector("[class*='line-clamp']"),
    ]
});
static IMG_ALT: LazyLock<Selector> = LazyLock::new(|| selector("img[alt]"));
static CARDS: LazyLock<Selector> = LazyLock::new(|| selector("[data-asin]"));
static BADGE: LazyLock<Selector> = LazyLock::new(|| selector(".zg-bdg-text"));
static BADGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#\s*(\d+)").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedEntry {
    /// 1-based position in the listing.
    pub rank: usize,
    pub catalog_id: String,
    /// Empty when no title could be read.
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct RankedList {
    /// Name of the strategy that produced the entries, `None` if none applied.
    pub strategy: Option<&'static str>,
    pub entries: Vec<RankedEntry>,
}

struct Page<'a> {
    raw: &'a str,
    doc: Html,
    cap: usize,
}

/// (catalog id, title) pairs in listing order. `None` means the strategy
/// does not apply to this markup and the next one should be tried.
type Strategy = fn(&Page) -> Option<Vec<(String, String)>>;

const STRATEGIES: &[(&str, Strategy)] = &[
    ("ordered-list", ordered_list),
    ("rank-badges", rank_badges),
    ("link-scan", link_scan),
];

/// Ranked entries from a category listing page. Empty when nothing
/// recognisable is found; never an error. `cap` bounds the badge and
/// link-scan fallbacks only; an ordered list is taken whole.
pub fn extract_ranked(html: &str, base: &Url, cap: usize) -> RankedList {
    let page = Page {
        raw: html,
        doc: Html::parse_document(html),
        cap,
    };

    for &(name, strategy) in STRATEGIES {
        let Some(found) = strategy(&page) else {
            continue;
        };
        let entries = finish(found, base);
        debug!(strategy = name, entries = entries.len(), "listing extracted");
        return RankedList {
            strategy: Some(name),
            entries,
        };
    }

    RankedList {
        strategy: None,
        entries: Vec::new(),
    }
}

/// Dedupe by catalog id keeping first-seen order and number from 1.
fn finish(found: Vec<(String, String)>, base: &Url) -> Vec<RankedEntry> {
    let mut seen = HashSet::new();
    found
        .into_iter()
        .filter(|(id, _)| seen.insert(id.clone()))
        .enumerate()
        .map(|(i, (id, title))| RankedEntry {
            rank: i + 1,
            url: detail_url(base, &id),
            catalog_id: id,
            title,
        })
        .collect()
}

fn ordered_list(page: &Page) -> Option<Vec<(String, String)>> {
    let container = LIST_CONTAINERS
        .iter()
        .find_map(|s| page.doc.select(s).next())?;

    let items = container
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "li")
        .filter_map(|li| {
            let (id, link) = li.select(&LINKS).find_map(|a| {
                let id = catalog_id(a.value().attr("href")?)?;
                Some((id, a))
            })?;
            Some((id, item_title(li, link)))
        })
        .collect();
    Some(items)
}

/// Truncated title node, then image alt text, then the link's own text.
fn item_title(item: ElementRef, link: ElementRef) -> String {
    first_text(item, &TRUNCATED_TITLE)
        .or_else(|| {
            item.select(&IMG_ALT)
                .filter_map(|img| img.value().attr("alt"))
                .map(collapse_ws)
                .find(|alt| !alt.is_empty())
        })
        .unwrap_or_else(|| collapse_ws(&link.text().collect::<String>()))
}

/// Grid cards tagged with `data-asin` and a `#N` badge, ordered by badge.
fn rank_badges(page: &Page) -> Option<Vec<(String, String)>> {
    let mut ranked: Vec<(u32, String, String)> = Vec::new();
    for card in page.doc.select(&CARDS) {
        let Some(id) = card.value().attr("data-asin").map(str::trim) else {
            continue;
        };
        if !is_catalog_id(id) {
            continue;
        }
        let badge = card
            .select(&BADGE)
            .next()
            .map(|b| b.text().collect::<String>());
        let Some(rank) = badge
            .as_deref()
            .and_then(|b| BADGE_RE.captures(b))
            .and_then(|c| c[1].parse::<u32>().ok())
        else {
            continue;
        };
        if ranked.iter().any(|(r, _, _)| *r == rank) {
            continue;
        }
        let title = first_text(card, &TRUNCATED_TITLE)
            .or_else(|| {
                card.select(&IMG_ALT)
                    .filter_map(|img| img.value().attr("alt"))
                    .map(collapse_ws)
                    .find(|alt| !alt.is_empty())
            })
            .unwrap_or_default();
        ranked.push((rank, id.to_string(), title));
    }

    if ranked.is_empty() {
        return None;
    }
    ranked.sort_by_key(|(rank, _, _)| *rank);
    Some(
        ranked
            .into_iter()
            .take(page.cap)
            .map(|(_, id, title)| (id, title))
            .collect(),
    )
}

/// Last resort: every catalog-id path in the raw markup, first-seen order.
fn link_scan(page: &Page) -> Option<Vec<(String, String)>> {
    let mut seen = HashSet::new();
    let ids = catalog_ids_in(page.raw)
        .filter(|id| seen.insert(id.clone()))
        .take(page.cap)
        .map(|id| (id, String::new()))
        .collect();
    Some(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://www.amazon.com/gp/bestsellers/digital-text/2").unwrap()
    }

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    #[test]
    fn ordered_list_in_document_order() {
        let list = extract_ranked(&fixture("listing_six"), &base(), 50);
        assert_eq!(list.strategy, Some("ordered-list"));
        assert_eq!(list.entries.len(), 6);
        let ranks: Vec<usize> = list.entries.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5, 6]);
        let ids: HashSet<&str> = list.entries.iter().map(|e| e.catalog_id.as_str()).collect();
        assert_eq!(ids.len(), 6);
        assert_eq!(list.entries[0].catalog_id, "B0ANX00001");
        assert_eq!(list.entries[4].url, "https://www.amazon.com/dp/B0ANX00005");
    }

    #[test]
    fn title_fallbacks() {
        let list = extract_ranked(&fixture("listing_six"), &base(), 50);
        // truncated node
        assert_eq!(list.entries[0].title, "Calm Within: A Guide to Quieting Anxiety");
        // image alt
        assert_eq!(list.entries[1].title, "The Worry Workbook");
        // link text
        assert_eq!(list.entries[2].title, "Fearless Mornings");
    }

    #[test]
    fn items_without_id_are_dropped() {
        let html = r#"<ol id="zg-ordered-list">
            <li><a href="/dp/B0AAAAAAA1">One</a></li>
            <li><a href="/help">Sponsored</a></li>
            <li><a href="/dp/B0AAAAAAA2">Two</a></li>
            <li><a href="/x/dp/B0AAAAAAA1/ref=dup">Dup</a></li>
        </ol>"#;
        let list = extract_ranked(html, &base(), 50);
        let ids: Vec<&str> = list.entries.iter().map(|e| e.catalog_id.as_str()).collect();
        assert_eq!(ids, vec!["B0AAAAAAA1", "B0AAAAAAA2"]);
        assert_eq!(list.entries[1].rank, 2);
    }

    #[test]
    fn present_but_empty_container_does_not_fall_back() {
        let html = r#"<ol id="zg-ordered-list"></ol><a href="/dp/B0AAAAAAA1">stray</a>"#;
        let list = extract_ranked(html, &base(), 50);
        assert_eq!(list.strategy, Some("ordered-list"));
        assert!(list.entries.is_empty());
    }

    #[test]
    fn fallback_scan_uses_first_seen_order() {
        let html = r#"<div class="grid">
            <a href="/Book-C/dp/B0CCCCCCC3/ref=1">C</a>
            <a href="/Book-A/dp/B0AAAAAAA1/ref=2">A</a>
            <span data-href="/dp/B0CCCCCCC3"></span>
            <a href="/Book-B/dp/B0BBBBBBB2?th=1">B</a>
        </div>"#;
        let list = extract_ranked(html, &base(), 50);
        assert_eq!(list.strategy, Some("link-scan"));
        let got: Vec<(usize, &str)> = list
            .entries
            .iter()
            .map(|e| (e.rank, e.catalog_id.as_str()))
            .collect();
        assert_eq!(got, vec![(1, "B0CCCCCCC3"), (2, "B0AAAAAAA1"), (3, "B0BBBBBBB2")]);
        assert!(list.entries.iter().all(|e| e.title.is_empty()));
    }

    #[test]
    fn fallback_scan_is_capped() {
        let html: String = (0..40)
            .map(|i| format!("<a href=\"/dp/B0{:08}\">x</a>", i))
            .collect();
        let list = extract_ranked(&html, &base(), 25);
        assert_eq!(list.entries.len(), 25);
        assert_eq!(list.entries[24].catalog_id, "B000000024");
    }

    #[test]
    fn ordered_list_is_not_capped() {
        let items: String = (1..=60)
            .map(|i| format!("<li><a href=\"/dp/B0LONG{:04}\">Book {i}</a></li>", i))
            .collect();
        let html = format!("<ol id=\"zg-ordered-list\">{items}</ol>");
        let list = extract_ranked(&html, &base(), 50);
        assert_eq!(list.entries.len(), 60);
        assert_eq!(list.entries[54].rank, 55);
        assert_eq!(list.entries[54].catalog_id, "B0LONG0055");
    }

    #[test]
    fn badge_cards_ordered_by_badge() {
        let html = r##"<div class="p13n-desktop-grid">
            <div data-asin="B0BBBBBBB2"><span class="zg-bdg-text">#2</span><img alt="Second Book" src="x.jpg"></div>
            <div data-asin="B0AAAAAAA1"><span class="zg-bdg-text">#1</span><img alt="First Book" src="y.jpg"></div>
            <div data-asin=""><span class="zg-bdg-text">#3</span></div>
            <div data-asin="B0ZZZZZZZ9"><span>no badge</span></div>
        </div>"##;
        let list = extract_ranked(html, &base(), 50);
        assert_eq!(list.strategy, Some("rank-badges"));
        let got: Vec<(&str, &str)> = list
            .entries
            .iter()
            .map(|e| (e.catalog_id.as_str(), e.title.as_str()))
            .collect();
        assert_eq!(got, vec![("B0AAAAAAA1", "First Book"), ("B0BBBBBBB2", "Second Book")]);
    }

    #[test]
    fn nothing_recognisable() {
        let list = extract_ranked("<html><body><p>Nothing here</p></body></html>", &base(), 50);
        assert_eq!(list.strategy, Some("link-scan"));
        assert!(list.entries.is_empty());
    }
}
