use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde::Serialize;
use url::Url;

use crate::extract::{collapse_ws, selector, visible_text};

/// Region of the root page expected to enumerate every category.
static ROOT_REGIONS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    vec![
        selector("#zg-left-col [role='tree']"),
        selector("#zg_browseRoot"),
        selector("[role='tree']"),
        selector("#zg-left-col"),
    ]
});
static ANCHORS: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));

const STOPWORDS: &[&str] = &["a", "an", "and", "the", "of", "for", "in", "on", "to", "with", "or", "amp"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryLink {
    /// Normalized label, see [`normalize_label`].
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<'a> {
    pub link: &'a CategoryLink,
    pub score: f64,
    pub exact: bool,
}

/// Lowercase, `&` spelled out, punctuation turned into spaces, whitespace collapsed.
pub fn normalize_label(s: &str) -> String {
    let spaced: String = s
        .to_lowercase()
        .replace('&', " and ")
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    collapse_ws(&spaced)
}

fn tokens(normalized: &str) -> HashSet<&str> {
    normalized
        .split_whitespace()
        .filter(|t| !STOPWORDS.contains(t))
        .collect()
}

/// Intersection over union of the two token sets; 0 when both are empty.
pub fn jaccard(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Category links from the root page's category region, in page order.
/// `None` when the region itself is missing, which no category can recover from.
pub fn harvest_candidates(html: &str, page_url: &Url) -> Option<Vec<CategoryLink>> {
    let doc = Html::parse_document(html);
    let region = ROOT_REGIONS.iter().find_map(|s| doc.select(s).next())?;
    let own_url = page_url.as_str().trim_end_matches('/');

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for a in region.select(&ANCHORS) {
        let Some(href) = a.value().attr("href").map(str::trim).filter(|h| !h.is_empty()) else {
            continue;
        };
        let Ok(abs) = page_url.join(href) else {
            continue;
        };
        if abs.as_str().trim_end_matches('/') == own_url {
            continue;
        }
        let label = normalize_label(&visible_text(a));
        if label.is_empty() || !seen.insert(label.clone()) {
            continue;
        }
        links.push(CategoryLink {
            label,
            url: abs.into(),
        });
    }
    Some(links)
}

/// Picks the candidate link for a human-readable category label.
pub struct CategoryResolver {
    threshold: f64,
}

impl CategoryResolver {
    pub fn new(threshold: f64) -> Self {
        CategoryResolver { threshold }
    }

    /// Exact normalized match wins outright. Otherwise the best Jaccard score,
    /// first candidate on ties, and nothing below the threshold.
    pub fn resolve<'a>(&self, label: &str, candidates: &'a [CategoryLink]) -> Option<Resolution<'a>> {
        let target = normalize_label(label);
        if let Some(link) = candidates.iter().find(|c| c.label == target) {
            return Some(Resolution {
                link,
                score: 1.0,
                exact: true,
            });
        }

        let wanted = tokens(&target);
        let mut best: Option<Resolution<'a>> = None;
        for link in candidates {
            let score = jaccard(&wanted, &tokens(&link.label));
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(Resolution {
                    link,
                    score,
                    exact: false,
                });
            }
        }
        best.filter(|b| b.score >= self.threshold && b.score > 0.0)
    }
}
