use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;

use super::{collapse_ws, first_text, selector, visible_text};

static TITLE: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    vec![
        selector("#productTitle"),
        selector("#ebooksProductTitle"),
        selector("#title"),
    ]
});
static DOC_TITLE: LazyLock<Vec<Selector>> = LazyLock::new(|| vec![selector("title")]);
static AUTHOR: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    vec![
        selector("#bylineInfo .author a"),
        selector("#bylineInfo .author"),
        selector("#bylineInfo"),
    ]
});
static DETAIL_REGIONS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    vec![
        selector("#detailBulletsWrapper_feature_div"),
        selector("#detailBullets_feature_div"),
        selector("#productDetails_detailBullets_sections1"),
        selector("#prodDetails"),
        selector("#SalesRank"),
    ]
});
static RANK_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#\s*(\d[\d,]*)").unwrap());

/// Lowercase label phrases. The longer one contains the shorter; whichever
/// starts first in the text wins.
const RANK_LABELS: &[&str] = &["amazon best sellers rank", "best sellers rank"];

const EXCERPT_BEFORE: usize = 60;
const EXCERPT_AFTER: usize = 40;

const TOPIC_MAX_CHARS: usize = 120;
const TOPIC_KEYWORDS: &[(&str, &str)] = &[
    ("anxiety", "Anxiety relief"),
    ("phobia", "Phobias"),
    ("anger", "Anger management"),
    ("stress", "Stress management"),
    ("habit", "Habits & behavior change"),
    ("nlp", "NLP"),
    ("confidence", "Confidence & self-esteem"),
    ("self-esteem", "Self-esteem"),
    ("trauma", "Trauma healing"),
    ("inner child", "Inner child healing"),
    ("journ", "Journaling / prompts"),
    ("mindful", "Mindfulness"),
    ("happi", "Happiness"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetailRecord {
    pub title: Option<String>,
    /// Secondary attribute, the byline author.
    pub author: Option<String>,
    pub popularity_rank: Option<u64>,
    /// Text around the matched rank, kept for debugging.
    pub provenance: Option<String>,
    /// True when the title came from the generic `<title>` element.
    pub title_from_document: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankMatch {
    pub rank: u64,
    pub excerpt: String,
}

/// Fields from a detail page. Missing pieces are `None`, never an error.
pub fn extract_detail(html: &str, window_chars: usize) -> DetailRecord {
    let doc = Html::parse_document(html);
    let root = doc.root_element();

    let (title, title_from_document) = match first_text(root, &TITLE) {
        Some(t) => (Some(t), false),
        None => {
            let t = first_text(root, &DOC_TITLE);
            let from_doc = t.is_some();
            (t, from_doc)
        }
    };
    let author = first_text(root, &AUTHOR).map(|a| clean_byline(&a)).filter(|a| !a.is_empty());

    let regions: Vec<String> = DETAIL_REGIONS
        .iter()
        .flat_map(|s| doc.select(s))
        .map(visible_text)
        .filter(|t| !t.is_empty())
        .collect();
    let rank = find_rank(&regions.join("\n"), window_chars)
        .or_else(|| find_rank(&visible_text(root), window_chars));

    DetailRecord {
        title,
        author,
        popularity_rank: rank.as_ref().map(|m| m.rank),
        provenance: rank.map(|m| m.excerpt),
        title_from_document,
    }
}

/// "by Jane Doe (Author)" -> "Jane Doe"
fn clean_byline(s: &str) -> String {
    let s = s.trim();
    let s = s.strip_prefix("by ").or_else(|| s.strip_prefix("By ")).unwrap_or(s);
    let s = match s.find(" (") {
        Some(i) => &s[..i],
        None => s,
    };
    s.trim().trim_end_matches(',').trim().to_string()
}

/// First `#N` within `window_chars` characters after a rank label.
pub fn find_rank(text: &str, window_chars: usize) -> Option<RankMatch> {
    // ASCII lowercasing keeps byte offsets valid for `text`.
    let lower = text.to_ascii_lowercase();
    let start = RANK_LABELS.iter().filter_map(|l| lower.find(l)).min()?;

    let tail = &text[start..];
    let end = tail
        .char_indices()
        .nth(window_chars)
        .map(|(i, _)| i)
        .unwrap_or(tail.len());
    let window = &tail[..end];

    let caps = RANK_NUMBER_RE.captures(window)?;
    let rank = caps[1].replace(',', "").parse::<u64>().ok()?;

    let m = caps.get(0)?;
    let before: String = {
        let mut v: Vec<char> = window[..m.start()].chars().rev().take(EXCERPT_BEFORE).collect();
        v.reverse();
        v.into_iter().collect()
    };
    let after: String = window[m.end()..].chars().take(EXCERPT_AFTER).collect();
    let excerpt = collapse_ws(&format!("{before}{}{after}", m.as_str()));

    Some(RankMatch { rank, excerpt })
}

/// Short readable topic: the subtitle after the first colon, else a keyword label.
pub fn infer_topic(title: &str) -> Option<String> {
    let t = title.trim();
    if t.is_empty() {
        return None;
    }
    if let Some((_, after)) = t.split_once(':') {
        let after = after.trim();
        if !after.is_empty() {
            return Some(after.chars().take(TOPIC_MAX_CHARS).collect());
        }
    }
    let lower = t.to_lowercase();
    TOPIC_KEYWORDS
        .iter()
        .find(|(kw, _)| lower.contains(kw))
        .map(|(_, label)| label.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    #[test]
    fn rank_from_plain_text() {
        let m = find_rank("...Best Sellers Rank #12,345 in Kindle Store...", 3000).unwrap();
        assert_eq!(m.rank, 12345);
        assert!(m.excerpt.contains("#12,345"));
    }

    #[test]
    fn label_missing_is_none() {
        assert_eq!(find_rank("Print length: 212 pages. #1 New Release", 3000), None);
    }

    #[test]
    fn number_outside_window_is_none() {
        let text = format!("Best Sellers Rank: {} #77", "x".repeat(100));
        assert_eq!(find_rank(&text, 50), None);
        assert_eq!(find_rank(&text, 500).map(|m| m.rank), Some(77));
    }

    #[test]
    fn label_match_is_case_insensitive_and_utf8_safe() {
        let text = "Éditions — amazon BEST SELLERS rank:\n\n   #3,210 in Livres (Voir le Top 100)";
        assert_eq!(find_rank(text, 3000).map(|m| m.rank), Some(3210));
    }

    #[test]
    fn earliest_label_wins() {
        let text = "Amazon Best Sellers Rank: #9 in Kindle Store. Best Sellers Rank #1 in Self-Help";
        assert_eq!(find_rank(text, 3000).map(|m| m.rank), Some(9));
    }

    #[test]
    fn detail_fixture_fields() {
        let rec = extract_detail(&fixture("detail_rank_18500"), 3000);
        assert_eq!(rec.title.as_deref(), Some("Quiet Harbor: Daily Practices for an Anxious Mind"));
        assert_eq!(rec.author.as_deref(), Some("Mara Ellison"));
        assert_eq!(rec.popularity_rank, Some(18500));
        assert!(!rec.title_from_document);
        assert!(rec.provenance.unwrap().contains("#18,500"));
    }

    #[test]
    fn script_text_is_ignored() {
        let html = r#"<html><head><title>Some Book</title>
            <script>var s = "Best Sellers Rank #1";</script></head>
            <body><p>No rank here.</p></body></html>"#;
        let rec = extract_detail(html, 3000);
        assert_eq!(rec.popularity_rank, None);
    }

    #[test]
    fn falls_back_to_document_title() {
        let html = "<html><head><title>Amazon.com: Calm Book eBook</title></head><body>Best Sellers Rank: #42 in Kindle Store</body></html>";
        let rec = extract_detail(html, 3000);
        assert_eq!(rec.title.as_deref(), Some("Amazon.com: Calm Book eBook"));
        assert!(rec.title_from_document);
        assert_eq!(rec.author, None);
        assert_eq!(rec.popularity_rank, Some(42));
    }

    #[test]
    fn byline_cleanup() {
        assert_eq!(clean_byline("by Jane Doe (Author)"), "Jane Doe");
        assert_eq!(clean_byline("Jane Doe,"), "Jane Doe");
    }

    #[test]
    fn topic_prefers_subtitle() {
        assert_eq!(
            infer_topic("Quiet Harbor: Daily Practices for an Anxious Mind").as_deref(),
            Some("Daily Practices for an Anxious Mind")
        );
        assert_eq!(infer_topic("The Worry Workbook"), None);
        assert_eq!(infer_topic("Unworry the Anxiety Loop").as_deref(), Some("Anxiety relief"));
        assert_eq!(infer_topic("Trailing colon:").as_deref(), None);
        assert_eq!(infer_topic("  "), None);
    }
}
