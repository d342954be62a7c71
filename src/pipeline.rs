use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::extract::detail::{extract_detail, infer_topic};
use crate::extract::listing::{extract_ranked, RankedEntry};
use crate::fetch::clock::{Clock, SystemClock};
use crate::fetch::error::FetchError;
use crate::fetch::transport::Transport;
use crate::fetch::{FailureKind, FetchOutcome, FetchRequest, Purpose, RenderMode, ThrottledFetcher};
use crate::resolve::{harvest_candidates, CategoryLink, CategoryResolver};

/// Conditions that end the whole run, not just one category.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("root page {url} unusable: {reason}")]
    Systemic { url: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Root category page listing every category.
    pub base_url: Url,
    pub match_threshold: f64,
    /// Ranks strictly below this meet the threshold.
    pub bsr_threshold: u64,
    /// 1-based listing position to sample.
    pub target_rank: usize,
    pub max_entries: usize,
    pub rank_window_chars: usize,
    pub listing_render: RenderMode,
    pub detail_render: RenderMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Classified,
    Skipped,
}

impl RowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RowStatus::Classified => "classified",
            RowStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "classified" => Some(RowStatus::Classified),
            "skipped" => Some(RowStatus::Skipped),
            _ => None,
        }
    }
}

/// One per requested category. Entry fields stay `None` when the category
/// never got as far as picking an entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub category: String,
    /// Empty when the label did not resolve.
    pub category_url: String,
    pub rank_position: Option<usize>,
    pub catalog_id: Option<String>,
    pub listing_title: Option<String>,
    pub detail_url: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub popularity_rank: Option<u64>,
    pub provenance: Option<String>,
    pub topic: Option<String>,
    pub meets_threshold: bool,
    pub status: RowStatus,
    pub notes: Vec<String>,
}

impl ResultRow {
    fn new(category: &str) -> Self {
        ResultRow {
            category: category.to_string(),
            category_url: String::new(),
            rank_position: None,
            catalog_id: None,
            listing_title: None,
            detail_url: None,
            title: None,
            author: None,
            popularity_rank: None,
            provenance: None,
            topic: None,
            meets_threshold: false,
            status: RowStatus::Skipped,
            notes: Vec::new(),
        }
    }

    pub fn notes_text(&self) -> String {
        self.notes.join("; ")
    }

    pub fn has_title(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rows: Vec<ResultRow>,
}

impl RunReport {
    pub fn shortlist(&self) -> impl Iterator<Item = &ResultRow> {
        self.rows.iter().filter(|r| r.meets_threshold)
    }

    pub fn classified(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| r.status == RowStatus::Classified)
            .count()
    }

    pub fn usable_titles(&self) -> usize {
        self.rows.iter().filter(|r| r.has_title()).count()
    }

    /// Overall failure signal: not a single usable title across the run.
    pub fn failed(&self) -> bool {
        self.usable_titles() == 0
    }
}

const NOTE_EXCERPT_CHARS: usize = 120;

/// "detail page: HTTP 503 (Service Unavailable...)"
fn failure_note(page: &str, kind: FailureKind, detail: &str) -> String {
    let mut excerpt: String = detail.chars().take(NOTE_EXCERPT_CHARS).collect();
    if detail.chars().count() > NOTE_EXCERPT_CHARS {
        excerpt.push_str("...");
    }
    if excerpt.is_empty() {
        format!("{page} page: {kind}")
    } else {
        format!("{page} page: {kind} ({excerpt})")
    }
}

/// Per-category state. `Classified` and `Skipped` are terminal.
#[derive(Debug)]
enum Stage {
    Init,
    ResolvingCategory,
    FetchingListing { url: Url },
    ExtractingEntry { url: Url, html: String },
    FetchingDetail { entry: RankedEntry },
    ExtractingDetail { html: String },
    Classified,
    Skipped(String),
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::ResolvingCategory => "resolving-category",
            Stage::FetchingListing { .. } => "fetching-listing",
            Stage::ExtractingEntry { .. } => "extracting-entry",
            Stage::FetchingDetail { .. } => "fetching-detail",
            Stage::ExtractingDetail { .. } => "extracting-detail",
            Stage::Classified => "classified",
            Stage::Skipped(_) => "skipped",
        }
    }
}

pub struct Pipeline<T, C = SystemClock> {
    fetcher: ThrottledFetcher<T, C>,
    resolver: CategoryResolver,
    opts: PipelineOptions,
}

impl<T: Transport, C: Clock> Pipeline<T, C> {
    pub fn new(fetcher: ThrottledFetcher<T, C>, opts: PipelineOptions) -> Self {
        Pipeline {
            fetcher,
            resolver: CategoryResolver::new(opts.match_threshold),
            opts,
        }
    }

    #[cfg(test)]
    pub fn fetcher(&self) -> &ThrottledFetcher<T, C> {
        &self.fetcher
    }

    /// Fetch the root page and harvest its category links.
    pub fn candidates(&mut self) -> Result<Vec<CategoryLink>, RunError> {
        let root = self.opts.base_url.clone();
        let systemic = |reason: String| RunError::Systemic {
            url: root.to_string(),
            reason,
        };

        let req = FetchRequest::new(root.as_str(), Purpose::Root);
        let html = match self.fetcher.fetch(&req)? {
            FetchOutcome::Html(html) => html,
            FetchOutcome::Failure { kind, detail } => {
                return Err(systemic(format!("{kind} ({detail})")));
            }
        };
        let links = harvest_candidates(&html, &root)
            .ok_or_else(|| systemic("category region not found".to_string()))?;
        info!(url = %root, candidates = links.len(), "root categories harvested");
        Ok(links)
    }

    /// Process every category in order. Only a fatal fetch or an unusable
    /// root page returns `Err`; everything else lands in the row notes.
    pub fn run(&mut self, categories: &[String], pb: &ProgressBar) -> Result<RunReport, RunError> {
        let started_at = Utc::now();
        let candidates = self.candidates()?;

        let mut rows = Vec::with_capacity(categories.len());
        for label in categories {
            pb.set_message(label.clone());
            rows.push(self.run_category(label, &candidates)?);
            pb.inc(1);
        }

        Ok(RunReport {
            started_at,
            finished_at: Utc::now(),
            rows,
        })
    }

    fn run_category(&mut self, label: &str, candidates: &[CategoryLink]) -> Result<ResultRow, RunError> {
        let mut row = ResultRow::new(label);
        let mut stage = Stage::Init;

        loop {
            debug!(category = label, stage = stage.name(), "step");
            stage = match stage {
                Stage::Init => Stage::ResolvingCategory,

                Stage::ResolvingCategory => match self.resolver.resolve(label, candidates) {
                    None => Stage::Skipped(format!(
                        "no category link matched \"{label}\" at threshold {}",
                        self.opts.match_threshold
                    )),
                    Some(res) => {
                        if !res.exact {
                            row.notes.push(format!(
                                "fuzzy category match \"{}\" (score {:.2})",
                                res.link.label, res.score
                            ));
                        }
                        row.category_url = res.link.url.clone();
                        match Url::parse(&res.link.url) {
                            Ok(url) => Stage::FetchingListing { url },
                            Err(e) => Stage::Skipped(format!("bad category url {}: {e}", res.link.url)),
                        }
                    }
                },

                Stage::FetchingListing { url } => {
                    let req = FetchRequest::new(url.as_str(), Purpose::Listing).render(self.opts.listing_render);
                    match self.fetcher.fetch(&req)? {
                        FetchOutcome::Html(html) => Stage::ExtractingEntry { url, html },
                        FetchOutcome::Failure { kind, detail } => {
                            Stage::Skipped(failure_note("listing", kind, &detail))
                        }
                    }
                }

                Stage::ExtractingEntry { url, html } => {
                    let list = extract_ranked(&html, &url, self.opts.max_entries);
                    let found = list.entries.len();
                    let want = self.opts.target_rank;
                    debug!(category = label, strategy = list.strategy, entries = found, "listing parsed");
                    match list.entries.into_iter().nth(want.saturating_sub(1)) {
                        Some(entry) if want > 0 => Stage::FetchingDetail { entry },
                        _ => Stage::Skipped(format!(
                            "insufficient entries: listing has {found} entries, need rank {want}"
                        )),
                    }
                }

                Stage::FetchingDetail { entry } => {
                    row.rank_position = Some(entry.rank);
                    row.catalog_id = Some(entry.catalog_id);
                    row.listing_title = Some(entry.title).filter(|t| !t.is_empty());
                    row.detail_url = Some(entry.url.clone());

                    let req = FetchRequest::new(entry.url, Purpose::Detail).render(self.opts.detail_render);
                    match self.fetcher.fetch(&req)? {
                        FetchOutcome::Html(html) => Stage::ExtractingDetail { html },
                        FetchOutcome::Failure { kind, detail } => {
                            Stage::Skipped(failure_note("detail", kind, &detail))
                        }
                    }
                }

                Stage::ExtractingDetail { html } => {
                    let rec = extract_detail(&html, self.opts.rank_window_chars);
                    if rec.title_from_document {
                        row.notes.push("title read from document <title>".to_string());
                    }
                    row.title = match rec.title {
                        Some(t) => Some(t),
                        None => match &row.listing_title {
                            Some(t) => {
                                row.notes.push("no title on detail page; kept listing title".to_string());
                                Some(t.clone())
                            }
                            None => {
                                row.notes.push("no title found".to_string());
                                None
                            }
                        },
                    };
                    row.topic = row.title.as_deref().and_then(infer_topic);
                    if rec.author.is_none() {
                        row.notes.push("no author found".to_string());
                    }
                    if rec.popularity_rank.is_none() {
                        row.notes.push("no popularity rank found".to_string());
                    }
                    row.author = rec.author;
                    row.popularity_rank = rec.popularity_rank;
                    row.provenance = rec.provenance;
                    row.meets_threshold = row
                        .popularity_rank
                        .is_some_and(|r| r < self.opts.bsr_threshold);
                    Stage::Classified
                }

                Stage::Classified => {
                    row.status = RowStatus::Classified;
                    info!(
                        category = label,
                        rank = row.popularity_rank,
                        meets_threshold = row.meets_threshold,
                        "category classified"
                    );
                    return Ok(row);
                }

                Stage::Skipped(reason) => {
                    warn!(category = label, %reason, "category skipped");
                    row.status = RowStatus::Skipped;
                    row.meets_threshold = false;
                    row.notes.push(reason);
                    return Ok(row);
                }
            };
        }
    }
}
