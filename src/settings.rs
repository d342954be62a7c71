use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File, Map};
use serde::Deserialize;
use url::Url;

use crate::fetch::retry::RetryPolicy;
use crate::fetch::transport::Gateway;
use crate::fetch::{Politeness, RenderMode};
use crate::pipeline::PipelineOptions;

const DEFAULT_FILE: &str = "bsr_sampler";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub categories: Vec<String>,
    pub api_endpoint: String,
    /// No key means pages are fetched directly.
    pub api_key: Option<String>,

    pub min_gap_secs: f64,
    pub jitter_secs: f64,
    pub max_retries: u32,
    pub max_total_wait_secs: f64,
    pub backoff_base_secs: f64,
    pub throttle_cap_secs: f64,
    pub transport_cap_secs: f64,
    pub throttle_jitter_secs: f64,
    pub transport_jitter_secs: f64,
    pub request_timeout_secs: f64,

    pub match_threshold: f64,
    pub bsr_threshold: u64,
    pub target_rank: usize,
    pub max_entries: usize,
    pub rank_window_chars: usize,
    pub listing_render: RenderMode,
    pub detail_render: RenderMode,

    pub db_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            base_url: "https://www.amazon.com/Best-Sellers-Kindle-Store-Self-Help/zgbs/digital-text/156563011"
                .to_string(),
            categories: [
                "Abuse",
                "Affirmations",
                "Aging",
                "Anger Management",
                "Anxieties & Phobias",
                "Communication & Social Skills",
                "Compulsive Behavior",
                "Creativity",
                "Eating Disorders & Body Image",
                "Emotions",
                "Happiness",
                "Inner Child",
                "Journal Writing",
                "Memory Improvement",
                "Motivational",
                "Neuro-Linguistic Programming (NLP)",
                "Personal Transformation",
                "Self-Esteem",
                "Self-Hypnosis",
                "Self-Management",
                "Spiritual",
                "Stress Management",
                "Success",
                "Time Management",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            api_endpoint: "https://api.webscrapingapi.com/v2".to_string(),
            api_key: None,
            min_gap_secs: 20.0,
            jitter_secs: 5.0,
            max_retries: 10,
            max_total_wait_secs: 900.0,
            backoff_base_secs: 2.0,
            throttle_cap_secs: 180.0,
            transport_cap_secs: 60.0,
            throttle_jitter_secs: 2.5,
            transport_jitter_secs: 1.5,
            request_timeout_secs: 120.0,
            match_threshold: 0.4,
            bsr_threshold: 20_000,
            target_rank: 5,
            max_entries: 50,
            rank_window_chars: 3000,
            listing_render: RenderMode::Light,
            detail_render: RenderMode::Full,
            db_path: "data/bsr.sqlite".to_string(),
        }
    }
}

/// Defaults, then the TOML file (explicit path or `bsr_sampler.toml` if
/// present), then `BSR_*` environment variables.
pub fn load(path: Option<&Path>) -> Result<Settings> {
    load_with_env(path, None)
}

/// `env` replaces the process environment when given.
fn load_with_env(path: Option<&Path>, env: Option<Map<String, String>>) -> Result<Settings> {
    let file = match path {
        Some(p) => File::from(p).required(true),
        None => File::with_name(DEFAULT_FILE).required(false),
    };
    let settings = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix("BSR")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("categories")
                .source(env),
        )
        .build()
        .context("reading configuration")?
        .try_deserialize::<Settings>()
        .context("invalid configuration")?;
    settings.validate()?;
    Ok(settings)
}

fn secs(s: f64) -> Duration {
    Duration::try_from_secs_f64(s).unwrap_or(Duration::ZERO)
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.base_url).with_context(|| format!("base_url {:?}", self.base_url))?;
        anyhow::ensure!(self.target_rank >= 1, "target_rank must be at least 1");
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.match_threshold),
            "match_threshold must be within 0..=1, got {}",
            self.match_threshold
        );
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            max_total_wait: secs(self.max_total_wait_secs),
            base: secs(self.backoff_base_secs),
            throttle_cap: secs(self.throttle_cap_secs),
            transport_cap: secs(self.transport_cap_secs),
            throttle_jitter: secs(self.throttle_jitter_secs),
            transport_jitter: secs(self.transport_jitter_secs),
        }
    }

    pub fn politeness(&self) -> Politeness {
        Politeness {
            min_gap: secs(self.min_gap_secs),
            jitter: secs(self.jitter_secs),
        }
    }

    pub fn gateway(&self) -> Option<Gateway> {
        let key = self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())?;
        Some(Gateway {
            endpoint: self.api_endpoint.clone(),
            api_key: key.to_string(),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        secs(self.request_timeout_secs)
    }

    pub fn pipeline_options(&self) -> Result<PipelineOptions> {
        Ok(PipelineOptions {
            base_url: Url::parse(&self.base_url).with_context(|| format!("base_url {:?}", self.base_url))?,
            match_threshold: self.match_threshold,
            bsr_threshold: self.bsr_threshold,
            target_rank: self.target_rank,
            max_entries: self.max_entries,
            rank_window_chars: self.rank_window_chars,
            listing_render: self.listing_render,
            detail_render: self.detail_render,
        })
    }
}
