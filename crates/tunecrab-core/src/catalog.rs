//! Music catalog lookup and the artist-name derivation applied to whatever
//! shape the catalog returns.

use std::ffi::OsString;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::fetcher::run_tool;
use crate::session::{SearchResult, MAX_PENDING_RESULTS};

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_TITLE: &str = "Unknown Title";

/// Either `"name"` or `{ "name": "name" }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum NameRef {
    Plain(String),
    Named {
        #[serde(default)]
        name: Option<String>,
    },
}

impl NameRef {
    fn name(&self) -> Option<&str> {
        match self {
            NameRef::Plain(s) => Some(s.as_str()),
            NameRef::Named { name } => name.as_deref(),
        }
        .filter(|s| !s.trim().is_empty())
    }
}

/// One raw catalog hit.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogEntry {
    #[serde(default, alias = "name")]
    pub title: Option<String>,
    #[serde(default)]
    pub artists: Option<Vec<NameRef>>,
    #[serde(default)]
    pub artist: Option<NameRef>,
    #[serde(default)]
    pub channel: Option<NameRef>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default, alias = "videoId")]
    pub id: Option<String>,
    #[serde(default)]
    pub album: Option<NameRef>,
}

impl CatalogEntry {
    /// Artist display name; first rule that yields a name wins:
    /// artist list, named artist, plain artist, title prefix before a
    /// hyphen, channel or uploader, then [`UNKNOWN_ARTIST`].
    pub fn artist_display(&self) -> String {
        if let Some(artists) = self.artists.as_ref().filter(|a| !a.is_empty()) {
            return artists
                .iter()
                .map(|a| a.name().unwrap_or("Unknown"))
                .collect::<Vec<_>>()
                .join(", ");
        }
        if let Some(NameRef::Named { name: Some(name) }) = &self.artist {
            if !name.trim().is_empty() {
                return name.clone();
            }
        }
        if let Some(NameRef::Plain(name)) = &self.artist {
            if !name.trim().is_empty() {
                return name.clone();
            }
        }
        if let Some(title) = &self.title {
            if let Some((before, _)) = title.split_once('-') {
                let before = before.trim();
                if !before.is_empty() {
                    return before.to_string();
                }
            }
        }
        if let Some(channel) = self.channel.as_ref().and_then(NameRef::name) {
            return channel.to_string();
        }
        if let Some(uploader) = self.uploader.as_deref().filter(|u| !u.trim().is_empty()) {
            return uploader.to_string();
        }
        UNKNOWN_ARTIST.to_string()
    }

    fn duration_secs(&self) -> Option<u64> {
        self.duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| d.round() as u64)
    }

    pub fn into_search_result(self) -> Option<SearchResult> {
        let external_id = self.id.clone().filter(|id| !id.trim().is_empty())?;
        Some(SearchResult {
            title: self
                .title
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            artist: self.artist_display(),
            duration_secs: self.duration_secs(),
            album: self.album.as_ref().and_then(NameRef::name).map(str::to_string),
            external_id,
        })
    }
}

/// Keep catalog order, drop entries that cannot be fetched, cap at five.
pub fn to_search_results(entries: Vec<CatalogEntry>) -> Vec<SearchResult> {
    entries
        .into_iter()
        .filter_map(CatalogEntry::into_search_result)
        .take(MAX_PENDING_RESULTS)
        .collect()
}

pub fn watch_url(external_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={external_id}")
}

#[async_trait]
pub trait CatalogSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<CatalogEntry>>;
}

/// Catalog backed by yt-dlp's `ytsearch` extractor.
pub struct YtDlpCatalog {
    binary: String,
    timeout: Duration,
}

impl YtDlpCatalog {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl CatalogSearch for YtDlpCatalog {
    async fn search(&self, query: &str) -> Result<Vec<CatalogEntry>> {
        let args: Vec<OsString> = vec![
            "--dump-json".into(),
            "--flat-playlist".into(),
            "--no-warnings".into(),
            format!("ytsearch{MAX_PENDING_RESULTS}:{query}").into(),
        ];
        let output = tokio::time::timeout(self.timeout, run_tool(&self.binary, &args))
            .await
            .map_err(|_| anyhow!("catalog search timed out after {}s", self.timeout.as_secs()))??;
        parse_entries(&output.stdout)
    }
}

/// One JSON object per line.
pub fn parse_entries(stdout: &str) -> Result<Vec<CatalogEntry>> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str::<CatalogEntry>(line)
                .map_err(|e| anyhow!("unparseable catalog entry: {e}"))
        })
        .collect()
}
