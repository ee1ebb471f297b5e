//! Ranking source: a daily chart CSV feed resolved into catalog tracks.
//!
//! The chart only carries titles and track urls, so every refresh turns the
//! embedded ids into full [`Track`]s (with artist ids) through the catalog
//! client. Results stay cached until a caller asks for a forced refresh.

use crate::api::spotify::CatalogClient;
use crate::config::Config;
use crate::error::Result;
use crate::models::{Artist, RankingEntry, Track};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Ordered candidate tracks for reconciliation.
#[async_trait]
pub trait RankingSource: Send + Sync {
    /// Tracks in chart order. Ordering is stable between calls unless
    /// `force_refresh` pulls a new chart.
    async fn tracks(&self, force_refresh: bool) -> Result<Vec<Track>>;
}

/// Artists of `tracks`, de-duplicated by id in first-seen order.
pub fn unique_artists(tracks: &[Track]) -> Vec<Artist> {
    let mut seen = HashSet::new();
    let mut artists = Vec::new();
    for artist in tracks.iter().flat_map(|t| t.artists.iter()) {
        if seen.insert(artist.id.as_str()) {
            artists.push(artist.clone());
        }
    }
    artists
}

/// Split one CSV line, honouring double-quoted fields and `""` escapes.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                cur.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut cur)),
            _ => cur.push(c),
        }
    }
    fields.push(cur);
    fields
}

/// Parse the chart download: a note line and a header line, then
/// `rank,title,artist,count,url` rows. Short or malformed rows are skipped.
pub fn parse_chart_csv(text: &str) -> Vec<RankingEntry> {
    let mut entries = Vec::new();
    for line in text.lines().skip(2) {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let row = split_csv_line(line);
        if row.len() < 5 {
            continue;
        }
        let (rank, count) = match (row[0].trim().parse::<u32>(), row[3].trim().parse::<u64>()) {
            (Ok(r), Ok(c)) => (r, c),
            _ => {
                debug!("Skipping malformed chart row: {}", line);
                continue;
            }
        };
        entries.push(RankingEntry {
            rank,
            title: row[1].clone(),
            artist: row[2].clone(),
            count,
            url: row[4].trim().to_string(),
        });
    }
    entries
}

/// Downloads the chart CSV.
pub struct ChartFeed {
    client: Client,
    url: String,
}

impl ChartFeed {
    pub fn new(url: String) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }

    pub async fn fetch(&self) -> Result<Vec<RankingEntry>> {
        let resp = self.client.get(&self.url).send().await?;
        let resp = crate::api::spotify::check_response(resp).await?;
        let text = resp.text().await?;
        let entries = parse_chart_csv(&text);
        info!("Fetched {} chart entries", entries.len());
        Ok(entries)
    }
}

#[derive(Default)]
struct Cached {
    entries: Vec<RankingEntry>,
    tracks: Vec<Track>,
}

/// Chart feed + catalog lookup with an in-memory cache.
pub struct ChartRanking {
    feed: ChartFeed,
    catalog: CatalogClient,
    cache: tokio::sync::Mutex<Option<Cached>>,
}

impl ChartRanking {
    pub fn new(feed: ChartFeed, catalog: CatalogClient) -> Self {
        Self {
            feed,
            catalog,
            cache: tokio::sync::Mutex::new(None),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            ChartFeed::new(cfg.ranking_url.clone()),
            CatalogClient::from_config(cfg),
        )
    }

    async fn refresh(&self) -> Result<Cached> {
        let entries = self.feed.fetch().await?;
        let mut ids = Vec::with_capacity(entries.len());
        for e in &entries {
            match e.track_id() {
                Some(id) => ids.push(id.to_string()),
                None => warn!("Chart entry #{} has no track id in url {:?}", e.rank, e.url),
            }
        }
        let tracks = self.catalog.get_several_tracks(&ids).await?;
        Ok(Cached { entries, tracks })
    }

    /// Run `f` against the cache, refreshing first when empty or forced.
    async fn with_cache<T>(&self, force_refresh: bool, f: impl FnOnce(&Cached) -> T) -> Result<T> {
        let mut lock = self.cache.lock().await;
        let stale = match &*lock {
            None => true,
            Some(c) => force_refresh || c.tracks.is_empty(),
        };
        if stale {
            *lock = Some(self.refresh().await?);
        }
        let cached = lock.get_or_insert_with(Cached::default);
        Ok(f(cached))
    }

    pub async fn entries(&self, force_refresh: bool) -> Result<Vec<RankingEntry>> {
        self.with_cache(force_refresh, |c| c.entries.clone()).await
    }

    pub async fn artists(&self, force_refresh: bool) -> Result<Vec<Artist>> {
        self.with_cache(force_refresh, |c| unique_artists(&c.tracks)).await
    }
}

#[async_trait]
impl RankingSource for ChartRanking {
    async fn tracks(&self, force_refresh: bool) -> Result<Vec<Track>> {
        self.with_cache(force_refresh, |c| c.tracks.clone()).await
    }
}
