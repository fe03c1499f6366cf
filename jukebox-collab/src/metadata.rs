use std::time::Duration;

use async_trait::async_trait;
use jukebox_core::{TrackMetadata, TrackRef};
use log::{debug, warn};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::CollabConfig;

pub const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Failed to fetch metadata: {0}")]
    FetchError(String),

    #[error("Failed to parse metadata: {0}")]
    ParseError(String),

    #[error("Metadata provider rejected the request with status {0}")]
    Rejected(u16),
}

/// Something that can describe tracks given their references.
#[async_trait]
pub trait TrackMetadataProvider
where
    Self: Send + Sync + 'static,
{
    /// Fetches the metadata of a single batch of tracks.
    ///
    /// Tracks the provider doesn't know are left out of the result.
    async fn fetch_many(
        &self,
        track_refs: &[TrackRef],
    ) -> Result<Vec<TrackMetadata>, MetadataError>;
}

/// What a batched fetch got before it finished or gave up
#[derive(Debug, Default)]
pub struct FetchedMetadata {
    pub tracks: Vec<TrackMetadata>,
    /// The failure of the batch that stopped the fetch, later batches are not requested
    pub error: Option<MetadataError>,
}

/// Fetches metadata for any number of tracks, in paced batches.
///
/// Each batch is attempted up to `attempts` times, waiting longer after every failure.
/// Batches fetched before a failure are kept.
pub async fn fetch_in_batches(
    provider: &dyn TrackMetadataProvider,
    track_refs: &[TrackRef],
    config: &CollabConfig,
    attempts: u32,
) -> FetchedMetadata {
    let mut fetched = FetchedMetadata::default();

    for (index, batch) in track_refs.chunks(config.batch_size()).enumerate() {
        if index > 0 {
            tokio::time::sleep(config.metadata_batch_pacing).await;
        }

        match fetch_with_retry(provider, batch, config, attempts).await {
            Ok(tracks) => fetched.tracks.extend(tracks),
            Err(e) => {
                fetched.error = Some(e);
                break;
            }
        }
    }

    fetched
}

async fn fetch_with_retry(
    provider: &dyn TrackMetadataProvider,
    batch: &[TrackRef],
    config: &CollabConfig,
    attempts: u32,
) -> Result<Vec<TrackMetadata>, MetadataError> {
    let mut attempt = 1;

    loop {
        match provider.fetch_many(batch).await {
            Ok(metadata) => return Ok(metadata),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                let delay = config.retry_delay(attempt);
                warn!(
                    "Metadata batch of {} failed ({}), retrying in {:?}",
                    batch.len(),
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Fetches metadata from the Spotify Web API, or anything speaking its `/tracks` dialect.
pub struct SpotifyMetadataProvider {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct TrackList {
    tracks: Vec<Option<Track>>,
}

#[derive(Debug, Deserialize)]
struct Track {
    id: String,
    name: String,
    duration_ms: u64,
    artists: Vec<Artist>,
    album: Album,
}

#[derive(Debug, Deserialize)]
struct Artist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Album {
    images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct Image {
    url: String,
}

impl From<Track> for TrackMetadata {
    fn from(track: Track) -> Self {
        Self {
            track_ref: TrackRef::new(track.id),
            title: track.name,
            artists: track.artists.into_iter().map(|a| a.name).collect(),
            duration_ms: track.duration_ms,
            // The largest image comes first
            cover_url: track.album.images.into_iter().next().map(|i| i.url),
        }
    }
}

impl SpotifyMetadataProvider {
    /// Creates a provider whose requests give up after `timeout`.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MetadataError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MetadataError::FetchError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }
}

#[async_trait]
impl TrackMetadataProvider for SpotifyMetadataProvider {
    async fn fetch_many(
        &self,
        track_refs: &[TrackRef],
    ) -> Result<Vec<TrackMetadata>, MetadataError> {
        if track_refs.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<_> = track_refs.iter().map(TrackRef::as_str).collect();
        let url = format!("{}/tracks", self.base_url);

        debug!("Fetching metadata for {} tracks", ids.len());

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(&[("ids", ids.join(","))])
            .send()
            .await
            .map_err(|e| MetadataError::FetchError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(handle_unsuccessful_request(response, status).await);
        }

        let list: TrackList = response
            .json()
            .await
            .map_err(|e| MetadataError::ParseError(e.to_string()))?;

        // Unknown ids come back as nulls, in the position they were requested
        Ok(list
            .tracks
            .into_iter()
            .zip(track_refs)
            .filter_map(|(track, track_ref)| {
                if track.is_none() {
                    debug!("Track {} is unknown to the provider", track_ref);
                }

                track.map(TrackMetadata::from)
            })
            .collect())
    }
}

async fn handle_unsuccessful_request(response: Response, status: StatusCode) -> MetadataError {
    let body = response.text().await.unwrap_or_default();
    warn!("Metadata request failed with {}: {}", status, body);

    MetadataError::Rejected(status.as_u16())
}
