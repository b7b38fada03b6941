//! MusicBrainz metadata client (spec §2 row B): given a recording MBID,
//! return artist MBIDs and candidate releases.

use async_trait::async_trait;
use messybrainz_core::ReleaseCandidate;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

/// Failure modes a metadata lookup can report. Both variants are folded into
/// [`messybrainz_core::ClusterError::MissingMetadata`] by the caller and
/// swallowed at the block boundary (spec §4.D "any missing-data or
/// integrity failure here is swallowed") -- a derived lookup failing never
/// aborts the rest of the listen.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("no metadata for recording {0}")]
    NoData(Uuid),
    #[error("metadata client transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Recording-MBID-keyed metadata lookups, standing in for the source's
/// external MusicBrainz read replica.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn artist_mbids_for(&self, recording_mbid: Uuid) -> Result<Vec<Uuid>, MetadataError>;
    async fn releases_for(&self, recording_mbid: Uuid)
        -> Result<Vec<ReleaseCandidate>, MetadataError>;
}

#[derive(Debug, Deserialize)]
struct ArtistMbidsResponse {
    artist_mbids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
struct ReleasesResponse {
    releases: Vec<ReleaseCandidate>,
}

/// Thin `reqwest`-based client against a MusicBrainz-compatible HTTP lookup
/// surface. Kept deliberately small: two GETs and a JSON decode, since the
/// real metadata service's schema is out of scope here.
pub struct HttpMetadataClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpMetadataClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MetadataClient for HttpMetadataClient {
    async fn artist_mbids_for(&self, recording_mbid: Uuid) -> Result<Vec<Uuid>, MetadataError> {
        let url = format!("{}/recording/{recording_mbid}/artist-mbids", self.base_url);
        let response = self.http.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(MetadataError::NoData(recording_mbid));
        }
        let body: ArtistMbidsResponse = response.error_for_status()?.json().await?;
        if body.artist_mbids.is_empty() {
            return Err(MetadataError::NoData(recording_mbid));
        }
        Ok(body.artist_mbids)
    }

    async fn releases_for(
        &self,
        recording_mbid: Uuid,
    ) -> Result<Vec<ReleaseCandidate>, MetadataError> {
        let url = format!("{}/recording/{recording_mbid}/releases", self.base_url);
        let response = self.http.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(MetadataError::NoData(recording_mbid));
        }
        let body: ReleasesResponse = response.error_for_status()?.json().await?;
        if body.releases.is_empty() {
            return Err(MetadataError::NoData(recording_mbid));
        }
        Ok(body.releases)
    }
}
