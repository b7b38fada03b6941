//! Domain types for the clustering engine: entities, identifiers, and the
//! wire-format listen record.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The three entity types the cluster store tracks independently.
///
/// See spec §3: recording, artist-credit, and release clusters never
/// influence each other directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Recording,
    ArtistCredit,
    Release,
}

impl EntityKind {
    /// Base name used to derive table names (`{base}_cluster`, `{base}_redirect`, ...).
    #[must_use]
    pub fn table_prefix(self) -> &'static str {
        match self {
            EntityKind::Recording => "recording",
            EntityKind::ArtistCredit => "artist_credit",
            EntityKind::Release => "release",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_prefix())
    }
}

/// MessyBrainz ID: a UUID canonically derived from a normalized text tuple.
///
/// Stable across time for identical input (spec invariant 4: cluster_id
/// values are always existing MSIDs, never freshly minted UUIDs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Msid(pub Uuid);

impl Msid {
    #[must_use]
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for Msid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Authoritative identity key stored in an `E_redirect` row.
///
/// For recording/release this is a single MBID. For artist-credit it is the
/// sorted sequence of member artist MBIDs — two credits are equal iff their
/// sorted sequences are identical (spec §3, §9 "Artist-credit MBID-set key").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MbidKey {
    Single(Uuid),
    ArtistCredit(Vec<Uuid>),
}

impl MbidKey {
    /// Builds an artist-credit key, sorting the member MBIDs so that
    /// `[X, Y]` and `[Y, X]` produce an identical key (spec §4.D, invariant 5,
    /// S3).
    #[must_use]
    pub fn artist_credit(mut mbids: Vec<Uuid>) -> Self {
        mbids.sort_unstable();
        MbidKey::ArtistCredit(mbids)
    }

    /// The member MBIDs as a sorted slice, for callers needing the raw
    /// sequence (e.g. persisting a `UUID[]` column).
    #[must_use]
    pub fn as_artist_mbids(&self) -> Option<&[Uuid]> {
        match self {
            MbidKey::ArtistCredit(mbids) => Some(mbids),
            MbidKey::Single(_) => None,
        }
    }

    #[must_use]
    pub fn as_single(&self) -> Option<Uuid> {
        match self {
            MbidKey::Single(mbid) => Some(*mbid),
            MbidKey::ArtistCredit(_) => None,
        }
    }
}

/// A candidate release returned by the metadata client for a recording MBID.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseCandidate {
    pub id: Uuid,
    pub name: String,
}

/// One ingested listen, as recognized by the online clustering protocol
/// (spec §4.D). Unknown JSON fields are ignored; `raw` retains the
/// bitwise-original body for downstream republication (spec §4.F, property 6).
#[derive(Debug, Clone)]
pub struct Listen {
    pub artist: String,
    pub title: Option<String>,
    pub release: Option<String>,
    pub recording_mbid: Option<Uuid>,
    pub artist_mbids: Option<Vec<Uuid>>,
    pub release_mbid: Option<Uuid>,
    /// The exact bytes this listen was decoded from.
    pub raw: Vec<u8>,
}

/// Wire representation of a listen, deserialized from the ingest queue body.
///
/// Kept separate from [`Listen`] so that `raw` bytes and typed fields never
/// drift: `ListenPayload::parse` is the only place JSON is decoded.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenPayload {
    pub artist: String,
    pub title: Option<String>,
    pub release: Option<String>,
    pub recording_mbid: Option<Uuid>,
    pub artist_mbids: Option<Vec<Uuid>>,
    pub release_mbid: Option<Uuid>,
}

impl Listen {
    /// Parses a listen body, retaining the original bytes for later
    /// bit-identical republication.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` on malformed JSON. The online path
    /// swallows this as "bad input" (spec §7); the HTTP submit path (out of
    /// scope here) rejects it with 400.
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        let payload: ListenPayload = serde_json::from_slice(body)?;
        Ok(Self {
            artist: payload.artist,
            title: payload.title,
            release: payload.release,
            recording_mbid: payload.recording_mbid,
            artist_mbids: payload.artist_mbids,
            release_mbid: payload.release_mbid,
            raw: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artist_credit_key_is_order_independent() {
        let a = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        let b = Uuid::parse_str("00000000-0000-0000-0000-000000000002").unwrap();

        let forward = MbidKey::artist_credit(vec![a, b]);
        let reverse = MbidKey::artist_credit(vec![b, a]);
        assert_eq!(forward, reverse);
    }

    #[test]
    fn listen_parse_keeps_raw_bytes() {
        let body = br#"{"artist":"A","title":"T","unused":123}"#;
        let listen = Listen::parse(body).unwrap();
        assert_eq!(listen.artist, "A");
        assert_eq!(listen.title.as_deref(), Some("T"));
        assert_eq!(listen.raw, body);
    }

    #[test]
    fn listen_parse_rejects_malformed_json() {
        assert!(Listen::parse(b"not json").is_err());
    }

    #[test]
    fn table_prefix_matches_entity() {
        assert_eq!(EntityKind::Recording.table_prefix(), "recording");
        assert_eq!(EntityKind::ArtistCredit.table_prefix(), "artist_credit");
        assert_eq!(EntityKind::Release.table_prefix(), "release");
    }
}
