//! Canonicalizer: text tuple -> MSID (spec §2 row A).
//!
//! spec.md treats MSID minting as wholly external. [`UuidV5Canonicalizer`]
//! is a concrete, deterministic stand-in so the worker binary is actually
//! runnable end to end; it is not a MusicBrainz-grade name-matching service.

use async_trait::async_trait;
use messybrainz_core::Msid;
use uuid::Uuid;

/// Namespace UUID for the default canonicalizer's UUIDv5 derivation. Fixed
/// so the same text tuple always yields the same MSID across process
/// restarts (spec invariant 4).
const NAMESPACE: Uuid = Uuid::from_bytes([
    0x6d, 0x65, 0x73, 0x73, 0x79, 0x62, 0x72, 0x61, 0x69, 0x6e, 0x7a, 0x63, 0x6c, 0x75, 0x73, 0x74,
]);

/// Turns normalized text tuples into stable MSIDs.
///
/// Mirrors the three canonicalization entry points the source calls
/// `data.get_id_from_recording`, `data.get_artist_credit`, and
/// `data.get_release`.
#[async_trait]
pub trait Canonicalizer: Send + Sync {
    async fn recording_msid(&self, artist: &str, title: &str, release: Option<&str>) -> Msid;
    async fn artist_credit_msid(&self, artist_credit_text: &str) -> Msid;
    async fn release_msid(&self, release_text: &str) -> Msid;
}

/// Deterministic UUIDv5-based canonicalizer.
///
/// Hashes the exact text it is given, byte for byte -- no trimming or case
/// folding. Spec.md's scenario S2 relies on a trailing space changing the
/// canonicalized MSID (`"T"` and `"T "` must hash differently), so this
/// implementation treats text tuples as opaque bytes rather than attempting
/// fuzzy normalization; normalization, if any, belongs upstream of the
/// canonicalizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidV5Canonicalizer;

impl UuidV5Canonicalizer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn msid_for(parts: &[&str]) -> Msid {
        let joined = parts.join("\u{1f}");
        Msid::new(Uuid::new_v5(&NAMESPACE, joined.as_bytes()))
    }
}

#[async_trait]
impl Canonicalizer for UuidV5Canonicalizer {
    async fn recording_msid(&self, artist: &str, title: &str, release: Option<&str>) -> Msid {
        Self::msid_for(&["recording", artist, title, release.unwrap_or("")])
    }

    async fn artist_credit_msid(&self, artist_credit_text: &str) -> Msid {
        Self::msid_for(&["artist_credit", artist_credit_text])
    }

    async fn release_msid(&self, release_text: &str) -> Msid {
        Self::msid_for(&["release", release_text])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_input_yields_same_msid() {
        let canon = UuidV5Canonicalizer::new();
        let a = canon.recording_msid("A", "T", None).await;
        let b = canon.recording_msid("A", "T", None).await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn trailing_space_changes_the_msid() {
        let canon = UuidV5Canonicalizer::new();
        let a = canon.recording_msid("A", "T", None).await;
        let b = canon.recording_msid("A", "T ", None).await;
        assert_ne!(a, b, "S2 requires a trailing space to yield a distinct MSID");
    }

    #[tokio::test]
    async fn artist_credit_and_release_are_distinct_namespaces() {
        let canon = UuidV5Canonicalizer::new();
        let artist = canon.artist_credit_msid("Same Text").await;
        let release = canon.release_msid("Same Text").await;
        assert_ne!(artist, release);
    }
}
