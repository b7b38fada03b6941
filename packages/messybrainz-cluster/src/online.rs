//! Online clusterer: the per-listen protocol (spec §4.D).
//!
//! Blocks R, A, and Rl each run in their own transaction when they are a
//! top-level block of the listen. Block R's derived artist-credit/release
//! sub-blocks (triggered when the listen itself has no `artist_mbids` /
//! `release_mbid`) run inside Block R's own transaction instead of opening
//! a fresh one (spec §5: "its Block-R-derived sub-blocks run inside its
//! transaction"). An integrity or missing-data or bad-input failure inside
//! a block is swallowed there and does not prevent the other blocks, or the
//! worker's downstream publish, from running (spec §7 propagation policy).

use std::sync::Arc;

use messybrainz_core::{ClusterError, EntityKind, Listen, MbidKey, Msid};
use tracing::warn;
use uuid::Uuid;

use crate::canonicalizer::Canonicalizer;
use crate::metadata_client::{MetadataClient, MetadataError};
use crate::store::{ClusterStore, ClusterStoreFactory};

/// Runs spec §4.D against a [`ClusterStoreFactory`], [`Canonicalizer`], and
/// [`MetadataClient`].
pub struct OnlineClusterer<F> {
    store: F,
    canonicalizer: Arc<dyn Canonicalizer>,
    metadata: Arc<dyn MetadataClient>,
}

impl<F: ClusterStoreFactory> OnlineClusterer<F> {
    pub fn new(
        store: F,
        canonicalizer: Arc<dyn Canonicalizer>,
        metadata: Arc<dyn MetadataClient>,
    ) -> Self {
        Self {
            store,
            canonicalizer,
            metadata,
        }
    }

    /// Processes one listen. Never returns an error for clustering-domain
    /// failures (those are swallowed per block, per spec §7) -- only a
    /// broker- or store-initialization-level failure surfaces, and this
    /// protocol touches neither, so the return type is infallible in
    /// practice; it stays `Result` to mirror the teacher's fallible-by-
    /// convention async methods and leave room for a future transport-level
    /// failure mode.
    pub async fn process(&self, listen: &Listen) -> Result<(), ClusterError> {
        if let Some(recording_mbid) = listen.recording_mbid {
            self.run_block_r(listen, recording_mbid).await;
        }
        if let Some(artist_mbids) = listen.artist_mbids.clone() {
            self.run_block_a(&listen.artist, artist_mbids).await;
        }
        if let (Some(release_mbid), Some(release)) = (listen.release_mbid, listen.release.as_deref()) {
            self.run_block_rl(release, release_mbid).await;
        }
        Ok(())
    }

    async fn run_block_r(&self, listen: &Listen, recording_mbid: Uuid) {
        let outcome = self.try_block_r(listen, recording_mbid).await;
        if let Err(err) = outcome {
            if err.is_block_local() {
                warn!(error = %err, "block R skipped for this listen");
            }
        }
    }

    async fn try_block_r(&self, listen: &Listen, recording_mbid: Uuid) -> Result<(), ClusterError> {
        let msid_r = self
            .canonicalizer
            .recording_msid(&listen.artist, listen.title.as_deref().unwrap_or(""), listen.release.as_deref())
            .await;

        let mut tx = self.store.begin().await?;
        let mbid_key = MbidKey::Single(recording_mbid);
        let result = async {
            match tx
                .lookup_cluster_by_mbid(EntityKind::Recording, &mbid_key)
                .await?
            {
                Some(cluster_id) => {
                    tx.insert_membership(EntityKind::Recording, cluster_id, &[msid_r])
                        .await?;
                }
                None => {
                    tx.insert_membership(EntityKind::Recording, msid_r, &[msid_r])
                        .await?;
                    tx.link_mbid(EntityKind::Recording, msid_r, &mbid_key).await?;
                }
            }
            tx.record_listen(EntityKind::Recording, msid_r, Some(&mbid_key))
                .await?;

            // Derived sub-blocks run inside Block R's own transaction (spec
            // §5: "its Block-R-derived sub-blocks run inside its
            // transaction"), not in separately opened ones.
            if listen.artist_mbids.is_none() {
                if let Err(err) = self.run_derived_artist_credit(&mut tx, listen, recording_mbid).await {
                    warn!(error = %err, "derived artist-credit block skipped");
                }
            }
            if listen.release.is_some() && listen.release_mbid.is_none() {
                if let Err(err) = self.run_derived_release(&mut tx, listen, recording_mbid).await {
                    warn!(error = %err, "derived release block skipped");
                }
            }

            Ok::<_, ClusterError>(())
        }
        .await;
        self.store.commit(tx).await?;
        result
    }

    async fn run_derived_artist_credit(
        &self,
        tx: &mut F::Tx,
        listen: &Listen,
        recording_mbid: Uuid,
    ) -> Result<(), ClusterError> {
        let artist_mbids = match self.metadata.artist_mbids_for(recording_mbid).await {
            Ok(mbids) => mbids,
            Err(MetadataError::NoData(_)) => return Ok(()),
            Err(err) => return Err(ClusterError::MissingMetadata(err.to_string())),
        };
        self.block_a_on_tx(tx, &listen.artist, artist_mbids).await
    }

    async fn run_derived_release(
        &self,
        tx: &mut F::Tx,
        listen: &Listen,
        recording_mbid: Uuid,
    ) -> Result<(), ClusterError> {
        let release_text = listen.release.as_deref().unwrap_or_default();
        let releases = match self.metadata.releases_for(recording_mbid).await {
            Ok(releases) => releases,
            Err(MetadataError::NoData(_)) => return Ok(()),
            Err(err) => return Err(ClusterError::MissingMetadata(err.to_string())),
        };
        for candidate in releases.into_iter().filter(|candidate| candidate.name == release_text) {
            if let Err(err) = self.block_rl_on_tx(tx, release_text, candidate.id).await {
                warn!(error = %err, "derived release sub-block skipped");
            }
        }
        Ok(())
    }

    async fn run_block_a(&self, artist_text: &str, artist_mbids: Vec<Uuid>) {
        if let Err(err) = self.try_block_a(artist_text, artist_mbids).await {
            if err.is_block_local() {
                warn!(error = %err, "block A skipped for this listen");
            }
        }
    }

    /// Runs Block A as its own transaction -- used when artist-credit is a
    /// top-level block of the listen (spec §4.D Block A), never when it is
    /// derived from Block R (see [`Self::block_a_on_tx`]).
    async fn try_block_a(&self, artist_text: &str, artist_mbids: Vec<Uuid>) -> Result<(), ClusterError> {
        let mut tx = self.store.begin().await?;
        let result = self.block_a_on_tx(&mut tx, artist_text, artist_mbids).await;
        self.store.commit(tx).await?;
        result
    }

    /// Block A's operations against an already-open transaction, shared by
    /// the standalone Block A and Block R's derived artist-credit sub-block.
    async fn block_a_on_tx(
        &self,
        tx: &mut F::Tx,
        artist_text: &str,
        artist_mbids: Vec<Uuid>,
    ) -> Result<(), ClusterError> {
        let mbid_key = MbidKey::artist_credit(artist_mbids);
        let msid_a = self.canonicalizer.artist_credit_msid(artist_text).await;

        match tx
            .lookup_cluster_by_mbid(EntityKind::ArtistCredit, &mbid_key)
            .await?
        {
            Some(cluster_id) => {
                tx.insert_membership(EntityKind::ArtistCredit, cluster_id, &[msid_a])
                    .await?;
            }
            None => {
                tx.insert_membership(EntityKind::ArtistCredit, msid_a, &[msid_a])
                    .await?;
                tx.link_mbid(EntityKind::ArtistCredit, msid_a, &mbid_key)
                    .await?;
            }
        }
        tx.record_listen(EntityKind::ArtistCredit, msid_a, Some(&mbid_key))
            .await?;
        Ok(())
    }

    async fn run_block_rl(&self, release_text: &str, release_mbid: Uuid) {
        if let Err(err) = self.try_block_rl(release_text, release_mbid).await {
            if err.is_block_local() {
                warn!(error = %err, "block Rl skipped for this listen");
            }
        }
    }

    /// Runs Block Rl as its own transaction -- used when release is a
    /// top-level block of the listen (spec §4.D Block Rl), never when it is
    /// derived from Block R (see [`Self::block_rl_on_tx`]).
    async fn try_block_rl(&self, release_text: &str, release_mbid: Uuid) -> Result<(), ClusterError> {
        let mut tx = self.store.begin().await?;
        let result = self.block_rl_on_tx(&mut tx, release_text, release_mbid).await;
        self.store.commit(tx).await?;
        result
    }

    /// Block Rl's operations against an already-open transaction, shared by
    /// the standalone Block Rl and Block R's derived release sub-block.
    async fn block_rl_on_tx(
        &self,
        tx: &mut F::Tx,
        release_text: &str,
        release_mbid: Uuid,
    ) -> Result<(), ClusterError> {
        let mbid_key = MbidKey::Single(release_mbid);
        let msid_rl = self.canonicalizer.release_msid(release_text).await;

        match tx.lookup_cluster_by_mbid(EntityKind::Release, &mbid_key).await? {
            Some(cluster_id) => {
                tx.insert_membership(EntityKind::Release, cluster_id, &[msid_rl])
                    .await?;
            }
            None => {
                tx.insert_membership(EntityKind::Release, msid_rl, &[msid_rl])
                    .await?;
                tx.link_mbid(EntityKind::Release, msid_rl, &mbid_key).await?;
            }
        }
        tx.record_listen(EntityKind::Release, msid_rl, Some(&mbid_key))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonicalizer::UuidV5Canonicalizer;
    use crate::store::memory::MemoryStore;
    use messybrainz_core::ReleaseCandidate;

    struct StubMetadataClient {
        artist_mbids: Vec<Uuid>,
        releases: Vec<ReleaseCandidate>,
    }

    #[async_trait::async_trait]
    impl MetadataClient for StubMetadataClient {
        async fn artist_mbids_for(&self, _recording_mbid: Uuid) -> Result<Vec<Uuid>, MetadataError> {
            if self.artist_mbids.is_empty() {
                Err(MetadataError::NoData(Uuid::nil()))
            } else {
                Ok(self.artist_mbids.clone())
            }
        }

        async fn releases_for(&self, _recording_mbid: Uuid) -> Result<Vec<ReleaseCandidate>, MetadataError> {
            if self.releases.is_empty() {
                Err(MetadataError::NoData(Uuid::nil()))
            } else {
                Ok(self.releases.clone())
            }
        }
    }

    fn listen(body: &str) -> Listen {
        Listen::parse(body.as_bytes()).unwrap()
    }

    fn clusterer(metadata: StubMetadataClient) -> (OnlineClusterer<MemoryStore>, MemoryStore) {
        let store = MemoryStore::new();
        let clusterer = OnlineClusterer::new(
            store.clone(),
            Arc::new(UuidV5Canonicalizer::new()),
            Arc::new(metadata),
        );
        (clusterer, store)
    }

    #[tokio::test]
    async fn s1_fresh_recording_creates_cluster_and_redirect() {
        let (clusterer, store) = clusterer(StubMetadataClient {
            artist_mbids: vec![],
            releases: vec![],
        });
        let r1 = Uuid::parse_str("00000000-0000-0000-0000-0000000000a1").unwrap();
        let l = listen(&format!(r#"{{"artist":"A","title":"T","recording_mbid":"{r1}"}}"#));

        clusterer.process(&l).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let cluster = tx
            .lookup_cluster_by_mbid(EntityKind::Recording, &MbidKey::Single(r1))
            .await
            .unwrap();
        assert!(cluster.is_some());

        // Re-processing the identical listen must not create a second cluster.
        clusterer.process(&l).await.unwrap();
        let cluster_again = tx
            .lookup_cluster_by_mbid(EntityKind::Recording, &MbidKey::Single(r1))
            .await
            .unwrap();
        assert_eq!(cluster, cluster_again);
    }

    #[tokio::test]
    async fn s2_second_listen_joins_existing_recording_cluster() {
        let (clusterer, store) = clusterer(StubMetadataClient {
            artist_mbids: vec![],
            releases: vec![],
        });
        let r1 = Uuid::parse_str("00000000-0000-0000-0000-0000000000a1").unwrap();
        let first = listen(&format!(r#"{{"artist":"A","title":"T","recording_mbid":"{r1}"}}"#));
        let second = listen(&format!(
            r#"{{"artist":"A","title":"T ","recording_mbid":"{r1}"}}"#
        ));

        clusterer.process(&first).await.unwrap();
        clusterer.process(&second).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let cluster_id = tx
            .lookup_cluster_by_mbid(EntityKind::Recording, &MbidKey::Single(r1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            tx.lookup_cluster_by_msid(EntityKind::Recording, cluster_id)
                .await
                .unwrap(),
            Some(cluster_id)
        );
    }

    #[tokio::test]
    async fn s3_artist_credit_order_independent() {
        let (clusterer, store) = clusterer(StubMetadataClient {
            artist_mbids: vec![],
            releases: vec![],
        });
        let a = Uuid::parse_str("00000000-0000-0000-0000-00000000000a").unwrap();
        let b = Uuid::parse_str("00000000-0000-0000-0000-00000000000b").unwrap();
        let forward = listen(&format!(
            r#"{{"artist":"X & Y","artist_mbids":["{a}","{b}"]}}"#
        ));
        let reverse = listen(&format!(
            r#"{{"artist":"X & Y","artist_mbids":["{b}","{a}"]}}"#
        ));

        clusterer.process(&forward).await.unwrap();
        clusterer.process(&reverse).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let key = MbidKey::artist_credit(vec![a, b]);
        let cluster_id = tx
            .lookup_cluster_by_mbid(EntityKind::ArtistCredit, &key)
            .await
            .unwrap();
        assert!(cluster_id.is_some());
    }

    #[tokio::test]
    async fn s5_derived_artist_credit_from_metadata_lookup() {
        let z1 = Uuid::parse_str("00000000-0000-0000-0000-00000000002a").unwrap();
        let (clusterer, store) = clusterer(StubMetadataClient {
            artist_mbids: vec![z1],
            releases: vec![],
        });
        let r5 = Uuid::parse_str("00000000-0000-0000-0000-0000000000b5").unwrap();
        let l = listen(&format!(r#"{{"artist":"Z","title":"Q","recording_mbid":"{r5}"}}"#));

        clusterer.process(&l).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let key = MbidKey::artist_credit(vec![z1]);
        let cluster_id = tx
            .lookup_cluster_by_mbid(EntityKind::ArtistCredit, &key)
            .await
            .unwrap();
        assert!(cluster_id.is_some(), "derived artist-credit redirect must be created");
    }

    #[tokio::test]
    async fn missing_metadata_does_not_fail_the_whole_listen() {
        let (clusterer, store) = clusterer(StubMetadataClient {
            artist_mbids: vec![],
            releases: vec![],
        });
        let r1 = Uuid::parse_str("00000000-0000-0000-0000-0000000000c1").unwrap();
        let l = listen(&format!(r#"{{"artist":"A","title":"T","recording_mbid":"{r1}"}}"#));

        clusterer.process(&l).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx
            .lookup_cluster_by_mbid(EntityKind::Recording, &MbidKey::Single(r1))
            .await
            .unwrap()
            .is_some());
    }
}
