//! Batch rebuilder: two-phase bulk reclustering per entity (spec §4.E).
//!
//! Phase 1 rebuilds clusters ignoring anomalies; phase 2 is the only place
//! the "one MBID maps to several cluster_ids" situation is introduced.

use messybrainz_core::{ClusterError, EntityKind};
use tracing::debug;

use crate::store::{ClusterStore, ClusterStoreFactory};

/// Summary counters returned by a rebuild run, mirroring the source's
/// `_print_debug_info` bookkeeping (SPEC_FULL.md "debug-level cluster
/// introspection").
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RebuildStats {
    pub clusters_modified: u64,
    pub clusters_added_to_redirect: u64,
    pub anomalies_linked: u64,
}

/// Runs spec §4.E's two phases against a [`ClusterStoreFactory`].
pub struct BatchRebuilder<F> {
    store: F,
}

impl<F: ClusterStoreFactory> BatchRebuilder<F> {
    pub fn new(store: F) -> Self {
        Self { store }
    }

    /// Rebuilds `entity`'s clusters from the listen store, running phase 1
    /// then phase 2 on the same connection.
    pub async fn rebuild(&self, entity: EntityKind) -> Result<RebuildStats, ClusterError> {
        let mut stats = RebuildStats::default();
        self.phase1_without_anomalies(entity, &mut stats).await?;
        self.phase2_anomalies(entity, &mut stats).await?;
        debug!(
            entity = %entity,
            clusters_modified = stats.clusters_modified,
            clusters_added_to_redirect = stats.clusters_added_to_redirect,
            anomalies_linked = stats.anomalies_linked,
            "batch rebuild complete"
        );
        Ok(stats)
    }

    async fn phase1_without_anomalies(
        &self,
        entity: EntityKind,
        stats: &mut RebuildStats,
    ) -> Result<(), ClusterError> {
        let mut tx = self.store.begin().await?;
        let mbid_keys = tx.fetch_unclustered_mbid_keys(entity).await?;
        for mbid_key in &mbid_keys {
            let gids = tx.fetch_unclustered_gids_for(entity, mbid_key).await?;
            if gids.is_empty() {
                continue;
            }
            let cluster_id = match tx.lookup_cluster_by_mbid(entity, mbid_key).await? {
                Some(existing) => existing,
                None => {
                    let representative = gids[0];
                    tx.link_mbid(entity, representative, mbid_key).await?;
                    stats.clusters_added_to_redirect += 1;
                    representative
                }
            };
            tx.insert_membership(entity, cluster_id, &gids).await?;
            stats.clusters_modified += 1;
            debug!(entity = %entity, cluster_id = %cluster_id, members = gids.len(), "phase 1 cluster formed");
        }
        self.store.commit(tx).await
    }

    async fn phase2_anomalies(
        &self,
        entity: EntityKind,
        stats: &mut RebuildStats,
    ) -> Result<(), ClusterError> {
        let mut tx = self.store.begin().await?;
        let leftover_keys = tx.fetch_mbid_keys_left_over(entity).await?;
        for mbid_key in &leftover_keys {
            let gids = tx.gids_for_mbid_key(entity, mbid_key).await?;
            let mut cluster_ids = Vec::new();
            for gid in &gids {
                if let Some(cluster_id) = tx.lookup_cluster_by_msid(entity, *gid).await? {
                    if !cluster_ids.contains(&cluster_id) {
                        cluster_ids.push(cluster_id);
                    }
                }
            }
            for cluster_id in &cluster_ids {
                tx.link_mbid(entity, *cluster_id, mbid_key).await?;
                stats.clusters_added_to_redirect += 1;
                stats.anomalies_linked += 1;
            }
            debug!(
                entity = %entity,
                clusters = cluster_ids.len(),
                "phase 2 anomaly resolved"
            );
        }
        self.store.commit(tx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonicalizer::{Canonicalizer, UuidV5Canonicalizer};
    use crate::store::memory::MemoryStore;
    use messybrainz_core::{MbidKey, Msid};
    use uuid::Uuid;

    async fn seed_listen(store: &MemoryStore, canon: &UuidV5Canonicalizer, artist: &str, title: &str, mbid: Uuid) -> Msid {
        let gid = canon.recording_msid(artist, title, None).await;
        let mut tx = store.begin().await.unwrap();
        tx.record_listen(EntityKind::Recording, gid, Some(&MbidKey::Single(mbid)))
            .await
            .unwrap();
        store.commit(tx).await.unwrap();
        gid
    }

    #[tokio::test]
    async fn phase1_elects_first_gid_as_representative() {
        let store = MemoryStore::new();
        let canon = UuidV5Canonicalizer::new();
        let r1 = Uuid::parse_str("00000000-0000-0000-0000-00000000aaaa").unwrap();
        let gid = seed_listen(&store, &canon, "A", "T", r1).await;

        let rebuilder = BatchRebuilder::new(store.clone());
        let stats = rebuilder.rebuild(EntityKind::Recording).await.unwrap();
        assert_eq!(stats.clusters_modified, 1);
        assert_eq!(stats.clusters_added_to_redirect, 1);

        let mut tx = store.begin().await.unwrap();
        let cluster_id = tx
            .lookup_cluster_by_mbid(EntityKind::Recording, &MbidKey::Single(r1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cluster_id, gid);
    }

    #[tokio::test]
    async fn s6_anomaly_phase_links_second_mbid_to_same_cluster() {
        let store = MemoryStore::new();
        let canon = UuidV5Canonicalizer::new();
        let r_a = Uuid::parse_str("00000000-0000-0000-0000-00000000a1a1").unwrap();
        let r_b = Uuid::parse_str("00000000-0000-0000-0000-00000000b2b2").unwrap();

        // Both listens canonicalize to the identical MSID: "Same" text tuple.
        seed_listen(&store, &canon, "A", "Same", r_a).await;
        seed_listen(&store, &canon, "A", "Same", r_b).await;

        let rebuilder = BatchRebuilder::new(store.clone());
        let stats = rebuilder.rebuild(EntityKind::Recording).await.unwrap();

        assert_eq!(stats.anomalies_linked, 1, "exactly one of the two MBIDs is resolved in phase 2");

        let mut tx = store.begin().await.unwrap();
        let cluster_a = tx
            .lookup_cluster_by_mbid(EntityKind::Recording, &MbidKey::Single(r_a))
            .await
            .unwrap()
            .unwrap();
        let cluster_b = tx
            .lookup_cluster_by_mbid(EntityKind::Recording, &MbidKey::Single(r_b))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cluster_a, cluster_b, "both MBIDs must redirect to the same cluster_id");
    }

    #[tokio::test]
    async fn rebuild_is_a_pure_function_of_the_gid_set() {
        let store = MemoryStore::new();
        let canon = UuidV5Canonicalizer::new();
        let r1 = Uuid::parse_str("00000000-0000-0000-0000-00000000cccc").unwrap();
        seed_listen(&store, &canon, "A", "T", r1).await;

        let rebuilder = BatchRebuilder::new(store.clone());
        let first = rebuilder.rebuild(EntityKind::Recording).await.unwrap();
        let second = rebuilder.rebuild(EntityKind::Recording).await.unwrap();
        assert_eq!(second.clusters_modified, 0, "second rebuild finds nothing left unclustered");
        assert_eq!(first.clusters_added_to_redirect, 1);
    }
}
