//! In-memory [`ClusterStore`] fake used to exercise the online/batch
//! protocol logic without a live Postgres instance.
//!
//! Mirrors the teacher's `HashMapStorage`/`NullDataStore` test fakes: a
//! straightforward, lock-protected data structure standing in for the real
//! backend, shared via `Arc` so multiple "transactions" can observe each
//! other's committed writes the way concurrent Postgres sessions would.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use messybrainz_core::{ClusterError, EntityKind, MbidKey, Msid};

use super::{ClusterStore, ClusterStoreFactory};

#[derive(Default)]
struct EntityTables {
    /// cluster_id -> members (reflexive: cluster_id is always a member of itself)
    cluster: HashMap<Msid, HashSet<Msid>>,
    /// gid -> cluster_id, the inverse index backing `lookup_cluster_by_msid`
    gid_to_cluster: HashMap<Msid, Msid>,
    /// mbid_key -> cluster_ids (more than one only after phase 2 anomalies)
    redirect: HashMap<MbidKey, HashSet<Msid>>,
    /// mbid_key -> gids canonicalized from listens bearing that key
    listens_by_mbid: HashMap<MbidKey, Vec<Msid>>,
    /// gids canonicalized from listens that carry no mbid at all
    listens_without_mbid: Vec<Msid>,
}

#[derive(Default)]
struct Tables {
    recording: EntityTables,
    artist_credit: EntityTables,
    release: EntityTables,
}

impl Tables {
    fn entity(&mut self, entity: EntityKind) -> &mut EntityTables {
        match entity {
            EntityKind::Recording => &mut self.recording,
            EntityKind::ArtistCredit => &mut self.artist_credit,
            EntityKind::Release => &mut self.release,
        }
    }
}

/// Shared, in-process stand-in for the Postgres-backed cluster store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// A "transaction" handle into the shared [`MemoryStore`]. Since the fake
/// has no rollback semantics, every write is immediately visible to other
/// handles -- adequate for testing idempotence and concurrency-shaped
/// scenarios (spec §8 S1-S6), not isolation itself.
pub struct MemoryTx {
    tables: Arc<Mutex<Tables>>,
}

#[async_trait]
impl ClusterStoreFactory for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<Self::Tx, ClusterError> {
        Ok(MemoryTx {
            tables: Arc::clone(&self.tables),
        })
    }

    async fn commit(&self, _tx: Self::Tx) -> Result<(), ClusterError> {
        Ok(())
    }
}

#[async_trait]
impl ClusterStore for MemoryTx {
    async fn lookup_cluster_by_mbid(
        &mut self,
        entity: EntityKind,
        mbid_key: &MbidKey,
    ) -> Result<Option<Msid>, ClusterError> {
        let mut tables = self.tables.lock().unwrap();
        Ok(tables
            .entity(entity)
            .redirect
            .get(mbid_key)
            .and_then(|ids| ids.iter().next().copied()))
    }

    async fn lookup_cluster_by_msid(
        &mut self,
        entity: EntityKind,
        gid: Msid,
    ) -> Result<Option<Msid>, ClusterError> {
        let mut tables = self.tables.lock().unwrap();
        Ok(tables.entity(entity).gid_to_cluster.get(&gid).copied())
    }

    async fn insert_membership(
        &mut self,
        entity: EntityKind,
        cluster_id: Msid,
        gids: &[Msid],
    ) -> Result<(), ClusterError> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entity(entity);
        for &gid in gids {
            if let Some(existing) = table.gid_to_cluster.get(&gid) {
                if *existing != cluster_id {
                    return Err(ClusterError::Integrity(format!(
                        "{gid} already belongs to cluster {existing}, cannot join {cluster_id}"
                    )));
                }
            }
            table.cluster.entry(cluster_id).or_default().insert(gid);
            table.gid_to_cluster.insert(gid, cluster_id);
        }
        Ok(())
    }

    async fn link_mbid(
        &mut self,
        entity: EntityKind,
        cluster_id: Msid,
        mbid_key: &MbidKey,
    ) -> Result<(), ClusterError> {
        let mut tables = self.tables.lock().unwrap();
        tables
            .entity(entity)
            .redirect
            .entry(mbid_key.clone())
            .or_default()
            .insert(cluster_id);
        Ok(())
    }

    async fn fetch_unclustered_mbid_keys(
        &mut self,
        entity: EntityKind,
    ) -> Result<Vec<MbidKey>, ClusterError> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entity(entity);
        Ok(table
            .listens_by_mbid
            .keys()
            .filter(|key| {
                table.listens_by_mbid[*key]
                    .iter()
                    .any(|gid| !table.gid_to_cluster.contains_key(gid))
            })
            .cloned()
            .collect())
    }

    async fn fetch_unclustered_gids_for(
        &mut self,
        entity: EntityKind,
        mbid_key: &MbidKey,
    ) -> Result<Vec<Msid>, ClusterError> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entity(entity);
        Ok(table
            .listens_by_mbid
            .get(mbid_key)
            .into_iter()
            .flatten()
            .filter(|gid| !table.gid_to_cluster.contains_key(*gid))
            .copied()
            .collect())
    }

    async fn fetch_mbid_keys_left_over(
        &mut self,
        entity: EntityKind,
    ) -> Result<Vec<MbidKey>, ClusterError> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entity(entity);
        Ok(table
            .listens_by_mbid
            .iter()
            .filter(|(key, gids)| {
                let all_clustered = gids.iter().all(|gid| table.gid_to_cluster.contains_key(gid));
                let has_redirect = table.redirect.contains_key(*key);
                all_clustered && !has_redirect && !gids.is_empty()
            })
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn gids_for_mbid_key(
        &mut self,
        entity: EntityKind,
        mbid_key: &MbidKey,
    ) -> Result<Vec<Msid>, ClusterError> {
        let mut tables = self.tables.lock().unwrap();
        Ok(tables
            .entity(entity)
            .listens_by_mbid
            .get(mbid_key)
            .cloned()
            .unwrap_or_default())
    }

    async fn record_listen(
        &mut self,
        entity: EntityKind,
        gid: Msid,
        mbid_key: Option<&MbidKey>,
    ) -> Result<(), ClusterError> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entity(entity);
        match mbid_key {
            Some(key) => {
                let gids = table.listens_by_mbid.entry(key.clone()).or_default();
                if !gids.contains(&gid) {
                    gids.push(gid);
                }
            }
            None => {
                if !table.listens_without_mbid.contains(&gid) {
                    table.listens_without_mbid.push(gid);
                }
            }
        }
        Ok(())
    }

    async fn truncate(&mut self, entity: EntityKind) -> Result<(), ClusterError> {
        let mut tables = self.tables.lock().unwrap();
        *tables.entity(entity) = EntityTables::default();
        Ok(())
    }
}
