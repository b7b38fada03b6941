//! Cluster store trait hierarchy (spec §4.C).
//!
//! [`ClusterStore`] is the primary interface the online clusterer and batch
//! rebuilder interact with; `postgres` is its only implementation, against
//! the six tables of spec §6. Mirrors the teacher's `RecordStore` trait:
//! one object-safe `#[async_trait]` boundary per storage concern, with a
//! fake in-memory implementation under `#[cfg(test)]` for exercising the
//! protocol logic without a live database.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use messybrainz_core::{ClusterError, EntityKind, MbidKey, Msid};

/// Cluster store primitive operations (spec §4.C).
///
/// Every method participates in the caller's transaction: `postgres::Tx`
/// wraps a single `sqlx::Transaction`, and the online clusterer opens one
/// per clustering block (spec §4.D).
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Reads `E_redirect`. For `ArtistCredit`, `mbid_key` is compared as a
    /// whole sorted sequence, not a set.
    async fn lookup_cluster_by_mbid(
        &mut self,
        entity: EntityKind,
        mbid_key: &MbidKey,
    ) -> Result<Option<Msid>, ClusterError>;

    /// Reads `E_cluster` membership.
    async fn lookup_cluster_by_msid(
        &mut self,
        entity: EntityKind,
        gid: Msid,
    ) -> Result<Option<Msid>, ClusterError>;

    /// Upserts `(cluster_id, gid)` pairs into `E_cluster`. Duplicate inserts
    /// are no-ops, never errors (spec §4.C constraint policy).
    async fn insert_membership(
        &mut self,
        entity: EntityKind,
        cluster_id: Msid,
        gids: &[Msid],
    ) -> Result<(), ClusterError>;

    /// Upserts `(cluster_id, mbid_key)` into `E_redirect`. Duplicate inserts
    /// are no-ops.
    async fn link_mbid(
        &mut self,
        entity: EntityKind,
        cluster_id: Msid,
        mbid_key: &MbidKey,
    ) -> Result<(), ClusterError>;

    /// Every distinct MBID key present in the listen store whose associated
    /// MSIDs are not yet members of any `E_cluster` row.
    async fn fetch_unclustered_mbid_keys(
        &mut self,
        entity: EntityKind,
    ) -> Result<Vec<MbidKey>, ClusterError>;

    /// MSIDs that canonicalize from listens bearing `mbid_key` and are not
    /// yet in any cluster.
    async fn fetch_unclustered_gids_for(
        &mut self,
        entity: EntityKind,
        mbid_key: &MbidKey,
    ) -> Result<Vec<Msid>, ClusterError>;

    /// MBID keys whose MSIDs were all placed into clusters during phase 1,
    /// yet have no redirect row — the phase-2 anomalies (spec §4.E).
    async fn fetch_mbid_keys_left_over(
        &mut self,
        entity: EntityKind,
    ) -> Result<Vec<MbidKey>, ClusterError>;

    /// All MSIDs that canonicalize from listens bearing `mbid_key`,
    /// regardless of cluster membership. Used by phase 2 to recover the
    /// member set for an anomalous key.
    async fn gids_for_mbid_key(
        &mut self,
        entity: EntityKind,
        mbid_key: &MbidKey,
    ) -> Result<Vec<Msid>, ClusterError>;

    /// Records that `gid` was canonicalized from a listen bearing
    /// `mbid_key`, so later batch queries can join against it. Ambient
    /// listen-persistence addition (SPEC_FULL.md); a no-op if the pair is
    /// already recorded.
    async fn record_listen(
        &mut self,
        entity: EntityKind,
        gid: Msid,
        mbid_key: Option<&MbidKey>,
    ) -> Result<(), ClusterError>;

    /// Clears membership and redirect rows for `entity`. Administrative
    /// only; never called by the online or batch protocols themselves.
    async fn truncate(&mut self, entity: EntityKind) -> Result<(), ClusterError>;
}

/// A single unit-of-work boundary: every method of [`ClusterStore`] called
/// between `begin` and `commit`/`rollback` is one database transaction.
///
/// The online clusterer opens one transaction per block (R, A, Rl); the
/// batch rebuilder runs both phases on a single connection but does not
/// require transactional isolation across the whole rebuild (spec §4.E
/// describes per-key write visibility, not an all-or-nothing bulk commit).
#[async_trait]
pub trait ClusterStoreFactory: Send + Sync {
    type Tx: ClusterStore;

    /// Opens a new transactional handle.
    async fn begin(&self) -> Result<Self::Tx, ClusterError>;

    /// Commits a handle produced by `begin`.
    async fn commit(&self, tx: Self::Tx) -> Result<(), ClusterError>;
}
