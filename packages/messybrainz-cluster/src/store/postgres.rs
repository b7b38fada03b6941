//! Postgres-backed [`ClusterStore`] (spec §6 schema).
//!
//! Table names are dispatched at runtime from [`EntityKind::table_prefix`],
//! so every query here goes through `sqlx::query`/`query_as` rather than the
//! compile-time `query!` macro -- the macro cannot parameterize a table
//! name, and the three entity kinds share one identical schema shape.

use async_trait::async_trait;
use messybrainz_core::{ClusterError, EntityKind, MbidKey, Msid};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use super::{ClusterStore, ClusterStoreFactory};

/// Owns the pool; hands out one [`PgTx`] per `begin()` call.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects and verifies the pool is reachable (spec §4.F state
    /// `DB_READY`). Mirrors the teacher's `StorageEngine::connect` retrying
    /// shape, though retry here is the caller's responsibility (worker.rs).
    pub async fn connect(database_uri: &str) -> Result<Self, ClusterError> {
        let pool = PgPool::connect(database_uri)
            .await
            .map_err(|err| ClusterError::DbInit(err.into()))?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl ClusterStoreFactory for PostgresStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<Self::Tx, ClusterError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|err| ClusterError::DbInit(err.into()))?;
        Ok(PgTx { tx })
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), ClusterError> {
        tx.tx
            .commit()
            .await
            .map_err(|err| ClusterError::DbInit(err.into()))
    }
}

/// A single `sqlx::Transaction` wrapped to implement [`ClusterStore`].
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

/// Splits an [`MbidKey`] into the two columns used by `E_redirect`: a single
/// `mbid` (recording/release) or a sorted `mbid` array (artist-credit). Both
/// columns exist on every redirect table; only one is populated per row,
/// matching the original schema's nullable pair.
fn key_columns(mbid_key: &MbidKey) -> (Option<Uuid>, Option<Vec<Uuid>>) {
    match mbid_key {
        MbidKey::Single(mbid) => (Some(*mbid), None),
        MbidKey::ArtistCredit(mbids) => (None, Some(mbids.clone())),
    }
}

fn row_to_key(mbid: Option<Uuid>, mbid_array: Option<Vec<Uuid>>) -> Option<MbidKey> {
    match (mbid, mbid_array) {
        (Some(id), None) => Some(MbidKey::Single(id)),
        (None, Some(ids)) => Some(MbidKey::ArtistCredit(ids)),
        _ => None,
    }
}

#[async_trait]
impl ClusterStore for PgTx {
    async fn lookup_cluster_by_mbid(
        &mut self,
        entity: EntityKind,
        mbid_key: &MbidKey,
    ) -> Result<Option<Msid>, ClusterError> {
        let (mbid, mbid_array) = key_columns(mbid_key);
        let table = format!("{}_redirect", entity.table_prefix());
        let sql = format!(
            "SELECT cluster_id FROM {table} WHERE mbid = $1 OR mbid_array = $2 LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(mbid)
            .bind(mbid_array)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|err| ClusterError::Integrity(err.to_string()))?;
        Ok(row.map(|row| Msid::new(row.get::<Uuid, _>("cluster_id"))))
    }

    async fn lookup_cluster_by_msid(
        &mut self,
        entity: EntityKind,
        gid: Msid,
    ) -> Result<Option<Msid>, ClusterError> {
        let table = format!("{}_cluster", entity.table_prefix());
        let sql = format!("SELECT cluster_id FROM {table} WHERE gid = $1 LIMIT 1");
        let row = sqlx::query(&sql)
            .bind(gid.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|err| ClusterError::Integrity(err.to_string()))?;
        Ok(row.map(|row| Msid::new(row.get::<Uuid, _>("cluster_id"))))
    }

    async fn insert_membership(
        &mut self,
        entity: EntityKind,
        cluster_id: Msid,
        gids: &[Msid],
    ) -> Result<(), ClusterError> {
        let table = format!("{}_cluster", entity.table_prefix());
        let sql = format!(
            "INSERT INTO {table} (cluster_id, gid) VALUES ($1, $2) \
             ON CONFLICT (gid) DO NOTHING"
        );
        for gid in gids {
            sqlx::query(&sql)
                .bind(cluster_id.as_uuid())
                .bind(gid.as_uuid())
                .execute(&mut *self.tx)
                .await
                .map_err(|err| ClusterError::Integrity(err.to_string()))?;
        }
        Ok(())
    }

    async fn link_mbid(
        &mut self,
        entity: EntityKind,
        cluster_id: Msid,
        mbid_key: &MbidKey,
    ) -> Result<(), ClusterError> {
        let (mbid, mbid_array) = key_columns(mbid_key);
        let table = format!("{}_redirect", entity.table_prefix());
        // The redirect tables' `UNIQUE NULLS NOT DISTINCT (cluster_id, mbid,
        // mbid_array)` constraint dedups a repeated (cluster_id, mbid_key)
        // pair without forbidding the same mbid_key under a *different*
        // cluster_id -- that's the anomaly phase 2 of the batch rebuilder
        // creates (spec invariant 1).
        let sql = format!(
            "INSERT INTO {table} (cluster_id, mbid, mbid_array) VALUES ($1, $2, $3) \
             ON CONFLICT (cluster_id, mbid, mbid_array) DO NOTHING"
        );
        sqlx::query(&sql)
            .bind(cluster_id.as_uuid())
            .bind(mbid)
            .bind(mbid_array)
            .execute(&mut *self.tx)
            .await
            .map_err(|err| ClusterError::Integrity(err.to_string()))?;
        Ok(())
    }

    async fn fetch_unclustered_mbid_keys(
        &mut self,
        entity: EntityKind,
    ) -> Result<Vec<MbidKey>, ClusterError> {
        let listen_table = format!("{}_listen", entity.table_prefix());
        let cluster_table = format!("{}_cluster", entity.table_prefix());
        let sql = format!(
            "SELECT DISTINCT l.mbid, l.mbid_array \
             FROM {listen_table} l \
             WHERE (l.mbid IS NOT NULL OR l.mbid_array IS NOT NULL) \
             AND NOT EXISTS ( \
                SELECT 1 FROM {cluster_table} c WHERE c.gid = l.gid \
             )"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|err| ClusterError::Integrity(err.to_string()))?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                row_to_key(
                    row.get::<Option<Uuid>, _>("mbid"),
                    row.get::<Option<Vec<Uuid>>, _>("mbid_array"),
                )
            })
            .collect())
    }

    async fn fetch_unclustered_gids_for(
        &mut self,
        entity: EntityKind,
        mbid_key: &MbidKey,
    ) -> Result<Vec<Msid>, ClusterError> {
        let (mbid, mbid_array) = key_columns(mbid_key);
        let listen_table = format!("{}_listen", entity.table_prefix());
        let cluster_table = format!("{}_cluster", entity.table_prefix());
        let sql = format!(
            "SELECT DISTINCT l.gid FROM {listen_table} l \
             WHERE (l.mbid = $1 OR l.mbid_array = $2) \
             AND NOT EXISTS ( \
                SELECT 1 FROM {cluster_table} c WHERE c.gid = l.gid \
             )"
        );
        let rows = sqlx::query(&sql)
            .bind(mbid)
            .bind(mbid_array)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|err| ClusterError::Integrity(err.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|row| Msid::new(row.get::<Uuid, _>("gid")))
            .collect())
    }

    async fn fetch_mbid_keys_left_over(
        &mut self,
        entity: EntityKind,
    ) -> Result<Vec<MbidKey>, ClusterError> {
        let listen_table = format!("{}_listen", entity.table_prefix());
        let cluster_table = format!("{}_cluster", entity.table_prefix());
        let redirect_table = format!("{}_redirect", entity.table_prefix());
        let sql = format!(
            "SELECT DISTINCT l.mbid, l.mbid_array FROM {listen_table} l \
             WHERE (l.mbid IS NOT NULL OR l.mbid_array IS NOT NULL) \
             AND NOT EXISTS ( \
                SELECT 1 FROM {listen_table} l2 \
                WHERE l2.mbid IS NOT DISTINCT FROM l.mbid \
                AND l2.mbid_array IS NOT DISTINCT FROM l.mbid_array \
                AND NOT EXISTS (SELECT 1 FROM {cluster_table} c WHERE c.gid = l2.gid) \
             ) \
             AND NOT EXISTS ( \
                SELECT 1 FROM {redirect_table} r \
                WHERE r.mbid IS NOT DISTINCT FROM l.mbid \
                AND r.mbid_array IS NOT DISTINCT FROM l.mbid_array \
             )"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|err| ClusterError::Integrity(err.to_string()))?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                row_to_key(
                    row.get::<Option<Uuid>, _>("mbid"),
                    row.get::<Option<Vec<Uuid>>, _>("mbid_array"),
                )
            })
            .collect())
    }

    async fn gids_for_mbid_key(
        &mut self,
        entity: EntityKind,
        mbid_key: &MbidKey,
    ) -> Result<Vec<Msid>, ClusterError> {
        let (mbid, mbid_array) = key_columns(mbid_key);
        let listen_table = format!("{}_listen", entity.table_prefix());
        let sql = format!(
            "SELECT DISTINCT gid FROM {listen_table} WHERE mbid = $1 OR mbid_array = $2"
        );
        let rows = sqlx::query(&sql)
            .bind(mbid)
            .bind(mbid_array)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|err| ClusterError::Integrity(err.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|row| Msid::new(row.get::<Uuid, _>("gid")))
            .collect())
    }

    async fn record_listen(
        &mut self,
        entity: EntityKind,
        gid: Msid,
        mbid_key: Option<&MbidKey>,
    ) -> Result<(), ClusterError> {
        let (mbid, mbid_array) = mbid_key.map(key_columns).unwrap_or((None, None));
        let table = format!("{}_listen", entity.table_prefix());
        let sql = format!(
            "INSERT INTO {table} (gid, mbid, mbid_array) VALUES ($1, $2, $3) \
             ON CONFLICT DO NOTHING"
        );
        sqlx::query(&sql)
            .bind(gid.as_uuid())
            .bind(mbid)
            .bind(mbid_array)
            .execute(&mut *self.tx)
            .await
            .map_err(|err| ClusterError::Integrity(err.to_string()))?;
        Ok(())
    }

    async fn truncate(&mut self, entity: EntityKind) -> Result<(), ClusterError> {
        let prefix = entity.table_prefix();
        for suffix in ["cluster", "redirect"] {
            let sql = format!("TRUNCATE TABLE {prefix}_{suffix}");
            sqlx::query(&sql)
                .execute(&mut *self.tx)
                .await
                .map_err(|err| ClusterError::Integrity(err.to_string()))?;
        }
        Ok(())
    }
}
