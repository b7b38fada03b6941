//! MessyBrainz clustering engine: the online per-listen protocol, the
//! batch rebuilder, and the broker-coupled worker loop that ties them
//! together (spec §2 rows C-F).
//!
//! - [`store`]: the [`store::ClusterStore`] trait and its Postgres/in-memory
//!   implementations.
//! - [`canonicalizer`], [`metadata_client`]: concrete defaults for the two
//!   external collaborators spec.md treats as opaque.
//! - [`online`]: the three-block per-listen protocol.
//! - [`batch`]: the two-phase bulk rebuilder.
//! - [`broker`]: the reconnect-on-failure channel wrapper.
//! - [`worker`]: the `INIT -> ... -> CONSUMING` state machine.
//! - [`context`]: the explicit `Context` struct tying the above together.

pub mod batch;
pub mod broker;
pub mod canonicalizer;
pub mod context;
pub mod metadata_client;
pub mod online;
pub mod store;
pub mod worker;

pub use batch::{BatchRebuilder, RebuildStats};
pub use canonicalizer::{Canonicalizer, UuidV5Canonicalizer};
pub use context::Context;
pub use metadata_client::{HttpMetadataClient, MetadataClient, MetadataError};
pub use online::OnlineClusterer;
pub use store::{ClusterStore, ClusterStoreFactory};
pub use worker::run as run_worker;
