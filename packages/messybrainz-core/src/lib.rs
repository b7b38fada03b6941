//! MessyBrainz core -- domain types, configuration, and error taxonomy
//! shared between the clustering engine and (eventually) other MessyBrainz
//! components.
//!
//! - **Types** ([`types`]): [`EntityKind`], [`Msid`], [`MbidKey`], [`Listen`]
//! - **Config** ([`config`]): [`Config`], the worker's environment-driven
//!   configuration surface
//! - **Errors** ([`error`]): [`ClusterError`], the taxonomy from spec §7

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::ClusterError;
pub use types::{EntityKind, Listen, ListenPayload, MbidKey, Msid, ReleaseCandidate};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {}
}
