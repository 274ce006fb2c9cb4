//! `CatWAF` Daemon Library
//!
//! The control plane behind the reverse proxy:
//! - Durable job queue and worker
//! - Certificate lifecycle (ACME client, snakeoil, custom uploads)
//! - Ban list synchronisation with the proxy's deny-list
//! - Per-site config regeneration with coalesced proxy reloads
//! - Admin HTTP API

pub mod api;
pub mod artifacts;
pub mod banlist;
pub mod certs;
pub mod control;
pub mod error;
pub mod gateway;
pub mod maintenance;
pub mod queue;
pub mod regen;
pub mod reload;
pub mod site;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use control::{ControlPlane, SiteSaved};
pub use error::{ControlError, ControlResult};
