//! `SQLite` storage for the control plane.
//!
//! Holds the job queue, ban records, site desired state and per-domain
//! certificate state.

mod ban_queries;
mod cert_queries;
mod db;
mod job_queries;
mod models;
mod site_queries;

pub use db::{Database, DatabaseError};
pub use models::*;
