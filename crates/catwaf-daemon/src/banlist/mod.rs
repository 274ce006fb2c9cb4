//! Ban List Synchronizer.
//!
//! Keeps the proxy's deny-list artifact in line with the ban records in the
//! store. The artifact is an nginx `geo` block mapping each banned address
//! to `1`; site configs reject requests where `$ban` is set.

pub mod denylist;
mod synchronizer;

pub use synchronizer::{
    AUTO_BAN_JAIL, BanListSynchronizer, BanOutcome, BanRequest, DEFAULT_BAN_DURATION,
    MANUAL_JAIL, UnbanOutcome,
};
