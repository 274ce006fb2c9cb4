//! Reload coordinator.
//!
//! One reload policy for the whole process. Components call
//! [`ReloadHandle::request_reload`]; bursts of requests inside the debounce
//! window collapse into a single reload of the proxy.

mod coordinator;

pub use coordinator::{ReloadCoordinator, ReloadHandle, ReloadOutcome, ReloadPolicy, ReloadTicket};
