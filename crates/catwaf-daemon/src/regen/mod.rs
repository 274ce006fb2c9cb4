//! Config Regeneration Coordinator.

mod coordinator;
pub mod render;

pub use coordinator::{ConfigRegenerator, RegenerationOutcome, RegenerationReport, SiteFailure};
pub use render::{RenderContext, render_site, upstream_name};
