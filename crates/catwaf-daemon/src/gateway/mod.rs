//! External Process Gateway.
//!
//! Every external executable the control plane depends on (proxy reload,
//! certificate client) is invoked through [`ProcessGateway`], which captures
//! exit status and combined output and enforces a timeout.

mod runner;

pub use runner::{CommandSpec, GatewayError, ProcessGateway, ProcessOutput};
