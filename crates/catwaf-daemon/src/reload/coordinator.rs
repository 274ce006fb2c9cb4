//! Debounced reload execution.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use catwaf_core::config::{ReloadConfig, ReloadMode};
use catwaf_core::db::unix_timestamp;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::artifacts::{self, PUBLIC_MODE};
use crate::error::ControlError;
use crate::gateway::{CommandSpec, ProcessGateway};

/// How a reload is carried out.
#[derive(Debug, Clone)]
pub enum ReloadPolicy {
    /// Run the proxy's reload command and wait for it.
    Command(CommandSpec),
    /// Touch a sentinel file watched by an external process.
    Sentinel(PathBuf),
}

impl ReloadPolicy {
    /// Build the policy described by `config`.
    pub fn from_config(config: &ReloadConfig) -> Result<Self, ControlError> {
        match config.mode {
            ReloadMode::Command => {
                let (program, args) = config
                    .command
                    .split_first()
                    .ok_or_else(|| ControlError::validation("reload.command is empty"))?;
                Ok(Self::Command(
                    CommandSpec::new(program)
                        .args(args)
                        .with_timeout(Duration::from_secs(config.timeout_secs)),
                ))
            }
            ReloadMode::Sentinel => Ok(Self::Sentinel(config.sentinel_path.clone())),
        }
    }
}

/// Result of one reload, shared by every request it covered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReloadOutcome {
    /// The reload command exited successfully.
    Reloaded,
    /// The sentinel was touched; the watcher reloads asynchronously.
    Signalled,
    Failed {
        error: String,
        output: Option<String>,
    },
}

impl ReloadOutcome {
    pub const fn is_ok(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Convert a failure into [`ControlError::ExternalProcess`].
    pub fn into_result(self) -> Result<(), ControlError> {
        match self {
            Self::Reloaded | Self::Signalled => Ok(()),
            Self::Failed { error, output } => Err(ControlError::ExternalProcess {
                message: format!("proxy reload failed: {error}"),
                output,
            }),
        }
    }

    /// Warning text for a failed reload.
    pub fn warning(&self) -> Option<String> {
        match self {
            Self::Failed { error, .. } => Some(format!("proxy reload failed: {error}")),
            _ => None,
        }
    }
}

/// Pending acknowledgement of a reload request. Dropping it is fine.
#[derive(Debug)]
pub struct ReloadTicket {
    rx: oneshot::Receiver<ReloadOutcome>,
}

impl ReloadTicket {
    /// Wait for the reload that covers this request.
    pub async fn wait(self) -> ReloadOutcome {
        self.rx.await.unwrap_or_else(|_| ReloadOutcome::Failed {
            error: "reload coordinator stopped".to_string(),
            output: None,
        })
    }
}

#[derive(Debug, Default)]
struct Counters {
    requested: AtomicU64,
    executed: AtomicU64,
}

/// Cloneable entry point used by every component.
#[derive(Debug, Clone)]
pub struct ReloadHandle {
    tx: mpsc::UnboundedSender<oneshot::Sender<ReloadOutcome>>,
    counters: Arc<Counters>,
}

impl ReloadHandle {
    /// Ask for the proxy to pick up the current artifacts.
    pub fn request_reload(&self) -> ReloadTicket {
        self.counters.requested.fetch_add(1, Ordering::Relaxed);
        let (done_tx, rx) = oneshot::channel();
        // A closed channel drops `done_tx`; the ticket then reports the stop.
        let _ = self.tx.send(done_tx);
        ReloadTicket { rx }
    }

    /// Reload requests made so far.
    pub fn requested(&self) -> u64 {
        self.counters.requested.load(Ordering::Relaxed)
    }

    /// Reloads actually carried out so far.
    pub fn executed(&self) -> u64 {
        self.counters.executed.load(Ordering::Relaxed)
    }
}

/// Owns the reload policy and executes coalesced requests.
pub struct ReloadCoordinator {
    policy: ReloadPolicy,
    debounce: Duration,
    gateway: ProcessGateway,
    rx: mpsc::UnboundedReceiver<oneshot::Sender<ReloadOutcome>>,
    counters: Arc<Counters>,
}

impl ReloadCoordinator {
    pub fn new(policy: ReloadPolicy, debounce: Duration, gateway: ProcessGateway) -> (Self, ReloadHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let handle = ReloadHandle {
            tx,
            counters: Arc::clone(&counters),
        };
        let coordinator = Self {
            policy,
            debounce,
            gateway,
            rx,
            counters,
        };
        (coordinator, handle)
    }

    /// Spawn the coordinator loop.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Process requests until shutdown or until every handle is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(debounce = ?self.debounce, "Reload coordinator started");
        loop {
            let first = tokio::select! {
                _ = shutdown.changed() => {
                    info!("Reload coordinator shutting down");
                    break;
                }
                msg = self.rx.recv() => match msg {
                    Some(waiter) => waiter,
                    None => break,
                },
            };

            let mut waiters = vec![first];
            let deadline = Instant::now() + self.debounce;
            while let Ok(Some(waiter)) = tokio::time::timeout_at(deadline, self.rx.recv()).await {
                waiters.push(waiter);
            }

            let outcome = self.execute().await;
            self.counters.executed.fetch_add(1, Ordering::Relaxed);
            info!(coalesced = waiters.len(), ok = outcome.is_ok(), "Reload executed");

            for waiter in waiters {
                let _ = waiter.send(outcome.clone());
            }
        }
    }

    async fn execute(&self) -> ReloadOutcome {
        match &self.policy {
            ReloadPolicy::Command(spec) => match self.gateway.run_checked(spec).await {
                Ok(_) => ReloadOutcome::Reloaded,
                Err(e) => {
                    warn!(error = %e, "Proxy reload failed");
                    ReloadOutcome::Failed {
                        output: e.output().map(str::to_string),
                        error: e.to_string(),
                    }
                }
            },
            ReloadPolicy::Sentinel(path) => {
                let stamp = unix_timestamp().to_string();
                match artifacts::write_atomic(path, stamp.as_bytes(), PUBLIC_MODE) {
                    Ok(()) => ReloadOutcome::Signalled,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to touch reload sentinel");
                        ReloadOutcome::Failed {
                            error: e.to_string(),
                            output: None,
                        }
                    }
                }
            }
        }
    }
}
