//! Long-running service supervision.
//!
//! The web server and the scraper pipeline run as [`Service`]s under one
//! [`Supervisor`]: spawned together, watched until the first one exits, and
//! wound down as a group against a single deadline.

pub mod web;

use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A long-running piece of the application. `run` is expected to block for
/// the life of the process; returning at all is unusual.
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&mut self) -> Result<(), anyhow::Error>;

    async fn shutdown(&mut self) -> Result<(), anyhow::Error>;
}

/// Why a supervised service stopped.
#[derive(Debug)]
pub enum ServiceExit {
    /// Wound down in response to the supervisor's shutdown signal.
    Graceful,
    /// `run` returned on its own.
    Finished,
    /// `run` or `shutdown` failed.
    Failed(anyhow::Error),
}

/// Wraps one service: drive `run`, and on the shared signal switch to
/// `shutdown` and report how it went.
async fn supervise(
    mut service: Box<dyn Service>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> ServiceExit {
    let name = service.name();
    info!(service = name, "service up");

    tokio::select! {
        result = service.run() => match result {
            Ok(()) => {
                warn!(service = name, "service stopped on its own");
                ServiceExit::Finished
            }
            Err(e) => {
                error!(service = name, error = %e, "service crashed");
                ServiceExit::Failed(e)
            }
        },
        _ = shutdown_rx.recv() => {
            let started = Instant::now();
            match service.shutdown().await {
                Ok(()) => {
                    info!(service = name, elapsed = format!("{:.2?}", started.elapsed()), "service wound down");
                    ServiceExit::Graceful
                }
                Err(e) => {
                    error!(service = name, error = %e, "service failed to wind down");
                    ServiceExit::Failed(e)
                }
            }
        }
    }
}

/// Spawns registered services and owns their shutdown signal.
pub struct Supervisor {
    pending: Vec<Box<dyn Service>>,
    running: Vec<(&'static str, JoinHandle<ServiceExit>)>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Supervisor {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            pending: Vec::new(),
            running: Vec::new(),
            shutdown_tx,
        }
    }

    /// Queue a service; it starts on [`Supervisor::start`].
    pub fn register(&mut self, service: Box<dyn Service>) {
        self.pending.push(service);
    }

    /// Spawn every registered service onto the runtime.
    pub fn start(&mut self) {
        for service in self.pending.drain(..) {
            let name = service.name();
            let handle = tokio::spawn(supervise(service, self.shutdown_tx.subscribe()));
            self.running.push((name, handle));
        }

        let names: Vec<_> = self.running.iter().map(|(name, _)| *name).collect();
        info!(service_count = names.len(), services = ?names, "services started");
    }

    /// Block until the first service exits, returning its name and exit.
    /// The rest keep running; call [`Supervisor::shutdown`] to stop them.
    pub async fn wait_any(&mut self) -> (&'static str, ServiceExit) {
        if self.running.is_empty() {
            return (
                "none",
                ServiceExit::Failed(anyhow::anyhow!("no services registered")),
            );
        }

        let (names, handles): (Vec<&'static str>, Vec<JoinHandle<ServiceExit>>) =
            self.running.drain(..).unzip();

        let (joined, index, rest) = futures::future::select_all(handles).await;

        // Survivors go back under supervision, keeping their names aligned.
        for (offset, handle) in rest.into_iter().enumerate() {
            let original = if offset < index { offset } else { offset + 1 };
            self.running.push((names[original], handle));
        }

        let name = names[index];
        match joined {
            Ok(exit) => (name, exit),
            Err(e) => {
                error!(service = name, "service task panicked: {e}");
                (name, ServiceExit::Failed(anyhow::anyhow!("task panic: {e}")))
            }
        }
    }

    /// Signal every running service and wait for all of them against one
    /// shared deadline. Returns the elapsed time, or the names of services
    /// that failed or ran out the clock.
    pub async fn shutdown(&mut self, deadline: Duration) -> Result<Duration, Vec<String>> {
        let names: Vec<_> = self.running.iter().map(|(name, _)| *name).collect();
        info!(
            service_count = names.len(),
            services = ?names,
            deadline = format!("{deadline:.2?}"),
            "stopping services"
        );

        let _ = self.shutdown_tx.send(());

        let started = Instant::now();
        let mut stragglers = Vec::new();

        for (name, handle) in self.running.drain(..) {
            let remaining = deadline.saturating_sub(started.elapsed());
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(ServiceExit::Graceful)) | Ok(Ok(ServiceExit::Finished)) => {}
                Ok(Ok(ServiceExit::Failed(e))) => {
                    warn!(service = name, error = %e, "service exited dirty during shutdown");
                    stragglers.push(name.to_string());
                }
                Ok(Err(e)) => {
                    warn!(service = name, "service task panicked during shutdown: {e}");
                    stragglers.push(name.to_string());
                }
                Err(_) => {
                    warn!(service = name, "service missed the shutdown deadline");
                    stragglers.push(name.to_string());
                }
            }
        }

        let elapsed = started.elapsed();
        if stragglers.is_empty() {
            info!(elapsed = format!("{elapsed:.2?}"), "all services stopped");
            Ok(elapsed)
        } else {
            Err(stragglers)
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
