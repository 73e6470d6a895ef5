//! Periodic task scheduling
//!
//! Each task runs its body to completion before waiting for the next tick, so
//! a task never overlaps with itself. Distinct tasks run independently.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::logger::log;

/// Handle owning a group of periodic tasks that stop together
pub struct PeriodicHandle {
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for PeriodicHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl PeriodicHandle {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            shutdown_tx,
            shutdown_rx,
            handles: Vec::new(),
        }
    }

    /// Spawn `execute` every `period`, first run one period from now.
    ///
    /// A failed run is logged and the loop keeps its fixed rate.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, period: Duration, mut execute: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = execute().await {
                            log::warn!(task = name, error = %format!("{:#}", e), "Periodic tick failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        log::debug!(task = name, "Periodic task shutting down");
                        break;
                    }
                }
            }
        });

        log::info!(task = name, period_secs = period.as_secs_f64(), "Periodic task started");
        self.handles.push((name, handle));
    }

    /// Number of spawned tasks
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop all tasks, waiting for any in-flight run to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        for (name, handle) in self.handles {
            match handle.await {
                Ok(()) => log::debug!(task = name, "Periodic task stopped"),
                Err(e) => log::warn!(task = name, error = %e, "Periodic task panicked"),
            }
        }
    }
}
