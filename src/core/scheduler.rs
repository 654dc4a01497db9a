// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Task supervisor for the engine's long-lived loops

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::Result;

struct ScheduledTask {
    name: String,
    handle: JoinHandle<Result<()>>,
}

/// How the tasks ended during shutdown
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Returned `Ok` within the grace period
    pub completed: Vec<String>,
    /// Returned an error or panicked
    pub failed: Vec<String>,
    /// Still running at the deadline and aborted
    pub aborted: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.aborted.is_empty()
    }
}

/// Owns the JoinHandles and the shutdown broadcast
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            tasks: Vec::new(),
            shutdown_tx,
        }
    }

    /// Receiver that fires once shutdown begins
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn a named task
    pub fn spawn<F>(&mut self, name: &str, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        self.tasks.push(ScheduledTask {
            name: name.to_string(),
            handle,
        });
        debug!("Spawned task '{}'", name);
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Signal every task, wait up to `grace`, then abort stragglers
    pub async fn shutdown(&mut self, grace: Duration) -> ShutdownReport {
        info!("Stopping {} tasks (grace {:?})", self.tasks.len(), grace);
        let _ = self.shutdown_tx.send(());

        let deadline = tokio::time::Instant::now() + grace;
        let tasks = std::mem::take(&mut self.tasks);

        let waits = tasks.into_iter().map(|task| async move {
            let ScheduledTask { name, mut handle } = task;
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(Ok(()))) => (name, Ending::Completed),
                Ok(Ok(Err(e))) => {
                    error!("Task '{}' failed: {}", name, e);
                    (name, Ending::Failed)
                }
                Ok(Err(join)) => {
                    error!("Task '{}' panicked: {}", name, join);
                    (name, Ending::Failed)
                }
                Err(_) => {
                    warn!("Task '{}' exceeded shutdown grace, aborting", name);
                    handle.abort();
                    (name, Ending::Aborted)
                }
            }
        });

        let mut report = ShutdownReport::default();
        for (name, ending) in join_all(waits).await {
            match ending {
                Ending::Completed => report.completed.push(name),
                Ending::Failed => report.failed.push(name),
                Ending::Aborted => report.aborted.push(name),
            }
        }
        report
    }
}

enum Ending {
    Completed,
    Failed,
    Aborted,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_reports_each_task() {
        let mut scheduler = Scheduler::new();

        let mut rx = scheduler.shutdown_signal();
        scheduler.spawn("cooperative", async move {
            let _ = rx.recv().await;
            Ok(())
        });
        scheduler.spawn("failing", async { Err(Error::ShuttingDown) });
        scheduler.spawn("stuck", async {
            std::future::pending::<()>().await;
            Ok(())
        });

        let report = scheduler.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report.completed, vec!["cooperative".to_string()]);
        assert_eq!(report.failed, vec!["failing".to_string()]);
        assert_eq!(report.aborted, vec!["stuck".to_string()]);
        assert!(!report.is_clean());
        assert!(scheduler.is_empty());
    }
}
