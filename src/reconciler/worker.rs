use super::TaskReconciler;
use crate::core::{LedgerError, Result};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info};

/// Background loop running one sweep per poll interval.
pub struct ReconcilerWorker {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl ReconcilerWorker {
    /// Signals the loop to stop and waits for it; a running sweep finishes first.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(join_handle) = self.join_handle.take() {
            join_handle
                .await
                .map_err(|err| LedgerError::State(format!("reconciler worker join: {}", err)))?;
        }
        Ok(())
    }
}

impl Drop for ReconcilerWorker {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

pub fn spawn_reconciler_worker(reconciler: Arc<TaskReconciler>) -> ReconcilerWorker {
    let interval = reconciler.config().poll_interval;
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

    let join_handle = tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "task reconciler started");
        loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => {
                    break;
                }
                _ = sleep(interval) => {
                    if let Err(err) = reconciler.sweep().await {
                        error!(error = %err, "task sweep failed");
                    }
                }
            }
        }
        info!("task reconciler stopped");
    });

    ReconcilerWorker {
        stop_tx: Some(stop_tx),
        join_handle: Some(join_handle),
    }
}
