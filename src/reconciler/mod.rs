// ============================================================================
// Task Reconciler
// ============================================================================
//
// One sweep:
//   1. load a batch of unfinished jobs, oldest first
//   2. fail orphaned jobs (no external id) without any network call
//   3. group the rest by platform, then by channel
//   4. per channel, fetch remote state once and merge what changed
//   5. credit reserved quota back when a job moves into failure
//
// A failing channel never aborts the sweep. Sweeps never overlap.
//
// ============================================================================

pub mod diff;
pub mod worker;

pub use worker::{ReconcilerWorker, spawn_reconciler_worker};

use crate::adaptor::{AdaptorRegistry, FetchRequest, TaskAdaptor};
use crate::channel::ChannelDirectory;
use crate::config::ReconcilerConfig;
use crate::core::{ChannelId, LedgerError, Result, TaskRowId};
use crate::ledger::QuotaLedger;
use crate::task::{Task, TaskPatch, TaskPlatform, TaskStore};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Counts of what one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Unfinished jobs loaded.
    pub loaded: usize,
    /// Jobs without external id marked failed.
    pub orphans_healed: usize,
    /// Jobs failed because their channel could not be resolved.
    pub channel_failed: usize,
    /// Jobs left untouched: no adaptor, fetch or decode failure.
    pub skipped: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Failed jobs whose reserved quota was credited back.
    pub compensated: usize,
    /// Remote records that matched no loaded job.
    pub unknown: usize,
}

impl SweepReport {
    fn absorb(&mut self, other: SweepReport) {
        self.orphans_healed += other.orphans_healed;
        self.channel_failed += other.channel_failed;
        self.skipped += other.skipped;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.compensated += other.compensated;
        self.unknown += other.unknown;
    }
}

struct ChannelBatch {
    platform: TaskPlatform,
    adaptor: Arc<dyn TaskAdaptor>,
    channel_id: ChannelId,
    tasks: Vec<Task>,
}

pub struct TaskReconciler {
    tasks: Arc<dyn TaskStore>,
    channels: Arc<dyn ChannelDirectory>,
    adaptors: AdaptorRegistry,
    ledger: Arc<QuotaLedger>,
    config: ReconcilerConfig,
    sweep_lock: Mutex<()>,
}

impl TaskReconciler {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        channels: Arc<dyn ChannelDirectory>,
        adaptors: AdaptorRegistry,
        ledger: Arc<QuotaLedger>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            tasks,
            channels,
            adaptors,
            ledger,
            config,
            sweep_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Runs one sweep. Fails with `State` if another sweep is in progress.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let Ok(_running) = self.sweep_lock.try_lock() else {
            return Err(LedgerError::State("a sweep is already running".into()));
        };
        self.run_sweep()
            .instrument(info_span!("reconciler.sweep"))
            .await
    }

    async fn run_sweep(&self) -> Result<SweepReport> {
        let loaded = self.tasks.load_unfinished(self.config.batch_size).await?;
        let mut report = SweepReport {
            loaded: loaded.len(),
            ..SweepReport::default()
        };
        if loaded.is_empty() {
            debug!("no unfinished tasks");
            return Ok(report);
        }

        let mut orphans = Vec::new();
        let mut grouped: BTreeMap<TaskPlatform, BTreeMap<ChannelId, Vec<Task>>> = BTreeMap::new();
        for task in loaded {
            if task.is_orphaned() {
                orphans.push(task.id);
            } else {
                grouped
                    .entry(task.platform.clone())
                    .or_default()
                    .entry(task.channel_id)
                    .or_default()
                    .push(task);
            }
        }

        if !orphans.is_empty() {
            match self
                .tasks
                .bulk_update_by_ids(&orphans, &TaskPatch::failed(None))
                .await
            {
                Ok(count) => {
                    report.orphans_healed = count as usize;
                    info!(count, ids = ?orphans, "tasks without external id marked failed");
                }
                Err(err) => error!(error = %err, ids = ?orphans, "failed to fail orphaned tasks"),
            }
        }

        let mut batches = Vec::new();
        for (platform, channels) in grouped {
            let Some(adaptor) = self.adaptors.resolve(&platform) else {
                let count: usize = channels.values().map(Vec::len).sum();
                warn!(%platform, count, "no adaptor registered for platform, skipped");
                report.skipped += count;
                continue;
            };
            for (channel_id, tasks) in channels {
                batches.push(ChannelBatch {
                    platform: platform.clone(),
                    adaptor: adaptor.clone(),
                    channel_id,
                    tasks,
                });
            }
        }

        let outcomes: Vec<SweepReport> = stream::iter(batches)
            .map(|batch| self.reconcile_channel(batch))
            .buffer_unordered(self.config.channel_concurrency.max(1))
            .collect()
            .await;
        for outcome in outcomes {
            report.absorb(outcome);
        }

        info!(
            loaded = report.loaded,
            orphans_healed = report.orphans_healed,
            channel_failed = report.channel_failed,
            skipped = report.skipped,
            updated = report.updated,
            unchanged = report.unchanged,
            compensated = report.compensated,
            unknown = report.unknown,
            "task sweep finished"
        );
        Ok(report)
    }

    async fn reconcile_channel(&self, batch: ChannelBatch) -> SweepReport {
        let ChannelBatch {
            platform,
            adaptor,
            channel_id,
            tasks,
        } = batch;
        let mut report = SweepReport::default();
        let external_ids: Vec<String> = tasks.iter().map(|task| task.external_id.clone()).collect();
        debug!(%platform, channel_id, count = tasks.len(), "polling channel");

        let channel = match self.channels.channel(channel_id).await {
            Ok(channel) => channel,
            Err(err) => {
                warn!(channel_id, error = %err, "channel lookup failed, failing its tasks");
                let patch = TaskPatch::failed(Some(format!(
                    "failed to get channel info, channel id: {}",
                    channel_id
                )));
                let ids: Vec<TaskRowId> = tasks.iter().map(|task| task.id).collect();
                match self.tasks.bulk_update_by_ids(&ids, &patch).await {
                    Ok(count) => report.channel_failed = count as usize,
                    Err(err) => error!(channel_id, error = %err, "failed to fail channel tasks"),
                }
                return report;
            }
        };

        let request = FetchRequest::new(external_ids);
        let fetched = timeout(
            self.config.fetch_timeout,
            adaptor.fetch_tasks(&channel.base_url, &channel.key, &request),
        )
        .await;
        let response = match fetched {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                warn!(channel_id, error = %err, "task fetch failed");
                report.skipped = tasks.len();
                return report;
            }
            Err(_) => {
                warn!(
                    channel_id,
                    timeout_ms = self.config.fetch_timeout.as_millis() as u64,
                    "task fetch timed out"
                );
                report.skipped = tasks.len();
                return report;
            }
        };
        if !response.is_ok() {
            warn!(channel_id, status = response.status, "task fetch returned non-200 status");
            report.skipped = tasks.len();
            return report;
        }

        let envelope = match adaptor.parse_tasks(&response.body) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(
                    channel_id,
                    error = %err,
                    body = %String::from_utf8_lossy(&response.body),
                    "task fetch body could not be decoded"
                );
                report.skipped = tasks.len();
                return report;
            }
        };
        if !envelope.is_success() {
            warn!(
                channel_id,
                code = %envelope.code,
                message = %envelope.message,
                "task fetch reported failure"
            );
            report.skipped = tasks.len();
            return report;
        }

        let mut by_external_id: HashMap<String, Task> = tasks
            .into_iter()
            .map(|task| (task.external_id.clone(), task))
            .collect();

        for remote in envelope.data {
            let Some(task) = by_external_id.get_mut(&remote.external_id) else {
                warn!(channel_id, external_id = %remote.external_id, "remote task matches no local task");
                report.unknown += 1;
                continue;
            };
            if !diff::needs_update(task, &remote) {
                report.unchanged += 1;
                continue;
            }

            let outcome = diff::merge(task, &remote);
            if let Err(err) = self.tasks.update(task).await {
                error!(task_id = task.id, error = %err, "failed to persist task update");
                continue;
            }
            report.updated += 1;

            if outcome.failed_now() {
                info!(
                    task_id = task.id,
                    external_id = %task.external_id,
                    fail_reason = %task.fail_reason,
                    "task failed"
                );
                if task.quota != 0 {
                    match self
                        .ledger
                        .refund_task_quota(task.user_id, task.quota, &task.external_id)
                        .await
                    {
                        Ok(()) => report.compensated += 1,
                        Err(err) => error!(
                            task_id = task.id,
                            user_id = task.user_id,
                            quota = task.quota,
                            error = %err,
                            "failed to refund task quota"
                        ),
                    }
                }
            }
        }

        report
    }
}
