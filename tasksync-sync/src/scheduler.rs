//! Background sync loop.
//!
//! One spawned task owns the rounds: on every tick of the poll interval, on
//! [`SyncCommand::SyncNow`] and (if configured) after local commits. Rounds
//! never overlap; triggers that arrive during a round coalesce into the next
//! one.

use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use std::sync::Arc;
use tasksync_storage::{StoreChange, WriteOrigin};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    SyncNow,
    Shutdown,
}

/// Progress reported to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    RoundStarted,
    RoundFinished {
        pushed: usize,
        deleted: usize,
        applied: usize,
        deferred: usize,
        failed: usize,
    },
    RoundFailed(String),
    Stopped,
}

/// Owner side of a running scheduler.
pub struct SchedulerHandle {
    commands: mpsc::Sender<SyncCommand>,
    events: broadcast::Sender<SyncEvent>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Requests a round as soon as the current one (if any) finishes.
    pub async fn sync_now(&self) -> SyncResult<()> {
        self.commands
            .send(SyncCommand::SyncNow)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Stops the loop after the current round and waits for it.
    pub async fn shutdown(self) -> SyncResult<()> {
        // The loop may already be gone; joining is what matters.
        let _ = self.commands.send(SyncCommand::Shutdown).await;
        self.task.await.map_err(|_| SyncError::ChannelClosed)
    }
}

pub struct SyncScheduler;

impl SyncScheduler {
    /// Spawns the loop on the current tokio runtime.
    pub fn spawn(engine: Arc<SyncEngine>) -> SchedulerHandle {
        let (commands, rx) = mpsc::channel(16);
        let (events, _) = broadcast::channel(64);
        let task = tokio::spawn(run(engine, rx, events.clone()));
        SchedulerHandle {
            commands,
            events,
            task,
        }
    }
}

async fn run(
    engine: Arc<SyncEngine>,
    mut commands: mpsc::Receiver<SyncCommand>,
    events: broadcast::Sender<SyncEvent>,
) {
    let config = &engine.context().config;
    let watch_local = config.sync_on_local_change;
    let mut changes = engine.store().subscribe();
    let mut ticker = interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(device = %config.device_name, interval_ms = config.poll_interval_ms, "sync scheduler started");
    let mut queued = false;
    loop {
        let run_round = if std::mem::take(&mut queued) {
            true
        } else {
            tokio::select! {
                _ = ticker.tick() => true,
                command = commands.recv() => match command {
                    Some(SyncCommand::SyncNow) => true,
                    Some(SyncCommand::Shutdown) | None => break,
                },
                change = changes.recv(), if watch_local => match change {
                    Ok(change) => change.origin == WriteOrigin::Local,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "store change feed lagged");
                        true
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        };
        if !run_round {
            continue;
        }

        let _ = events.send(SyncEvent::RoundStarted);
        let event = match engine.sync_once().await {
            Ok(report) => SyncEvent::RoundFinished {
                pushed: report.push.pushed.len(),
                deleted: report.push.deleted.len(),
                applied: report.pull.applied(),
                deferred: report.pull.deferred(),
                failed: report.push.failed.len() + report.pull.failed.len(),
            },
            Err(err) => {
                warn!(%err, "sync round failed");
                SyncEvent::RoundFailed(err.to_string())
            }
        };
        let _ = events.send(event);

        if watch_local {
            queued = drain_local(&mut changes);
        }
    }

    info!("sync scheduler stopped");
    let _ = events.send(SyncEvent::Stopped);
}

/// Consumes changes committed during a round. True if any was local.
fn drain_local(changes: &mut broadcast::Receiver<StoreChange>) -> bool {
    let mut local = false;
    loop {
        match changes.try_recv() {
            Ok(change) => local |= change.origin == WriteOrigin::Local,
            Err(TryRecvError::Lagged(_)) => local = true,
            Err(TryRecvError::Empty | TryRecvError::Closed) => return local,
        }
    }
}
