//! Change watcher
//!
//! Schedules reconciliation passes from two triggers: page mutation signals,
//! debounced so a burst of changes costs one pass, and a fixed interval that
//! catches anything the signals missed. The loop holds only a weak reference
//! to what it reconciles and stops on cancellation or when the target is gone.

use std::sync::Weak;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::WatcherConfig;

/// What woke the watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Debounced document mutation
    Mutation,
    /// Periodic timer
    Interval,
}

/// Something that can run a reconciliation pass
#[async_trait]
pub trait Reconcile: Send + Sync + 'static {
    async fn on_trigger(&self, trigger: Trigger);
}

/// Handle to a running watcher task
pub struct WatcherHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Request shutdown without waiting
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel and wait for the loop to exit. A pass already running finishes first.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Change watcher task ended abnormally");
        }
    }
}

pub struct ChangeWatcher;

impl ChangeWatcher {
    /// Spawn the watch loop on the current runtime
    pub fn spawn<T: Reconcile>(
        config: &WatcherConfig,
        changes: watch::Receiver<u64>,
        target: Weak<T>,
    ) -> WatcherHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            config.clone(),
            changes,
            target,
            cancel.child_token(),
        ));
        WatcherHandle { cancel, task }
    }
}

async fn run<T: Reconcile>(
    config: WatcherConfig,
    mut changes: watch::Receiver<u64>,
    target: Weak<T>,
    cancel: CancellationToken,
) {
    let debounce = config.debounce();
    let period = config.interval();

    tracing::debug!(
        debounce_ms = debounce.as_millis() as u64,
        interval_ms = period.as_millis() as u64,
        "Change watcher started"
    );

    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut deadline: Option<Instant> = None;
    let mut signals_open = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Change watcher stopping");
                break;
            }
            _ = interval.tick() => {
                if !fire(&target, Trigger::Interval).await {
                    break;
                }
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                if !fire(&target, Trigger::Mutation).await {
                    break;
                }
            }
            changed = changes.changed(), if signals_open => {
                match changed {
                    // Every new signal pushes the pass back
                    Ok(()) => deadline = Some(Instant::now() + debounce),
                    Err(_) => {
                        tracing::debug!("Mutation signal closed, continuing on interval only");
                        signals_open = false;
                    }
                }
            }
        }
    }
}

/// Run one pass. Returns false once the target has been dropped.
async fn fire<T: Reconcile>(target: &Weak<T>, trigger: Trigger) -> bool {
    let Some(target) = target.upgrade() else {
        tracing::debug!("Reconcile target dropped, change watcher exiting");
        return false;
    };
    target.on_trigger(trigger).await;
    true
}
