//! Periodic loop scheduling
//!
//! Each monitor loop is one spawned task driven by an interval timer.
//! Ticks are serialized per loop and missed ticks are skipped, so two
//! ticks of the same loop never overlap. Every tick body runs under a
//! deadline; loops stop when the shutdown token fires.

use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Spawn a named periodic loop onto the tracker. `tick` is invoked once
/// per interval with a per-tick deadline; a tick that overruns it is
/// abandoned and logged.
pub fn spawn_loop<F, Fut>(
    name: &'static str,
    interval: Duration,
    tick_deadline: Duration,
    cancel: CancellationToken,
    tracker: &TaskTracker,
    tick: F,
) where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tracker.spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(loop_name = name, interval_seconds = interval.as_secs(), "loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(loop_name = name, "loop stopped");
                    break;
                }
                _ = timer.tick() => {
                    if tokio::time::timeout(tick_deadline, tick()).await.is_err() {
                        warn!(
                            loop_name = name,
                            deadline_seconds = tick_deadline.as_secs(),
                            "tick exceeded its deadline"
                        );
                    }
                }
            }
        }
    });
}
