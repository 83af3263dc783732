//! Stall detection for in-flight uploads.
//!
//! Every started task gets a supervisor that samples its progress on
//! a tick. While a reply is outstanding the supervisor also walks the
//! progress through the waiting band so callers see the upload is
//! still alive. When no progress lands inside the stall window the
//! supervisor kills the task.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::events::{PROGRESS_PARSING, PROGRESS_STREAM_LIMIT, PROGRESS_WAIT_CAP};
use crate::task::UploadTask;

/// Timing knobs for the supervisor. The defaults match production;
/// tests shrink them to keep runtimes short.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How long progress may sit unchanged before the task is killed.
    pub stall_window: Duration,
    /// Sampling interval while the body is streaming.
    pub base_tick: Duration,
    /// Per-step slowdown inside the waiting band; ticks stretch as the
    /// synthetic progress climbs.
    pub band_tick_step: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stall_window: Duration::from_secs(120),
            base_tick: Duration::from_secs(1),
            band_tick_step: Duration::from_millis(600),
        }
    }
}

impl SupervisorConfig {
    /// Sleep interval before the next sample at the given progress.
    pub fn tick_interval(&self, progress: u16) -> Duration {
        if progress > PROGRESS_STREAM_LIMIT {
            self.base_tick
                .max(self.band_tick_step * (progress - PROGRESS_STREAM_LIMIT) as u32)
        } else {
            self.base_tick
        }
    }
}

/// Watches one task until it terminates, replies, or stalls out.
pub(crate) async fn supervise(task: Arc<UploadTask>) {
    let config = task.supervisor_config().clone();
    let mut last_progress = task.progress();
    let mut last_change = Instant::now();

    loop {
        if task.is_terminated() || task.is_killed() {
            return;
        }
        let progress = task.progress();
        if progress >= PROGRESS_PARSING {
            return;
        }
        if last_change.elapsed() >= config.stall_window {
            break;
        }
        // Past the streaming band the server owes us a reply; tick the
        // progress upward so the wait stays visible, capped below the
        // reply mark.
        if progress > PROGRESS_STREAM_LIMIT {
            task.report_progress((progress + 1).min(PROGRESS_WAIT_CAP));
        }
        let progress = task.progress();
        if progress != last_progress {
            last_progress = progress;
            last_change = Instant::now();
        }
        tokio::time::sleep(config.tick_interval(progress)).await;
    }

    // The window elapsed with the upload still short of a reply.
    if task.progress() < PROGRESS_PARSING && !task.is_terminated() {
        warn!(
            media_id = %task.media_id(),
            stalled_for = ?config.stall_window,
            "upload stalled, killing"
        );
        task.kill(true);
    }
}
