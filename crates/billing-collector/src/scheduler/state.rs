//! Scheduler cursor
//!
//! Lives only in memory; a restart without an explicit start time begins
//! again from `now - lookback`.

use billing_common::{truncate_to_seconds, TimeWindow};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Position of the scheduler on the time grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleState {
    /// Start of the next window to process
    pub next_run_time: DateTime<Utc>,
    /// Bounded backfill run that stops once caught up
    pub recovery_mode: bool,
}

impl ScheduleState {
    /// Initial state: recovery mode from an explicit start, otherwise normal
    /// mode starting `lookback` before `now`.
    pub fn initial(start: Option<DateTime<Utc>>, now: DateTime<Utc>, lookback: Duration) -> Self {
        match start {
            Some(start) => Self {
                next_run_time: truncate_to_seconds(start),
                recovery_mode: true,
            },
            None => Self {
                next_run_time: truncate_to_seconds(now - lookback),
                recovery_mode: false,
            },
        }
    }

    /// The next window to process
    pub fn window(&self, interval: Duration) -> TimeWindow {
        TimeWindow::starting_at(self.next_run_time, interval)
    }

    /// How long until the next window is complete as of `current_time`
    /// (already shifted back by the completeness delay). `None` when ready.
    pub fn wait_time(&self, interval: Duration, current_time: DateTime<Utc>) -> Option<std::time::Duration> {
        let window_end = self.next_run_time + interval;
        if window_end > current_time {
            Some((window_end - current_time).to_std().unwrap_or_default())
        } else {
            None
        }
    }

    /// Move to the following window
    pub fn advance(&mut self, interval: Duration) {
        self.next_run_time += interval;
    }

    /// Whether a recovery run has reached `now - completeness_delay`
    pub fn is_caught_up(&self, now: DateTime<Utc>, completeness_delay: Duration) -> bool {
        self.recovery_mode && self.next_run_time >= now - completeness_delay
    }
}
