/**
 * UPDATE SCHEDULER - Full/delta cadence
 *
 * A tick fires every `tick_interval`. It broadcasts a full message when
 * none was sent yet or when `full_resync_interval` has elapsed since the
 * last one, and a delta otherwise. The decision is a pure function of the
 * instant passed in; the async loop around it only sleeps and calls the
 * dashboard.
 *
 * The loop re-arms its sleep after the tick body returned, so two ticks
 * never overlap even when a tick runs long.
 */

use crate::dashboard::{SharedDashboard, TickOutcome};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub tick_interval: Duration,
    pub full_resync_interval: Duration,
}

impl Default for Cadence {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(2),
            full_resync_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Full,
    Delta,
}

#[derive(Debug)]
pub struct UpdateScheduler {
    cadence: Cadence,
    last_full_at: Option<Instant>,
}

impl UpdateScheduler {
    pub fn new(cadence: Cadence) -> Self {
        Self {
            cadence,
            last_full_at: None,
        }
    }

    /// Picks the message kind for a tick at `now`. Choosing `Full` records
    /// `now` as the last full broadcast.
    pub fn decide(&mut self, now: Instant) -> Decision {
        let due = match self.last_full_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.cadence.full_resync_interval,
        };
        if due {
            self.last_full_at = Some(now);
            Decision::Full
        } else {
            Decision::Delta
        }
    }

    pub fn last_full_at(&self) -> Option<Instant> {
        self.last_full_at
    }
}

pub fn spawn_scheduler(dashboard: SharedDashboard, cadence: Cadence) -> JoinHandle<()> {
    info!(
        "scheduler started (tick {:?}, full resync {:?})",
        cadence.tick_interval, cadence.full_resync_interval
    );
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(cadence.tick_interval).await;
            let outcome = dashboard.lock().tick(Instant::now());
            match outcome {
                TickOutcome::Skipped => {}
                TickOutcome::Full(n) => debug!("full message sent to {n} viewers"),
                TickOutcome::Delta(n) => debug!("delta message sent to {n} viewers"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_decision_is_full() {
        let mut scheduler = UpdateScheduler::new(Cadence::default());
        assert!(scheduler.last_full_at().is_none());
        let now = Instant::now();
        assert_eq!(scheduler.decide(now), Decision::Full);
        assert_eq!(scheduler.last_full_at(), Some(now));
    }

    #[test]
    fn full_every_thirty_ticks_with_default_cadence() {
        let cadence = Cadence::default();
        let mut scheduler = UpdateScheduler::new(cadence);
        let start = Instant::now();

        let decisions: Vec<Decision> = (0..91)
            .map(|i| scheduler.decide(start + cadence.tick_interval * i))
            .collect();
        let fulls: Vec<usize> = decisions
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == Decision::Full)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(fulls, vec![0, 30, 60, 90]);
    }

    #[test]
    fn late_tick_still_resyncs() {
        let mut scheduler = UpdateScheduler::new(Cadence::default());
        let start = Instant::now();
        scheduler.decide(start);
        assert_eq!(scheduler.decide(start + Duration::from_secs(59)), Decision::Delta);
        assert_eq!(scheduler.decide(start + Duration::from_secs(75)), Decision::Full);
        assert_eq!(scheduler.decide(start + Duration::from_secs(77)), Decision::Delta);
    }
}
