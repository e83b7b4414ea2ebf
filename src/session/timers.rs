//! Deadline bookkeeping for the session actor
//!
//! Every protocol timer is one entry keyed by [`TimerKind`]. Arming a kind
//! replaces its previous deadline; disconnect clears them all at once. The
//! actor sleeps until [`Timers::next_deadline`] alongside its other inputs.

use std::time::Duration;

use tokio::time::Instant;

/// Which protocol step a deadline belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Send our own heartbeat
    SelfHeartbeat,
    /// No vehicle heartbeat since connecting
    ConnectTimeout,
    /// Target heartbeat watchdog
    HeartbeatWatchdog,
    /// Parameter burst went quiet
    ParamSettle,
    /// Gap between individual parameter re-requests
    ParamRetrySpacing,
    /// Wait after a retry pass before re-evaluating
    ParamRetryGrace,
    /// Pending parameter write attempt expired
    ParamWrite,
    /// Ack wait for one command id
    Command(u16),
    /// Next post-connect step
    PostConnect,
    /// Next stream activation step
    StreamStep,
    /// Check whether telemetry started flowing
    StreamCheck,
}

impl TimerKind {
    /// Timers owned by the parameter download
    pub fn is_param_sync(self) -> bool {
        matches!(
            self,
            TimerKind::ParamSettle | TimerKind::ParamRetrySpacing | TimerKind::ParamRetryGrace
        )
    }
}

/// Armed deadlines
#[derive(Debug, Default)]
pub struct Timers {
    entries: Vec<(Instant, TimerKind)>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind` to fire `after` from now, replacing any earlier deadline
    pub fn arm(&mut self, kind: TimerKind, after: Duration) {
        self.arm_at(kind, Instant::now() + after);
    }

    pub fn arm_at(&mut self, kind: TimerKind, deadline: Instant) {
        self.cancel(kind);
        self.entries.push((deadline, kind));
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.entries.retain(|(_, k)| *k != kind);
    }

    /// Cancel every timer matching `predicate`
    pub fn cancel_where<F>(&mut self, predicate: F)
    where
        F: Fn(TimerKind) -> bool,
    {
        self.entries.retain(|(_, k)| !predicate(*k));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Earliest armed deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|(deadline, _)| *deadline).min()
    }

    /// Remove and return every timer due at `now`, earliest first
    pub fn pop_due(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut due: Vec<(Instant, TimerKind)> = Vec::new();
        self.entries.retain(|entry| {
            if entry.0 <= now {
                due.push(*entry);
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(deadline, _)| *deadline);
        due.into_iter().map(|(_, kind)| kind).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_arm_replaces_same_kind() {
        let mut timers = Timers::new();
        timers.arm(TimerKind::HeartbeatWatchdog, Duration::from_secs(5));
        timers.arm(TimerKind::HeartbeatWatchdog, Duration::from_secs(1));

        assert_eq!(timers.len(), 1);
        assert_eq!(timers.next_deadline(), Some(Instant::now() + Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_due_in_deadline_order() {
        let mut timers = Timers::new();
        timers.arm(TimerKind::ParamSettle, Duration::from_millis(300));
        timers.arm(TimerKind::SelfHeartbeat, Duration::from_millis(100));
        timers.arm(TimerKind::Command(241), Duration::from_millis(200));
        timers.arm(TimerKind::ConnectTimeout, Duration::from_secs(10));

        tokio::time::advance(Duration::from_millis(300)).await;
        let due = timers.pop_due(Instant::now());

        assert_eq!(
            due,
            vec![TimerKind::SelfHeartbeat, TimerKind::Command(241), TimerKind::ParamSettle]
        );
        assert_eq!(timers.len(), 1);
        assert_eq!(
            timers.pop_due(Instant::now() + Duration::from_secs(10)),
            vec![TimerKind::ConnectTimeout]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_timers_keyed_by_id() {
        let mut timers = Timers::new();
        timers.arm(TimerKind::Command(1), Duration::from_secs(1));
        timers.arm(TimerKind::Command(2), Duration::from_secs(1));
        assert_eq!(timers.len(), 2);

        timers.cancel(TimerKind::Command(1));
        assert_eq!(timers.len(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(timers.pop_due(Instant::now()), vec![TimerKind::Command(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_where_and_clear() {
        let mut timers = Timers::new();
        timers.arm(TimerKind::ParamSettle, Duration::from_secs(1));
        timers.arm(TimerKind::ParamRetryGrace, Duration::from_secs(1));
        timers.arm(TimerKind::SelfHeartbeat, Duration::from_secs(1));

        timers.cancel_where(TimerKind::is_param_sync);
        assert_eq!(timers.len(), 1);

        timers.clear();
        assert!(timers.is_empty());
        assert_eq!(timers.next_deadline(), None);
    }
}
