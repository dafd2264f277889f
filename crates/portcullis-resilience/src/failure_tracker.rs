//! Sliding-window failure tracking for circuit breakers.
//!
//! One `FailureTracker` is shared by every circuit breaker in the process.
//! Each tracked resource (a circuit's tracker id) keeps the timestamps of
//! its recent failure events. A circuit is open when
//!
//! - the resource is on the administrative forced-open list, or
//! - at least `max_failures` events fall inside the trailing
//!   `sampling_window`.
//!
//! A threshold trip holds the circuit open for `recovery_period` measured
//! from the event that caused it. Once that period has passed, events at or
//! before the trip are no longer counted, so a single new failure cannot
//! re-open the circuit on the strength of the old window.
//!
//! Old events are discarded by `compact`, which a background task runs on
//! an interval. The request path never prunes beyond the resource it reads.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use portcullis_core::clock::{to_delta, Clock};

use crate::maintenance::MaintenanceHandle;

/// How often the compaction task runs unless configured otherwise.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Thresholds for one circuit. Supplied by the caller on every call, so two
/// breakers sharing a tracker id may use different thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitConfig {
    pub sampling_window: Duration,
    pub max_failures: u32,
    pub recovery_period: Duration,
    /// Executions slower than this count as failure events. `None` for
    /// circuits that only count explicit failures.
    pub max_latency: Option<Duration>,
}

/// Result of checking a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    /// The threshold was crossed by this check.
    Tripped,
    /// Still inside the recovery period of an earlier trip.
    Open,
    /// On the administrative forced-open list.
    ForcedOpen,
}

impl CircuitState {
    pub fn is_open(self) -> bool {
        !matches!(self, CircuitState::Closed)
    }
}

#[derive(Debug, Default)]
struct ResourceState {
    events: VecDeque<DateTime<Utc>>,
    tripped_at: Option<DateTime<Utc>>,
    /// Largest sampling window any caller has used for this resource.
    retention: Duration,
    /// Largest recovery period any caller has used for this resource.
    recovery: Duration,
}

impl ResourceState {
    fn widen(&mut self, config: &CircuitConfig) {
        self.retention = self.retention.max(config.sampling_window);
        self.recovery = self.recovery.max(config.recovery_period);
    }

    /// Forget the trip and every event at or before it.
    fn recover(&mut self, tripped_at: DateTime<Utc>) {
        self.events.retain(|t| *t > tripped_at);
        self.tripped_at = None;
    }

    fn evaluate(&mut self, now: DateTime<Utc>, config: &CircuitConfig) -> CircuitState {
        if let Some(tripped_at) = self.tripped_at {
            if recovering(now, tripped_at, config.recovery_period) {
                return CircuitState::Open;
            }
            self.recover(tripped_at);
        }

        if config.max_failures == 0 {
            return CircuitState::Closed;
        }

        let recent = match window_floor(now, config.sampling_window) {
            Some(floor) => self.events.iter().filter(|t| **t > floor).count(),
            None => self.events.len(),
        };
        if recent < config.max_failures as usize {
            return CircuitState::Closed;
        }

        let trigger = self.events.back().copied().unwrap_or(now);
        if recovering(now, trigger, config.recovery_period) {
            self.tripped_at = Some(trigger);
            CircuitState::Tripped
        } else {
            // The trip would already have expired.
            self.recover(trigger);
            CircuitState::Closed
        }
    }
}

/// Start of the sampling window ending at `now`. `None` when the window
/// reaches past the earliest representable instant, so every event counts.
fn window_floor(now: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
    now.checked_sub_signed(to_delta(window))
}

/// Whether a trip at `tripped_at` still holds at `now`. A deadline past the
/// latest representable instant never expires.
fn recovering(now: DateTime<Utc>, tripped_at: DateTime<Utc>, recovery: Duration) -> bool {
    tripped_at
        .checked_add_signed(to_delta(recovery))
        .map_or(true, |deadline| now < deadline)
}

pub struct FailureTracker {
    clock: Arc<dyn Clock>,
    resources: DashMap<String, Mutex<ResourceState>>,
    forced_open: RwLock<HashSet<String>>,
}

impl FailureTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            resources: DashMap::new(),
            forced_open: RwLock::new(HashSet::new()),
        }
    }

    // ── Recording ────────────────────────────────────────────────────────────

    pub fn record_failure(&self, resource: &str, config: &CircuitConfig) {
        let now = self.clock.now();
        let pending = self.with_state(resource, config, |state| {
            state.events.push_back(now);
            state.events.len()
        });
        debug!(resource, pending, "failure event recorded");
    }

    /// Record a completed execution. It counts as a failure event only when
    /// the circuit has a latency limit and `elapsed` exceeds it.
    ///
    /// Returns `true` if an event was recorded.
    pub fn record_success_or_latency(&self, resource: &str, elapsed: Duration, config: &CircuitConfig) -> bool {
        match config.max_latency {
            Some(limit) if elapsed > limit => {
                debug!(resource, elapsed_ms = elapsed.as_millis() as u64, "slow execution recorded");
                self.record_failure(resource, config);
                true
            }
            _ => false,
        }
    }

    // ── Checking ─────────────────────────────────────────────────────────────

    pub fn check(&self, resource: &str, config: &CircuitConfig) -> CircuitState {
        if self.forced_open.read().contains(resource) {
            return CircuitState::ForcedOpen;
        }
        let Some(entry) = self.resources.get(resource) else {
            return CircuitState::Closed;
        };
        let mut state = entry.lock();
        state.widen(config);
        let circuit = state.evaluate(self.clock.now(), config);
        if circuit == CircuitState::Tripped {
            info!(resource, max_failures = config.max_failures, "circuit tripped");
        }
        circuit
    }

    pub fn is_open(&self, resource: &str, config: &CircuitConfig) -> bool {
        self.check(resource, config).is_open()
    }

    // ── Administrative override ──────────────────────────────────────────────

    /// Replace the forced-open list.
    pub fn set_forced_open<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: HashSet<String> = names.into_iter().map(Into::into).collect();
        info!(count = names.len(), "forced-open list replaced");
        *self.forced_open.write() = names;
    }

    pub fn force_open(&self, resource: impl Into<String>) {
        self.forced_open.write().insert(resource.into());
    }

    /// Returns `true` if the resource was on the list.
    pub fn clear_forced_open(&self, resource: &str) -> bool {
        self.forced_open.write().remove(resource)
    }

    /// The forced-open list, sorted.
    pub fn forced_open(&self) -> Vec<String> {
        let mut names: Vec<String> = self.forced_open.read().iter().cloned().collect();
        names.sort();
        names
    }

    // ── Compaction ───────────────────────────────────────────────────────────

    /// Number of resources with retained state.
    pub fn tracked(&self) -> usize {
        self.resources.len()
    }

    /// Drop events older than each resource's widest sampling window, and
    /// resources left with nothing to remember. Returns the number of events
    /// discarded.
    pub fn compact(&self) -> usize {
        let now = self.clock.now();
        let mut discarded = 0;
        self.resources.retain(|_, state| {
            let state = state.get_mut();
            if let Some(floor) = window_floor(now, state.retention) {
                while state.events.front().is_some_and(|t| *t <= floor) {
                    state.events.pop_front();
                    discarded += 1;
                }
            }
            let held = state
                .tripped_at
                .is_some_and(|t| recovering(now, t, state.recovery));
            !state.events.is_empty() || held
        });
        discarded
    }

    /// Run `compact` every `every` on the current tokio runtime.
    ///
    /// The task holds only a weak reference and exits on the first tick
    /// after the tracker is dropped, or when the handle is shut down.
    pub fn spawn_compaction(self: &Arc<Self>, every: Duration) -> MaintenanceHandle {
        let tracker: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(tracker) = tracker.upgrade() else {
                    debug!("failure tracker dropped; compaction stopped");
                    break;
                };
                let discarded = tracker.compact();
                debug!(discarded, tracked = tracker.tracked(), "failure tracker compacted");
            }
        });
        MaintenanceHandle::new(task)
    }

    fn with_state<R>(&self, resource: &str, config: &CircuitConfig, f: impl FnOnce(&mut ResourceState) -> R) -> R {
        if let Some(entry) = self.resources.get(resource) {
            let mut state = entry.lock();
            state.widen(config);
            return f(&mut state);
        }
        let entry = self
            .resources
            .entry(resource.to_string())
            .or_insert_with(|| Mutex::new(ResourceState::default()));
        let mut state = entry.lock();
        state.widen(config);
        f(&mut state)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use portcullis_core::clock::ManualClock;

    use super::*;

    fn config() -> CircuitConfig {
        CircuitConfig {
            sampling_window: Duration::from_secs(60),
            max_failures: 3,
            recovery_period: Duration::from_secs(30),
            max_latency: None,
        }
    }

    fn setup() -> (Arc<ManualClock>, FailureTracker) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()));
        let tracker = FailureTracker::new(clock.clone());
        (clock, tracker)
    }

    // ── Threshold ────────────────────────────────────────────────────────────

    #[test]
    fn opens_at_max_failures_within_window() {
        let (clock, tracker) = setup();
        let cfg = config();

        for _ in 0..2 {
            tracker.record_failure("orders", &cfg);
            clock.advance(Duration::from_secs(1));
        }
        assert_eq!(tracker.check("orders", &cfg), CircuitState::Closed);

        tracker.record_failure("orders", &cfg);
        assert_eq!(tracker.check("orders", &cfg), CircuitState::Tripped);
        assert_eq!(tracker.check("orders", &cfg), CircuitState::Open);
        assert!(!tracker.is_open("billing", &cfg), "other resources are unaffected");
    }

    #[test]
    fn events_outside_window_do_not_count() {
        let (clock, tracker) = setup();
        let cfg = config();

        tracker.record_failure("orders", &cfg);
        tracker.record_failure("orders", &cfg);
        clock.advance(Duration::from_secs(61));
        tracker.record_failure("orders", &cfg);

        assert!(!tracker.is_open("orders", &cfg));
    }

    #[test]
    fn closes_after_recovery_and_recounts_fresh_window() {
        let (clock, tracker) = setup();
        let cfg = config();

        for _ in 0..3 {
            tracker.record_failure("orders", &cfg);
        }
        assert!(tracker.is_open("orders", &cfg));

        clock.advance(Duration::from_secs(29));
        assert!(tracker.is_open("orders", &cfg));

        clock.advance(Duration::from_secs(1));
        assert_eq!(tracker.check("orders", &cfg), CircuitState::Closed);

        // The three old events are still inside the sampling window but no
        // longer count; one new failure is not enough to re-open.
        tracker.record_failure("orders", &cfg);
        assert!(!tracker.is_open("orders", &cfg));
    }

    #[test]
    fn slow_executions_count_only_with_a_latency_limit() {
        let (_clock, tracker) = setup();
        let latency = CircuitConfig { max_latency: Some(Duration::from_millis(100)), ..config() };

        assert!(!tracker.record_success_or_latency("svc", Duration::from_millis(500), &config()));
        assert!(!tracker.record_success_or_latency("svc", Duration::from_millis(50), &latency));
        for _ in 0..3 {
            assert!(tracker.record_success_or_latency("svc", Duration::from_millis(150), &latency));
        }
        assert!(tracker.is_open("svc", &latency));
    }

    // ── Forced open ──────────────────────────────────────────────────────────

    #[test]
    fn forced_open_overrides_and_removal_restores_threshold() {
        let (_clock, tracker) = setup();
        let cfg = config();

        tracker.set_forced_open(["orders", "billing"]);
        assert_eq!(tracker.check("orders", &cfg), CircuitState::ForcedOpen);
        assert_eq!(tracker.forced_open(), vec!["billing", "orders"]);

        assert!(tracker.clear_forced_open("orders"));
        assert!(!tracker.is_open("orders", &cfg));

        tracker.set_forced_open(Vec::<String>::new());
        assert!(!tracker.is_open("billing", &cfg));

        tracker.force_open("inventory");
        assert!(tracker.is_open("inventory", &cfg));
    }

    // ── Compaction ───────────────────────────────────────────────────────────

    #[test]
    fn compact_discards_old_events_and_idle_resources() {
        let (clock, tracker) = setup();
        let cfg = config();

        tracker.record_failure("old", &cfg);
        clock.advance(Duration::from_secs(120));
        tracker.record_failure("fresh", &cfg);

        assert_eq!(tracker.compact(), 1);
        assert_eq!(tracker.tracked(), 1);
        assert!(tracker.compact() == 0);
    }

    #[test]
    fn compact_keeps_tripped_resources_until_recovered() {
        let (clock, tracker) = setup();
        let cfg = CircuitConfig { sampling_window: Duration::from_secs(5), ..config() };

        for _ in 0..3 {
            tracker.record_failure("orders", &cfg);
        }
        assert!(tracker.is_open("orders", &cfg));

        clock.advance(Duration::from_secs(10));
        tracker.compact();
        assert_eq!(tracker.tracked(), 1, "still inside recovery");
        assert!(tracker.is_open("orders", &cfg));

        clock.advance(Duration::from_secs(30));
        tracker.compact();
        assert_eq!(tracker.tracked(), 0);
    }

    // ── Unbounded durations ──────────────────────────────────────────────────

    #[test]
    fn oversized_sampling_window_counts_every_event() {
        let (_clock, tracker) = setup();
        let cfg = CircuitConfig { sampling_window: Duration::from_millis(10u64.pow(16)), ..config() };

        let states: Vec<CircuitState> = (0..3)
            .map(|_| {
                tracker.record_failure("orders", &cfg);
                tracker.check("orders", &cfg)
            })
            .collect();
        assert_eq!(states, [CircuitState::Closed, CircuitState::Closed, CircuitState::Tripped]);
        assert_eq!(tracker.compact(), 0, "nothing falls outside an unbounded window");
        assert_eq!(tracker.tracked(), 1);
    }

    #[test]
    fn oversized_recovery_period_stays_open() {
        let (clock, tracker) = setup();
        let cfg = CircuitConfig { recovery_period: Duration::from_millis(u64::MAX), ..config() };

        for _ in 0..3 {
            tracker.record_failure("orders", &cfg);
        }
        assert_eq!(tracker.check("orders", &cfg), CircuitState::Tripped);

        clock.advance(Duration::from_secs(365 * 24 * 3600));
        assert_eq!(tracker.check("orders", &cfg), CircuitState::Open);

        tracker.compact();
        assert_eq!(tracker.tracked(), 1, "a trip that never expires is retained");
    }

    #[tokio::test]
    async fn compaction_task_prunes_and_stops_with_tracker() {
        let (clock, tracker) = setup();
        let tracker = Arc::new(tracker);
        tracker.record_failure("orders", &config());
        clock.advance(Duration::from_secs(3600));

        let handle = tracker.spawn_compaction(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(tracker.tracked(), 0);
        assert!(!handle.is_finished());

        drop(tracker);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn compaction_task_stops_on_shutdown() {
        let (_clock, tracker) = setup();
        let tracker = Arc::new(tracker);

        let handle = tracker.spawn_compaction(Duration::from_millis(10));
        handle.shutdown();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(handle.is_finished());
        assert_eq!(Arc::strong_count(&tracker), 1);
    }
}
