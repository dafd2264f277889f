//! Period-bound throughput counters.
//!
//! A counter holds a running total for the current period. The first
//! operation after the period ends resets the total to zero and computes
//! the next period, aligned to calendar boundaries in UTC. Counters are
//! keyed by name and, for per-requester quotas, the requester identity.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Datelike, Months, TimeDelta, Timelike, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use portcullis_contracts::error::GatewayError;
use portcullis_core::clock::Clock;

use crate::maintenance::MaintenanceHandle;

// ── Period ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodUnit {
    Second,
    Minute,
    Hour,
    Day,
    Month,
}

impl PeriodUnit {
    /// The `[start, end)` period containing `now`.
    pub fn bounds(self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let date = now.date_naive();
        let start = match self {
            PeriodUnit::Second => date.and_hms_opt(now.hour(), now.minute(), now.second()),
            PeriodUnit::Minute => date.and_hms_opt(now.hour(), now.minute(), 0),
            PeriodUnit::Hour => date.and_hms_opt(now.hour(), 0, 0),
            PeriodUnit::Day => date.and_hms_opt(0, 0, 0),
            PeriodUnit::Month => date.with_day(1).and_then(|d| d.and_hms_opt(0, 0, 0)),
        }
        .map(|naive| naive.and_utc())
        .unwrap_or(now);

        let end = match self {
            PeriodUnit::Second => start + TimeDelta::seconds(1),
            PeriodUnit::Minute => start + TimeDelta::minutes(1),
            PeriodUnit::Hour => start + TimeDelta::hours(1),
            PeriodUnit::Day => start + TimeDelta::days(1),
            PeriodUnit::Month => start
                .checked_add_months(Months::new(1))
                .unwrap_or(start + TimeDelta::days(31)),
        };
        (start, end)
    }
}

impl FromStr for PeriodUnit {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "second" => Ok(PeriodUnit::Second),
            "minute" => Ok(PeriodUnit::Minute),
            "hour" => Ok(PeriodUnit::Hour),
            "day" => Ok(PeriodUnit::Day),
            "month" => Ok(PeriodUnit::Month),
            other => Err(GatewayError::ConfigError {
                reason: format!("unknown quota period '{}'", other),
            }),
        }
    }
}

impl fmt::Display for PeriodUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeriodUnit::Second => "second",
            PeriodUnit::Minute => "minute",
            PeriodUnit::Hour => "hour",
            PeriodUnit::Day => "day",
            PeriodUnit::Month => "month",
        };
        f.write_str(s)
    }
}

// ── Keys and results ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuotaKey {
    pub name: String,
    /// `None` for a counter shared by every caller.
    pub requester: Option<String>,
}

impl QuotaKey {
    pub fn global(name: impl Into<String>) -> Self {
        Self { name: name.into(), requester: None }
    }

    pub fn per_requester(name: impl Into<String>, requester: impl Into<String>) -> Self {
        Self { name: name.into(), requester: Some(requester.into()) }
    }
}

impl fmt::Display for QuotaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.requester {
            Some(requester) => write!(f, "{}[{}]", self.name, requester),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaDecision {
    /// Counter value after the operation.
    pub value: u64,
    pub allowed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub value: u64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

// ── Counter state ─────────────────────────────────────────────────────────────

#[derive(Debug)]
struct CounterState {
    value: u64,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
}

impl CounterState {
    fn new(now: DateTime<Utc>, unit: PeriodUnit) -> Self {
        let (period_start, period_end) = unit.bounds(now);
        Self { value: 0, period_start, period_end }
    }

    fn roll(&mut self, now: DateTime<Utc>, unit: PeriodUnit) {
        if now >= self.period_end {
            let (start, end) = unit.bounds(now);
            self.value = 0;
            self.period_start = start;
            self.period_end = end;
        }
    }
}

type Counter = Arc<Mutex<CounterState>>;

/// An increment that has been counted but not yet confirmed.
///
/// `commit` keeps it. `cancel` gives the unit back, unless the counter has
/// since moved to a new period. Dropping a reservation commits it.
#[derive(Debug)]
pub struct Reservation {
    counter: Counter,
    period_end: DateTime<Utc>,
}

impl Reservation {
    pub fn commit(self) {}

    /// Returns `true` if the unit was given back.
    pub fn cancel(self) -> bool {
        let mut state = self.counter.lock();
        if state.period_end != self.period_end || state.value == 0 {
            return false;
        }
        state.value -= 1;
        true
    }
}

// ── QuotaCounter ──────────────────────────────────────────────────────────────

pub struct QuotaCounter {
    clock: Arc<dyn Clock>,
    counters: DashMap<QuotaKey, Counter>,
}

impl QuotaCounter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, counters: DashMap::new() }
    }

    /// Increment unconditionally, then compare to `max`.
    ///
    /// Denied attempts are counted too, so a caller that keeps retrying
    /// while over quota stays over quota for the rest of the period.
    pub fn try_increment(&self, key: &QuotaKey, max: u64, unit: PeriodUnit) -> QuotaDecision {
        let counter = self.counter(key, unit);
        let mut state = counter.lock();
        state.roll(self.clock.now(), unit);
        state.value = state.value.saturating_add(1);
        let decision = QuotaDecision { value: state.value, allowed: state.value <= max };
        debug!(counter = %key, value = decision.value, max, allowed = decision.allowed, "quota incremented");
        decision
    }

    /// Reserve one unit if the counter is below `max`.
    ///
    /// A denied reservation leaves the counter untouched.
    pub fn reserve(&self, key: &QuotaKey, max: u64, unit: PeriodUnit) -> (QuotaDecision, Option<Reservation>) {
        let counter = self.counter(key, unit);
        let mut state = counter.lock();
        state.roll(self.clock.now(), unit);
        if state.value >= max {
            debug!(counter = %key, value = state.value, max, "quota reservation denied");
            return (QuotaDecision { value: state.value, allowed: false }, None);
        }
        state.value += 1;
        let decision = QuotaDecision { value: state.value, allowed: true };
        let period_end = state.period_end;
        drop(state);
        debug!(counter = %key, value = decision.value, max, "quota reserved");
        (decision, Some(Reservation { counter, period_end }))
    }

    /// Give one unit back to the pool. Never below zero, always allowed.
    pub fn decrement(&self, key: &QuotaKey, unit: PeriodUnit) -> QuotaDecision {
        let counter = self.counter(key, unit);
        let mut state = counter.lock();
        state.roll(self.clock.now(), unit);
        state.value = state.value.saturating_sub(1);
        debug!(counter = %key, value = state.value, "quota decremented");
        QuotaDecision { value: state.value, allowed: true }
    }

    /// Current state of a counter, if it exists. Does not roll the period.
    pub fn snapshot(&self, key: &QuotaKey) -> Option<QuotaSnapshot> {
        self.counters.get(key).map(|counter| {
            let state = counter.lock();
            QuotaSnapshot {
                value: state.value,
                period_start: state.period_start,
                period_end: state.period_end,
            }
        })
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Remove counters whose period has ended and that no outstanding
    /// reservation still refers to. Returns how many were removed.
    pub fn gc(&self) -> usize {
        let now = self.clock.now();
        let before = self.counters.len();
        self.counters.retain(|_, counter| {
            Arc::strong_count(counter) > 1 || counter.lock().period_end > now
        });
        before - self.counters.len()
    }

    /// Run `gc` every `every` on the current tokio runtime.
    ///
    /// Like `FailureTracker::spawn_compaction`, the task holds only a weak
    /// reference and stops once the counter is dropped or the handle is
    /// shut down.
    pub fn spawn_gc(self: &Arc<Self>, every: Duration) -> MaintenanceHandle {
        let quotas: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(quotas) = quotas.upgrade() else {
                    debug!("quota counter dropped; gc stopped");
                    break;
                };
                let removed = quotas.gc();
                debug!(removed, counters = quotas.len(), "quota counters swept");
            }
        });
        MaintenanceHandle::new(task)
    }

    fn counter(&self, key: &QuotaKey, unit: PeriodUnit) -> Counter {
        if let Some(counter) = self.counters.get(key) {
            return counter.clone();
        }
        let now = self.clock.now();
        self.counters
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(CounterState::new(now, unit))))
            .clone()
    }
}
