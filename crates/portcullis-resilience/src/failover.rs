//! Backend selection strategies for failover routing.
//!
//! A strategy is shared by every request routed through one step and is
//! rebuilt (through the strategy cache) whenever the backend list changes.
//! The routing step asks `select` for a backend, forwards, then reports the
//! result; it gives up after one attempt per backend.

use std::fmt;
use std::str::FromStr;

use parking_lot::Mutex;

use portcullis_contracts::error::GatewayError;

pub trait FailoverStrategy: Send + Sync {
    fn kind(&self) -> FailoverKind;

    /// The backends this strategy chooses from, in declaration order.
    fn backends(&self) -> &[String];

    /// Next backend to try, or `None` if there is nothing to try.
    fn select(&self) -> Option<String>;

    fn report_success(&self, backend: &str);

    fn report_failure(&self, backend: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverKind {
    /// Keep using one backend until it fails, then move to the next.
    Sticky,
    /// Rotate through the backends on every selection.
    RoundRobin,
    /// Always prefer the earliest backend that has not failed.
    Ordered,
}

impl FailoverKind {
    pub fn build(self, backends: Vec<String>) -> Box<dyn FailoverStrategy> {
        match self {
            FailoverKind::Sticky => Box::new(Sticky::new(backends)),
            FailoverKind::RoundRobin => Box::new(RoundRobin::new(backends)),
            FailoverKind::Ordered => Box::new(Ordered::new(backends)),
        }
    }
}

impl FromStr for FailoverKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sticky" => Ok(FailoverKind::Sticky),
            "round-robin" | "roundrobin" => Ok(FailoverKind::RoundRobin),
            "ordered" => Ok(FailoverKind::Ordered),
            other => Err(GatewayError::ConfigError {
                reason: format!("unknown failover strategy '{}'", other),
            }),
        }
    }
}

impl fmt::Display for FailoverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailoverKind::Sticky => "sticky",
            FailoverKind::RoundRobin => "round-robin",
            FailoverKind::Ordered => "ordered",
        };
        f.write_str(s)
    }
}

fn position(backends: &[String], backend: &str) -> Option<usize> {
    backends.iter().position(|b| b == backend)
}

// ── Sticky ────────────────────────────────────────────────────────────────────

pub struct Sticky {
    backends: Vec<String>,
    current: Mutex<usize>,
}

impl Sticky {
    pub fn new(backends: Vec<String>) -> Self {
        Self { backends, current: Mutex::new(0) }
    }
}

impl FailoverStrategy for Sticky {
    fn kind(&self) -> FailoverKind {
        FailoverKind::Sticky
    }

    fn backends(&self) -> &[String] {
        &self.backends
    }

    fn select(&self) -> Option<String> {
        self.backends.get(*self.current.lock()).cloned()
    }

    fn report_success(&self, _backend: &str) {}

    fn report_failure(&self, backend: &str) {
        let mut current = self.current.lock();
        // Only move on if the failed backend is still the one we stick to.
        if position(&self.backends, backend) == Some(*current) {
            *current = (*current + 1) % self.backends.len().max(1);
        }
    }
}

// ── Round-robin ───────────────────────────────────────────────────────────────

pub struct RoundRobin {
    backends: Vec<String>,
    next: Mutex<usize>,
}

impl RoundRobin {
    pub fn new(backends: Vec<String>) -> Self {
        Self { backends, next: Mutex::new(0) }
    }
}

impl FailoverStrategy for RoundRobin {
    fn kind(&self) -> FailoverKind {
        FailoverKind::RoundRobin
    }

    fn backends(&self) -> &[String] {
        &self.backends
    }

    fn select(&self) -> Option<String> {
        let mut next = self.next.lock();
        let chosen = self.backends.get(*next).cloned();
        *next = (*next + 1) % self.backends.len().max(1);
        chosen
    }

    fn report_success(&self, _backend: &str) {}

    fn report_failure(&self, _backend: &str) {}
}

// ── Ordered ───────────────────────────────────────────────────────────────────

pub struct Ordered {
    backends: Vec<String>,
    /// Indexed like `backends`.
    down: Mutex<Vec<bool>>,
}

impl Ordered {
    pub fn new(backends: Vec<String>) -> Self {
        let down = vec![false; backends.len()];
        Self { backends, down: Mutex::new(down) }
    }
}

impl FailoverStrategy for Ordered {
    fn kind(&self) -> FailoverKind {
        FailoverKind::Ordered
    }

    fn backends(&self) -> &[String] {
        &self.backends
    }

    fn select(&self) -> Option<String> {
        let mut down = self.down.lock();
        let index = match down.iter().position(|d| !d) {
            Some(index) => index,
            None => {
                // Everything has failed once: start probing from the top.
                down.iter_mut().for_each(|d| *d = false);
                0
            }
        };
        self.backends.get(index).cloned()
    }

    fn report_success(&self, backend: &str) {
        if let Some(index) = position(&self.backends, backend) {
            self.down.lock()[index] = false;
        }
    }

    fn report_failure(&self, backend: &str) {
        if let Some(index) = position(&self.backends, backend) {
            self.down.lock()[index] = true;
        }
    }
}
