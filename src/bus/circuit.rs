//! Per-consumer circuit breaker.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Deliveries flow normally
    Closed,
    /// Consumer is skipped until the cooldown elapses
    Open,
    /// One trial delivery decides between Closed and Open
    HalfOpen,
}

/// Failures are counted inside a rolling window. Reaching the threshold opens
/// the circuit for `cooldown`; after that a single trial delivery is let through.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    threshold: u32,
    window: Duration,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, window: Duration, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            trial_in_flight: false,
            threshold: threshold.max(1),
            window,
            cooldown,
        }
    }

    /// Whether a delivery may be attempted now. May move Open to HalfOpen.
    pub fn allow_request(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = self.opened_at.map_or(true, |at| at.elapsed() >= self.cooldown);
                if cooled {
                    self.state = CircuitState::HalfOpen;
                    self.trial_in_flight = true;
                }
                cooled
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    false
                } else {
                    self.trial_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.state = CircuitState::Closed;
            self.failures.clear();
            self.opened_at = None;
        }
        self.trial_in_flight = false;
    }

    pub fn record_failure(&mut self) {
        let now = Instant::now();
        self.failures.push_back(now);
        while let Some(&oldest) = self.failures.front() {
            if now.duration_since(oldest) > self.window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
        self.trial_in_flight = false;

        match self.state {
            CircuitState::Closed if self.failures.len() >= self.threshold as usize => {
                self.open(now)
            }
            CircuitState::HalfOpen => self.open(now),
            _ => {}
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Failures currently inside the rolling window.
    pub fn recent_failures(&self) -> usize {
        self.failures.len()
    }
}
