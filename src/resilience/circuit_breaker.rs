//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: a single trial call is in flight
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: first call after the break duration
//! Half-Open → Closed: trial call succeeds
//! Half-Open → Open: trial call fails (break duration restarts)
//! ```
//!
//! # Design Decisions
//! - One breaker shared by every outbound call, created at startup
//! - State and opened-at timestamp live in one atomic word so each
//!   transition is a single compare-and-swap
//! - Fail fast in Open state (no I/O attempted)
//! - Single trial in Half-Open (prevents hammering a recovering backend)

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Breaker state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }

    fn from_bits(bits: u64) -> Self {
        match bits & STATE_MASK {
            1 => BreakerState::Open,
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

const STATE_BITS: u32 = 2;
const STATE_MASK: u64 = (1 << STATE_BITS) - 1;

/// Packs a state and the opened-at offset (millis since the breaker epoch).
fn pack(state: BreakerState, opened_at_ms: u64) -> u64 {
    (opened_at_ms << STATE_BITS) | state as u64
}

fn unpack(word: u64) -> (BreakerState, u64) {
    (BreakerState::from_bits(word), word >> STATE_BITS)
}

/// Fail-fast rejection: the call was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("circuit breaker is open; retry in {retry_after:?}")]
pub struct BreakerOpen {
    /// Remaining cooldown before a trial call may be attempted.
    pub retry_after: Duration,
}

/// How a guarded call ended, from the breaker's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    /// The call never reached a backend (e.g. no route); counters untouched.
    Ignored,
}

/// Point-in-time view of the breaker, for admin and health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub break_duration_secs: u64,
    /// Milliseconds since the breaker last opened, if it is not closed.
    pub open_for_ms: Option<u64>,
}

/// Process-wide circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Packed state + opened-at (see [`pack`]).
    word: AtomicU64,
    consecutive_failures: AtomicU32,
    failure_threshold: u32,
    break_duration: Duration,
    epoch: Instant,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(failure_threshold: u32, break_duration: Duration) -> Self {
        Self {
            word: AtomicU64::new(pack(BreakerState::Closed, 0)),
            consecutive_failures: AtomicU32::new(0),
            failure_threshold: failure_threshold.max(1),
            break_duration,
            epoch: Instant::now(),
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.failure_threshold, config.break_duration())
    }

    pub fn state(&self) -> BreakerState {
        unpack(self.word.load(Ordering::Acquire)).0
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let (state, opened_at) = unpack(self.word.load(Ordering::Acquire));
        BreakerSnapshot {
            state,
            consecutive_failures: self.consecutive_failures(),
            failure_threshold: self.failure_threshold,
            break_duration_secs: self.break_duration.as_secs(),
            open_for_ms: (state != BreakerState::Closed)
                .then(|| self.now_ms().saturating_sub(opened_at)),
        }
    }

    /// Ask permission to dispatch one call.
    ///
    /// Never blocks and never performs I/O. An `Err` means the call must
    /// not be attempted.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, BreakerOpen> {
        let break_ms = self.break_duration.as_millis() as u64;
        loop {
            let word = self.word.load(Ordering::Acquire);
            match unpack(word) {
                (BreakerState::Closed, _) => return Ok(self.permit(false)),
                (BreakerState::HalfOpen, _) => {
                    // The single trial is still in flight.
                    return Err(BreakerOpen { retry_after: Duration::ZERO });
                }
                (BreakerState::Open, opened_at) => {
                    let elapsed = self.now_ms().saturating_sub(opened_at);
                    if elapsed < break_ms {
                        return Err(BreakerOpen {
                            retry_after: Duration::from_millis(break_ms - elapsed),
                        });
                    }
                    let trial = pack(BreakerState::HalfOpen, opened_at);
                    if self
                        .word
                        .compare_exchange(word, trial, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        tracing::info!("Circuit breaker half-open, allowing trial call");
                        metrics::record_breaker_transition(BreakerState::HalfOpen);
                        return Ok(self.permit(true));
                    }
                    // Lost the race; re-read the new state.
                }
            }
        }
    }

    fn permit(&self, trial: bool) -> BreakerPermit<'_> {
        BreakerPermit {
            breaker: self,
            trial,
            settled: false,
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn on_success(&self, trial: bool) {
        self.consecutive_failures.store(0, Ordering::Release);
        if !trial {
            return;
        }
        let word = self.word.load(Ordering::Acquire);
        if unpack(word).0 == BreakerState::HalfOpen
            && self
                .word
                .compare_exchange(
                    word,
                    pack(BreakerState::Closed, 0),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        {
            tracing::info!("Circuit breaker closed after successful trial call");
            metrics::record_breaker_transition(BreakerState::Closed);
        }
    }

    fn on_failure(&self, trial: bool) {
        if trial {
            let word = self.word.load(Ordering::Acquire);
            if unpack(word).0 == BreakerState::HalfOpen
                && self
                    .word
                    .compare_exchange(
                        word,
                        pack(BreakerState::Open, self.now_ms()),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            {
                tracing::warn!(
                    break_duration = ?self.break_duration,
                    "Circuit breaker trial call failed, reopening"
                );
                metrics::record_breaker_transition(BreakerState::Open);
            }
            return;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures < self.failure_threshold {
            return;
        }
        // Only the caller whose CAS succeeds performs the transition.
        let word = self.word.load(Ordering::Acquire);
        if unpack(word).0 == BreakerState::Closed
            && self
                .word
                .compare_exchange(
                    word,
                    pack(BreakerState::Open, self.now_ms()),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        {
            tracing::warn!(
                consecutive_failures = failures,
                break_duration = ?self.break_duration,
                "Circuit breaker opened"
            );
            metrics::record_breaker_transition(BreakerState::Open);
        }
    }

    /// A trial that never reported back puts the breaker back to Open with
    /// its original opened-at, so the next call may start a new trial.
    fn on_abandoned_trial(&self) {
        let word = self.word.load(Ordering::Acquire);
        if let (BreakerState::HalfOpen, opened_at) = unpack(word) {
            let _ = self.word.compare_exchange(
                word,
                pack(BreakerState::Open, opened_at),
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            tracing::debug!("Circuit breaker trial call abandoned");
        }
    }
}

/// Permission to dispatch one call. Report the result with [`BreakerPermit::record`].
#[must_use = "the call outcome must be recorded"]
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    /// Whether this call is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record(mut self, outcome: CallOutcome) {
        match outcome {
            CallOutcome::Success => self.breaker.on_success(self.trial),
            CallOutcome::Failure => self.breaker.on_failure(self.trial),
            CallOutcome::Ignored => return,
        }
        self.settled = true;
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.on_abandoned_trial();
        }
    }
}
