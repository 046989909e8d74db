//! Control-loop timing and response pacing.
//!
//! A transaction runs inside a cyclic control loop and must never block it
//! indefinitely. After writing a request it waits for the response using one
//! of two [`Pacing`] strategies:
//!
//! - [`Pacing::Timeout`] polls for available bytes until a multiple of the
//!   nominal cycle time has elapsed, then fails with a timeout.
//! - [`Pacing::Cycles`] sleeps through exactly N control-loop cycles, then
//!   inspects the stream once and fails immediately if nothing arrived.
//!
//! Waiting goes through the [`CycleClock`] trait so the control loop can plug
//! in its own scheduler. [`SleepClock`] is the stand-alone implementation.
//!
//! # Example
//!
//! ```
//! use plclink::{Pacing, SleepClock, CycleClock};
//! use std::time::Duration;
//!
//! let clock = SleepClock::new(Duration::from_millis(50));
//! assert_eq!(Pacing::default().budget(&clock), Duration::from_millis(150));
//! assert_eq!(Pacing::Cycles(2).budget(&clock), Duration::from_millis(100));
//! ```

use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{PlcError, Result};
use crate::transport::Transport;

/// Nominal control-loop cycle time.
pub const DEFAULT_CYCLE_TIME: Duration = Duration::from_millis(100);

/// Number of cycles a timeout-paced transaction waits for a response.
pub const DEFAULT_TIMEOUT_CYCLES: u32 = 3;

/// Wait budget for a declared byte count to arrive once a response has begun.
pub const BYTE_WAIT_BUDGET: Duration = Duration::from_secs(1);

/// Default granularity of [`SleepClock::suspend`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Source of control-loop timing and cooperative suspension.
pub trait CycleClock: Send {
    /// Nominal cycle time of the control loop.
    fn cycle_time(&self) -> Duration;

    /// Suspends until the next control-loop cycle begins.
    fn await_next_cycle(&mut self);

    /// Yields to the scheduler for at most `max`.
    fn suspend(&mut self, max: Duration);
}

/// [`CycleClock`] backed by `std::thread::sleep`.
#[derive(Debug, Clone, Copy)]
pub struct SleepClock {
    cycle_time: Duration,
    poll_interval: Duration,
}

impl SleepClock {
    /// Creates a clock with the given cycle time.
    pub fn new(cycle_time: Duration) -> Self {
        Self {
            cycle_time,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the granularity of a single suspension.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Default for SleepClock {
    fn default() -> Self {
        Self::new(DEFAULT_CYCLE_TIME)
    }
}

impl CycleClock for SleepClock {
    fn cycle_time(&self) -> Duration {
        self.cycle_time
    }

    fn await_next_cycle(&mut self) {
        std::thread::sleep(self.cycle_time);
    }

    fn suspend(&mut self, max: Duration) {
        std::thread::sleep(max.min(self.poll_interval));
    }
}

/// A point in time after which a wait gives up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `budget` from now.
    pub fn new(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// Returns `true` once the deadline has passed.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Time left until the deadline, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }
}

/// How a transaction waits for the response to a written request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Pacing {
    /// Poll until bytes arrive or `cycles` cycle times have elapsed.
    Timeout {
        /// Wait budget in control-loop cycles.
        cycles: u32,
    },
    /// Wait exactly this many cycles, then fail if nothing arrived.
    Cycles(u32),
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing::Timeout {
            cycles: DEFAULT_TIMEOUT_CYCLES,
        }
    }
}

impl Pacing {
    /// Worst-case time spent waiting for one response.
    pub fn budget(&self, clock: &dyn CycleClock) -> Duration {
        match *self {
            Pacing::Timeout { cycles } | Pacing::Cycles(cycles) => clock.cycle_time() * cycles,
        }
    }

    /// Waits for the first byte of a response.
    ///
    /// # Errors
    ///
    /// Returns `PlcError::Timeout` if no byte becomes available in time.
    pub(crate) fn await_response(
        &self,
        transport: &mut dyn Transport,
        clock: &mut dyn CycleClock,
    ) -> Result<()> {
        match *self {
            Pacing::Timeout { cycles } => {
                let budget = self.budget(clock);
                let deadline = Deadline::new(budget);
                loop {
                    if transport.available()? > 0 {
                        return Ok(());
                    }
                    if deadline.expired() {
                        return Err(PlcError::timeout(format!(
                            "no response within {cycles} cycles ({budget:?})"
                        )));
                    }
                    clock.suspend(deadline.remaining());
                }
            }
            Pacing::Cycles(cycles) => {
                for _ in 0..cycles {
                    clock.await_next_cycle();
                }
                if transport.available()? == 0 {
                    return Err(PlcError::timeout(format!(
                        "no response after {cycles} cycles"
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Waits until at least `count` bytes can be read without blocking.
///
/// # Errors
///
/// Returns `PlcError::Timeout` if the bytes do not arrive within `budget`.
pub(crate) fn wait_for_bytes(
    transport: &mut dyn Transport,
    clock: &mut dyn CycleClock,
    count: usize,
    budget: Duration,
) -> Result<()> {
    let deadline = Deadline::new(budget);
    loop {
        let available = transport.available()?;
        if available >= count {
            return Ok(());
        }
        if deadline.expired() {
            return Err(PlcError::timeout(format!(
                "expected {count} bytes within {budget:?}, {available} available"
            )));
        }
        trace!(count, available, "waiting for response bytes");
        clock.suspend(deadline.remaining());
    }
}
