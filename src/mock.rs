//! Scripted transport and clock for unit tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::Result;
use crate::pacing::CycleClock;
use crate::transport::Transport;

#[derive(Debug, Default)]
struct MockState {
    input: VecDeque<u8>,
    pending: Vec<u8>,
    frames: Vec<Vec<u8>>,
    responses: VecDeque<Vec<u8>>,
    shut_down: bool,
}

/// In-memory transport that answers every flushed frame with the next
/// scripted response.
///
/// Clones share state, so a test can keep a handle after moving the
/// transport into a connection.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a response released by the next flushed frame.
    pub(crate) fn respond_with(&self, bytes: &[u8]) -> &Self {
        self.state().responses.push_back(bytes.to_vec());
        self
    }

    /// Makes bytes readable right away, as if left over from an earlier exchange.
    pub(crate) fn preload(&self, bytes: &[u8]) {
        self.state().input.extend(bytes);
    }

    /// Every frame written so far.
    pub(crate) fn frames(&self) -> Vec<Vec<u8>> {
        self.state().frames.clone()
    }

    /// Bytes not yet consumed by the reader.
    pub(crate) fn unread(&self) -> usize {
        self.state().input.len()
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.state().shut_down
    }
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.input.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "mock read timed out"));
        }
        let n = buf.len().min(state.input.len());
        for (slot, byte) in buf.iter_mut().zip(state.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.state().pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self.state();
        if state.pending.is_empty() {
            return Ok(());
        }
        let frame = std::mem::take(&mut state.pending);
        state.frames.push(frame);
        if let Some(response) = state.responses.pop_front() {
            state.input.extend(response);
        }
        Ok(())
    }
}

impl Transport for MockTransport {
    fn available(&mut self) -> Result<usize> {
        Ok(self.state().input.len())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.state().shut_down = true;
        Ok(())
    }
}

/// Clock that counts cycles and suspensions instead of sleeping through them.
#[derive(Debug, Clone)]
pub(crate) struct CountingClock {
    cycle_time: Duration,
    cycles: Arc<AtomicU32>,
    suspensions: Arc<AtomicU32>,
}

impl CountingClock {
    pub(crate) fn new(cycle_time: Duration) -> Self {
        Self {
            cycle_time,
            cycles: Arc::new(AtomicU32::new(0)),
            suspensions: Arc::new(AtomicU32::new(0)),
        }
    }

    pub(crate) fn cycles(&self) -> u32 {
        self.cycles.load(Ordering::SeqCst)
    }

    pub(crate) fn suspensions(&self) -> u32 {
        self.suspensions.load(Ordering::SeqCst)
    }
}

impl CycleClock for CountingClock {
    fn cycle_time(&self) -> Duration {
        self.cycle_time
    }

    fn await_next_cycle(&mut self) {
        self.cycles.fetch_add(1, Ordering::SeqCst);
    }

    fn suspend(&mut self, max: Duration) {
        self.suspensions.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(max.min(Duration::from_millis(1)));
    }
}
