//! Virtual time — the single source of "now" for the whole simulator.
//!
//! Every app-observable timestamp flows through [`TimeManager`]. Wall-clock
//! time is only ever used to pace the time-based event loop; it never
//! decides event ordering (spec §3.1).

use std::sync::Mutex;

use crate::error::{EngineError, EngineResult};

#[derive(Debug)]
struct TimeState {
    /// Current virtual time, in seconds since the caller-supplied epoch.
    now: f64,
    /// Virtual time at `reset()` / construction, used for `time_passed()`.
    start: f64,
    /// `Some(now)` at the instant `pause()` was called; `None` when running.
    paused_at: Option<f64>,
}

/// Owns virtual time. Read from anywhere; mutated only by the event loop
/// (via `add_offset`) and by explicit `pause`/`resume`/`reset` calls from
/// the controller (spec §5, "Shared resources").
#[derive(Debug)]
pub struct TimeManager {
    state: Mutex<TimeState>,
}

impl TimeManager {
    /// Construct a time manager anchored at `start_time`.
    pub fn new(start_time: f64) -> Self {
        Self {
            state: Mutex::new(TimeState {
                now: start_time,
                start: start_time,
                paused_at: None,
            }),
        }
    }

    /// Current virtual time. While paused, returns the time at which
    /// `pause()` was called rather than drifting.
    pub fn time(&self) -> f64 {
        let state = self.state.lock().expect("time manager mutex poisoned");
        state.paused_at.unwrap_or(state.now)
    }

    /// Seconds elapsed since the last `reset()` (or construction).
    pub fn time_passed(&self) -> f64 {
        self.time() - self.state.lock().expect("time manager mutex poisoned").start
    }

    /// Advance virtual time by `delta` seconds.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidArgument`] if `delta` is negative —
    /// virtual time never moves backwards.
    pub fn add_offset(&self, delta: f64) -> EngineResult<()> {
        if delta < 0.0 {
            return Err(EngineError::InvalidArgument(format!(
                "time offset must be >= 0, got {delta}"
            )));
        }
        let mut state = self.state.lock().expect("time manager mutex poisoned");
        state.now += delta;
        if let Some(paused_at) = state.paused_at.as_mut() {
            *paused_at += delta;
        }
        Ok(())
    }

    /// Freeze the clock. Idempotent — calling `pause()` while already
    /// paused has no effect beyond the first call.
    pub fn pause(&self) {
        let mut state = self.state.lock().expect("time manager mutex poisoned");
        if state.paused_at.is_none() {
            state.paused_at = Some(state.now);
        }
    }

    /// Unfreeze the clock. Fails silently (no-op) if not currently paused.
    pub fn resume(&self) {
        let mut state = self.state.lock().expect("time manager mutex poisoned");
        if let Some(paused_at) = state.paused_at.take() {
            state.now = paused_at;
        }
    }

    /// Whether the clock is currently paused.
    pub fn is_paused(&self) -> bool {
        self.state.lock().expect("time manager mutex poisoned").paused_at.is_some()
    }

    /// Re-anchor virtual time to `start_time`, clearing any pause state.
    pub fn reset(&self, start_time: f64) {
        let mut state = self.state.lock().expect("time manager mutex poisoned");
        state.now = start_time;
        state.start = start_time;
        state.paused_at = None;
    }
}

impl Default for TimeManager {
    fn default() -> Self {
        Self::new(0.0)
    }
}
