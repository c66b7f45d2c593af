//! Wall-clock to tick conversion.
//!
//! [`TickSource`] turns elapsed time since its epoch into an integer tick
//! count at a fixed rate. The epoch is set once; later `start` calls keep it,
//! so tracks that are already running never lose their phase.

use std::sync::OnceLock;
use std::time::Instant;

use crate::error::{LooperError, Result};

/// Default tick rate (ticks per second).
pub const DEFAULT_TICK_RATE: u32 = 1024;

const NANOS_PER_SEC: u128 = 1_000_000_000;

#[derive(Debug)]
pub struct TickSource {
    epoch: OnceLock<Instant>,
    tick_rate: u32,
}

impl TickSource {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            epoch: OnceLock::new(),
            tick_rate: tick_rate.max(1),
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn is_started(&self) -> bool {
        self.epoch.get().is_some()
    }

    /// Start the source now. No-op if already started.
    pub fn start(&self) {
        self.start_at(Instant::now());
    }

    /// Start the source with a specific epoch (for testing).
    ///
    /// Returns `true` if this call set the epoch.
    pub fn start_at(&self, now: Instant) -> bool {
        let mut set = false;
        self.epoch.get_or_init(|| {
            set = true;
            now
        });
        if set {
            log::debug!("Tick source started at {} ticks/s", self.tick_rate);
        }
        set
    }

    pub fn current_tick(&self) -> Result<i64> {
        self.current_tick_at(Instant::now())
    }

    /// Tick count at `now`: `floor((now - epoch) * tick_rate)`.
    ///
    /// Instants before the epoch saturate to tick 0.
    pub fn current_tick_at(&self, now: Instant) -> Result<i64> {
        let epoch = self.epoch.get().ok_or(LooperError::NotStarted)?;
        let nanos = now.saturating_duration_since(*epoch).as_nanos();
        let ticks = nanos * self.tick_rate as u128 / NANOS_PER_SEC;
        Ok(i64::try_from(ticks).unwrap_or(i64::MAX))
    }
}

impl Default for TickSource {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_RATE)
    }
}

/// Earliest instant after `epoch` at which a source running at `tick_rate`
/// reports `tick`. Used to drive clocks deterministically.
#[cfg(test)]
pub(crate) fn instant_for_tick(epoch: Instant, tick_rate: u32, tick: i64) -> Instant {
    let tick = tick.max(0) as u128;
    let rate = tick_rate.max(1) as u128;
    let nanos = (tick * NANOS_PER_SEC).div_ceil(rate);
    epoch + std::time::Duration::from_nanos(nanos as u64)
}
