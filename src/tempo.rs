//! Tick/second conversion over a piecewise-constant tempo map.

use crate::{Error, Result};
use serde::Serialize;

/// A tempo change at a tick position. The BPM holds until the next change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Tempo {
    /// Tick position of the change.
    pub position: i64,
    /// Quarter notes per minute from this position on.
    pub bpm: f64,
}

impl Tempo {
    pub fn new(position: i64, bpm: f64) -> Self {
        Self { position, bpm }
    }
}

/// Score time base: ticks per quarter note plus an ordered list of tempo
/// changes. Conversions are exact per segment; ticks before the first
/// change (and before tick 0) extrapolate with the initial tempo.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TempoMap {
    pub tpqn: i64,
    pub tempos: Vec<Tempo>,
}

impl TempoMap {
    pub fn new(tpqn: i64, tempos: Vec<Tempo>) -> Result<Self> {
        let map = Self { tpqn, tempos };
        map.validate()?;
        Ok(map)
    }

    /// A single-tempo map.
    pub fn constant(tpqn: i64, bpm: f64) -> Self {
        Self {
            tpqn,
            tempos: vec![Tempo::new(0, bpm)],
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tpqn <= 0 {
            return Err(Error::InvalidTempoMap(format!(
                "tpqn must be positive, got {}",
                self.tpqn
            )));
        }
        let first = self
            .tempos
            .first()
            .ok_or_else(|| Error::InvalidTempoMap("no tempo changes".to_string()))?;
        if first.position != 0 {
            return Err(Error::InvalidTempoMap(format!(
                "first tempo change must be at tick 0, got {}",
                first.position
            )));
        }
        for pair in self.tempos.windows(2) {
            if pair[1].position <= pair[0].position {
                return Err(Error::InvalidTempoMap(format!(
                    "tempo changes out of order at tick {}",
                    pair[1].position
                )));
            }
        }
        for tempo in &self.tempos {
            if !tempo.bpm.is_finite() || tempo.bpm <= 0.0 {
                return Err(Error::InvalidTempoMap(format!(
                    "BPM must be positive and finite, got {}",
                    tempo.bpm
                )));
            }
        }
        Ok(())
    }

    #[inline]
    fn seconds_per_tick(&self, bpm: f64) -> f64 {
        60.0 / (bpm * self.tpqn as f64)
    }

    /// Absolute time in seconds of a tick position.
    pub fn tick_to_seconds(&self, tick: i64) -> f64 {
        let mut seconds = 0.0;
        for (i, tempo) in self.tempos.iter().enumerate() {
            let segment_end = match self.tempos.get(i + 1) {
                Some(next) if next.position < tick => next.position,
                _ => tick,
            };
            seconds += (segment_end - tempo.position) as f64 * self.seconds_per_tick(tempo.bpm);
            if segment_end == tick {
                break;
            }
        }
        seconds
    }

    /// Fractional tick position of an absolute time in seconds.
    pub fn seconds_to_ticks(&self, seconds: f64) -> f64 {
        let mut segment_start_seconds = 0.0;
        for (i, tempo) in self.tempos.iter().enumerate() {
            let segment_seconds = match self.tempos.get(i + 1) {
                Some(next) => {
                    (next.position - tempo.position) as f64 * self.seconds_per_tick(tempo.bpm)
                }
                None => f64::INFINITY,
            };
            let is_last = i + 1 == self.tempos.len();
            if seconds < segment_start_seconds + segment_seconds || is_last {
                return tempo.position as f64
                    + (seconds - segment_start_seconds) / self.seconds_per_tick(tempo.bpm);
            }
            segment_start_seconds += segment_seconds;
        }
        0.0
    }

    /// Duration in seconds of the tick range `[start, end)`.
    pub fn tick_range_seconds(&self, start: i64, end: i64) -> f64 {
        self.tick_to_seconds(end) - self.tick_to_seconds(start)
    }
}
