//! Rendering remote ships from buffered snapshots.
//!
//! Remote ships are drawn slightly in the past (`render_time`) so that two
//! snapshots usually straddle the drawn instant. When the network falls
//! behind, the newest snapshot is extrapolated along its velocity for a short,
//! capped distance and then frozen. The delay itself adapts to the observed
//! transit time of arriving snapshots.

use crate::fleet::constants::{adaptive, interpolation};
use crate::sync::snapshot::SnapshotBuffer;
use crate::util::vec2::Vec2;

/// How a render position was obtained
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    /// Between two snapshots; `t` is the fraction from the older one
    Interpolated { position: Vec2, t: f64 },
    /// Ahead of the newest snapshot; `frozen` once the cap is reached
    Extrapolated { position: Vec2, frozen: bool },
    /// Behind the oldest snapshot
    Held { position: Vec2 },
    /// Fewer than two snapshots: blended toward the latest server position
    Blended { position: Vec2 },
    /// Nothing buffered yet
    Empty,
}

impl Sample {
    pub fn position(&self) -> Option<Vec2> {
        match *self {
            Sample::Interpolated { position, .. }
            | Sample::Extrapolated { position, .. }
            | Sample::Held { position }
            | Sample::Blended { position } => Some(position),
            Sample::Empty => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Interpolator {
    extrapolation_limit_ms: u64,
    fallback_blend: f64,
}

impl Interpolator {
    pub fn new(extrapolation_limit_ms: u64, fallback_blend: f64) -> Self {
        Self {
            extrapolation_limit_ms,
            fallback_blend: fallback_blend.clamp(0.0, 1.0),
        }
    }

    pub fn extrapolation_limit_ms(&self) -> u64 {
        self.extrapolation_limit_ms
    }

    /// Position to draw at `render_time`, given the currently drawn position
    pub fn sample(&self, buffer: &SnapshotBuffer, render_time: u64, current: Vec2) -> Sample {
        let (Some(oldest), Some(newest)) = (buffer.oldest(), buffer.latest()) else {
            return Sample::Empty;
        };

        if buffer.len() < 2 {
            return Sample::Blended {
                position: current.lerp(newest.position, self.fallback_blend),
            };
        }

        if render_time >= newest.timestamp {
            let ahead = render_time - newest.timestamp;
            let frozen = ahead > self.extrapolation_limit_ms;
            let secs = ahead.min(self.extrapolation_limit_ms) as f64 / 1000.0;
            return Sample::Extrapolated {
                position: newest.position + newest.velocity * secs,
                frozen,
            };
        }

        if render_time < oldest.timestamp {
            return Sample::Held {
                position: oldest.position,
            };
        }

        match buffer.bracket(render_time) {
            Some((a, b)) => {
                let span = (b.timestamp - a.timestamp) as f64;
                let t = ((render_time - a.timestamp) as f64 / span).clamp(0.0, 1.0);
                Sample::Interpolated {
                    position: a.position.lerp(b.position, t),
                    t,
                }
            }
            // Unreachable with an ordered buffer, but holding is always safe
            None => Sample::Held {
                position: newest.position,
            },
        }
    }
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new(
            interpolation::EXTRAPOLATION_LIMIT_MS,
            interpolation::FALLBACK_BLEND_RATE,
        )
    }
}

/// Interpolation delay that follows network conditions.
///
/// Rises in steps while transit is high, falls while it is low, and stays
/// between the configured base delay and the hard cap.
#[derive(Debug, Clone)]
pub struct AdaptiveDelay {
    delay_ms: f64,
    min_ms: f64,
    max_ms: f64,
    trend_ms: Option<f64>,
}

impl AdaptiveDelay {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        let max_ms = max_ms as f64;
        let base = (base_ms as f64).min(max_ms);
        Self {
            delay_ms: base,
            min_ms: base,
            max_ms,
            trend_ms: None,
        }
    }

    /// Feed the transit estimate of one arriving snapshot
    pub fn observe_transit(&mut self, transit_ms: f64) {
        let trend = match self.trend_ms {
            None => transit_ms,
            Some(prev) => prev + adaptive::TREND_ALPHA * (transit_ms - prev),
        };
        self.trend_ms = Some(trend);

        // A step needs the latest sample to agree with the trend
        if trend > adaptive::HIGH_TRANSIT_MS && transit_ms > adaptive::HIGH_TRANSIT_MS {
            self.raise();
        } else if trend < adaptive::LOW_TRANSIT_MS && transit_ms < adaptive::LOW_TRANSIT_MS {
            self.delay_ms = (self.delay_ms - adaptive::STEP_DOWN_MS).max(self.min_ms);
        }
    }

    /// Degraded latency signal (probe failure or timeout)
    pub fn observe_degraded(&mut self) {
        self.raise();
    }

    fn raise(&mut self) {
        self.delay_ms = (self.delay_ms + adaptive::STEP_UP_MS).min(self.max_ms);
    }

    pub fn delay_ms(&self) -> f64 {
        self.delay_ms
    }

    pub fn trend_ms(&self) -> Option<f64> {
        self.trend_ms
    }

    /// Back to the base delay with no history
    pub fn reset(&mut self) {
        self.delay_ms = self.min_ms;
        self.trend_ms = None;
    }
}

impl Default for AdaptiveDelay {
    fn default() -> Self {
        Self::new(interpolation::DEFAULT_DELAY_MS, interpolation::MAX_DELAY_MS)
    }
}
