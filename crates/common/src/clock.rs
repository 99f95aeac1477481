//! Fixed-step frame clock.
//!
//! Frame synthesis walks simulation time in steps of `1 / fps` seconds.
//! Timestamps are derived from an integer frame index rather than by
//! repeatedly adding the step, so long segments do not accumulate
//! floating-point drift and the tick count for a duration is exact.

/// A clock that produces evenly spaced timestamps at a fixed frame rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameClock {
    fps: u32,
}

impl FrameClock {
    /// Create a clock ticking at `fps` frames per second.
    ///
    /// A zero rate is clamped to 1 fps.
    pub fn new(fps: u32) -> Self {
        Self { fps: fps.max(1) }
    }

    /// Frames per second.
    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Duration of one step in seconds.
    pub fn step_secs(&self) -> f64 {
        1.0 / self.fps as f64
    }

    /// Timestamp of the `index`-th tick after `start_secs`.
    pub fn tick_at(&self, start_secs: f64, index: u64) -> f64 {
        start_secs + index as f64 / self.fps as f64
    }

    /// Iterate timestamps `t` with `start <= t < start + duration`.
    pub fn ticks(&self, start_secs: f64, duration_secs: f64) -> FrameTicks {
        FrameTicks {
            clock: *self,
            start_secs,
            end_secs: start_secs + duration_secs.max(0.0),
            index: 0,
        }
    }

}

/// Iterator returned by [`FrameClock::ticks`].
#[derive(Debug, Clone)]
pub struct FrameTicks {
    clock: FrameClock,
    start_secs: f64,
    end_secs: f64,
    index: u64,
}

impl Iterator for FrameTicks {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        let t = self.clock.tick_at(self.start_secs, self.index);
        if t < self.end_secs {
            self.index += 1;
            Some(t)
        } else {
            None
        }
    }
}
