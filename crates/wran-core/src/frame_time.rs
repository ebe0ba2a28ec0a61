use core::fmt;
use std::time::Duration;

/// The MAC frame clock, passed by value into every scheduling call.
///
/// There is no global "now": the frame driver owns the clock and hands the
/// scheduler a snapshot once per frame boundary.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FrameContext {
    /// Monotonic MAC frame counter, starting at 0
    pub frame_number: u32,
    /// Time at the start of this frame, relative to stack start
    pub now: Duration,
    /// Fixed MAC frame duration
    pub frame_duration: Duration,
}

impl FrameContext {
    pub fn new(frame_duration: Duration) -> FrameContext {
        FrameContext {
            frame_number: 0,
            now: Duration::ZERO,
            frame_duration,
        }
    }

    /// The context of the next frame
    pub fn next(self) -> FrameContext {
        FrameContext {
            frame_number: self.frame_number + 1,
            now: self.now + self.frame_duration,
            frame_duration: self.frame_duration,
        }
    }

    /// Number of whole frames between now and `deadline`.
    /// Negative if the deadline already passed. Truncates toward zero.
    pub fn frames_until(&self, deadline: Duration) -> i64 {
        let frame_us = self.frame_duration.as_micros() as i64;
        let diff_us = deadline.as_micros() as i64 - self.now.as_micros() as i64;
        diff_us / frame_us
    }

    /// Time elapsed since `timestamp`. Zero if the timestamp lies in the future.
    pub fn elapsed_since(&self, timestamp: Duration) -> Duration {
        self.now.saturating_sub(timestamp)
    }
}

impl fmt::Display for FrameContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame {} @{}ms", self.frame_number, self.now.as_millis())
    }
}

impl fmt::Debug for FrameContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame {} @{}ms", self.frame_number, self.now.as_millis())
    }
}
