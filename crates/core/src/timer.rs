//! Frame timing for the render loop.

use std::time::{Duration, Instant};

/// Measures per-frame delta time and reports a smoothed frame rate.
///
/// Frames are accumulated over a fixed reporting window; once the window has
/// elapsed [`FrameTimer::tick`] returns the average frame rate over it.
#[derive(Debug)]
pub struct FrameTimer {
    start: Instant,
    last_tick: Instant,
    window: Duration,
    window_start: Instant,
    window_frames: u32,
    total_frames: u64,
}

/// Snapshot produced at the end of each reporting window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub fps: f32,
    pub frame_time_ms: f32,
    pub total_frames: u64,
}

impl FrameTimer {
    pub fn new(window: Duration) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            window,
            window_start: now,
            window_frames: 0,
            total_frames: 0,
        }
    }

    /// Time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Record one frame. Returns the delta since the previous tick and, at the
    /// end of a reporting window, the averaged statistics for that window.
    pub fn tick(&mut self) -> (Duration, Option<FrameStats>) {
        let now = Instant::now();
        self.tick_at(now)
    }

    fn tick_at(&mut self, now: Instant) -> (Duration, Option<FrameStats>) {
        let delta = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        self.window_frames += 1;
        self.total_frames += 1;

        let in_window = now.saturating_duration_since(self.window_start);
        if in_window < self.window {
            return (delta, None);
        }

        let secs = in_window.as_secs_f32();
        let stats = FrameStats {
            fps: self.window_frames as f32 / secs,
            frame_time_ms: secs * 1000.0 / self.window_frames as f32,
            total_frames: self.total_frames,
        };
        self.window_start = now;
        self.window_frames = 0;
        (delta, Some(stats))
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_reported_after_window() {
        let mut timer = FrameTimer::new(Duration::from_millis(100));
        let base = timer.window_start;

        for i in 1..10 {
            let (_, stats) = timer.tick_at(base + Duration::from_millis(10 * i));
            assert!(stats.is_none());
        }

        let (delta, stats) = timer.tick_at(base + Duration::from_millis(100));
        assert_eq!(delta, Duration::from_millis(10));
        let stats = stats.unwrap();
        assert_eq!(stats.total_frames, 10);
        assert!((stats.fps - 100.0).abs() < 0.5);
        assert!((stats.frame_time_ms - 10.0).abs() < 0.1);
    }

    #[test]
    fn test_window_restarts() {
        let mut timer = FrameTimer::new(Duration::from_millis(50));
        let base = timer.window_start;
        assert!(timer.tick_at(base + Duration::from_millis(60)).1.is_some());
        assert!(timer.tick_at(base + Duration::from_millis(70)).1.is_none());
        assert_eq!(timer.total_frames(), 2);
    }
}
