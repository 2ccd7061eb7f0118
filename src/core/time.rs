//! Frame timing utilities

use std::time::{Duration, Instant};

/// Longest frame delta handed to the simulation; a stall beyond this is
/// treated as a single slow frame.
pub const MAX_FRAME_DELTA: Duration = Duration::from_millis(250);

/// Tracks frame timing and calculates FPS
pub struct FrameTimer {
    last_frame: Instant,
    delta: Duration,
    frame_count: u64,
    fps_timer: Instant,
    fps: f32,
    fps_frame_count: u32,
}

impl FrameTimer {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    fn starting_at(now: Instant) -> Self {
        Self {
            last_frame: now,
            delta: Duration::ZERO,
            frame_count: 0,
            fps_timer: now,
            fps: 0.0,
            fps_frame_count: 0,
        }
    }

    /// Call once per frame to update timing
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    fn tick_at(&mut self, now: Instant) {
        self.delta = now.saturating_duration_since(self.last_frame).min(MAX_FRAME_DELTA);
        self.last_frame = now;
        self.frame_count += 1;
        self.fps_frame_count += 1;

        let fps_elapsed = now.saturating_duration_since(self.fps_timer);
        if fps_elapsed >= Duration::from_secs(1) {
            self.fps = self.fps_frame_count as f32 / fps_elapsed.as_secs_f32();
            self.fps_frame_count = 0;
            self.fps_timer = now;
        }
    }

    /// Delta of the last tick in seconds, clamped to `MAX_FRAME_DELTA`
    pub fn delta_secs(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    pub fn delta(&self) -> Duration {
        self.delta
    }

    /// Current FPS (updated every second)
    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_and_fps() {
        let start = Instant::now();
        let mut timer = FrameTimer::starting_at(start);
        for i in 1..=10 {
            timer.tick_at(start + Duration::from_millis(100 * i));
        }
        assert_eq!(timer.frame_count(), 10);
        assert_eq!(timer.delta(), Duration::from_millis(100));
        assert!((timer.fps() - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_stall_is_clamped() {
        let start = Instant::now();
        let mut timer = FrameTimer::starting_at(start);
        timer.tick_at(start + Duration::from_secs(5));
        assert_eq!(timer.delta(), MAX_FRAME_DELTA);
        assert!((timer.delta_secs() - 0.25).abs() < 1e-6);
    }
}
