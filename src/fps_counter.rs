use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// How `delta_seconds` is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FramerateMode {
    /// Measured time between frames.
    #[default]
    Variable,
    /// Always `1 / target`, regardless of how long the frame took.
    Constant,
}

pub struct FpsCounter {
    frame_times: [f32; 128], // last N frame times (ms)
    index: usize,
    last_instant: Instant,
    frames: u64,
    target_fps: u32,
    frame_budget: Duration,
    mode: FramerateMode,
    delta_seconds: f32,
    current_fps: f32,
}

impl FpsCounter {
    pub fn new(target_fps: u32, mode: FramerateMode) -> Self {
        let mut counter = Self {
            frame_times: [0.0; 128],
            index: 0,
            last_instant: Instant::now(),
            frames: 0,
            target_fps: 60,
            frame_budget: Duration::ZERO,
            mode,
            delta_seconds: 0.0,
            current_fps: 0.0,
        };
        counter.set_target(target_fps);
        counter
    }

    pub fn set_target(&mut self, fps: u32) {
        self.target_fps = fps.max(1);
        self.frame_budget = Duration::from_nanos(1_000_000_000 / self.target_fps as u64);
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    pub fn set_framerate_mode(&mut self, mode: FramerateMode) {
        self.mode = mode;
    }

    pub fn framerate_mode(&self) -> FramerateMode {
        self.mode
    }

    /// Waits out the rest of the frame budget, then records timing.
    ///
    /// Sleeps to within a millisecond of the deadline and spins the remainder, since
    /// `thread::sleep` overshoots on most platforms.
    pub fn update(&mut self) {
        let deadline = self.last_instant + self.frame_budget;
        let now = Instant::now();
        if now < deadline {
            let remaining = deadline - now;
            if remaining > Duration::from_millis(1) {
                std::thread::sleep(remaining - Duration::from_millis(1));
            }
            while Instant::now() < deadline {
                std::hint::spin_loop();
            }
        }
        self.tick();
    }

    /// Records timing without waiting.
    pub fn tick(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_instant);
        self.last_instant = now;
        self.record(dt);
    }

    fn record(&mut self, dt: Duration) {
        let secs = dt.as_secs_f32().max(f32::EPSILON);
        self.frame_times[self.index] = secs * 1000.0;
        self.index = (self.index + 1) % self.frame_times.len();
        self.frames += 1;
        self.current_fps = 1.0 / secs;
        self.delta_seconds = match self.mode {
            FramerateMode::Variable => secs,
            FramerateMode::Constant => 1.0 / self.target_fps as f32,
        };
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta_seconds
    }

    pub fn current_fps(&self) -> f32 {
        self.current_fps
    }

    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Returns averaged FPS and frame time in ms over the buffer.
    pub fn averaged(&self) -> (f32, f32) {
        let mut sum = 0.0f32;
        let mut count = 0;
        for &v in &self.frame_times {
            if v > 0.0 {
                sum += v;
                count += 1;
            }
        }
        if count == 0 {
            return (0.0, 0.0);
        }
        let avg_ms = sum / count as f32;
        (1000.0 / avg_ms, avg_ms)
    }

    /// Logs the average every `every` frames.
    pub fn log_every(&self, every: u64) {
        if every > 0 && self.frames % every == 0 {
            let (fps, ms) = self.averaged();
            log::debug!(target: "slop2d::core", "FPS: {:.1}, Frame time: {:.3} ms", fps, ms);
        }
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(60, FramerateMode::Variable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_mode_reports_fixed_delta() {
        let mut fps = FpsCounter::new(50, FramerateMode::Constant);
        fps.record(Duration::from_millis(7));
        assert!((fps.delta_seconds() - 0.02).abs() < 1e-6);
        assert!((fps.current_fps() - 1000.0 / 7.0).abs() < 0.5);
    }

    #[test]
    fn variable_mode_reports_measured_delta() {
        let mut fps = FpsCounter::new(60, FramerateMode::Variable);
        fps.record(Duration::from_millis(40));
        assert!((fps.delta_seconds() - 0.04).abs() < 1e-4);
        let (avg_fps, avg_ms) = fps.averaged();
        assert!((avg_ms - 40.0).abs() < 0.01);
        assert!((avg_fps - 25.0).abs() < 0.01);
    }

    #[test]
    fn update_waits_for_frame_budget() {
        let mut fps = FpsCounter::new(100, FramerateMode::Variable);
        fps.tick();
        let start = Instant::now();
        fps.update();
        assert!(start.elapsed() >= Duration::from_millis(9));
        assert_eq!(fps.frame_count(), 2);
    }
}
