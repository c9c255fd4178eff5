use std::time::{Duration, Instant};

/// Canonical tick unit: 10,000,000 ticks per second.
pub const TICKS_PER_SECOND: u64 = 10_000_000;

const MAX_DELTA: Duration = Duration::from_millis(100);

/// Frame pacing counters, ticked once per presented frame.
#[derive(Clone, Debug)]
pub struct FrameStatistics {
    last_tick: Instant,
    elapsed_ticks: u64,
    total_ticks: u64,
    frame_count: u64,
    frames_per_second: u32,
    frames_this_second: u32,
    second_counter: Duration,
}

impl FrameStatistics {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(now: Instant) -> Self {
        Self {
            last_tick: now,
            elapsed_ticks: 0,
            total_ticks: 0,
            frame_count: 0,
            frames_per_second: 0,
            frames_this_second: 0,
            second_counter: Duration::ZERO,
        }
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Records one frame at `now`. Deltas above 1/10 s are clamped so a
    /// stall in the debugger does not distort the totals.
    pub fn tick_at(&mut self, now: Instant) {
        let delta = now.saturating_duration_since(self.last_tick).min(MAX_DELTA);
        self.last_tick = now;

        self.elapsed_ticks = duration_to_ticks(delta);
        self.total_ticks += self.elapsed_ticks;
        self.frame_count += 1;
        self.frames_this_second += 1;

        self.second_counter += delta;
        if self.second_counter >= Duration::from_secs(1) {
            self.frames_per_second = self.frames_this_second;
            self.frames_this_second = 0;
            self.second_counter = Duration::from_nanos(
                (self.second_counter.as_nanos() % 1_000_000_000) as u64,
            );
        }
    }

    /// Restarts timing after an intentional pause such as re-initialization.
    pub fn reset_elapsed_time(&mut self) {
        self.reset_elapsed_time_at(Instant::now());
    }

    pub fn reset_elapsed_time_at(&mut self, now: Instant) {
        self.last_tick = now;
        self.frames_per_second = 0;
        self.frames_this_second = 0;
        self.second_counter = Duration::ZERO;
    }

    pub fn elapsed_ticks(&self) -> u64 {
        self.elapsed_ticks
    }

    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn frames_per_second(&self) -> u32 {
        self.frames_per_second
    }

    pub fn total_seconds(&self) -> f64 {
        self.total_ticks as f64 / TICKS_PER_SECOND as f64
    }
}

impl Default for FrameStatistics {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn duration_to_ticks(duration: Duration) -> u64 {
    (duration.as_nanos() / 100) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixty_frames_over_one_second_report_sixty_fps() {
        let start = Instant::now();
        let mut stats = FrameStatistics::starting_at(start);
        for frame in 1..=60u64 {
            stats.tick_at(start + Duration::from_micros(frame * 16_667));
        }
        assert_eq!(stats.frame_count(), 60);
        assert_eq!(stats.frames_per_second(), 60);
        assert_eq!(stats.elapsed_ticks(), 166_670);
    }

    #[test]
    fn long_stall_is_clamped_to_a_tenth_of_a_second() {
        let start = Instant::now();
        let mut stats = FrameStatistics::starting_at(start);
        stats.tick_at(start + Duration::from_secs(5));
        assert_eq!(stats.elapsed_ticks(), TICKS_PER_SECOND / 10);
        assert_eq!(stats.total_ticks(), TICKS_PER_SECOND / 10);
        assert_eq!(stats.frames_per_second(), 0);
    }

    #[test]
    fn reset_keeps_totals_but_restarts_rate() {
        let start = Instant::now();
        let mut stats = FrameStatistics::starting_at(start);
        stats.tick_at(start + Duration::from_millis(10));
        stats.reset_elapsed_time_at(start + Duration::from_secs(3));
        stats.tick_at(start + Duration::from_millis(3_020));
        assert_eq!(stats.frame_count(), 2);
        assert_eq!(stats.elapsed_ticks(), 200_000);
        assert_eq!(stats.total_ticks(), 300_000);
    }
}
