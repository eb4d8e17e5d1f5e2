use std::time::{Duration, Instant};

/// Seconds fed to the `uTime` uniform, measured from the last restart.
#[derive(Debug, Clone, Copy)]
pub struct EffectClock {
    origin: Instant,
}

impl EffectClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(origin: Instant) -> Self {
        Self { origin }
    }

    /// Restarts the clock at zero, e.g. when a new image is loaded.
    pub fn restart(&mut self) {
        self.restart_at(Instant::now());
    }

    pub fn restart_at(&mut self, now: Instant) {
        self.origin = now;
    }

    pub fn seconds(&self) -> f32 {
        self.seconds_at(Instant::now())
    }

    pub fn seconds_at(&self, now: Instant) -> f32 {
        now.saturating_duration_since(self.origin).as_secs_f32()
    }
}

impl Default for EffectClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Decides when the window loop should ask for the next redraw.
///
/// Without a frame-rate cap a redraw is due as soon as the previous frame was
/// presented, so pacing follows the display. While the window is occluded or
/// the loop is stopped no redraw is ever due.
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    interval: Option<Duration>,
    last_frame: Option<Instant>,
    occluded: bool,
    stopped: bool,
}

impl FrameScheduler {
    /// `target_fps` values that are not positive and finite mean "uncapped".
    pub fn new(target_fps: Option<f32>) -> Self {
        let interval = target_fps
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .map(|fps| Duration::from_secs_f64(1.0 / f64::from(fps)));
        Self {
            interval,
            last_frame: None,
            occluded: false,
            stopped: false,
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn set_occluded(&mut self, occluded: bool) {
        if self.occluded != occluded {
            tracing::debug!(occluded, "window visibility changed");
        }
        self.occluded = occluded;
    }

    pub fn set_stopped(&mut self, stopped: bool) {
        self.stopped = stopped;
    }

    pub fn is_paused(&self) -> bool {
        self.occluded || self.stopped
    }

    pub fn ready_for_frame(&self, now: Instant) -> bool {
        if self.is_paused() {
            return false;
        }
        match (self.interval, self.last_frame) {
            (Some(interval), Some(last)) => now.saturating_duration_since(last) >= interval,
            _ => true,
        }
    }

    /// When the next frame becomes due, `None` while paused or when a frame
    /// is due immediately.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.is_paused() {
            return None;
        }
        match (self.interval, self.last_frame) {
            (Some(interval), Some(last)) => Some(last + interval),
            _ => None,
        }
    }

    pub fn mark_rendered(&mut self, now: Instant) {
        self.last_frame = Some(now);
    }

    pub fn reset(&mut self) {
        self.last_frame = None;
    }
}
