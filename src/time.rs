//! Turns variable frame timestamps into whole battle ticks.
//!
//! `draw_web` fires at display rate; AI pacing counts ticks, so the clock
//! accumulates wall time and releases it in fixed steps.

/// Longest gap credited for a single frame. A backgrounded tab otherwise
/// comes back and plays the whole enemy phase at once.
const MAX_FRAME_MS: f64 = 500.0;

pub struct GameTime {
    ms_per_tick: f64,
    accumulator: f64,
    pub total_ticks: u64,
    last_timestamp: Option<f64>,
}

impl GameTime {
    pub fn new(ticks_per_sec: u32) -> Self {
        Self {
            ms_per_tick: 1000.0 / ticks_per_sec.max(1) as f64,
            accumulator: 0.0,
            total_ticks: 0,
            last_timestamp: None,
        }
    }

    /// Feed the current timestamp in ms; returns ticks to pass to `Game::tick`.
    pub fn update(&mut self, now_ms: f64) -> u32 {
        let delta = self
            .last_timestamp
            .map(|prev| (now_ms - prev).clamp(0.0, MAX_FRAME_MS))
            .unwrap_or(0.0);
        self.last_timestamp = Some(now_ms);

        self.accumulator += delta;
        let ticks = (self.accumulator / self.ms_per_tick) as u32;
        self.accumulator -= ticks as f64 * self.ms_per_tick;
        self.total_ticks += ticks as u64;
        ticks
    }
}
