use std::time::{Duration, Instant};

const REPORT_INTERVAL: Duration = Duration::from_secs(2);

/// Wall-clock render throughput, logged periodically.
pub struct FrameTiming {
    last_frame_time: Option<Instant>,
    last_report_time: Instant,
    frame_count: u32,
    pub frame_dt: f32,
    render_ms: f32,
    label: String,
}

impl FrameTiming {
    pub fn new(label: String, now: Instant) -> Self {
        Self {
            last_frame_time: None,
            last_report_time: now,
            frame_count: 0,
            frame_dt: 1.0 / 60.0,
            render_ms: 0.0,
            label,
        }
    }

    pub fn set_render_ms(&mut self, render_ms: f32) {
        self.render_ms = render_ms;
    }

    /// Returns true when a throughput line was logged.
    pub fn update(&mut self, now: Instant) -> bool {
        let dt_duration = if let Some(last) = self.last_frame_time {
            now.saturating_duration_since(last)
        } else {
            Duration::from_millis(16)
        };
        self.last_frame_time = Some(now);
        self.frame_dt = dt_duration.as_secs_f32().max(0.0);

        self.frame_count = self.frame_count.saturating_add(1);
        let elapsed = now.saturating_duration_since(self.last_report_time);
        if elapsed < REPORT_INTERVAL {
            return false;
        }
        let fps = self.frame_count as f32 / elapsed.as_secs_f32();
        log::info!(
            "{} - {:.1} fps (cadence {:.2} ms, render {:.2} ms)",
            self.label,
            fps,
            self.frame_dt * 1000.0,
            self.render_ms
        );
        self.frame_count = 0;
        self.last_report_time = now;
        true
    }
}
