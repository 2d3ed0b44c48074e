use crate::render::gpu::CapabilityError;
use crate::render::schedule::Debounce;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Rasterized,
    /// Progressive requested, but the scene changed recently.
    Interacting,
    Accumulating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// Hand the current scene to the progressive renderer.
    Resync,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ProgressiveQuality {
    Draft,
    #[default]
    Preview,
    Final,
}

impl ProgressiveQuality {
    pub fn target_samples(self) -> u32 {
        match self {
            ProgressiveQuality::Draft => 64,
            ProgressiveQuality::Preview => 256,
            ProgressiveQuality::Final => 1024,
        }
    }

    pub fn max_bounces(self) -> u32 {
        match self {
            ProgressiveQuality::Draft => 1,
            ProgressiveQuality::Preview => 2,
            ProgressiveQuality::Final => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ProgressiveQuality::Draft => "draft",
            ProgressiveQuality::Preview => "preview",
            ProgressiveQuality::Final => "final",
        }
    }
}

/// Picks rasterized or progressive output for each frame.
///
/// Progressive output only starts once the scene has been still for the
/// settle delay; any content change drops back to `Interacting` and
/// discards accumulated samples.
pub struct RenderModeCoordinator {
    requested: bool,
    mode: RenderMode,
    settle: Debounce,
    quality: ProgressiveQuality,
    sample_count: u32,
}

impl RenderModeCoordinator {
    pub fn new(settle: Debounce, quality: ProgressiveQuality) -> Self {
        Self {
            requested: false,
            mode: RenderMode::Rasterized,
            settle,
            quality,
            sample_count: 0,
        }
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn is_requested(&self) -> bool {
        self.requested
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn quality(&self) -> ProgressiveQuality {
        self.quality
    }

    pub fn is_converged(&self) -> bool {
        self.mode == RenderMode::Accumulating && self.sample_count >= self.quality.target_samples()
    }

    /// Takes the outcome of creating the progressive renderer. A failure
    /// leaves progressive mode off and is handed back to the caller.
    pub fn enable(
        &mut self,
        renderer: Result<(), CapabilityError>,
        now: Instant,
    ) -> Result<(), CapabilityError> {
        if let Err(err) = renderer {
            log::warn!("Progressive rendering unavailable: {}", err);
            self.requested = false;
            self.enter(RenderMode::Rasterized);
            self.settle.cancel();
            self.sample_count = 0;
            return Err(err);
        }
        self.requested = true;
        self.enter(RenderMode::Interacting);
        self.settle.arm(now);
        self.sample_count = 0;
        Ok(())
    }

    /// Returns whether progressive mode was on.
    pub fn disable(&mut self) -> bool {
        let was_requested = self.requested;
        self.requested = false;
        self.settle.cancel();
        self.sample_count = 0;
        self.enter(RenderMode::Rasterized);
        was_requested
    }

    /// Returns true when accumulated samples were discarded.
    pub fn content_changed(&mut self, now: Instant) -> bool {
        if !self.requested {
            return false;
        }
        self.enter(RenderMode::Interacting);
        self.settle.arm(now);
        self.sample_count = 0;
        true
    }

    pub fn reset_accumulation(&mut self, now: Instant) -> bool {
        self.content_changed(now)
    }

    pub fn poll(&mut self, now: Instant) -> Option<CoordinatorEvent> {
        if !self.requested || !self.settle.fire(now) {
            return None;
        }
        self.enter(RenderMode::Accumulating);
        self.sample_count = 0;
        Some(CoordinatorEvent::Resync)
    }

    pub fn set_quality(&mut self, quality: ProgressiveQuality) {
        if quality != self.quality {
            log::info!(
                "Progressive quality {} -> {} ({} samples)",
                self.quality.name(),
                quality.name(),
                quality.target_samples()
            );
        }
        self.quality = quality;
    }

    /// Whether this tick should add a sample.
    pub fn wants_sample(&self) -> bool {
        self.mode == RenderMode::Accumulating && self.sample_count < self.quality.target_samples()
    }

    pub fn record_samples(&mut self, count: u32) {
        self.sample_count = count;
        if count == self.quality.target_samples() {
            log::info!("Progressive render converged at {} samples", count);
        }
    }

    fn enter(&mut self, mode: RenderMode) {
        if self.mode != mode {
            log::debug!("Render mode {:?} -> {:?}", self.mode, mode);
            self.mode = mode;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn coordinator() -> RenderModeCoordinator {
        RenderModeCoordinator::new(Debounce::default(), ProgressiveQuality::Draft)
    }

    #[test]
    fn starts_rasterized_and_ignores_changes_when_off() {
        let mut coordinator = coordinator();
        let now = Instant::now();
        assert_eq!(coordinator.mode(), RenderMode::Rasterized);
        assert!(!coordinator.content_changed(now));
        assert_eq!(coordinator.poll(now + Duration::from_secs(1)), None);
        assert_eq!(coordinator.mode(), RenderMode::Rasterized);
    }

    #[test]
    fn change_right_after_enable_stays_interacting_until_settled() {
        let mut coordinator = coordinator();
        let start = Instant::now();
        coordinator.enable(Ok(()), start).unwrap();
        coordinator.content_changed(start + Duration::from_millis(10));
        assert_eq!(coordinator.mode(), RenderMode::Interacting);
        assert_eq!(coordinator.poll(start + Duration::from_millis(300)), None);
        assert_eq!(coordinator.mode(), RenderMode::Interacting);
        assert_eq!(
            coordinator.poll(start + Duration::from_millis(310)),
            Some(CoordinatorEvent::Resync)
        );
        assert_eq!(coordinator.mode(), RenderMode::Accumulating);
    }

    #[test]
    fn burst_of_changes_yields_one_resync() {
        let mut coordinator = coordinator();
        let start = Instant::now();
        coordinator.enable(Ok(()), start).unwrap();
        let mut resyncs = 0;
        for frame in 0..200u64 {
            let now = start + Duration::from_millis(frame * 16);
            if frame < 50 {
                coordinator.content_changed(now);
            }
            if coordinator.poll(now).is_some() {
                resyncs += 1;
            }
        }
        assert_eq!(resyncs, 1);
    }

    #[test]
    fn capability_failure_keeps_progressive_off() {
        let mut coordinator = coordinator();
        let result = coordinator.enable(Err(CapabilityError("no float targets".into())), Instant::now());
        assert!(result.is_err());
        assert!(!coordinator.is_requested());
        assert_eq!(coordinator.mode(), RenderMode::Rasterized);
    }

    #[test]
    fn disable_discards_samples() {
        let mut coordinator = coordinator();
        let start = Instant::now();
        coordinator.enable(Ok(()), start).unwrap();
        coordinator.poll(start + Duration::from_secs(1));
        coordinator.record_samples(12);
        assert!(coordinator.disable());
        assert_eq!(coordinator.sample_count(), 0);
        assert_eq!(coordinator.mode(), RenderMode::Rasterized);
        assert_eq!(coordinator.poll(start + Duration::from_secs(2)), None);
    }

    #[test]
    fn sampling_stops_at_quality_target() {
        let mut coordinator = coordinator();
        let start = Instant::now();
        coordinator.enable(Ok(()), start).unwrap();
        coordinator.poll(start + Duration::from_secs(1));
        let mut samples = 0;
        while coordinator.wants_sample() {
            samples += 1;
            coordinator.record_samples(samples);
        }
        assert_eq!(samples, 64);
        assert!(coordinator.is_converged());

        coordinator.set_quality(ProgressiveQuality::Preview);
        assert!(coordinator.wants_sample());
    }

    #[test]
    fn quality_presets_scale_samples_and_bounces() {
        assert_eq!(ProgressiveQuality::Final.name(), "final");
        assert_eq!(ProgressiveQuality::Draft.target_samples(), 64);
        assert_eq!(ProgressiveQuality::Preview.max_bounces(), 2);
    }
}
