use std::f64::consts::TAU;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimationMode {
    #[default]
    Off,
    Turntable,
    Sine,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SineParams {
    pub amplitude_deg: [f32; 3],
    pub frequency_hz: [f32; 3],
}

impl Default for SineParams {
    fn default() -> Self {
        Self {
            amplitude_deg: [0.0, 15.0, 0.0],
            frequency_hz: [0.0, 0.25, 0.0],
        }
    }
}

/// Turntable/oscillation integrator. Rotation is always derived from the
/// snapshot taken at enable time, never accumulated frame over frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationState {
    mode: AnimationMode,
    enabled: bool,
    turntable_speeds_deg: [f32; 3],
    sine: SineParams,
    time: f64,
    snapshot: Option<[f32; 3]>,
}

impl Default for AnimationState {
    fn default() -> Self {
        Self::new()
    }
}

impl AnimationState {
    pub fn new() -> Self {
        Self {
            mode: AnimationMode::Off,
            enabled: false,
            turntable_speeds_deg: [0.0, 30.0, 0.0],
            sine: SineParams::default(),
            time: 0.0,
            snapshot: None,
        }
    }

    pub fn mode(&self) -> AnimationMode {
        self.mode
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[cfg(test)]
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn set_turntable_speeds(&mut self, speeds_deg: [f32; 3]) {
        self.turntable_speeds_deg = speeds_deg;
    }

    pub fn set_sine_params(&mut self, params: SineParams) {
        self.sine = params;
    }

    /// Enabling snapshots `current_rotation`; enabling twice is a no-op.
    /// Disabling returns the snapshot the caller must restore.
    pub fn set_enabled(&mut self, enabled: bool, current_rotation: [f32; 3]) -> Option<[f32; 3]> {
        match (self.enabled, enabled) {
            (false, true) => {
                self.enabled = true;
                self.time = 0.0;
                self.snapshot = Some(current_rotation);
                log::debug!("Animation enabled ({:?}), snapshot {:?}", self.mode, current_rotation);
                None
            }
            (true, false) => {
                self.enabled = false;
                self.time = 0.0;
                let restored = self.snapshot.take();
                log::debug!("Animation disabled, restoring {:?}", restored);
                restored
            }
            _ => None,
        }
    }

    /// Switching mode while running stops, resets the clock and restarts
    /// from the restored snapshot. Returns the rotation to restore, if any.
    pub fn set_mode(&mut self, mode: AnimationMode, current_rotation: [f32; 3]) -> Option<[f32; 3]> {
        if mode == self.mode {
            return None;
        }
        if !self.enabled {
            self.mode = mode;
            return None;
        }
        let restored = self.set_enabled(false, current_rotation);
        self.mode = mode;
        let base = restored.unwrap_or(current_rotation);
        self.set_enabled(true, base);
        Some(base)
    }

    /// Advances the clock and returns the animated rotation, or `None` when
    /// nothing animates this tick.
    pub fn tick(&mut self, dt_seconds: f32) -> Option<[f32; 3]> {
        if !self.enabled || self.mode == AnimationMode::Off {
            return None;
        }
        let snapshot = self.snapshot?;
        self.time += f64::from(dt_seconds.max(0.0));
        Some(self.rotation_at(snapshot, self.time))
    }

    fn rotation_at(&self, snapshot: [f32; 3], t: f64) -> [f32; 3] {
        let mut rotation = snapshot;
        for axis in 0..3 {
            let offset = match self.mode {
                AnimationMode::Off => 0.0,
                AnimationMode::Turntable => {
                    (f64::from(self.turntable_speeds_deg[axis]) * t).rem_euclid(360.0)
                }
                AnimationMode::Sine => {
                    let amplitude = f64::from(self.sine.amplitude_deg[axis]);
                    let frequency = f64::from(self.sine.frequency_hz[axis]);
                    amplitude * (TAU * frequency * t).sin()
                }
            };
            rotation[axis] = snapshot[axis] + offset as f32;
        }
        rotation
    }
}
