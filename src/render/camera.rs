use crate::render::gpu::CameraView;
use glam::Vec3;

pub const DEFAULT_FOV_Y_DEGREES: f32 = 45.0;
const PITCH_LIMIT: f32 = 89.0 * std::f32::consts::PI / 180.0;

#[derive(Debug, Clone, Copy)]
pub struct CameraController {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub fov_y_degrees: f32,
}

impl CameraController {
    pub fn new(position: Vec3, yaw: f32, pitch: f32) -> Self {
        Self {
            position,
            yaw,
            pitch,
            fov_y_degrees: DEFAULT_FOV_Y_DEGREES,
        }
    }

    pub fn from_bounds(center: Vec3, extent: Vec3) -> Self {
        let distance = framing_distance(extent);
        let position = center + Vec3::new(distance, distance * 0.4, distance);
        let (yaw, pitch) = forward_to_yaw_pitch(center - position);
        Self::new(position, yaw, pitch)
    }

    /// Camera looking at `pivot` from the given yaw/pitch, in degrees.
    pub fn looking_at(pivot: Vec3, extent: Vec3, yaw_deg: f32, pitch_deg: f32) -> Self {
        let mut camera = Self::new(Vec3::ZERO, yaw_deg.to_radians(), pitch_deg.to_radians());
        wrap_angles(&mut camera.yaw, &mut camera.pitch);
        camera.frame_bounds_preserve_orientation(pivot, extent);
        camera
    }

    pub fn frame_bounds_preserve_orientation(&mut self, center: Vec3, extent: Vec3) {
        let distance = framing_distance(extent);
        let (forward, _, _) = self.basis();
        self.position = center - forward * distance;
    }

    pub fn orbit_around(&mut self, pivot: Vec3, yaw_delta: f32, pitch_delta: f32) {
        self.yaw += yaw_delta;
        self.pitch += pitch_delta;
        wrap_angles(&mut self.yaw, &mut self.pitch);

        let distance = (self.position - pivot).length().max(0.05);
        let (dir, _, _) = self.basis();
        self.position = pivot - dir * distance;
    }

    pub fn basis(&self) -> (Vec3, Vec3, Vec3) {
        camera_basis(self.yaw, self.pitch)
    }

    pub fn view(&self) -> CameraView {
        let (forward, right, up) = self.basis();
        CameraView {
            eye: self.position,
            forward,
            right,
            up,
            fov_y_radians: self.fov_y_degrees.to_radians(),
        }
    }
}

fn framing_distance(extent: Vec3) -> f32 {
    let radius = extent.max_element();
    if radius > 0.0 {
        radius * 3.0
    } else {
        3.0
    }
}

fn forward_to_yaw_pitch(forward: Vec3) -> (f32, f32) {
    let n = forward / forward.length().max(1e-6);
    let yaw = n.z.atan2(n.x);
    let pitch = n.y.clamp(-1.0, 1.0).asin();
    (yaw, pitch)
}

fn camera_basis(yaw: f32, pitch: f32) -> (Vec3, Vec3, Vec3) {
    let cos_pitch = pitch.cos();
    let forward = Vec3::new(yaw.cos() * cos_pitch, pitch.sin(), yaw.sin() * cos_pitch);
    let right = Vec3::new(-yaw.sin(), 0.0, yaw.cos());
    let up = right.cross(forward).normalize_or_zero();
    (forward, right, up)
}

// Yaw wraps freely; pitch stops short of the poles so the basis stays valid.
fn wrap_angles(yaw: &mut f32, pitch: &mut f32) {
    const TWO_PI: f32 = std::f32::consts::PI * 2.0;
    if yaw.is_finite() {
        *yaw = (*yaw + std::f32::consts::PI).rem_euclid(TWO_PI) - std::f32::consts::PI;
    } else {
        *yaw = 0.0;
    }
    if pitch.is_finite() {
        *pitch = pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT);
    } else {
        *pitch = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::CameraController;
    use glam::Vec3;

    #[test]
    fn from_bounds_produces_finite_state() {
        let camera = CameraController::from_bounds(Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0));
        assert!(camera.position.is_finite());
        assert!(camera.yaw.is_finite());
        assert!(camera.pitch.is_finite());
    }

    #[test]
    fn orbit_keeps_distance_to_pivot() {
        let mut camera = CameraController::from_bounds(Vec3::ZERO, Vec3::splat(2.0));
        let before = camera.position.length();
        camera.orbit_around(Vec3::ZERO, 0.7, 0.2);
        assert!((camera.position.length() - before).abs() < 1e-3);
        let (forward, _, _) = camera.basis();
        assert!((forward + camera.position.normalize()).length() < 1e-4);
    }

    #[test]
    fn pitch_is_clamped_short_of_the_pole() {
        let mut camera = CameraController::new(Vec3::new(0.0, 0.0, 5.0), 0.0, 0.0);
        camera.orbit_around(Vec3::ZERO, 0.0, 10.0);
        assert!(camera.pitch < std::f32::consts::FRAC_PI_2);
        let view = camera.view();
        assert!(view.up.is_finite() && view.up.length() > 0.9);
    }

    #[test]
    fn frame_bounds_preserves_orientation() {
        let mut camera = CameraController::new(Vec3::new(5.0, 6.0, 7.0), 1.1, -0.3);
        camera.frame_bounds_preserve_orientation(Vec3::ZERO, Vec3::splat(2.0));
        assert!((camera.yaw - 1.1).abs() < 1e-6);
        assert!((camera.pitch + 0.3).abs() < 1e-6);
        assert!(camera.position.is_finite());
    }
}
