//! CPU implementation of [`GpuBackend`] used by the headless host and by
//! tests. It renders a single shaded box per model (the model's bounds)
//! on a shadow-catcher ground plane, lit by the prefiltered environment and
//! the sun.

use crate::assets::Panorama;
use crate::render::gpu::{
    BackendCapabilities, CameraView, CapabilityError, EnvironmentMapHandle, Frame, FrameSource,
    GpuBackend, MeshBufferHandle, RenderSnapshot, ResourceCounts, ShadowMapHandle,
};
use crate::render::sampler::{direction_to_uv, uv_to_direction};
use crate::render::sun::ShadowResolution;
use crate::scene::Aabb;
use glam::{Mat4, Quat, Vec3};
use std::collections::HashMap;
use std::f32::consts::PI;

const SPECULAR_WIDTH: u32 = 128;
const SPECULAR_HEIGHT: u32 = 64;
const IRRADIANCE_SOURCE_WIDTH: u32 = 32;
const IRRADIANCE_SOURCE_HEIGHT: u32 = 16;
const DIFFUSE_WIDTH: u32 = 16;
const DIFFUSE_HEIGHT: u32 = 8;
const RAY_EPSILON: f32 = 1e-4;

/// Prefiltered environment with its generation rotation baked in.
struct EnvironmentMap {
    specular: Vec<Vec3>,
    diffuse: Vec<Vec3>,
}

impl EnvironmentMap {
    fn generate(panorama: &Panorama, rotation_degrees: f32) -> Self {
        let source = downsample_rgb(panorama, SPECULAR_WIDTH, SPECULAR_HEIGHT);
        let undo = Quat::from_rotation_y(-rotation_degrees.to_radians());
        let mut specular = Vec::with_capacity((SPECULAR_WIDTH * SPECULAR_HEIGHT) as usize);
        for y in 0..SPECULAR_HEIGHT {
            for x in 0..SPECULAR_WIDTH {
                let world = texel_direction(x, y, SPECULAR_WIDTH, SPECULAR_HEIGHT);
                specular.push(sample_grid(
                    &source,
                    SPECULAR_WIDTH,
                    SPECULAR_HEIGHT,
                    undo * world,
                ));
            }
        }
        let diffuse = convolve_irradiance(&specular);
        Self { specular, diffuse }
    }
}

fn texel_direction(x: u32, y: u32, width: u32, height: u32) -> Vec3 {
    let u = (x as f32 + 0.5) / width as f32;
    let v = 1.0 - (y as f32 + 0.5) / height as f32;
    uv_to_direction(u, v)
}

fn downsample_rgb(panorama: &Panorama, width: u32, height: u32) -> Vec<Vec3> {
    let step_x = panorama.width() as f64 / width as f64;
    let step_y = panorama.height() as f64 / height as f64;
    let mut out = Vec::with_capacity((width * height) as usize);
    for gy in 0..height {
        let y0 = ((gy as f64 * step_y).floor() as u32).min(panorama.height() - 1);
        let y1 = (((gy + 1) as f64 * step_y).ceil() as u32).clamp(y0 + 1, panorama.height());
        for gx in 0..width {
            let x0 = ((gx as f64 * step_x).floor() as u32).min(panorama.width() - 1);
            let x1 = (((gx + 1) as f64 * step_x).ceil() as u32).clamp(x0 + 1, panorama.width());
            let mut sum = Vec3::ZERO;
            for y in y0..y1 {
                for x in x0..x1 {
                    let texel = Vec3::from(panorama.pixel(x, y));
                    if texel.is_finite() {
                        sum += texel.max(Vec3::ZERO);
                    }
                }
            }
            out.push(sum / ((y1 - y0) * (x1 - x0)) as f32);
        }
    }
    out
}

fn box_reduce(grid: &[Vec3], width: u32, height: u32, out_width: u32, out_height: u32) -> Vec<Vec3> {
    let fx = width / out_width;
    let fy = height / out_height;
    let mut out = Vec::with_capacity((out_width * out_height) as usize);
    for oy in 0..out_height {
        for ox in 0..out_width {
            let mut sum = Vec3::ZERO;
            for y in oy * fy..(oy + 1) * fy {
                for x in ox * fx..(ox + 1) * fx {
                    sum += grid[(y * width + x) as usize];
                }
            }
            out.push(sum / (fx * fy) as f32);
        }
    }
    out
}

/// Cosine-weighted irradiance over the whole sphere, divided by pi.
fn convolve_irradiance(specular: &[Vec3]) -> Vec<Vec3> {
    let source = box_reduce(
        specular,
        SPECULAR_WIDTH,
        SPECULAR_HEIGHT,
        IRRADIANCE_SOURCE_WIDTH,
        IRRADIANCE_SOURCE_HEIGHT,
    );
    let texel_area =
        (2.0 * PI / IRRADIANCE_SOURCE_WIDTH as f32) * (PI / IRRADIANCE_SOURCE_HEIGHT as f32);
    let mut samples = Vec::with_capacity(source.len());
    for y in 0..IRRADIANCE_SOURCE_HEIGHT {
        for x in 0..IRRADIANCE_SOURCE_WIDTH {
            let direction =
                texel_direction(x, y, IRRADIANCE_SOURCE_WIDTH, IRRADIANCE_SOURCE_HEIGHT);
            let solid_angle = texel_area * direction.y.clamp(-1.0, 1.0).acos().sin();
            samples.push((direction, source[(y * IRRADIANCE_SOURCE_WIDTH + x) as usize] * solid_angle));
        }
    }

    let mut diffuse = Vec::with_capacity((DIFFUSE_WIDTH * DIFFUSE_HEIGHT) as usize);
    for y in 0..DIFFUSE_HEIGHT {
        for x in 0..DIFFUSE_WIDTH {
            let normal = texel_direction(x, y, DIFFUSE_WIDTH, DIFFUSE_HEIGHT);
            let irradiance: Vec3 = samples
                .iter()
                .map(|(direction, radiance)| *radiance * normal.dot(*direction).max(0.0))
                .sum();
            diffuse.push(irradiance / PI);
        }
    }
    diffuse
}

/// Bilinear lookup; wraps horizontally and clamps at the poles.
fn sample_grid(grid: &[Vec3], width: u32, height: u32, direction: Vec3) -> Vec3 {
    let (u, v) = direction_to_uv(direction);
    let fx = u * width as f32 - 0.5;
    let fy = (1.0 - v) * height as f32 - 0.5;
    let x0 = fx.floor();
    let y0 = fy.floor();
    let tx = fx - x0;
    let ty = fy - y0;
    let column = |x: f32| (x as i64).rem_euclid(width as i64) as u32;
    let row = |y: f32| (y as i64).clamp(0, height as i64 - 1) as u32;
    let at = |x: u32, y: u32| grid[(y * width + x) as usize];
    let (xa, xb) = (column(x0), column(x0 + 1.0));
    let (ya, yb) = (row(y0), row(y0 + 1.0));
    let top = at(xa, ya).lerp(at(xb, ya), tx);
    let bottom = at(xa, yb).lerp(at(xb, yb), tx);
    top.lerp(bottom, ty)
}

/// Entry and exit distances of a ray against an axis-aligned box, with the
/// entry face normal. Rays starting inside report a negative entry.
fn intersect_box(origin: Vec3, direction: Vec3, bounds: &Aabb) -> Option<(f32, f32, Vec3)> {
    let inv = direction.recip();
    let t1 = (bounds.min - origin) * inv;
    let t2 = (bounds.max - origin) * inv;
    let near = t1.min(t2);
    let far = t1.max(t2);
    let t_near = near.max_element();
    let t_far = far.min_element();
    if !t_near.is_finite() || t_far < t_near || t_far <= RAY_EPSILON {
        return None;
    }
    let axis = if near.x == t_near {
        0
    } else if near.y == t_near {
        1
    } else {
        2
    };
    let mut normal = Vec3::ZERO;
    normal[axis] = -direction[axis].signum();
    Some((t_near, t_far, normal))
}

fn reflect(incoming: Vec3, normal: Vec3) -> Vec3 {
    incoming - 2.0 * incoming.dot(normal) * normal
}

struct EnvironmentLookup<'a> {
    map: &'a EnvironmentMap,
    undo_live: Quat,
}

impl EnvironmentLookup<'_> {
    fn specular(&self, direction: Vec3) -> Vec3 {
        sample_grid(
            &self.map.specular,
            SPECULAR_WIDTH,
            SPECULAR_HEIGHT,
            self.undo_live * direction,
        )
    }

    fn diffuse(&self, normal: Vec3) -> Vec3 {
        sample_grid(
            &self.map.diffuse,
            DIFFUSE_WIDTH,
            DIFFUSE_HEIGHT,
            self.undo_live * normal,
        )
    }
}

struct ModelGeometry {
    local_from_world: Mat4,
    normal_to_world: Mat4,
    ground_y: f32,
}

/// Per-frame view of the snapshot with the derived lookups resolved.
struct Tracer<'a> {
    snapshot: &'a RenderSnapshot,
    environment: Option<EnvironmentLookup<'a>>,
    model: Option<ModelGeometry>,
    shadows: bool,
}

impl<'a> Tracer<'a> {
    fn new(snapshot: &'a RenderSnapshot, maps: &'a HashMap<u64, EnvironmentMap>) -> Self {
        let environment = snapshot.environment.and_then(|draw| {
            maps.get(&draw.map.0).map(|map| EnvironmentLookup {
                map,
                undo_live: Quat::from_rotation_y(-draw.live_rotation_degrees.to_radians()),
            })
        });
        let model = snapshot.model.as_ref().map(|model| {
            let local_from_world = model.world_from_local.inverse();
            ModelGeometry {
                local_from_world,
                normal_to_world: local_from_world.transpose(),
                ground_y: model
                    .local_bounds
                    .transformed(&model.world_from_local)
                    .min
                    .y,
            }
        });
        let sun = &snapshot.sun;
        let casts = snapshot.model.as_ref().is_some_and(|model| model.cast_shadow);
        Self {
            snapshot,
            environment,
            model,
            shadows: sun.enabled && sun.cast_shadow && snapshot.shadow_map_ready && casts,
        }
    }

    fn primary_ray(&self, px: f32, py: f32) -> (Vec3, Vec3) {
        let CameraView {
            eye,
            forward,
            right,
            up,
            fov_y_radians,
        } = self.snapshot.camera;
        let width = self.snapshot.width.max(1) as f32;
        let height = self.snapshot.height.max(1) as f32;
        let half = (fov_y_radians * 0.5).tan();
        let x = (2.0 * px / width - 1.0) * half * (width / height);
        let y = (1.0 - 2.0 * py / height) * half;
        (eye, (forward + right * x + up * y).normalize_or(forward))
    }

    fn model_span(&self, origin: Vec3, direction: Vec3) -> Option<(f32, f32, Vec3)> {
        let model = self.snapshot.model.as_ref()?;
        let geometry = self.model.as_ref()?;
        let local_origin = geometry.local_from_world.transform_point3(origin);
        let local_direction = geometry.local_from_world.transform_vector3(direction);
        intersect_box(local_origin, local_direction, &model.local_bounds)
    }

    fn hit_model(&self, origin: Vec3, direction: Vec3) -> Option<(f32, Vec3)> {
        let geometry = self.model.as_ref()?;
        let (t, _, local_normal) = self.model_span(origin, direction)?;
        if t <= RAY_EPSILON {
            return None;
        }
        let normal = geometry
            .normal_to_world
            .transform_vector3(local_normal)
            .normalize_or(local_normal);
        Some((t, normal))
    }

    fn hit_ground(&self, origin: Vec3, direction: Vec3) -> Option<f32> {
        let geometry = self.model.as_ref()?;
        if direction.y >= -1e-6 {
            return None;
        }
        let t = (geometry.ground_y - origin.y) / direction.y;
        (t > RAY_EPSILON).then_some(t)
    }

    fn background(&self, direction: Vec3) -> Vec3 {
        match (&self.environment, self.snapshot.background_visible) {
            (Some(environment), true) => {
                environment.specular(direction) * self.snapshot.shading.background_intensity
            }
            _ => Vec3::from(self.snapshot.background_color),
        }
    }

    /// Fraction of shadow taps around `point` that see the model toward the sun.
    fn occlusion(&self, point: Vec3, jitter: (f32, f32)) -> f32 {
        let sun = &self.snapshot.sun;
        let taps = sun.shadow_resolution.filter_taps().max(1);
        let radius = sun.shadow_softness * 0.1 * 1024.0 / sun.shadow_resolution.pixels() as f32;
        let spacing = if taps > 1 {
            2.0 * radius / (taps - 1) as f32
        } else {
            0.0
        };
        let start = point + sun.direction * sun.shadow_bias.max(RAY_EPSILON);
        let mut blocked = 0u32;
        for j in 0..taps {
            for i in 0..taps {
                let dx = -radius + (i as f32 + jitter.0 - 0.5) * spacing;
                let dz = -radius + (j as f32 + jitter.1 - 0.5) * spacing;
                let origin = start + Vec3::new(dx, 0.0, dz);
                if self.model_span(origin, sun.direction).is_some() {
                    blocked += 1;
                }
            }
        }
        blocked as f32 / (taps * taps) as f32
    }

    fn trace(&self, origin: Vec3, direction: Vec3, depth: u32, jitter: (f32, f32)) -> Vec3 {
        let model_hit = self.hit_model(origin, direction);
        let ground_hit = self.hit_ground(origin, direction);
        match (model_hit, ground_hit) {
            (Some((t, normal)), ground) if ground.map_or(true, |g| t <= g) => {
                self.shade_model(origin + direction * t, normal, direction, depth, jitter)
            }
            (_, Some(t)) => {
                let base = self.background(direction);
                if !self.shadows {
                    return base;
                }
                let occlusion = self.occlusion(origin + direction * t, jitter);
                base * (1.0 - self.snapshot.sun.shadow_intensity * occlusion)
            }
            _ => self.background(direction),
        }
    }

    fn shade_model(
        &self,
        point: Vec3,
        normal: Vec3,
        incoming: Vec3,
        depth: u32,
        jitter: (f32, f32),
    ) -> Vec3 {
        let Some(model) = self.snapshot.model.as_ref() else {
            return Vec3::ZERO;
        };
        let material = &model.material;
        let [r, g, b, _] = material.base_color_rgba;
        let albedo = Vec3::new(r, g, b).clamp(Vec3::ZERO, Vec3::ONE);
        let metallic = material.metallic.clamp(0.0, 1.0);
        let roughness = material.roughness.clamp(0.0, 1.0);
        let env_scale = material.environment_intensity;

        let (ambient, reflected) = match &self.environment {
            Some(environment) => {
                let mirror = reflect(incoming, normal);
                let sharp = if depth > 1 {
                    self.trace(point + normal * RAY_EPSILON, mirror, depth - 1, jitter)
                } else {
                    environment.specular(mirror)
                };
                let rough = environment.diffuse(mirror);
                (
                    environment.diffuse(normal) * env_scale,
                    sharp.lerp(rough, roughness) * env_scale,
                )
            }
            None => (Vec3::ZERO, Vec3::ZERO),
        };

        let sun = &self.snapshot.sun;
        let direct = if sun.enabled {
            sun.color * sun.intensity * normal.dot(sun.direction).max(0.0) / PI
        } else {
            Vec3::ZERO
        };

        let f0 = Vec3::splat(0.04).lerp(albedo, metallic);
        let cos_theta = (-incoming).dot(normal).clamp(0.0, 1.0);
        let fresnel = f0 + (Vec3::ONE - f0) * (1.0 - cos_theta).powi(5) * (1.0 - roughness);
        let diffuse_albedo = albedo * (1.0 - metallic);
        diffuse_albedo * (ambient + direct) + reflected * fresnel + Vec3::from(material.emissive_rgb)
    }
}

fn tone_map(radiance: Vec3, exposure: f32) -> [u8; 4] {
    let exposed = (radiance * exposure.max(0.0)).max(Vec3::ZERO);
    let mapped = exposed / (Vec3::ONE + exposed);
    let encode = |channel: f32| (channel.powf(1.0 / 2.2) * 255.0).round().clamp(0.0, 255.0) as u8;
    [encode(mapped.x), encode(mapped.y), encode(mapped.z), 255]
}

fn halton(index: u32, base: u32) -> f32 {
    let mut f = 1.0;
    let mut r = 0.0;
    let mut i = index;
    while i > 0 {
        f /= base as f32;
        r += f * (i % base) as f32;
        i /= base;
    }
    r
}

struct PathTracer {
    scene: Option<RenderSnapshot>,
    max_bounces: u32,
    accumulation: Vec<Vec3>,
    samples: u32,
}

impl PathTracer {
    fn reset(&mut self) {
        self.accumulation.iter_mut().for_each(|texel| *texel = Vec3::ZERO);
        self.samples = 0;
    }
}

pub struct SoftwareBackend {
    capabilities: BackendCapabilities,
    next_id: u64,
    environment_maps: HashMap<u64, EnvironmentMap>,
    shadow_maps: HashMap<u64, ShadowResolution>,
    mesh_buffers: HashMap<u64, Aabb>,
    path_tracer: Option<PathTracer>,
}

impl SoftwareBackend {
    pub fn new(capabilities: BackendCapabilities) -> Self {
        Self {
            capabilities,
            next_id: 1,
            environment_maps: HashMap::new(),
            shadow_maps: HashMap::new(),
            mesh_buffers: HashMap::new(),
            path_tracer: None,
        }
    }

    pub fn resource_counts(&self) -> ResourceCounts {
        ResourceCounts {
            environment_maps: self.environment_maps.len(),
            shadow_maps: self.shadow_maps.len(),
            mesh_buffers: self.mesh_buffers.len(),
        }
    }

    #[cfg(test)]
    pub fn has_path_tracer(&self) -> bool {
        self.path_tracer.is_some()
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn render(&self, snapshot: &RenderSnapshot, depth: u32, jitter: (f32, f32)) -> Vec<Vec3> {
        let tracer = Tracer::new(snapshot, &self.environment_maps);
        let mut pixels = Vec::with_capacity((snapshot.width * snapshot.height) as usize);
        for y in 0..snapshot.height {
            for x in 0..snapshot.width {
                let (origin, direction) =
                    tracer.primary_ray(x as f32 + jitter.0, y as f32 + jitter.1);
                pixels.push(tracer.trace(origin, direction, depth, jitter));
            }
        }
        pixels
    }

    fn encode(snapshot: &RenderSnapshot, radiance: &[Vec3], scale: f32, source: FrameSource) -> Frame {
        let mut rgba8 = Vec::with_capacity(radiance.len() * 4);
        for texel in radiance {
            rgba8.extend_from_slice(&tone_map(*texel * scale, snapshot.shading.exposure));
        }
        Frame {
            width: snapshot.width,
            height: snapshot.height,
            rgba8,
            source,
        }
    }
}

impl GpuBackend for SoftwareBackend {
    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    fn generate_environment_map(
        &mut self,
        panorama: &Panorama,
        rotation_degrees: f32,
    ) -> EnvironmentMapHandle {
        let id = self.allocate_id();
        self.environment_maps
            .insert(id, EnvironmentMap::generate(panorama, rotation_degrees));
        EnvironmentMapHandle::new(id)
    }

    fn release_environment_map(&mut self, handle: EnvironmentMapHandle) {
        if self.environment_maps.remove(&handle.raw()).is_none() {
            log::warn!("Released unknown environment map {}", handle.raw());
        }
    }

    fn create_shadow_map(&mut self, resolution: ShadowResolution) -> ShadowMapHandle {
        let id = self.allocate_id();
        self.shadow_maps.insert(id, resolution);
        ShadowMapHandle::new(id)
    }

    fn release_shadow_map(&mut self, handle: ShadowMapHandle) {
        if self.shadow_maps.remove(&handle.raw()).is_none() {
            log::warn!("Released unknown shadow map {}", handle.raw());
        }
    }

    fn upload_mesh(&mut self, local_bounds: &Aabb) -> MeshBufferHandle {
        let id = self.allocate_id();
        self.mesh_buffers.insert(id, *local_bounds);
        MeshBufferHandle::new(id)
    }

    fn release_mesh(&mut self, handle: MeshBufferHandle) {
        if self.mesh_buffers.remove(&handle.raw()).is_none() {
            log::warn!("Released unknown mesh buffer {}", handle.raw());
        }
    }

    fn draw_rasterized(&mut self, snapshot: &RenderSnapshot) -> Frame {
        let radiance = self.render(snapshot, 1, (0.5, 0.5));
        Self::encode(snapshot, &radiance, 1.0, FrameSource::Rasterized)
    }

    fn create_path_tracer(&mut self) -> Result<(), CapabilityError> {
        if !self.capabilities.progressive {
            return Err(CapabilityError(
                "software backend configured without progressive support".to_string(),
            ));
        }
        if self.path_tracer.is_none() {
            self.path_tracer = Some(PathTracer {
                scene: None,
                max_bounces: 1,
                accumulation: Vec::new(),
                samples: 0,
            });
        }
        Ok(())
    }

    fn release_path_tracer(&mut self) {
        self.path_tracer = None;
    }

    fn path_tracer_sync(&mut self, snapshot: &RenderSnapshot, max_bounces: u32) {
        let Some(tracer) = self.path_tracer.as_mut() else {
            log::warn!("Path tracer sync without a path tracer");
            return;
        };
        tracer.accumulation = vec![Vec3::ZERO; (snapshot.width * snapshot.height) as usize];
        tracer.samples = 0;
        tracer.max_bounces = max_bounces.max(1);
        tracer.scene = Some(snapshot.clone());
    }

    fn path_tracer_reset(&mut self) {
        if let Some(tracer) = self.path_tracer.as_mut() {
            tracer.reset();
        }
    }

    fn path_tracer_sample(&mut self) -> u32 {
        let Some(tracer) = self.path_tracer.as_mut() else {
            return 0;
        };
        let Some(scene) = tracer.scene.take() else {
            return 0;
        };
        let depth = tracer.max_bounces;
        let index = tracer.samples + 1;
        let jitter = (halton(index, 2), halton(index, 3));
        let radiance = self.render(&scene, depth, jitter);
        let Some(tracer) = self.path_tracer.as_mut() else {
            return 0;
        };
        for (texel, sample) in tracer.accumulation.iter_mut().zip(radiance) {
            *texel += sample;
        }
        tracer.samples = index;
        tracer.scene = Some(scene);
        index
    }

    fn path_tracer_frame(&self) -> Option<Frame> {
        let tracer = self.path_tracer.as_ref()?;
        let scene = tracer.scene.as_ref()?;
        if tracer.samples == 0 {
            return None;
        }
        Some(Self::encode(
            scene,
            &tracer.accumulation,
            1.0 / tracer.samples as f32,
            FrameSource::Accumulated {
                samples: tracer.samples,
            },
        ))
    }
}
