use crate::render::gpu::MeshBufferHandle;
use glam::{Mat4, Vec3};

/// Editable PBR factors of one material slot.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MaterialParams {
    pub base_color_rgba: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub emissive_rgb: [f32; 3],
    #[serde(default = "default_environment_intensity")]
    pub environment_intensity: f32,
}

fn default_environment_intensity() -> f32 {
    1.0
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            base_color_rgba: [1.0, 1.0, 1.0, 1.0],
            metallic: 0.0,
            roughness: 1.0,
            emissive_rgb: [0.0, 0.0, 0.0],
            environment_intensity: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn transformed(&self, matrix: &Mat4) -> Aabb {
        let corners = [
            Vec3::new(self.min.x, self.min.y, self.min.z),
            Vec3::new(self.max.x, self.min.y, self.min.z),
            Vec3::new(self.min.x, self.max.y, self.min.z),
            Vec3::new(self.max.x, self.max.y, self.min.z),
            Vec3::new(self.min.x, self.min.y, self.max.z),
            Vec3::new(self.max.x, self.min.y, self.max.z),
            Vec3::new(self.min.x, self.max.y, self.max.z),
            Vec3::new(self.max.x, self.max.y, self.max.z),
        ];
        let first = matrix.transform_point3(corners[0]);
        let mut bounds = Aabb {
            min: first,
            max: first,
        };
        for corner in &corners[1..] {
            let p = matrix.transform_point3(*corner);
            bounds.min = bounds.min.min(p);
            bounds.max = bounds.max.max(p);
        }
        bounds
    }
}

/// A drawable primitive carrying a material.
#[derive(Debug)]
pub struct MeshRenderable {
    pub material_name: String,
    pub material: MaterialParams,
    pub local_bounds: Aabb,
    pub cast_shadow: bool,
    pub buffers: Option<MeshBufferHandle>,
}

#[derive(Debug)]
pub struct SceneNode {
    pub name: String,
    pub local: Mat4,
    pub renderables: Vec<MeshRenderable>,
    pub children: Vec<SceneNode>,
}

/// Visits every material-bearing renderable of a node hierarchy together
/// with its accumulated model-space transform.
pub trait RenderableVisitor {
    fn visit_renderable(&mut self, node_name: &str, world: &Mat4, renderable: &mut MeshRenderable);
}

impl SceneNode {
    pub fn group(name: &str, local: Mat4, children: Vec<SceneNode>) -> Self {
        Self {
            name: name.to_string(),
            local,
            renderables: Vec::new(),
            children,
        }
    }

    pub fn accept(&mut self, parent: &Mat4, visitor: &mut dyn RenderableVisitor) {
        let world = *parent * self.local;
        for renderable in &mut self.renderables {
            visitor.visit_renderable(&self.name, &world, renderable);
        }
        for child in &mut self.children {
            child.accept(&world, visitor);
        }
    }

    fn bounds(&self, parent: &Mat4) -> Option<Aabb> {
        let world = *parent * self.local;
        let own = self
            .renderables
            .iter()
            .map(|renderable| renderable.local_bounds.transformed(&world));
        let children = self.children.iter().filter_map(|child| child.bounds(&world));
        own.chain(children).reduce(|acc, next| acc.union(&next))
    }
}

/// A loaded model: the root of its node hierarchy and model-space bounds.
#[derive(Debug)]
pub struct ModelAsset {
    pub name: String,
    pub root: SceneNode,
    pub bounds: Aabb,
}

impl ModelAsset {
    /// Builds the asset and computes its bounds. A hierarchy with no
    /// renderables gets zero-extent bounds at the origin.
    pub fn new(name: String, root: SceneNode) -> Self {
        let bounds = root
            .bounds(&Mat4::IDENTITY)
            .unwrap_or(Aabb::new(Vec3::ZERO, Vec3::ZERO));
        Self { name, root, bounds }
    }

    pub fn visit_renderables(&mut self, visitor: &mut dyn RenderableVisitor) {
        self.root.accept(&Mat4::IDENTITY, visitor);
    }

    /// Material and shadow-casting flag of the first renderable in
    /// traversal order.
    pub fn primary_surface(&mut self) -> Option<(MaterialParams, bool)> {
        struct First(Option<(MaterialParams, bool)>);
        impl RenderableVisitor for First {
            fn visit_renderable(&mut self, _: &str, _: &Mat4, renderable: &mut MeshRenderable) {
                if self.0.is_none() {
                    self.0 = Some((renderable.material, renderable.cast_shadow));
                }
            }
        }
        let mut first = First(None);
        self.visit_renderables(&mut first);
        first.0
    }

    pub fn renderable_count(&mut self) -> usize {
        struct Count(usize);
        impl RenderableVisitor for Count {
            fn visit_renderable(&mut self, _: &str, _: &Mat4, _: &mut MeshRenderable) {
                self.0 += 1;
            }
        }
        let mut count = Count(0);
        self.visit_renderables(&mut count);
        count.0
    }
}

/// Pushes the environment contribution onto every material.
pub struct EnvironmentIntensityVisitor {
    pub intensity: f32,
}

impl RenderableVisitor for EnvironmentIntensityVisitor {
    fn visit_renderable(&mut self, _: &str, _: &Mat4, renderable: &mut MeshRenderable) {
        renderable.material.environment_intensity = self.intensity;
    }
}

/// Toggles shadow casting to follow the sun's enabled flag.
pub struct ShadowFlagsVisitor {
    pub enabled: bool,
}

impl RenderableVisitor for ShadowFlagsVisitor {
    fn visit_renderable(&mut self, _: &str, _: &Mat4, renderable: &mut MeshRenderable) {
        renderable.cast_shadow = self.enabled;
    }
}

/// Model-space transform that recenters the model on the origin and scales
/// its largest extent to `target_size`.
pub fn fit_matrix(bounds: &Aabb, target_size: f32) -> Mat4 {
    let extent = bounds.extent();
    let largest = extent.x.max(extent.y).max(extent.z);
    let scale = if largest > 1e-6 && largest.is_finite() {
        target_size / largest
    } else {
        log::warn!("Model bounds have zero extent; skipping auto-scale");
        1.0
    };
    Mat4::from_scale(Vec3::splat(scale)) * Mat4::from_translation(-bounds.center())
}
