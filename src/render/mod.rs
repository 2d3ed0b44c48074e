pub mod calibration;
pub mod camera;
pub mod capture;
pub mod coordinator;
pub mod environment;
pub mod gpu;
pub mod sampler;
pub mod schedule;
pub mod software;
pub mod sun;

pub use coordinator::{ProgressiveQuality, RenderMode};
pub use gpu::{BackendCapabilities, Frame, GpuBackend};
pub use software::SoftwareBackend;
