//! Backend abstraction layer
//!
//! Provides the immediate-mode device trait the pipeline draws through, the
//! types it exchanges, and two implementations: wgpu for presenting to a window
//! and a CPU reference rasterizer.

pub mod software;
pub mod state;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use software::SoftwareBackend;
pub use state::{with_render_state, RenderStateGuard};
pub use traits::*;
pub use types::*;
pub use wgpu_backend::WgpuBackend;
