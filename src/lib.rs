//! Shading Pipeline - deferred and forward real-time lighting over a bevy_ecs scene
//!
//! The pipeline supports two backends:
//! - **wgpu**: presents to a winit window, programs written in WGSL
//! - **software**: deterministic CPU rasterizer used for headless rendering and tests
//!
//! # Features
//! - Deferred G-buffer path with stencil-culled point and spot light volumes
//! - Forward path with one additive pass per light
//! - Directional, spot and omnidirectional (cube map) shadows
//! - SSAO, skybox and environment-mapped materials
//! - Sorted transparency
//! - Bloom, tonemapping and FXAA post-processing
//! - Render queues kept current by ECS observers

pub mod backend;
pub mod error;
pub mod pipeline;
pub mod render_target;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod shaders;
pub mod window;

// Re-export Bevy ECS prelude for users
pub use bevy_ecs::prelude::*;

pub use backend::{GraphicsBackend, SoftwareBackend, WgpuBackend};
pub use error::{RenderError, RenderResult};
pub use pipeline::{RenderPath, RendererConfig};
pub use render_target::RenderTarget;
pub use renderer::RenderingSystem;
pub use window::Window;
