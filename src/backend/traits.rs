//! Core backend abstraction traits
//!
//! The pipeline drives the GPU through [`GraphicsBackend`], an immediate-mode
//! device: bind a target, apply a [`RenderState`], bind a program and its named
//! parameters, then draw. Both the wgpu backend and the CPU reference rasterizer
//! implement it.

use crate::backend::types::*;
use crate::resources::Mesh;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to acquire next image: {0}")]
    AcquireImageFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create render target '{label}': {reason}")]
    RenderTargetCreationFailed { label: String, reason: String },
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Shader compilation failed: {0}")]
    ShaderCompilationFailed(String),
    #[error("Unknown shader program '{0}'")]
    ShaderNotFound(String),
    #[error("Invalid {0} handle")]
    InvalidHandle(&'static str),
    #[error("Readback failed: {0}")]
    ReadbackFailed(String),
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    #[error("Surface lost")]
    SurfaceLost,
    #[error("Out of memory")]
    OutOfMemory,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to an off-screen render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetHandle(pub(crate) u64);

/// Handle to a standalone texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to uploaded mesh geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub(crate) u64);

/// Handle to a shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub(crate) u64);

/// Main graphics backend trait
pub trait GraphicsBackend {
    /// Human readable backend name
    fn name(&self) -> &'static str;

    /// Get the actual surface size (may be clamped by device limits)
    fn surface_size(&self) -> (u32, u32);

    /// Resize the presentation surface
    fn resize_surface(&mut self, width: u32, height: u32);

    /// Begin a new frame
    fn begin_frame(&mut self) -> BackendResult<()>;

    /// Submit recorded work and present the frame
    fn end_frame(&mut self) -> BackendResult<()>;

    // Resources

    fn create_render_target(
        &mut self,
        desc: &RenderTargetDescriptor,
    ) -> BackendResult<RenderTargetHandle>;

    fn destroy_render_target(&mut self, target: RenderTargetHandle);

    fn render_target_status(&self, target: RenderTargetHandle) -> TargetStatus;

    /// Number of live render-target attachments, used to detect leaks across resizes.
    fn live_attachment_count(&self) -> usize;

    /// Create a texture. `data` holds one `f32` per channel per texel (four for
    /// color formats, one for depth), layers in cube-face order; empty means zeroed.
    fn create_texture(&mut self, desc: &TextureDescriptor, data: &[f32])
        -> BackendResult<TextureHandle>;

    fn destroy_texture(&mut self, texture: TextureHandle);

    fn create_mesh(&mut self, mesh: &Mesh) -> BackendResult<MeshHandle>;

    fn destroy_mesh(&mut self, mesh: MeshHandle);

    // Programs

    /// Resolve a built-in program by name.
    fn create_shader(&mut self, name: &str) -> BackendResult<ShaderHandle>;

    fn bind_shader(&mut self, shader: ShaderHandle);

    /// Set a named parameter on the bound program. Names the program does not
    /// declare are ignored.
    fn set_uniform(&mut self, name: &str, value: UniformValue);

    /// Select a named subroutine of the bound program.
    fn set_subroutine(&mut self, stage: ShaderStage, name: &str);

    // Targets and state

    /// Make a target the active draw surface. Does not change the viewport.
    fn bind_render_target(&mut self, binding: TargetBinding);

    /// Source for [`GraphicsBackend::blit_framebuffer`]
    fn bind_read_target(&mut self, target: Option<RenderTargetHandle>);

    fn set_viewport(&mut self, viewport: Viewport);

    /// Clear the bound draw surface. Ignores write masks.
    fn clear(&mut self, values: ClearValues);

    /// Copy the read target into the draw target. Both must have equal dimensions.
    fn blit_framebuffer(&mut self, mask: BlitMask) -> BackendResult<()>;

    fn render_state(&self) -> RenderState;

    fn apply_render_state(&mut self, state: &RenderState);

    fn bind_texture(&mut self, unit: u32, source: Option<TextureSource>);

    // Draws

    fn draw_mesh(&mut self, mesh: MeshHandle);

    /// Draw one triangle covering the viewport.
    fn draw_fullscreen(&mut self);

    // Readback and diagnostics

    fn read_pixels(&mut self, source: ReadbackSource) -> BackendResult<PixelBuffer>;

    fn statistics(&self) -> &FrameStatistics;
}
