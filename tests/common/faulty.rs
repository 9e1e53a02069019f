//! A software backend that fails on request.
//!
//! Wraps [`SoftwareBackend`] and injects the errors a GPU can raise mid-run:
//! refusing a render target it has no room for, or failing a copy. The test
//! keeps a handle to [`Faults`] after the backend is boxed into the renderer.

use std::sync::Arc;

use parking_lot::Mutex;
use shading_pipeline::{
    backend::{
        BackendError, BackendResult, BlitMask, ClearValues, FrameStatistics, GraphicsBackend,
        MeshHandle, PixelBuffer, ReadbackSource, RenderState, RenderTargetDescriptor,
        RenderTargetHandle, ShaderHandle, ShaderStage, SoftwareBackend, TargetBinding,
        TargetStatus, TextureDescriptor, TextureHandle, TextureSource, UniformValue, Viewport,
    },
    resources::Mesh,
};

#[derive(Debug, Default)]
pub struct Faults {
    /// Refuse targets with this label wider than the given width
    pub refuse_target: Option<(&'static str, u32)>,
    pub fail_blit: bool,
    pub frames_begun: usize,
    pub frames_ended: usize,
}

pub struct FaultyBackend {
    inner: SoftwareBackend,
    faults: Arc<Mutex<Faults>>,
}

impl FaultyBackend {
    pub fn new(width: u32, height: u32) -> (Self, Arc<Mutex<Faults>>) {
        let faults = Arc::new(Mutex::new(Faults::default()));
        let backend = Self {
            inner: SoftwareBackend::new(width, height),
            faults: faults.clone(),
        };
        (backend, faults)
    }
}

impl GraphicsBackend for FaultyBackend {
    fn name(&self) -> &'static str {
        "faulty software"
    }

    fn surface_size(&self) -> (u32, u32) {
        self.inner.surface_size()
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.inner.resize_surface(width, height)
    }

    fn begin_frame(&mut self) -> BackendResult<()> {
        self.faults.lock().frames_begun += 1;
        self.inner.begin_frame()
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        self.faults.lock().frames_ended += 1;
        self.inner.end_frame()
    }

    fn create_render_target(
        &mut self,
        desc: &RenderTargetDescriptor,
    ) -> BackendResult<RenderTargetHandle> {
        let refused = self.faults.lock().refuse_target;
        if let Some((label, max_width)) = refused {
            if desc.label == label && desc.width > max_width {
                return Err(BackendError::RenderTargetCreationFailed {
                    label: desc.label.clone(),
                    reason: format!("width {} above {max_width}", desc.width),
                });
            }
        }
        self.inner.create_render_target(desc)
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        self.inner.destroy_render_target(target)
    }

    fn render_target_status(&self, target: RenderTargetHandle) -> TargetStatus {
        self.inner.render_target_status(target)
    }

    fn live_attachment_count(&self) -> usize {
        self.inner.live_attachment_count()
    }

    fn create_texture(
        &mut self,
        desc: &TextureDescriptor,
        data: &[f32],
    ) -> BackendResult<TextureHandle> {
        self.inner.create_texture(desc, data)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.inner.destroy_texture(texture)
    }

    fn create_mesh(&mut self, mesh: &Mesh) -> BackendResult<MeshHandle> {
        self.inner.create_mesh(mesh)
    }

    fn destroy_mesh(&mut self, mesh: MeshHandle) {
        self.inner.destroy_mesh(mesh)
    }

    fn create_shader(&mut self, name: &str) -> BackendResult<ShaderHandle> {
        self.inner.create_shader(name)
    }

    fn bind_shader(&mut self, shader: ShaderHandle) {
        self.inner.bind_shader(shader)
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        self.inner.set_uniform(name, value)
    }

    fn set_subroutine(&mut self, stage: ShaderStage, name: &str) {
        self.inner.set_subroutine(stage, name)
    }

    fn bind_render_target(&mut self, binding: TargetBinding) {
        self.inner.bind_render_target(binding)
    }

    fn bind_read_target(&mut self, target: Option<RenderTargetHandle>) {
        self.inner.bind_read_target(target)
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.inner.set_viewport(viewport)
    }

    fn clear(&mut self, values: ClearValues) {
        self.inner.clear(values)
    }

    fn blit_framebuffer(&mut self, mask: BlitMask) -> BackendResult<()> {
        if self.faults.lock().fail_blit {
            return Err(BackendError::Unsupported("blit refused".into()));
        }
        self.inner.blit_framebuffer(mask)
    }

    fn render_state(&self) -> RenderState {
        self.inner.render_state()
    }

    fn apply_render_state(&mut self, state: &RenderState) {
        self.inner.apply_render_state(state)
    }

    fn bind_texture(&mut self, unit: u32, source: Option<TextureSource>) {
        self.inner.bind_texture(unit, source)
    }

    fn draw_mesh(&mut self, mesh: MeshHandle) {
        self.inner.draw_mesh(mesh)
    }

    fn draw_fullscreen(&mut self) {
        self.inner.draw_fullscreen()
    }

    fn read_pixels(&mut self, source: ReadbackSource) -> BackendResult<PixelBuffer> {
        self.inner.read_pixels(source)
    }

    fn statistics(&self) -> &FrameStatistics {
        self.inner.statistics()
    }
}
