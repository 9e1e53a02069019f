//! G-Buffer generation pass for deferred rendering
//!
//! Renders the opaque queue to multiple render targets (MRT):
//! - 0: world position, w = 1 where geometry was drawn
//! - 1: world-space normal
//! - 2: albedo (rgb) and specular intensity (a)
//! - a render-only depth/stencil attachment, blitted into the main target afterwards

use glam::Vec4;
use log::debug;

use crate::backend::{
    AttachmentDescriptor, ClearValues, GraphicsBackend, RenderState, RenderStateGuard,
    ShaderHandle, TargetShape, TextureFormat,
};
use crate::error::RenderResult;
use crate::pipeline::extract::FrameScene;
use crate::pipeline::{draw_item, set_camera_uniforms};
use crate::render_target::RenderTarget;
use crate::shaders::names;

pub const POSITION_ATTACHMENT: usize = 0;
pub const NORMAL_ATTACHMENT: usize = 1;
pub const ALBEDO_ATTACHMENT: usize = 2;

/// G-Buffer generation pass for deferred rendering
pub struct GBufferPass {
    target: RenderTarget,
    shader: ShaderHandle,
}

impl GBufferPass {
    pub fn new(backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> RenderResult<Self> {
        Ok(Self {
            target: Self::create_target(backend, width, height)?,
            shader: backend.create_shader(names::GBUFFER)?,
        })
    }

    pub(crate) fn create_target(backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> RenderResult<RenderTarget> {
        // Float attachments keep world positions and normals unclamped
        let entries = [AttachmentDescriptor::color(TextureFormat::Rgba16Float); 3];
        RenderTarget::create_mrt(backend, "gbuffer", width, height, &entries, TargetShape::Flat)
    }

    pub fn name(&self) -> &str {
        "G-Buffer Pass"
    }

    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    /// Recreate the target at the new size
    pub fn resize(&mut self, backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> RenderResult<()> {
        let target = Self::create_target(backend, width, height)?;
        self.replace_target(backend, target);
        Ok(())
    }

    /// Swap in a target built by [`GBufferPass::create_target`], releasing the old one
    pub(crate) fn replace_target(&mut self, backend: &mut dyn GraphicsBackend, target: RenderTarget) {
        std::mem::replace(&mut self.target, target).release(backend);
    }

    pub fn execute(&self, backend: &mut dyn GraphicsBackend, frame: &FrameScene) {
        debug!("{}: {} opaque items", self.name(), frame.opaque.len());
        self.target.bind(backend);
        backend.clear(ClearValues::all(Vec4::ZERO));

        let mut pass = RenderStateGuard::new(backend, RenderState::opaque());
        pass.bind_shader(self.shader);
        set_camera_uniforms(&mut *pass, &frame.camera);
        for item in &frame.opaque {
            draw_item(&mut *pass, item);
        }
    }

    pub fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        self.target.release(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ReadbackSource, SoftwareBackend};
    use crate::pipeline::extract::DrawItem;
    use crate::resources::{Material, Mesh};
    use crate::scene::{Camera, Transform};
    use bevy_ecs::entity::Entity;
    use glam::{Mat4, Vec3};

    fn frame_with_cube(backend: &mut SoftwareBackend) -> FrameScene {
        let camera = Camera::perspective(60.0, 0.1, 50.0);
        let transform = Transform::looking_at(Vec3::new(0.0, 0.0, 4.0), Vec3::ZERO, Vec3::Y);
        let mesh = backend.create_mesh(&Mesh::cube()).unwrap();
        FrameScene {
            camera: camera.view(&transform),
            ambient: Vec3::splat(0.05),
            lights: Vec::new(),
            opaque: vec![DrawItem {
                entity: Entity::from_raw(3),
                mesh,
                material: Material::default().with_albedo(Vec3::new(1.0, 0.0, 0.0)).with_specular(0.25),
                model: Mat4::IDENTITY,
            }],
            alpha: Vec::new(),
            enviro_static: Vec::new(),
            enviro_dynamic: Vec::new(),
        }
    }

    #[test]
    fn test_gbuffer_layout() {
        let mut backend = SoftwareBackend::new(16, 16);
        let pass = GBufferPass::new(&mut backend, 16, 16).unwrap();
        assert_eq!(pass.target().color_count(), 3);
        assert!(pass.target().has_stencil());
    }

    #[test]
    fn test_cube_fills_center_pixel() {
        let mut backend = SoftwareBackend::new(16, 16);
        let pass = GBufferPass::new(&mut backend, 16, 16).unwrap();
        let frame = frame_with_cube(&mut backend);
        pass.execute(&mut backend, &frame);

        let read = |backend: &mut SoftwareBackend, attachment| {
            backend
                .read_pixels(ReadbackSource::Color {
                    target: pass.target().handle(),
                    attachment,
                    layer: 0,
                })
                .unwrap()
        };
        let position = read(&mut backend, POSITION_ATTACHMENT);
        assert_eq!(position.center().w, 1.0);
        assert!((position.center().z - 0.5).abs() < 0.05);
        // Corners see background
        assert_eq!(position.get(0, 0).w, 0.0);

        let normal = read(&mut backend, NORMAL_ATTACHMENT).center();
        assert!((normal.truncate() - Vec3::Z).length() < 1e-2);

        let albedo = read(&mut backend, ALBEDO_ATTACHMENT).center();
        assert!((albedo - Vec4::new(1.0, 0.0, 0.0, 0.25)).length() < 1e-2);
    }

    #[test]
    fn test_resize_replaces_target() {
        let mut backend = SoftwareBackend::new(16, 16);
        let mut pass = GBufferPass::new(&mut backend, 16, 16).unwrap();
        let before = backend.live_attachment_count();
        pass.resize(&mut backend, 32, 8).unwrap();
        assert_eq!(pass.target().size(), (32, 8));
        assert_eq!(backend.live_attachment_count(), before);
    }
}
