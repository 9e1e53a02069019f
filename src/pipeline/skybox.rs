//! Skybox and environment-mapped geometry
//!
//! Both run after lighting against the scene depth left in the main target.

use log::debug;

use crate::backend::{
    CompareFunction, CullMode, GraphicsBackend, MeshHandle, RenderState, RenderStateGuard,
    ShaderHandle, TextureSource,
};
use crate::error::RenderResult;
use crate::pipeline::extract::FrameScene;
use crate::pipeline::lighting_pass::set_light_uniforms;
use crate::pipeline::shadow::ShadowMaps;
use crate::pipeline::{draw_item, set_camera_uniforms};
use crate::resources::Mesh;
use crate::scene::Skybox;
use crate::shaders::{names, units};

pub struct SkyboxPass {
    cube: MeshHandle,
    skybox_shader: ShaderHandle,
    environment_shader: ShaderHandle,
}

impl SkyboxPass {
    pub fn new(backend: &mut dyn GraphicsBackend) -> RenderResult<Self> {
        Ok(Self {
            cube: backend.create_mesh(&Mesh::cube())?,
            skybox_shader: backend.create_shader(names::SKYBOX)?,
            environment_shader: backend.create_shader(names::ENVIRONMENT_MAP)?,
        })
    }

    pub fn name(&self) -> &str {
        "Skybox Pass"
    }

    /// Pinned to the far plane, so it only fills pixels nothing else covered
    pub fn state() -> RenderState {
        RenderState::opaque()
            .with_depth(Some(CompareFunction::LessEqual), false)
            .with_cull_mode(CullMode::None)
    }

    /// Draw the sky into the bound target
    pub fn draw_skybox(&self, backend: &mut dyn GraphicsBackend, frame: &FrameScene, skybox: &Skybox) {
        debug!("{}: sky", self.name());
        let mut pass = RenderStateGuard::new(backend, Self::state());
        pass.bind_shader(self.skybox_shader);
        set_camera_uniforms(&mut *pass, &frame.camera);
        pass.bind_texture(units::ENVIRONMENT, Some(TextureSource::Texture(skybox.texture)));
        pass.draw_mesh(self.cube);
    }

    /// Forward-render both environment queues, reflecting the skybox when one is set
    pub fn draw_environment_items(
        &self,
        backend: &mut dyn GraphicsBackend,
        frame: &FrameScene,
        skybox: Option<&Skybox>,
        shadows: &ShadowMaps,
    ) {
        if frame.enviro_static.is_empty() && frame.enviro_dynamic.is_empty() {
            return;
        }
        debug!(
            "{}: {} environment-mapped items",
            self.name(),
            frame.enviro_static.len() + frame.enviro_dynamic.len()
        );
        let mut pass = RenderStateGuard::new(backend, RenderState::opaque());
        pass.bind_shader(self.environment_shader);
        set_camera_uniforms(&mut *pass, &frame.camera);
        pass.set_uniform("ambient_color", frame.ambient.into());
        pass.set_uniform("has_skybox", skybox.is_some().into());
        pass.bind_texture(units::ENVIRONMENT, skybox.map(|s| TextureSource::Texture(s.texture)));

        let light = frame.first_directional();
        pass.set_uniform("has_light", light.is_some().into());
        if let Some(light) = light {
            set_light_uniforms(&mut *pass, light, glam::Mat4::IDENTITY);
        }
        shadows.bind_sentinels(&mut *pass);

        for item in frame.environment_items() {
            draw_item(&mut *pass, item);
        }
    }

    pub fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_mesh(self.cube);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        AddressMode, ClearValues, DepthFormat, FilterMode, ReadbackSource, SoftwareBackend,
        TargetShape, TextureDescriptor, TextureFormat, TextureHandle,
    };
    use crate::pipeline::ShadowConfig;
    use crate::render_target::RenderTarget;
    use crate::scene::{Camera, Transform};
    use glam::{Vec3, Vec4};

    fn frame() -> FrameScene {
        let camera = Camera::perspective(60.0, 0.1, 50.0);
        let transform = Transform::looking_at(Vec3::new(0.0, 0.0, 4.0), Vec3::ZERO, Vec3::Y);
        FrameScene {
            camera: camera.view(&transform),
            ambient: Vec3::splat(0.05),
            lights: Vec::new(),
            opaque: Vec::new(),
            alpha: Vec::new(),
            enviro_static: Vec::new(),
            enviro_dynamic: Vec::new(),
        }
    }

    fn solid_sky(backend: &mut SoftwareBackend, color: Vec4) -> TextureHandle {
        let desc = TextureDescriptor {
            label: "sky".to_string(),
            width: 1,
            height: 1,
            format: TextureFormat::Rgba16Float,
            shape: TargetShape::Cube,
            filter: FilterMode::Nearest,
            address_mode: AddressMode::ClampToEdge,
        };
        let data: Vec<f32> = (0..6).flat_map(|_| color.to_array()).collect();
        backend.create_texture(&desc, &data).unwrap()
    }

    #[test]
    fn test_sky_respects_scene_depth() {
        let mut backend = SoftwareBackend::new(8, 8);
        let target = RenderTarget::create(
            &mut backend,
            "main",
            8,
            8,
            Some(TextureFormat::Rgba16Float),
            DepthFormat::Depth24Stencil8,
            TargetShape::Flat,
            false,
        )
        .unwrap();
        let sky = Skybox::new(solid_sky(&mut backend, Vec4::new(0.2, 0.4, 0.8, 1.0)));
        let pass = SkyboxPass::new(&mut backend).unwrap();
        let read = |backend: &mut SoftwareBackend| {
            backend
                .read_pixels(ReadbackSource::Color {
                    target: target.handle(),
                    attachment: 0,
                    layer: 0,
                })
                .unwrap()
        };

        // Empty depth: the sky shows everywhere
        target.bind(&mut backend);
        backend.clear(ClearValues::all(Vec4::ZERO));
        pass.draw_skybox(&mut backend, &frame(), &sky);
        assert!((read(&mut backend).center().truncate() - Vec3::new(0.2, 0.4, 0.8)).length() < 1e-2);
        assert_eq!(backend.render_state(), RenderState::default());

        // Depth written by nearer geometry hides it
        backend.clear(ClearValues {
            color: Some(Vec4::ZERO),
            depth: Some(0.5),
            stencil: None,
        });
        pass.draw_skybox(&mut backend, &frame(), &sky);
        assert_eq!(read(&mut backend).center(), Vec4::ZERO);
    }

    #[test]
    fn test_no_environment_items_draws_nothing() {
        let mut backend = SoftwareBackend::new(8, 8);
        let shadows = ShadowMaps::new(&mut backend, ShadowConfig::default()).unwrap();
        let pass = SkyboxPass::new(&mut backend).unwrap();
        let before = backend.statistics().draw_calls;
        pass.draw_environment_items(&mut backend, &frame(), None, &shadows);
        assert_eq!(backend.statistics().draw_calls, before);
    }
}
