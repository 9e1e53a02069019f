//! Transparency pass
//!
//! Alpha-queue items are drawn last, back to front, blended over the lit scene.
//! They test against the scene depth but never write it.

use glam::{Mat4, Vec3};
use log::debug;

use crate::backend::{
    BlendState, CompareFunction, CullMode, GraphicsBackend, RenderState, RenderStateGuard,
    ShaderHandle,
};
use crate::error::RenderResult;
use crate::pipeline::extract::{DrawItem, FrameScene};
use crate::pipeline::lighting_pass::set_light_uniforms;
use crate::pipeline::shadow::ShadowMaps;
use crate::pipeline::{draw_item, set_camera_uniforms};
use crate::shaders::names;

/// Stable sort by descending distance from `camera_position`
pub fn sort_alpha(items: &mut [DrawItem], camera_position: Vec3) {
    items.sort_by(|a, b| {
        let da = a.position().distance_squared(camera_position);
        let db = b.position().distance_squared(camera_position);
        db.total_cmp(&da)
    });
}

pub struct TransparencyPass {
    shader: ShaderHandle,
}

impl TransparencyPass {
    pub fn new(backend: &mut dyn GraphicsBackend) -> RenderResult<Self> {
        Ok(Self {
            shader: backend.create_shader(names::TRANSPARENT)?,
        })
    }

    pub fn name(&self) -> &str {
        "Transparency Pass"
    }

    pub fn shader(&self) -> ShaderHandle {
        self.shader
    }

    pub fn state() -> RenderState {
        RenderState::opaque()
            .with_depth(Some(CompareFunction::Less), false)
            .with_cull_mode(CullMode::None)
            .with_blend(Some(BlendState::alpha_blending()))
    }

    /// Sort the frame's alpha queue and draw it with the pass shader
    pub fn execute(&self, backend: &mut dyn GraphicsBackend, frame: &mut FrameScene, shadows: &ShadowMaps) {
        if frame.alpha.is_empty() {
            return;
        }
        sort_alpha(&mut frame.alpha, frame.camera.position);
        self.render_alpha(backend, self.shader, frame, shadows);
    }

    /// Draw the alpha queue in its current order with `shader`, lit by the
    /// ambient term and the first directional light
    pub fn render_alpha(
        &self,
        backend: &mut dyn GraphicsBackend,
        shader: ShaderHandle,
        frame: &FrameScene,
        shadows: &ShadowMaps,
    ) {
        debug!("{}: {} items", self.name(), frame.alpha.len());
        let mut pass = RenderStateGuard::new(backend, Self::state());
        pass.bind_shader(shader);
        set_camera_uniforms(&mut *pass, &frame.camera);
        pass.set_uniform("ambient_color", frame.ambient.into());
        let light = frame.first_directional();
        pass.set_uniform("has_light", light.is_some().into());
        if let Some(light) = light {
            set_light_uniforms(&mut *pass, light, Mat4::IDENTITY);
        }
        shadows.bind_sentinels(&mut *pass);

        for item in &frame.alpha {
            draw_item(&mut *pass, item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ClearValues, DepthFormat, MeshHandle, ReadbackSource, SoftwareBackend, TargetShape, TextureFormat};
    use crate::pipeline::ShadowConfig;
    use crate::render_target::RenderTarget;
    use crate::resources::{Material, Mesh};
    use crate::scene::{Camera, Transform};
    use bevy_ecs::entity::Entity;
    use glam::Vec4;

    fn item(index: u32, position: Vec3) -> DrawItem {
        DrawItem {
            entity: Entity::from_raw(index),
            mesh: MeshHandle(0),
            material: Material::glass(Vec3::ONE, 0.5),
            model: Mat4::from_translation(position),
        }
    }

    #[test]
    fn test_sort_is_back_to_front() {
        let camera = Vec3::new(0.0, 0.0, 10.0);
        let mut items = vec![
            item(0, Vec3::new(0.0, 0.0, 5.0)),
            item(1, Vec3::new(0.0, 0.0, -20.0)),
            item(2, Vec3::new(3.0, 0.0, 0.0)),
        ];
        sort_alpha(&mut items, camera);
        let distances: Vec<f32> = items.iter().map(|i| i.position().distance(camera)).collect();
        assert!(distances.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(items[0].entity, Entity::from_raw(1));
    }

    #[test]
    fn test_sort_keeps_ties_in_order() {
        let camera = Vec3::ZERO;
        let mut items = vec![
            item(0, Vec3::X),
            item(1, Vec3::Y),
            item(2, Vec3::Z * 4.0),
            item(3, Vec3::NEG_X),
        ];
        sort_alpha(&mut items, camera);
        let order: Vec<u32> = items.iter().map(|i| i.entity.index()).collect();
        assert_eq!(order, vec![2, 0, 1, 3]);
    }

    #[test]
    fn test_half_transparent_blends_over_background() {
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
        let shadows = ShadowMaps::new(&mut backend, ShadowConfig::default()).unwrap();
        let pass = TransparencyPass::new(&mut backend).unwrap();
        let cube = backend.create_mesh(&Mesh::cube()).unwrap();

        let camera = Camera::perspective(60.0, 0.1, 50.0);
        let transform = Transform::looking_at(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y);
        let mut frame = FrameScene {
            camera: camera.view(&transform),
            ambient: Vec3::ONE,
            lights: Vec::new(),
            opaque: Vec::new(),
            alpha: vec![DrawItem {
                entity: Entity::from_raw(0),
                mesh: cube,
                material: Material::glass(Vec3::new(1.0, 0.0, 0.0), 0.5),
                model: Mat4::IDENTITY,
            }],
            enviro_static: Vec::new(),
            enviro_dynamic: Vec::new(),
        };

        target.bind(&mut backend);
        backend.clear(ClearValues::all(Vec4::new(0.0, 0.0, 1.0, 1.0)));
        pass.execute(&mut backend, &mut frame, &shadows);

        let color = backend
            .read_pixels(ReadbackSource::Color {
                target: target.handle(),
                attachment: 0,
                layer: 0,
            })
            .unwrap()
            .center();
        // Two overlapping faces at half opacity: red 0.5 then 0.75, blue 0.5 then 0.25
        assert!((color.x - 0.75).abs() < 1e-2, "{color}");
        assert!((color.z - 0.25).abs() < 1e-2, "{color}");
        let depth = backend
            .read_pixels(ReadbackSource::Depth {
                target: target.handle(),
                layer: 0,
            })
            .unwrap();
        assert_eq!(depth.center().x, 1.0);
    }
}
