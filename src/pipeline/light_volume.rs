//! Light volume culling
//!
//! Deferred point and spot lights are shaded by drawing a bounding mesh sized to
//! the light's range instead of a full-screen triangle. [`VolumeCulling`]
//! restricts that draw to pixels whose scene depth lies inside the volume.

use glam::{Mat4, Quat, Vec3};
use log::trace;

use crate::backend::{
    BlendState, ClearValues, ColorWrites, CompareFunction, CullMode, GraphicsBackend, MeshHandle,
    RenderState, RenderStateGuard, ShaderHandle, StencilFaceState, StencilOperation, StencilState,
};
use crate::pipeline::extract::{LightKind, LightView};
use crate::scene::{spot_half_angle, CameraView};
use crate::shaders;

/// Bounding mesh of one light, already placed in the world
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightVolume {
    pub mesh: MeshHandle,
    pub model: Mat4,
}

impl LightVolume {
    /// Unit sphere scaled by the light range, or a unit cone (apex at the
    /// origin, opening along -Z) stretched to the range and the cone radius.
    ///
    /// # Panics
    /// For directional lights, which have no volume.
    pub fn for_light(light: &LightView, sphere: MeshHandle, cone: MeshHandle) -> Self {
        match light.kind {
            LightKind::Point => Self {
                mesh: sphere,
                model: Mat4::from_scale_rotation_translation(
                    Vec3::splat(light.range),
                    Quat::IDENTITY,
                    light.position,
                ),
            },
            LightKind::Spot => {
                let radius = light.range * spot_half_angle(light.cutoff).tan();
                let rotation = Quat::from_rotation_arc(Vec3::NEG_Z, light.direction.normalize_or_zero());
                Self {
                    mesh: cone,
                    model: Mat4::from_scale_rotation_translation(
                        Vec3::new(radius, radius, light.range),
                        rotation,
                        light.position,
                    ),
                }
            }
            LightKind::Directional => panic!("directional lights have no light volume"),
        }
    }
}

/// Strategy for shading only the pixels a light volume encloses
pub trait VolumeCulling {
    fn name(&self) -> &'static str;

    /// Shade `volume` with `light_shader`, whose parameters are already set.
    /// The main target is bound and holds the scene depth.
    fn shade(
        &self,
        backend: &mut dyn GraphicsBackend,
        camera: &CameraView,
        volume: &LightVolume,
        light_shader: ShaderHandle,
    );
}

/// Two sub-passes: mark enclosed pixels in the stencil buffer, then shade where
/// the stencil is non-zero
pub struct StencilVolumeCulling {
    stencil_shader: ShaderHandle,
}

impl StencilVolumeCulling {
    pub fn new(stencil_shader: ShaderHandle) -> Self {
        Self { stencil_shader }
    }

    /// Depth-fail marking: back faces behind the scene increment, front faces
    /// behind the scene decrement, so only enclosed pixels end non-zero
    pub fn marking_state() -> RenderState {
        let face = |depth_fail_op| StencilFaceState {
            compare: CompareFunction::Always,
            fail_op: StencilOperation::Keep,
            depth_fail_op,
            pass_op: StencilOperation::Keep,
        };
        RenderState::opaque()
            .with_depth(Some(CompareFunction::Less), false)
            .with_cull_mode(CullMode::None)
            .with_color_writes(ColorWrites::NONE)
            .with_stencil(Some(StencilState {
                front: face(StencilOperation::DecrementWrap),
                back: face(StencilOperation::IncrementWrap),
                ..Default::default()
            }))
    }

    pub fn shading_state() -> RenderState {
        let face = StencilFaceState {
            compare: CompareFunction::NotEqual,
            ..Default::default()
        };
        RenderState::opaque()
            .with_depth(None, false)
            .with_cull_mode(CullMode::Front)
            .with_blend(Some(BlendState::additive()))
            .with_stencil(Some(StencilState {
                front: face,
                back: face,
                reference: 0,
                ..Default::default()
            }))
    }
}

impl VolumeCulling for StencilVolumeCulling {
    fn name(&self) -> &'static str {
        "stencil"
    }

    fn shade(
        &self,
        backend: &mut dyn GraphicsBackend,
        camera: &CameraView,
        volume: &LightVolume,
        light_shader: ShaderHandle,
    ) {
        backend.clear(ClearValues::stencil_only());
        {
            let mut pass = RenderStateGuard::new(backend, Self::marking_state());
            pass.bind_shader(self.stencil_shader);
            super::set_camera_uniforms(&mut *pass, camera);
            shaders::update_global_uniforms(&mut *pass, volume.model);
            pass.draw_mesh(volume.mesh);
        }
        let mut pass = RenderStateGuard::new(backend, Self::shading_state());
        pass.bind_shader(light_shader);
        pass.draw_mesh(volume.mesh);
        trace!("stencil volume shaded");
    }
}

/// Single pass over the volume's back faces where they lie behind the scene.
/// Used when the target has no stencil; pixels in front of the volume are not
/// rejected.
#[derive(Debug, Default)]
pub struct DepthVolumeCulling;

impl DepthVolumeCulling {
    pub fn state() -> RenderState {
        RenderState::opaque()
            .with_depth(Some(CompareFunction::GreaterEqual), false)
            .with_cull_mode(CullMode::Front)
            .with_blend(Some(BlendState::additive()))
    }
}

impl VolumeCulling for DepthVolumeCulling {
    fn name(&self) -> &'static str {
        "depth"
    }

    fn shade(
        &self,
        backend: &mut dyn GraphicsBackend,
        _camera: &CameraView,
        volume: &LightVolume,
        light_shader: ShaderHandle,
    ) {
        let mut pass = RenderStateGuard::new(backend, Self::state());
        pass.bind_shader(light_shader);
        pass.draw_mesh(volume.mesh);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extract::LightKind;
    use crate::scene::Attenuation;
    use bevy_ecs::entity::Entity;

    fn light(kind: LightKind, direction: Vec3) -> LightView {
        LightView {
            entity: Entity::from_raw(0),
            kind,
            color: Vec3::ONE,
            intensity: 1.0,
            position: Vec3::new(1.0, 2.0, 3.0),
            direction,
            attenuation: Attenuation::default(),
            cutoff: 45f32.to_radians().cos(),
            range: 10.0,
            half_size: 0.0,
            casts_shadows: false,
        }
    }

    #[test]
    fn test_sphere_volume_scaled_by_range() {
        let v = LightVolume::for_light(&light(LightKind::Point, Vec3::NEG_Z), MeshHandle(1), MeshHandle(2));
        assert_eq!(v.mesh, MeshHandle(1));
        let edge = v.model.transform_point3(Vec3::X);
        assert!((edge - Vec3::new(11.0, 2.0, 3.0)).length() < 1e-4);
    }

    #[test]
    fn test_cone_volume_points_along_light() {
        let spot = light(LightKind::Spot, Vec3::X);
        let v = LightVolume::for_light(&spot, MeshHandle(1), MeshHandle(2));
        assert_eq!(v.mesh, MeshHandle(2));
        let base_center = v.model.transform_point3(Vec3::NEG_Z);
        assert!((base_center - (spot.position + Vec3::X * 10.0)).length() < 1e-3);
        // 45 degree half-angle: base radius equals the range
        let rim = v.model.transform_point3(Vec3::new(1.0, 0.0, -1.0));
        assert!(((rim - base_center).length() - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_wide_cone_volume_stays_bounded() {
        let mut spot = light(LightKind::Spot, Vec3::NEG_Z);
        for degrees in [89.0f32, 90.0, 135.0, 180.0] {
            spot.cutoff = degrees.to_radians().cos();
            let v = LightVolume::for_light(&spot, MeshHandle(1), MeshHandle(2));
            let rim = v.model.transform_point3(Vec3::new(1.0, 0.0, -1.0));
            let base_center = v.model.transform_point3(Vec3::NEG_Z);
            let radius = (rim - base_center).length();
            assert!(radius.is_finite() && radius > 0.0, "{degrees} degrees gives radius {radius}");
            assert!(base_center.z < spot.position.z, "{degrees} degrees flips the cone");
        }
    }

    #[test]
    #[should_panic(expected = "no light volume")]
    fn test_directional_has_no_volume() {
        LightVolume::for_light(&light(LightKind::Directional, Vec3::NEG_Y), MeshHandle(1), MeshHandle(2));
    }

    #[test]
    fn test_stencil_states() {
        let mark = StencilVolumeCulling::marking_state();
        assert_eq!(mark.color_writes, ColorWrites::NONE);
        assert!(!mark.depth_write);
        let stencil = mark.stencil.unwrap();
        assert_eq!(stencil.back.depth_fail_op, StencilOperation::IncrementWrap);
        assert_eq!(stencil.front.depth_fail_op, StencilOperation::DecrementWrap);

        let shade = StencilVolumeCulling::shading_state();
        assert_eq!(shade.depth_test, None);
        assert_eq!(shade.cull_mode, CullMode::Front);
        assert_eq!(shade.stencil.unwrap().front.compare, CompareFunction::NotEqual);
    }

    #[test]
    fn test_depth_culling_shades_back_faces_behind_geometry() {
        let state = DepthVolumeCulling::state();
        assert_eq!(state.depth_test, Some(CompareFunction::GreaterEqual));
        assert!(!state.depth_write);
        assert_eq!(state.cull_mode, CullMode::Front);
        assert!(state.stencil.is_none());
        assert_eq!(state.blend, Some(BlendState::additive()));
    }
}
