//! Shadow map generation
//!
//! One depth-only target per light category: a 2D map for directional lights, a
//! 2D map for spot lights and a cube map for point lights. Targets are sized from
//! [`ShadowConfig`] and live across frames and window resizes. Point lights store
//! `distance / far` instead of projected depth so the lookup only needs the
//! fragment-to-light vector.

use bevy_ecs::entity::Entity;
use glam::{Mat4, Vec2, Vec3, Vec4};
use log::debug;

use crate::backend::{
    ClearValues, CubeFace, CullMode, DepthFormat, FilterMode, FrontFace, GraphicsBackend,
    RenderState, RenderStateGuard, ShaderHandle, TargetShape, TextureDescriptor, TextureFormat,
    TextureHandle, TextureSource,
};
use crate::error::RenderResult;
use crate::pipeline::extract::{DrawItem, LightKind, LightView};
use crate::pipeline::{draw_geometry, ShadowConfig};
use crate::render_target::RenderTarget;
use crate::scene::spot_half_angle;
use crate::shaders::{names, units};

/// Look-at target and up vector per cube face, in layer order
const CUBE_FACE_BASIS: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Y),
    (Vec3::NEG_X, Vec3::NEG_Y),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::NEG_Z),
    (Vec3::Z, Vec3::NEG_Y),
    (Vec3::NEG_Z, Vec3::NEG_Y),
];

/// Up vector for a view along `direction` that is never parallel to it
fn stable_up(direction: Vec3) -> Vec3 {
    if direction.cross(Vec3::Y).length_squared() < 1e-6 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

/// Orthographic light-space matrix of a directional light, centred on the origin
pub fn directional_light_space(direction: Vec3, half_size: f32) -> Mat4 {
    let direction = direction.normalize_or_zero();
    let distance = half_size * 2.0;
    let eye = -direction * distance;
    let view = Mat4::look_at_rh(eye, Vec3::ZERO, stable_up(direction));
    let projection =
        Mat4::orthographic_rh(-half_size, half_size, -half_size, half_size, 0.1, distance * 2.0);
    projection * view
}

/// Perspective light-space matrix of a spot light covering its whole cone
pub fn spot_light_space(position: Vec3, direction: Vec3, cutoff: f32, near: f32, range: f32) -> Mat4 {
    let direction = direction.normalize_or_zero();
    let fov = (2.0 * spot_half_angle(cutoff)).max(1e-3);
    let view = Mat4::look_at_rh(position, position + direction, stable_up(direction));
    let projection = Mat4::perspective_rh(fov, 1.0, near, range.max(near * 2.0));
    projection * view
}

/// View-projection per cube face, in [`CubeFace::ALL`] order.
///
/// The y axis is mirrored so that a face rendered into a y-down target matches
/// [`CubeFace::direction`]. Mirroring reverses winding, so faces are drawn with
/// [`FrontFace::Cw`].
pub fn cube_face_matrices(position: Vec3, near: f32, far: f32) -> [Mat4; 6] {
    let projection = Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0))
        * Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, near, far);
    CUBE_FACE_BASIS.map(|(target, up)| projection * Mat4::look_at_rh(position, position + target, up))
}

fn depth_target(
    backend: &mut dyn GraphicsBackend,
    label: &str,
    size: u32,
    shape: TargetShape,
) -> RenderResult<RenderTarget> {
    RenderTarget::create(backend, label, size, size, None, DepthFormat::Depth32, shape, false)
}

/// Depth-only shadow targets plus the "no shadow" sentinels bound in their place
pub struct ShadowMaps {
    config: ShadowConfig,
    directional: RenderTarget,
    spot: RenderTarget,
    point: RenderTarget,
    sentinel_2d: TextureHandle,
    sentinel_cube: TextureHandle,
    depth_shader: ShaderHandle,
    cube_shader: ShaderHandle,
}

impl ShadowMaps {
    pub fn new(backend: &mut dyn GraphicsBackend, config: ShadowConfig) -> RenderResult<Self> {
        let directional = depth_target(
            backend,
            "shadow_directional",
            config.directional_size,
            TargetShape::Flat,
        )?;
        let spot = depth_target(backend, "shadow_spot", config.spot_size, TargetShape::Flat)?;
        let point = depth_target(backend, "shadow_point", config.point_size, TargetShape::Cube)?;

        let sentinel = |shape: TargetShape| TextureDescriptor {
            label: "shadow_sentinel".to_string(),
            format: TextureFormat::Depth32Float,
            shape,
            filter: FilterMode::Nearest,
            ..Default::default()
        };
        let sentinel_2d = backend.create_texture(&sentinel(TargetShape::Flat), &[1.0])?;
        let sentinel_cube = backend.create_texture(&sentinel(TargetShape::Cube), &[1.0; 6])?;

        debug!(
            "Shadow maps: directional {}, spot {}, point {}",
            config.directional_size, config.spot_size, config.point_size
        );
        Ok(Self {
            config,
            directional,
            spot,
            point,
            sentinel_2d,
            sentinel_cube,
            depth_shader: backend.create_shader(names::SHADOW_DEPTH)?,
            cube_shader: backend.create_shader(names::SHADOW_CUBE)?,
        })
    }

    pub fn config(&self) -> &ShadowConfig {
        &self.config
    }

    pub fn target(&self, kind: LightKind) -> &RenderTarget {
        match kind {
            LightKind::Directional => &self.directional,
            LightKind::Spot => &self.spot,
            LightKind::Point => &self.point,
        }
    }

    /// Render `light`'s shadow map and return the light-space matrix of 2D maps
    /// (identity for point lights). Leaves the shadow target bound.
    pub fn render<'a>(
        &self,
        backend: &mut dyn GraphicsBackend,
        light: &LightView,
        casters: impl Iterator<Item = &'a DrawItem>,
    ) -> Mat4 {
        match light.kind {
            LightKind::Point => {
                let near_far = Vec2::new(self.config.near, light.range.max(self.config.near * 2.0));
                self.render_to_cube_shadow_map(backend, light.position, near_far, casters);
                Mat4::IDENTITY
            }
            LightKind::Directional | LightKind::Spot => {
                let light_space = match light.kind {
                    LightKind::Directional => directional_light_space(light.direction, light.half_size),
                    _ => spot_light_space(
                        light.position,
                        light.direction,
                        light.cutoff,
                        self.config.near,
                        light.range,
                    ),
                };
                let target = self.target(light.kind);
                target.bind(backend);
                backend.clear(ClearValues::depth_only());

                let state = RenderState::opaque().with_cull_mode(CullMode::Front);
                let mut pass = RenderStateGuard::new(backend, state);
                pass.bind_shader(self.depth_shader);
                pass.set_uniform("light_space", light_space.into());
                for item in casters {
                    draw_geometry(&mut *pass, item);
                }
                light_space
            }
        }
    }

    /// Fill the point-light cube map, one face at a time. Each face stores the
    /// fragment's distance to `light_position` divided by `near_far.y`.
    pub fn render_to_cube_shadow_map<'a>(
        &self,
        backend: &mut dyn GraphicsBackend,
        light_position: Vec3,
        near_far: Vec2,
        casters: impl Iterator<Item = &'a DrawItem>,
    ) {
        let casters: Vec<&DrawItem> = casters.collect();
        let matrices = cube_face_matrices(light_position, near_far.x, near_far.y);
        let state = RenderState::opaque()
            .with_cull_mode(CullMode::Front)
            .with_front_face(FrontFace::Cw);
        let mut pass = RenderStateGuard::new(backend, state);
        pass.bind_shader(self.cube_shader);
        pass.set_uniform("light_position", light_position.into());
        pass.set_uniform("far_plane", near_far.y.into());
        for (face, matrix) in CubeFace::ALL.into_iter().zip(matrices) {
            self.point.bind_face(&mut *pass, face);
            pass.clear(ClearValues::depth_only());
            pass.set_uniform("light_space", matrix.into());
            for item in &casters {
                draw_geometry(&mut *pass, item);
            }
        }
    }

    /// Bind the shadow map of `kind`, or the sentinels when the light casts none.
    /// Also uploads `shadows_enabled` and the bias.
    pub fn bind(&self, backend: &mut dyn GraphicsBackend, kind: LightKind, enabled: bool) {
        let (map, cube) = if enabled {
            match kind {
                LightKind::Point => (
                    TextureSource::Texture(self.sentinel_2d),
                    TextureSource::Depth(self.point.handle()),
                ),
                _ => (
                    TextureSource::Depth(self.target(kind).handle()),
                    TextureSource::Texture(self.sentinel_cube),
                ),
            }
        } else {
            (
                TextureSource::Texture(self.sentinel_2d),
                TextureSource::Texture(self.sentinel_cube),
            )
        };
        backend.bind_texture(units::SHADOW_MAP, Some(map));
        backend.bind_texture(units::SHADOW_CUBE, Some(cube));
        backend.set_uniform("shadows_enabled", enabled.into());
        backend.set_uniform("shadow_bias", self.config.bias.into());
    }

    /// Bind only the sentinels, for programs that declare shadow slots but never shadow
    pub fn bind_sentinels(&self, backend: &mut dyn GraphicsBackend) {
        backend.bind_texture(units::SHADOW_MAP, Some(TextureSource::Texture(self.sentinel_2d)));
        backend.bind_texture(units::SHADOW_CUBE, Some(TextureSource::Texture(self.sentinel_cube)));
        backend.set_uniform("shadows_enabled", false.into());
    }

    pub fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        self.directional.release(backend);
        self.spot.release(backend);
        self.point.release(backend);
        backend.destroy_texture(self.sentinel_2d);
        backend.destroy_texture(self.sentinel_cube);
    }
}

/// Map a world point through a light-space matrix into shadow-map uv and depth
pub fn project_to_shadow_map(light_space: Mat4, world: Vec3) -> Vec3 {
    let clip: Vec4 = light_space * world.extend(1.0);
    let ndc = clip.truncate() / clip.w;
    Vec3::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5, ndc.z)
}

/// Light-space matrices to write back after the shadow passes of a frame
pub type ShadowProjections = Vec<(Entity, Mat4)>;
