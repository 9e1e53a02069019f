//! Lighting pass
//!
//! Accumulates light into the main target, one light at a time. Each light gets
//! its shadow pass immediately before its lighting draw, so only one shadow map
//! per category is needed.
//!
//! Deferred: a full-screen ambient pass scaled by occlusion, then per light a
//! full-screen draw (directional) or a culled light-volume draw (point, spot)
//! reading the G-buffer.
//!
//! Forward: an ambient pass that also lays down depth, then per light the opaque
//! queue re-rendered with additive blending against that depth.

use glam::{Mat4, Vec4};
use log::{debug, trace};

use crate::backend::{
    BlendState, CompareFunction, CullMode, GraphicsBackend, MeshHandle, PolygonMode, RenderState,
    RenderStateGuard, ShaderHandle,
};
use crate::error::RenderResult;
use crate::pipeline::extract::{FrameScene, LightKind, LightView};
use crate::pipeline::light_volume::{
    DepthVolumeCulling, LightVolume, StencilVolumeCulling, VolumeCulling,
};
use crate::pipeline::shadow::{ShadowMaps, ShadowProjections};
use crate::pipeline::{draw_item, set_camera_uniforms, ShadowConfig};
use crate::render_target::RenderTarget;
use crate::resources::Mesh;
use crate::shaders::{self, names, units};

const SPHERE_SEGMENTS: u32 = 16;
const SPHERE_RINGS: u32 = 12;
const CONE_SEGMENTS: u32 = 24;
/// Radius at which the tessellated sphere encloses the unit sphere
const SPHERE_RADIUS: f32 = 1.05;

/// One program per light kind
#[derive(Debug, Clone, Copy)]
struct PerKind {
    directional: ShaderHandle,
    point: ShaderHandle,
    spot: ShaderHandle,
}

impl PerKind {
    fn get(&self, kind: LightKind) -> ShaderHandle {
        match kind {
            LightKind::Directional => self.directional,
            LightKind::Point => self.point,
            LightKind::Spot => self.spot,
        }
    }
}

/// Upload a light's parameters to the bound program
pub(crate) fn set_light_uniforms(backend: &mut dyn GraphicsBackend, light: &LightView, light_space: Mat4) {
    backend.set_uniform("light_color", light.color.into());
    backend.set_uniform("light_intensity", light.intensity.into());
    backend.set_uniform("light_position", light.position.into());
    backend.set_uniform("light_direction", light.direction.into());
    let a = light.attenuation;
    backend.set_uniform("attenuation", glam::Vec3::new(a.constant, a.linear, a.quadratic).into());
    backend.set_uniform("cutoff", light.cutoff.into());
    backend.set_uniform("far_plane", light.range.into());
    backend.set_uniform("light_space", light_space.into());
}

pub struct LightingPass {
    shadows: ShadowMaps,
    sphere: MeshHandle,
    cone: MeshHandle,
    stencil_culling: StencilVolumeCulling,
    depth_culling: DepthVolumeCulling,
    deferred_ambient: ShaderHandle,
    deferred: PerKind,
    forward_ambient: ShaderHandle,
    forward: PerKind,
    debug_volume: ShaderHandle,
}

impl LightingPass {
    pub fn new(backend: &mut dyn GraphicsBackend, shadow_config: ShadowConfig) -> RenderResult<Self> {
        let shadows = ShadowMaps::new(backend, shadow_config)?;
        let sphere = backend.create_mesh(&Mesh::sphere(SPHERE_RADIUS, SPHERE_SEGMENTS, SPHERE_RINGS))?;
        let cone = backend.create_mesh(&Mesh::cone(CONE_SEGMENTS))?;
        let stencil_culling = StencilVolumeCulling::new(backend.create_shader(names::STENCIL_PASS)?);
        let deferred = PerKind {
            directional: backend.create_shader(names::DEFERRED_DIRECTIONAL)?,
            point: backend.create_shader(names::DEFERRED_POINT)?,
            spot: backend.create_shader(names::DEFERRED_SPOT)?,
        };
        let forward = PerKind {
            directional: backend.create_shader(names::FORWARD_DIRECTIONAL)?,
            point: backend.create_shader(names::FORWARD_POINT)?,
            spot: backend.create_shader(names::FORWARD_SPOT)?,
        };
        Ok(Self {
            shadows,
            sphere,
            cone,
            stencil_culling,
            depth_culling: DepthVolumeCulling,
            deferred_ambient: backend.create_shader(names::DEFERRED_AMBIENT)?,
            deferred,
            forward_ambient: backend.create_shader(names::FORWARD_AMBIENT)?,
            forward,
            debug_volume: backend.create_shader(names::DEBUG_VOLUME)?,
        })
    }

    pub fn name(&self) -> &str {
        "Lighting Pass"
    }

    pub fn shadow_maps(&self) -> &ShadowMaps {
        &self.shadows
    }

    /// Stencil culling when the target carries a stencil buffer, depth-only otherwise
    pub fn culling_for(&self, target: &RenderTarget) -> &dyn VolumeCulling {
        if target.has_stencil() {
            &self.stencil_culling
        } else {
            &self.depth_culling
        }
    }

    fn shadow_pass(
        &self,
        backend: &mut dyn GraphicsBackend,
        frame: &FrameScene,
        light: &LightView,
        projections: &mut ShadowProjections,
    ) -> Mat4 {
        if !light.casts_shadows {
            return Mat4::IDENTITY;
        }
        let light_space = self.shadows.render(backend, light, frame.shadow_casters());
        projections.push((light.entity, light_space));
        light_space
    }

    /// Deferred lighting into `main`, which must already hold the G-buffer depth
    pub fn execute_deferred(
        &self,
        backend: &mut dyn GraphicsBackend,
        frame: &FrameScene,
        gbuffer: &RenderTarget,
        occlusion: Option<&RenderTarget>,
        main: &RenderTarget,
        debug_volumes: bool,
    ) -> ShadowProjections {
        let mut projections = ShadowProjections::new();
        let culling = self.culling_for(main);
        debug!(
            "{}: deferred, {} lights, {} culling",
            self.name(),
            frame.lights.len(),
            culling.name()
        );

        main.bind(backend);
        {
            let state = RenderState::fullscreen().with_blend(Some(BlendState::additive()));
            let mut pass = RenderStateGuard::new(backend, state);
            pass.bind_shader(self.deferred_ambient);
            pass.set_uniform("ambient_color", frame.ambient.into());
            pass.set_uniform("ssao_enabled", occlusion.is_some().into());
            gbuffer.bind_texture(&mut *pass, units::POSITION, 0);
            gbuffer.bind_texture(&mut *pass, units::ALBEDO, 2);
            match occlusion {
                Some(ao) => ao.bind_texture(&mut *pass, units::OCCLUSION, 0),
                None => pass.bind_texture(units::OCCLUSION, None),
            }
            pass.draw_fullscreen();
        }

        for light in &frame.lights {
            let light_space = self.shadow_pass(backend, frame, light, &mut projections);
            main.bind(backend);

            let shader = self.deferred.get(light.kind);
            backend.bind_shader(shader);
            set_camera_uniforms(backend, &frame.camera);
            set_light_uniforms(backend, light, light_space);
            self.shadows.bind(backend, light.kind, light.casts_shadows);
            gbuffer.bind_texture(backend, units::POSITION, 0);
            gbuffer.bind_texture(backend, units::NORMAL, 1);
            gbuffer.bind_texture(backend, units::ALBEDO, 2);

            match light.kind {
                LightKind::Directional => {
                    let state = RenderState::fullscreen().with_blend(Some(BlendState::additive()));
                    let mut pass = RenderStateGuard::new(backend, state);
                    pass.draw_fullscreen();
                }
                LightKind::Point | LightKind::Spot => {
                    let volume = LightVolume::for_light(light, self.sphere, self.cone);
                    shaders::update_global_uniforms(backend, volume.model);
                    culling.shade(backend, &frame.camera, &volume, shader);
                    if debug_volumes {
                        self.draw_debug_volume(backend, frame, light, &volume);
                    }
                }
            }
            trace!("{:?} light shaded (shadows: {})", light.kind, light.casts_shadows);
        }
        projections
    }

    /// Forward lighting of the opaque queue into `main`, which the caller cleared
    pub fn execute_forward(
        &self,
        backend: &mut dyn GraphicsBackend,
        frame: &FrameScene,
        main: &RenderTarget,
        debug_volumes: bool,
    ) -> ShadowProjections {
        let mut projections = ShadowProjections::new();
        debug!("{}: forward, {} lights", self.name(), frame.lights.len());

        main.bind(backend);
        {
            let mut pass = RenderStateGuard::new(backend, RenderState::opaque());
            pass.bind_shader(self.forward_ambient);
            set_camera_uniforms(&mut *pass, &frame.camera);
            pass.set_uniform("ambient_color", frame.ambient.into());
            for item in &frame.opaque {
                draw_item(&mut *pass, item);
            }
        }

        let additive = RenderState::opaque()
            .with_depth(Some(CompareFunction::LessEqual), false)
            .with_blend(Some(BlendState::additive()));
        for light in &frame.lights {
            let light_space = self.shadow_pass(backend, frame, light, &mut projections);
            main.bind(backend);

            let mut pass = RenderStateGuard::new(backend, additive);
            pass.bind_shader(self.forward.get(light.kind));
            set_camera_uniforms(&mut *pass, &frame.camera);
            set_light_uniforms(&mut *pass, light, light_space);
            self.shadows.bind(&mut *pass, light.kind, light.casts_shadows);
            for item in &frame.opaque {
                draw_item(&mut *pass, item);
            }
            drop(pass);

            if debug_volumes && light.kind != LightKind::Directional {
                let volume = LightVolume::for_light(light, self.sphere, self.cone);
                self.draw_debug_volume(backend, frame, light, &volume);
            }
        }
        projections
    }

    /// Wireframe outline of a light volume, tinted by light kind
    fn draw_debug_volume(
        &self,
        backend: &mut dyn GraphicsBackend,
        frame: &FrameScene,
        light: &LightView,
        volume: &LightVolume,
    ) {
        let color = match light.kind {
            LightKind::Spot => Vec4::new(0.0, 1.0, 1.0, 1.0),
            _ => Vec4::new(1.0, 1.0, 0.0, 1.0),
        };
        let state = RenderState::opaque()
            .with_depth(Some(CompareFunction::Less), false)
            .with_cull_mode(CullMode::None)
            .with_polygon_mode(PolygonMode::Line);
        let mut pass = RenderStateGuard::new(backend, state);
        pass.bind_shader(self.debug_volume);
        set_camera_uniforms(&mut *pass, &frame.camera);
        pass.set_uniform("color", color.into());
        shaders::update_global_uniforms(&mut *pass, volume.model);
        pass.draw_mesh(volume.mesh);
    }

    pub fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        self.shadows.release(backend);
        backend.destroy_mesh(self.sphere);
        backend.destroy_mesh(self.cone);
    }
}
