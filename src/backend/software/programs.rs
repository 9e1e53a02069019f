//! CPU implementations of the built-in programs
//!
//! Each program mirrors the WGSL program of the same name in [`crate::shaders`]:
//! same parameter names, same texture units, same math.

use std::collections::HashMap;

use glam::{IVec2, Mat3, Mat4, UVec2, Vec2, Vec3, Vec4, Vec4Swizzles};

use super::texels::BoundTexture;
use crate::backend::types::{UniformValue, Vertex};
use crate::shaders::{names, units, LUMA, SHININESS};

/// Interpolated vertex outputs
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Varyings {
    pub world_position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub extra: Vec4,
}

impl std::ops::Add for Varyings {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            world_position: self.world_position + rhs.world_position,
            normal: self.normal + rhs.normal,
            uv: self.uv + rhs.uv,
            extra: self.extra + rhs.extra,
        }
    }
}

impl std::ops::Mul<f32> for Varyings {
    type Output = Self;
    fn mul(self, s: f32) -> Self {
        Self {
            world_position: self.world_position * s,
            normal: self.normal * s,
            uv: self.uv * s,
            extra: self.extra * s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexOut {
    pub clip: Vec4,
    pub varyings: Varyings,
}

impl VertexOut {
    /// Clip position equal to the vertex position, used by full-screen triangles
    pub fn passthrough(vertex: &Vertex) -> Self {
        Self {
            clip: vertex.position.extend(1.0),
            varyings: Varyings {
                uv: vertex.uv,
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Fragment {
    /// Pixel center in target coordinates
    pub coord: Vec2,
    pub depth: f32,
    pub front_facing: bool,
    pub varyings: Varyings,
}

impl Fragment {
    pub fn pixel(&self) -> IVec2 {
        self.coord.floor().as_ivec2()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FragmentOut {
    pub colors: [Vec4; 4],
    pub depth: Option<f32>,
    pub discard: bool,
}

impl FragmentOut {
    pub fn color(color: Vec4) -> Self {
        Self::targets([color, Vec4::ZERO, Vec4::ZERO, Vec4::ZERO])
    }

    pub fn targets(colors: [Vec4; 4]) -> Self {
        Self {
            colors,
            depth: None,
            discard: false,
        }
    }

    pub fn empty() -> Self {
        Self::color(Vec4::ZERO)
    }
}

/// Parameters and textures visible to a program during one draw
pub struct ShaderContext<'a> {
    pub uniforms: &'a HashMap<String, UniformValue>,
    pub textures: &'a [Option<BoundTexture<'a>>],
    pub subroutine: Option<&'a str>,
}

impl ShaderContext<'_> {
    pub fn float(&self, name: &str) -> f32 {
        self.uniforms.get(name).map_or(0.0, UniformValue::as_float)
    }

    pub fn int(&self, name: &str) -> i32 {
        self.uniforms.get(name).map_or(0, UniformValue::as_int)
    }

    pub fn flag(&self, name: &str) -> bool {
        self.int(name) != 0
    }

    pub fn vec2(&self, name: &str) -> Vec2 {
        self.uniforms.get(name).map_or(Vec2::ZERO, UniformValue::as_vec2)
    }

    pub fn vec3(&self, name: &str) -> Vec3 {
        self.uniforms.get(name).map_or(Vec3::ZERO, UniformValue::as_vec3)
    }

    pub fn vec4(&self, name: &str) -> Vec4 {
        self.uniforms.get(name).map_or(Vec4::ZERO, UniformValue::as_vec4)
    }

    pub fn mat4(&self, name: &str) -> Mat4 {
        self.uniforms.get(name).map_or(Mat4::IDENTITY, UniformValue::as_mat4)
    }

    pub fn vec4_array(&self, name: &str) -> &[Vec4] {
        match self.uniforms.get(name) {
            Some(UniformValue::Vec4Array(values)) => values,
            _ => &[],
        }
    }

    fn texture(&self, unit: u32) -> Option<&BoundTexture<'_>> {
        self.textures.get(unit as usize).and_then(Option::as_ref)
    }

    pub fn sample(&self, unit: u32, uv: Vec2) -> Vec4 {
        self.texture(unit).map_or(Vec4::W, |t| t.sample(uv))
    }

    pub fn sample_cube(&self, unit: u32, dir: Vec3) -> Vec4 {
        self.texture(unit).map_or(Vec4::W, |t| t.sample_cube(dir))
    }

    pub fn load(&self, unit: u32, pixel: IVec2) -> Vec4 {
        self.texture(unit).map_or(Vec4::W, |t| t.load(pixel, 0))
    }

    pub fn texture_size(&self, unit: u32) -> UVec2 {
        self.texture(unit).map_or(UVec2::ONE, BoundTexture::size)
    }
}

/// A program the software rasterizer can execute
pub trait SoftwareProgram: Send + Sync {
    fn name(&self) -> &'static str;

    /// Programs that output depth are shaded before the depth test
    fn writes_depth(&self) -> bool {
        false
    }

    fn vertex(&self, _ctx: &ShaderContext, vertex: &Vertex) -> VertexOut {
        VertexOut::passthrough(vertex)
    }

    fn fragment(&self, ctx: &ShaderContext, fragment: &Fragment) -> FragmentOut;
}

/// Look up a built-in program
pub fn builtin(name: &str) -> Option<Box<dyn SoftwareProgram>> {
    let program: Box<dyn SoftwareProgram> = match name {
        names::GBUFFER => Box::new(GBuffer),
        names::SHADOW_DEPTH => Box::new(ShadowDepth),
        names::SHADOW_CUBE => Box::new(ShadowCube),
        names::STENCIL_PASS => Box::new(StencilPass),
        names::DEFERRED_AMBIENT => Box::new(DeferredAmbient),
        names::DEFERRED_DIRECTIONAL => Box::new(Deferred(LightKind::Directional)),
        names::DEFERRED_POINT => Box::new(Deferred(LightKind::Point)),
        names::DEFERRED_SPOT => Box::new(Deferred(LightKind::Spot)),
        names::FORWARD_AMBIENT => Box::new(ForwardAmbient),
        names::FORWARD_DIRECTIONAL => Box::new(Forward(LightKind::Directional)),
        names::FORWARD_POINT => Box::new(Forward(LightKind::Point)),
        names::FORWARD_SPOT => Box::new(Forward(LightKind::Spot)),
        names::TRANSPARENT => Box::new(Transparent),
        names::SKYBOX => Box::new(Skybox),
        names::ENVIRONMENT_MAP => Box::new(EnvironmentMap),
        names::SSAO => Box::new(Ssao),
        names::SSAO_BLUR => Box::new(SsaoBlur),
        names::POSTPROCESS => Box::new(Postprocess),
        names::TONEMAP => Box::new(Tonemap),
        names::FXAA => Box::new(Fxaa),
        names::DEBUG_VOLUME => Box::new(DebugVolume),
        names::DEBUG_GBUFFER => Box::new(DebugGBuffer),
        _ => return None,
    };
    Some(program)
}

// Shared vertex stage: model -> world -> clip with world-space normal

fn transform_vertex(ctx: &ShaderContext, vertex: &Vertex) -> VertexOut {
    let world = ctx.mat4("model") * vertex.position.extend(1.0);
    let normal = (ctx.mat4("normal_matrix") * vertex.normal.extend(0.0)).xyz();
    VertexOut {
        clip: ctx.mat4("projection") * ctx.mat4("view") * world,
        varyings: Varyings {
            world_position: world.xyz(),
            normal: normal.normalize_or_zero(),
            uv: vertex.uv,
            extra: Vec4::ZERO,
        },
    }
}

fn material_albedo(ctx: &ShaderContext, uv: Vec2) -> Vec4 {
    let albedo = ctx.vec4("albedo");
    if ctx.flag("has_diffuse_map") {
        albedo * ctx.sample(units::DIFFUSE, uv)
    } else {
        albedo
    }
}

// Lighting math shared by deferred and forward programs

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LightKind {
    Directional,
    Point,
    Spot,
}

fn blinn_phong(n: Vec3, l: Vec3, v: Vec3, albedo: Vec3, specular: f32, radiance: Vec3) -> Vec3 {
    let diffuse = n.dot(l).max(0.0);
    if diffuse <= 0.0 {
        return Vec3::ZERO;
    }
    let h = (l + v).normalize_or_zero();
    let highlight = n.dot(h).max(0.0).powf(SHININESS) * specular;
    (albedo * diffuse + Vec3::splat(highlight)) * radiance
}

fn attenuate(coefficients: Vec3, distance: f32) -> f32 {
    let denom = coefficients.x + coefficients.y * distance + coefficients.z * distance * distance;
    if denom > 0.0 {
        1.0 / denom
    } else {
        1.0
    }
}

fn spot_factor(to_fragment: Vec3, direction: Vec3, cutoff: f32) -> f32 {
    let theta = to_fragment.normalize_or_zero().dot(direction.normalize_or_zero());
    if theta <= cutoff {
        0.0
    } else {
        1.0 - (1.0 - theta) / (1.0 - cutoff).max(1e-4)
    }
}

fn shadow_2d(ctx: &ShaderContext, world: Vec3) -> f32 {
    let clip = ctx.mat4("light_space") * world.extend(1.0);
    if clip.w <= 0.0 {
        return 0.0;
    }
    let ndc = clip.xyz() / clip.w;
    let uv = Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
    if uv.x < 0.0 || uv.x > 1.0 || uv.y < 0.0 || uv.y > 1.0 || ndc.z > 1.0 {
        return 0.0;
    }
    let closest = ctx.sample(units::SHADOW_MAP, uv).x;
    if ndc.z - ctx.float("shadow_bias") > closest {
        1.0
    } else {
        0.0
    }
}

fn shadow_cube(ctx: &ShaderContext, world: Vec3) -> f32 {
    let to_fragment = world - ctx.vec3("light_position");
    let current = to_fragment.length() / ctx.float("far_plane").max(1e-4);
    let closest = ctx.sample_cube(units::SHADOW_CUBE, to_fragment).x;
    if current - ctx.float("shadow_bias") > closest {
        1.0
    } else {
        0.0
    }
}

fn shade_light(
    ctx: &ShaderContext,
    kind: LightKind,
    position: Vec3,
    normal: Vec3,
    albedo: Vec3,
    specular: f32,
) -> Vec3 {
    let radiance = ctx.vec3("light_color") * ctx.float("light_intensity");
    let view_dir = (ctx.vec3("camera_position") - position).normalize_or_zero();
    let shadows = ctx.flag("shadows_enabled");

    match kind {
        LightKind::Directional => {
            let l = -ctx.vec3("light_direction").normalize_or_zero();
            let shadow = if shadows { shadow_2d(ctx, position) } else { 0.0 };
            blinn_phong(normal, l, view_dir, albedo, specular, radiance) * (1.0 - shadow)
        }
        LightKind::Point | LightKind::Spot => {
            let to_light = ctx.vec3("light_position") - position;
            let distance = to_light.length();
            let l = to_light / distance.max(1e-6);
            let mut factor = attenuate(ctx.vec3("attenuation"), distance);
            let shadow = if kind == LightKind::Spot {
                factor *= spot_factor(-to_light, ctx.vec3("light_direction"), ctx.float("cutoff"));
                if shadows {
                    shadow_2d(ctx, position)
                } else {
                    0.0
                }
            } else if shadows {
                shadow_cube(ctx, position)
            } else {
                0.0
            };
            blinn_phong(normal, l, view_dir, albedo, specular, radiance) * factor * (1.0 - shadow)
        }
    }
}

// Programs

struct GBuffer;

impl SoftwareProgram for GBuffer {
    fn name(&self) -> &'static str {
        names::GBUFFER
    }

    fn vertex(&self, ctx: &ShaderContext, vertex: &Vertex) -> VertexOut {
        transform_vertex(ctx, vertex)
    }

    fn fragment(&self, ctx: &ShaderContext, f: &Fragment) -> FragmentOut {
        let albedo = material_albedo(ctx, f.varyings.uv);
        FragmentOut::targets([
            f.varyings.world_position.extend(1.0),
            f.varyings.normal.normalize_or_zero().extend(0.0),
            albedo.xyz().extend(ctx.float("specular")),
            Vec4::ZERO,
        ])
    }
}

struct ShadowDepth;

impl SoftwareProgram for ShadowDepth {
    fn name(&self) -> &'static str {
        names::SHADOW_DEPTH
    }

    fn vertex(&self, ctx: &ShaderContext, vertex: &Vertex) -> VertexOut {
        let world = ctx.mat4("model") * vertex.position.extend(1.0);
        VertexOut {
            clip: ctx.mat4("light_space") * world,
            varyings: Varyings::default(),
        }
    }

    fn fragment(&self, _ctx: &ShaderContext, _f: &Fragment) -> FragmentOut {
        FragmentOut::empty()
    }
}

struct ShadowCube;

impl SoftwareProgram for ShadowCube {
    fn name(&self) -> &'static str {
        names::SHADOW_CUBE
    }

    fn writes_depth(&self) -> bool {
        true
    }

    fn vertex(&self, ctx: &ShaderContext, vertex: &Vertex) -> VertexOut {
        let world = ctx.mat4("model") * vertex.position.extend(1.0);
        VertexOut {
            clip: ctx.mat4("light_space") * world,
            varyings: Varyings {
                world_position: world.xyz(),
                ..Default::default()
            },
        }
    }

    fn fragment(&self, ctx: &ShaderContext, f: &Fragment) -> FragmentOut {
        let distance = (f.varyings.world_position - ctx.vec3("light_position")).length();
        let mut out = FragmentOut::empty();
        out.depth = Some((distance / ctx.float("far_plane").max(1e-4)).clamp(0.0, 1.0));
        out
    }
}

struct StencilPass;

impl SoftwareProgram for StencilPass {
    fn name(&self) -> &'static str {
        names::STENCIL_PASS
    }

    fn vertex(&self, ctx: &ShaderContext, vertex: &Vertex) -> VertexOut {
        transform_vertex(ctx, vertex)
    }

    fn fragment(&self, _ctx: &ShaderContext, _f: &Fragment) -> FragmentOut {
        FragmentOut::empty()
    }
}

struct DeferredAmbient;

impl SoftwareProgram for DeferredAmbient {
    fn name(&self) -> &'static str {
        names::DEFERRED_AMBIENT
    }

    fn fragment(&self, ctx: &ShaderContext, f: &Fragment) -> FragmentOut {
        let pixel = f.pixel();
        if ctx.load(units::POSITION, pixel).w == 0.0 {
            return FragmentOut::empty();
        }
        let albedo = ctx.load(units::ALBEDO, pixel).xyz();
        let occlusion = if ctx.flag("ssao_enabled") {
            ctx.load(units::OCCLUSION, pixel).x
        } else {
            1.0
        };
        FragmentOut::color((ctx.vec3("ambient_color") * albedo * occlusion).extend(1.0))
    }
}

/// Deferred light: full-screen for directional, light volume for point and spot
struct Deferred(LightKind);

impl SoftwareProgram for Deferred {
    fn name(&self) -> &'static str {
        match self.0 {
            LightKind::Directional => names::DEFERRED_DIRECTIONAL,
            LightKind::Point => names::DEFERRED_POINT,
            LightKind::Spot => names::DEFERRED_SPOT,
        }
    }

    fn vertex(&self, ctx: &ShaderContext, vertex: &Vertex) -> VertexOut {
        match self.0 {
            LightKind::Directional => VertexOut::passthrough(vertex),
            _ => transform_vertex(ctx, vertex),
        }
    }

    fn fragment(&self, ctx: &ShaderContext, f: &Fragment) -> FragmentOut {
        let pixel = f.pixel();
        let position = ctx.load(units::POSITION, pixel);
        if position.w == 0.0 {
            return FragmentOut::empty();
        }
        let normal = ctx.load(units::NORMAL, pixel).xyz().normalize_or_zero();
        let albedo_spec = ctx.load(units::ALBEDO, pixel);
        let color = shade_light(
            ctx,
            self.0,
            position.xyz(),
            normal,
            albedo_spec.xyz(),
            albedo_spec.w,
        );
        FragmentOut::color(color.extend(1.0))
    }
}

struct ForwardAmbient;

impl SoftwareProgram for ForwardAmbient {
    fn name(&self) -> &'static str {
        names::FORWARD_AMBIENT
    }

    fn vertex(&self, ctx: &ShaderContext, vertex: &Vertex) -> VertexOut {
        transform_vertex(ctx, vertex)
    }

    fn fragment(&self, ctx: &ShaderContext, f: &Fragment) -> FragmentOut {
        let albedo = material_albedo(ctx, f.varyings.uv);
        FragmentOut::color((ctx.vec3("ambient_color") * albedo.xyz()).extend(1.0))
    }
}

struct Forward(LightKind);

impl SoftwareProgram for Forward {
    fn name(&self) -> &'static str {
        match self.0 {
            LightKind::Directional => names::FORWARD_DIRECTIONAL,
            LightKind::Point => names::FORWARD_POINT,
            LightKind::Spot => names::FORWARD_SPOT,
        }
    }

    fn vertex(&self, ctx: &ShaderContext, vertex: &Vertex) -> VertexOut {
        transform_vertex(ctx, vertex)
    }

    fn fragment(&self, ctx: &ShaderContext, f: &Fragment) -> FragmentOut {
        let albedo = material_albedo(ctx, f.varyings.uv);
        let color = shade_light(
            ctx,
            self.0,
            f.varyings.world_position,
            f.varyings.normal.normalize_or_zero(),
            albedo.xyz(),
            ctx.float("specular"),
        );
        FragmentOut::color(color.extend(1.0))
    }
}

struct Transparent;

impl SoftwareProgram for Transparent {
    fn name(&self) -> &'static str {
        names::TRANSPARENT
    }

    fn vertex(&self, ctx: &ShaderContext, vertex: &Vertex) -> VertexOut {
        transform_vertex(ctx, vertex)
    }

    fn fragment(&self, ctx: &ShaderContext, f: &Fragment) -> FragmentOut {
        let albedo = material_albedo(ctx, f.varyings.uv);
        let mut normal = f.varyings.normal.normalize_or_zero();
        if !f.front_facing {
            normal = -normal;
        }
        let mut color = ctx.vec3("ambient_color") * albedo.xyz();
        if ctx.flag("has_light") {
            color += shade_light(
                ctx,
                LightKind::Directional,
                f.varyings.world_position,
                normal,
                albedo.xyz(),
                ctx.float("specular"),
            );
        }
        FragmentOut::color(color.extend(albedo.w))
    }
}

/// Rotation-only view so the sky stays centred on the camera
fn sky_clip(ctx: &ShaderContext, position: Vec3) -> Vec4 {
    let view = Mat4::from_mat3(Mat3::from_mat4(ctx.mat4("view")));
    let clip = ctx.mat4("projection") * view * position.extend(1.0);
    // Pin to the far plane
    Vec4::new(clip.x, clip.y, clip.w, clip.w)
}

struct Skybox;

impl SoftwareProgram for Skybox {
    fn name(&self) -> &'static str {
        names::SKYBOX
    }

    fn vertex(&self, ctx: &ShaderContext, vertex: &Vertex) -> VertexOut {
        VertexOut {
            clip: sky_clip(ctx, vertex.position),
            varyings: Varyings {
                world_position: vertex.position,
                ..Default::default()
            },
        }
    }

    fn fragment(&self, ctx: &ShaderContext, f: &Fragment) -> FragmentOut {
        let color = ctx.sample_cube(units::ENVIRONMENT, f.varyings.world_position);
        FragmentOut::color(color.xyz().extend(1.0))
    }
}

struct EnvironmentMap;

impl SoftwareProgram for EnvironmentMap {
    fn name(&self) -> &'static str {
        names::ENVIRONMENT_MAP
    }

    fn vertex(&self, ctx: &ShaderContext, vertex: &Vertex) -> VertexOut {
        transform_vertex(ctx, vertex)
    }

    fn fragment(&self, ctx: &ShaderContext, f: &Fragment) -> FragmentOut {
        let albedo = material_albedo(ctx, f.varyings.uv).xyz();
        let normal = f.varyings.normal.normalize_or_zero();
        let position = f.varyings.world_position;
        let incident = (position - ctx.vec3("camera_position")).normalize_or_zero();
        let reflected = incident - 2.0 * normal.dot(incident) * normal;

        let environment = if ctx.flag("has_skybox") {
            ctx.sample_cube(units::ENVIRONMENT, reflected).xyz()
        } else {
            ctx.vec3("ambient_color")
        };
        let mut lit = ctx.vec3("ambient_color") * albedo;
        if ctx.flag("has_light") {
            lit += shade_light(
                ctx,
                LightKind::Directional,
                position,
                normal,
                albedo,
                ctx.float("specular"),
            );
        }
        let color = lit.lerp(environment, ctx.float("reflectivity"));
        FragmentOut::color(color.extend(1.0))
    }
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

struct Ssao;

impl SoftwareProgram for Ssao {
    fn name(&self) -> &'static str {
        names::SSAO
    }

    fn fragment(&self, ctx: &ShaderContext, f: &Fragment) -> FragmentOut {
        let pixel = f.pixel();
        let position = ctx.load(units::POSITION, pixel);
        if position.w == 0.0 {
            return FragmentOut::color(Vec4::ONE);
        }
        let view = ctx.mat4("view");
        let projection = ctx.mat4("projection");
        let frag = (view * position.xyz().extend(1.0)).xyz();
        let normal = (view * ctx.load(units::NORMAL, pixel).xyz().extend(0.0))
            .xyz()
            .normalize_or_zero();

        let size = ctx.texture_size(units::POSITION).as_vec2();
        let screen_uv = f.coord / size;
        let random = ctx
            .sample(units::NOISE, screen_uv * ctx.vec2("noise_scale"))
            .xyz();
        let tangent = (random - normal * random.dot(normal)).normalize_or_zero();
        let bitangent = normal.cross(tangent);
        let tbn = Mat3::from_cols(tangent, bitangent, normal);

        let radius = ctx.float("radius");
        let bias = ctx.float("bias");
        let samples = ctx.vec4_array("samples");
        let kernel_size = (ctx.int("kernel_size").max(0) as usize).min(samples.len());
        if kernel_size == 0 {
            return FragmentOut::color(Vec4::ONE);
        }

        let mut occlusion = 0.0;
        for sample in &samples[..kernel_size] {
            let sample_pos = frag + tbn * sample.xyz() * radius;
            let offset = projection * sample_pos.extend(1.0);
            if offset.w <= 0.0 {
                continue;
            }
            let ndc = offset.xy() / offset.w;
            let uv = Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
            let occluder = ctx.load(units::POSITION, (uv * size).floor().as_ivec2());
            if occluder.w == 0.0 {
                continue;
            }
            let sample_depth = (view * occluder.xyz().extend(1.0)).z;
            let range = smoothstep(0.0, 1.0, radius / (frag.z - sample_depth).abs().max(1e-4));
            if sample_depth >= sample_pos.z + bias {
                occlusion += range;
            }
        }

        let ao = (1.0 - occlusion / kernel_size as f32).max(0.0).powf(ctx.float("power"));
        FragmentOut::color(Vec4::new(ao, ao, ao, 1.0))
    }
}

struct SsaoBlur;

impl SoftwareProgram for SsaoBlur {
    fn name(&self) -> &'static str {
        names::SSAO_BLUR
    }

    fn fragment(&self, ctx: &ShaderContext, f: &Fragment) -> FragmentOut {
        let pixel = f.pixel();
        let mut sum = 0.0;
        for y in -2..2 {
            for x in -2..2 {
                sum += ctx.load(units::SOURCE, pixel + IVec2::new(x, y)).x;
            }
        }
        let ao = sum / 16.0;
        FragmentOut::color(Vec4::new(ao, ao, ao, 1.0))
    }
}

const GAUSSIAN_WEIGHTS: [f32; 5] = [0.227027, 0.1945946, 0.1216216, 0.054054, 0.016216];

struct Postprocess;

impl Postprocess {
    fn blur(ctx: &ShaderContext, uv: Vec2, axis: Vec2) -> Vec4 {
        let step = ctx.vec2("texel_size") * axis;
        let mut color = ctx.sample(units::SOURCE, uv).xyz() * GAUSSIAN_WEIGHTS[0];
        for (i, weight) in GAUSSIAN_WEIGHTS.iter().enumerate().skip(1) {
            let offset = step * i as f32;
            color += ctx.sample(units::SOURCE, uv + offset).xyz() * *weight;
            color += ctx.sample(units::SOURCE, uv - offset).xyz() * *weight;
        }
        color.extend(1.0)
    }
}

impl SoftwareProgram for Postprocess {
    fn name(&self) -> &'static str {
        names::POSTPROCESS
    }

    fn fragment(&self, ctx: &ShaderContext, f: &Fragment) -> FragmentOut {
        let uv = f.varyings.uv;
        let color = match ctx.subroutine {
            Some(names::BLUR_GAUSSIAN_HORIZONTAL) => Self::blur(ctx, uv, Vec2::X),
            Some(names::BLUR_GAUSSIAN_VERTICAL) => Self::blur(ctx, uv, Vec2::Y),
            // extractBrightness, also the default selection
            _ => {
                let color = ctx.sample(units::SOURCE, uv).xyz();
                if color.dot(LUMA) > ctx.float("threshold") {
                    color.extend(1.0)
                } else {
                    Vec4::W
                }
            }
        };
        FragmentOut::color(color)
    }
}

fn aces(x: Vec3) -> Vec3 {
    let (a, b, c, d, e) = (2.51, 0.03, 2.43, 0.59, 0.14);
    ((x * (a * x + b)) / (x * (c * x + d) + e)).clamp(Vec3::ZERO, Vec3::ONE)
}

struct Tonemap;

impl SoftwareProgram for Tonemap {
    fn name(&self) -> &'static str {
        names::TONEMAP
    }

    fn fragment(&self, ctx: &ShaderContext, f: &Fragment) -> FragmentOut {
        let uv = f.varyings.uv;
        let mut hdr = ctx.sample(units::SOURCE, uv).xyz();
        if ctx.flag("bloom_enabled") {
            hdr += ctx.sample(units::BLOOM, uv).xyz() * ctx.float("bloom_strength");
        }
        let x = (hdr * ctx.float("exposure")).max(Vec3::ZERO);
        let mapped = match ctx.int("tonemap_operator") {
            0 => x / (x + Vec3::ONE),
            1 => aces(x),
            _ => x.clamp(Vec3::ZERO, Vec3::ONE),
        };
        let inv_gamma = 1.0 / ctx.float("gamma").max(1e-4);
        let out = mapped.powf(inv_gamma);
        FragmentOut::color(out.extend(out.dot(LUMA)))
    }
}

const FXAA_REDUCE_MIN: f32 = 1.0 / 128.0;
const FXAA_REDUCE_MUL: f32 = 1.0 / 8.0;
const FXAA_SPAN_MAX: f32 = 8.0;

struct Fxaa;

impl SoftwareProgram for Fxaa {
    fn name(&self) -> &'static str {
        names::FXAA
    }

    fn fragment(&self, ctx: &ShaderContext, f: &Fragment) -> FragmentOut {
        let uv = f.varyings.uv;
        let center = ctx.sample(units::SOURCE, uv).xyz();
        if !ctx.flag("fxaa_enabled") {
            return FragmentOut::color(center.extend(1.0));
        }
        let texel = ctx.vec2("texel_size");
        let luma = |offset: Vec2| ctx.sample(units::SOURCE, uv + offset * texel).xyz().dot(LUMA);
        let luma_nw = luma(Vec2::new(-1.0, -1.0));
        let luma_ne = luma(Vec2::new(1.0, -1.0));
        let luma_sw = luma(Vec2::new(-1.0, 1.0));
        let luma_se = luma(Vec2::new(1.0, 1.0));
        let luma_m = center.dot(LUMA);
        let luma_min = luma_m.min(luma_nw.min(luma_ne).min(luma_sw.min(luma_se)));
        let luma_max = luma_m.max(luma_nw.max(luma_ne).max(luma_sw.max(luma_se)));

        let dir = Vec2::new(
            -((luma_nw + luma_ne) - (luma_sw + luma_se)),
            (luma_nw + luma_sw) - (luma_ne + luma_se),
        );
        let reduce =
            ((luma_nw + luma_ne + luma_sw + luma_se) * 0.25 * FXAA_REDUCE_MUL).max(FXAA_REDUCE_MIN);
        let rcp_min = 1.0 / (dir.x.abs().min(dir.y.abs()) + reduce);
        let dir = (dir * rcp_min).clamp(Vec2::splat(-FXAA_SPAN_MAX), Vec2::splat(FXAA_SPAN_MAX)) * texel;

        let sample = |t: f32| ctx.sample(units::SOURCE, uv + dir * t).xyz();
        let rgb_a = 0.5 * (sample(1.0 / 3.0 - 0.5) + sample(2.0 / 3.0 - 0.5));
        let rgb_b = rgb_a * 0.5 + 0.25 * (sample(-0.5) + sample(0.5));
        let luma_b = rgb_b.dot(LUMA);
        let color = if luma_b < luma_min || luma_b > luma_max {
            rgb_a
        } else {
            rgb_b
        };
        FragmentOut::color(color.extend(1.0))
    }
}

struct DebugVolume;

impl SoftwareProgram for DebugVolume {
    fn name(&self) -> &'static str {
        names::DEBUG_VOLUME
    }

    fn vertex(&self, ctx: &ShaderContext, vertex: &Vertex) -> VertexOut {
        transform_vertex(ctx, vertex)
    }

    fn fragment(&self, ctx: &ShaderContext, _f: &Fragment) -> FragmentOut {
        FragmentOut::color(ctx.vec4("color"))
    }
}

struct DebugGBuffer;

impl SoftwareProgram for DebugGBuffer {
    fn name(&self) -> &'static str {
        names::DEBUG_GBUFFER
    }

    fn fragment(&self, ctx: &ShaderContext, f: &Fragment) -> FragmentOut {
        let value = ctx.sample(units::SOURCE, f.varyings.uv);
        let color = match ctx.int("channel") {
            0 => (value.xyz() * 0.1 + Vec3::splat(0.5)) * value.w,
            1 => value.xyz() * 0.5 + Vec3::splat(0.5),
            2 => value.xyz(),
            _ => Vec3::splat(value.x),
        };
        FragmentOut::color(color.clamp(Vec3::ZERO, Vec3::ONE).extend(1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_program_name_resolves() {
        for name in names::ALL {
            let program = builtin(name).unwrap_or_else(|| panic!("missing program {name}"));
            assert_eq!(program.name(), *name);
        }
        assert!(builtin("NoSuchProgram").is_none());
    }

    #[test]
    fn test_spot_factor_edges() {
        let cutoff = 30f32.to_radians().cos();
        assert_eq!(spot_factor(Vec3::X, -Vec3::Z, cutoff), 0.0);
        assert!((spot_factor(-Vec3::Z, -Vec3::Z, cutoff) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_blinn_phong_facing_away_is_black() {
        let lit = blinn_phong(Vec3::Y, -Vec3::Y, Vec3::Y, Vec3::ONE, 1.0, Vec3::ONE);
        assert_eq!(lit, Vec3::ZERO);
    }

    #[test]
    fn test_aces_is_bounded() {
        let mapped = aces(Vec3::new(0.0, 1.0, 100.0));
        assert!(mapped.max_element() <= 1.0 && mapped.min_element() >= 0.0);
    }
}
