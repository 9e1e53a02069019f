//! Built-in programs
//!
//! Every program is known by name. The wgpu backend compiles the WGSL source
//! and packs named parameters into one uniform block per program using the
//! layout tables below; the software backend runs the CPU version of the same
//! program (see `backend::software::programs`).

mod scene;
mod screen;

use glam::{Mat4, Vec3};

use crate::backend::traits::GraphicsBackend;

/// Program names accepted by [`GraphicsBackend::create_shader`]
pub mod names {
    pub const GBUFFER: &str = "GBuffer";
    pub const SHADOW_DEPTH: &str = "ShadowDepth";
    pub const SHADOW_CUBE: &str = "ShadowCube";
    pub const STENCIL_PASS: &str = "StencilPass";
    pub const DEFERRED_AMBIENT: &str = "DeferredAmbient";
    pub const DEFERRED_DIRECTIONAL: &str = "DeferredDirectional";
    pub const DEFERRED_POINT: &str = "DeferredPoint";
    pub const DEFERRED_SPOT: &str = "DeferredSpot";
    pub const FORWARD_AMBIENT: &str = "ForwardAmbient";
    pub const FORWARD_DIRECTIONAL: &str = "ForwardDirectional";
    pub const FORWARD_POINT: &str = "ForwardPoint";
    pub const FORWARD_SPOT: &str = "ForwardSpot";
    pub const TRANSPARENT: &str = "Transparent";
    pub const SKYBOX: &str = "Skybox";
    pub const ENVIRONMENT_MAP: &str = "EnvironmentMap";
    pub const SSAO: &str = "SSAO";
    pub const SSAO_BLUR: &str = "SSAOBlur";
    pub const POSTPROCESS: &str = "Postprocess";
    pub const TONEMAP: &str = "Tonemap";
    pub const FXAA: &str = "FXAA";
    pub const DEBUG_VOLUME: &str = "DebugVolume";
    pub const DEBUG_GBUFFER: &str = "DebugGBuffer";

    /// Subroutines of [`POSTPROCESS`]
    pub const EXTRACT_BRIGHTNESS: &str = "extractBrightness";
    pub const BLUR_GAUSSIAN_HORIZONTAL: &str = "blurGaussianHorizontal";
    pub const BLUR_GAUSSIAN_VERTICAL: &str = "blurGaussianVertical";

    pub const ALL: &[&str] = &[
        GBUFFER,
        SHADOW_DEPTH,
        SHADOW_CUBE,
        STENCIL_PASS,
        DEFERRED_AMBIENT,
        DEFERRED_DIRECTIONAL,
        DEFERRED_POINT,
        DEFERRED_SPOT,
        FORWARD_AMBIENT,
        FORWARD_DIRECTIONAL,
        FORWARD_POINT,
        FORWARD_SPOT,
        TRANSPARENT,
        SKYBOX,
        ENVIRONMENT_MAP,
        SSAO,
        SSAO_BLUR,
        POSTPROCESS,
        TONEMAP,
        FXAA,
        DEBUG_VOLUME,
        DEBUG_GBUFFER,
    ];
}

/// Texture units. Scene programs and screen-space programs number their units
/// independently.
pub mod units {
    pub const POSITION: u32 = 0;
    pub const NORMAL: u32 = 1;
    pub const ALBEDO: u32 = 2;
    pub const OCCLUSION: u32 = 3;
    pub const SHADOW_MAP: u32 = 4;
    pub const SHADOW_CUBE: u32 = 5;
    pub const DIFFUSE: u32 = 6;
    pub const ENVIRONMENT: u32 = 7;

    pub const SOURCE: u32 = 0;
    pub const BLOOM: u32 = 1;
    pub const NOISE: u32 = 2;

    pub const COUNT: usize = 8;
}

/// Blinn-Phong specular exponent
pub const SHININESS: f32 = 32.0;

/// Rec. 709 luminance weights
pub const LUMA: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

/// Upper bound on SSAO kernel samples
pub const MAX_KERNEL_SIZE: usize = 64;

/// Shader-side type of a named parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    /// Also used for booleans
    Int,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
    Vec4Array(usize),
}

impl UniformKind {
    /// WGSL uniform address space alignment and size
    pub fn align_size(&self) -> (u32, u32) {
        match self {
            UniformKind::Float | UniformKind::Int => (4, 4),
            UniformKind::Vec2 => (8, 8),
            UniformKind::Vec3 => (16, 12),
            UniformKind::Vec4 => (16, 16),
            UniformKind::Mat4 => (16, 64),
            UniformKind::Vec4Array(n) => (16, 16 * *n as u32),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformField {
    pub name: &'static str,
    pub kind: UniformKind,
    pub offset: u32,
}

/// Byte layout of a program's uniform block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformLayout {
    pub fields: Vec<UniformField>,
    pub size: u32,
}

impl UniformLayout {
    pub fn new(fields: &[(&'static str, UniformKind)]) -> Self {
        let mut offset = 0u32;
        let mut struct_align = 4u32;
        let fields = fields
            .iter()
            .map(|(name, kind)| {
                let (align, size) = kind.align_size();
                struct_align = struct_align.max(align);
                offset = offset.next_multiple_of(align);
                let field = UniformField {
                    name,
                    kind: *kind,
                    offset,
                };
                offset += size;
                field
            })
            .collect();
        Self {
            fields,
            size: offset.next_multiple_of(struct_align),
        }
    }

    pub fn field(&self, name: &str) -> Option<&UniformField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Name of the hidden parameter that carries the selected subroutine index
pub const SUBROUTINE_UNIFORM: &str = "subroutine";

/// Fields of the uniform block shared by every scene program
pub const SCENE_UNIFORMS: &[(&str, UniformKind)] = &[
    ("model", UniformKind::Mat4),
    ("normal_matrix", UniformKind::Mat4),
    ("view", UniformKind::Mat4),
    ("projection", UniformKind::Mat4),
    ("light_space", UniformKind::Mat4),
    ("camera_position", UniformKind::Vec3),
    ("light_intensity", UniformKind::Float),
    ("light_position", UniformKind::Vec3),
    ("cutoff", UniformKind::Float),
    ("light_direction", UniformKind::Vec3),
    ("far_plane", UniformKind::Float),
    ("light_color", UniformKind::Vec3),
    ("shadow_bias", UniformKind::Float),
    ("attenuation", UniformKind::Vec3),
    ("shadows_enabled", UniformKind::Int),
    ("ambient_color", UniformKind::Vec3),
    ("specular", UniformKind::Float),
    ("albedo", UniformKind::Vec4),
    ("color", UniformKind::Vec4),
    ("has_diffuse_map", UniformKind::Int),
    ("reflectivity", UniformKind::Float),
    ("has_skybox", UniformKind::Int),
    ("has_light", UniformKind::Int),
    ("ssao_enabled", UniformKind::Int),
];

pub const SSAO_UNIFORMS: &[(&str, UniformKind)] = &[
    ("view", UniformKind::Mat4),
    ("projection", UniformKind::Mat4),
    ("samples", UniformKind::Vec4Array(MAX_KERNEL_SIZE)),
    ("noise_scale", UniformKind::Vec2),
    ("kernel_size", UniformKind::Int),
    ("radius", UniformKind::Float),
    ("bias", UniformKind::Float),
    ("power", UniformKind::Float),
];

pub const POST_UNIFORMS: &[(&str, UniformKind)] = &[
    ("texel_size", UniformKind::Vec2),
    ("threshold", UniformKind::Float),
    ("exposure", UniformKind::Float),
    ("gamma", UniformKind::Float),
    ("tonemap_operator", UniformKind::Int),
    ("bloom_enabled", UniformKind::Int),
    ("bloom_strength", UniformKind::Float),
    ("fxaa_enabled", UniformKind::Int),
    ("channel", UniformKind::Int),
    (SUBROUTINE_UNIFORM, UniformKind::Int),
];

/// How a texture unit is declared in WGSL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSlot {
    Float2d,
    FloatCube,
    Depth2d,
    DepthCube,
}

/// Where vertices come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexInput {
    /// Mesh vertex buffer in [`crate::backend::types::Vertex`] layout
    Mesh,
    /// Three vertices generated from the vertex index
    Fullscreen,
}

/// Static description of one built-in program
#[derive(Debug, Clone, Copy)]
pub struct ProgramInfo {
    pub name: &'static str,
    pub source: &'static str,
    pub vertex: VertexInput,
    pub uniforms: &'static [(&'static str, UniformKind)],
    pub textures: &'static [(u32, TextureSlot)],
    pub subroutines: &'static [&'static str],
    /// Number of `@location` outputs of the fragment stage
    pub color_outputs: usize,
    /// Fragment stage writes `@builtin(frag_depth)`
    pub writes_depth: bool,
}

impl ProgramInfo {
    pub fn uniform_layout(&self) -> UniformLayout {
        UniformLayout::new(self.uniforms)
    }

    /// WGSL binding index of a unit's texture; its sampler follows at `+ 1`
    pub fn texture_binding(unit: u32) -> u32 {
        unit * 2
    }
}

const GBUFFER_TEXTURES: &[(u32, TextureSlot)] = &[(units::DIFFUSE, TextureSlot::Float2d)];
const SHADOW_TEXTURES: &[(u32, TextureSlot)] = &[
    (units::SHADOW_MAP, TextureSlot::Depth2d),
    (units::SHADOW_CUBE, TextureSlot::DepthCube),
];
const DEFERRED_TEXTURES: &[(u32, TextureSlot)] = &[
    (units::POSITION, TextureSlot::Float2d),
    (units::NORMAL, TextureSlot::Float2d),
    (units::ALBEDO, TextureSlot::Float2d),
    (units::SHADOW_MAP, TextureSlot::Depth2d),
    (units::SHADOW_CUBE, TextureSlot::DepthCube),
];
const AMBIENT_TEXTURES: &[(u32, TextureSlot)] = &[
    (units::POSITION, TextureSlot::Float2d),
    (units::ALBEDO, TextureSlot::Float2d),
    (units::OCCLUSION, TextureSlot::Float2d),
];
const FORWARD_TEXTURES: &[(u32, TextureSlot)] = &[
    (units::SHADOW_MAP, TextureSlot::Depth2d),
    (units::SHADOW_CUBE, TextureSlot::DepthCube),
    (units::DIFFUSE, TextureSlot::Float2d),
];
const ENVIRONMENT_TEXTURES: &[(u32, TextureSlot)] = &[
    (units::SHADOW_MAP, TextureSlot::Depth2d),
    (units::SHADOW_CUBE, TextureSlot::DepthCube),
    (units::DIFFUSE, TextureSlot::Float2d),
    (units::ENVIRONMENT, TextureSlot::FloatCube),
];
const SKYBOX_TEXTURES: &[(u32, TextureSlot)] = &[(units::ENVIRONMENT, TextureSlot::FloatCube)];
const SSAO_TEXTURES: &[(u32, TextureSlot)] = &[
    (units::POSITION, TextureSlot::Float2d),
    (units::NORMAL, TextureSlot::Float2d),
    (units::NOISE, TextureSlot::Float2d),
];
const SOURCE_TEXTURES: &[(u32, TextureSlot)] = &[(units::SOURCE, TextureSlot::Float2d)];
const TONEMAP_TEXTURES: &[(u32, TextureSlot)] = &[
    (units::SOURCE, TextureSlot::Float2d),
    (units::BLOOM, TextureSlot::Float2d),
];

const POSTPROCESS_SUBROUTINES: &[&str] = &[
    names::EXTRACT_BRIGHTNESS,
    names::BLUR_GAUSSIAN_HORIZONTAL,
    names::BLUR_GAUSSIAN_VERTICAL,
];

const fn scene_program(
    name: &'static str,
    source: &'static str,
    vertex: VertexInput,
    textures: &'static [(u32, TextureSlot)],
    color_outputs: usize,
) -> ProgramInfo {
    ProgramInfo {
        name,
        source,
        vertex,
        uniforms: SCENE_UNIFORMS,
        textures,
        subroutines: &[],
        color_outputs,
        writes_depth: false,
    }
}

const fn screen_program(
    name: &'static str,
    source: &'static str,
    textures: &'static [(u32, TextureSlot)],
) -> ProgramInfo {
    ProgramInfo {
        name,
        source,
        vertex: VertexInput::Fullscreen,
        uniforms: POST_UNIFORMS,
        textures,
        subroutines: &[],
        color_outputs: 1,
        writes_depth: false,
    }
}

/// Every built-in program
pub const PROGRAMS: &[ProgramInfo] = &[
    scene_program(names::GBUFFER, scene::GBUFFER, VertexInput::Mesh, GBUFFER_TEXTURES, 3),
    scene_program(names::SHADOW_DEPTH, scene::SHADOW_DEPTH, VertexInput::Mesh, &[], 0),
    ProgramInfo {
        writes_depth: true,
        ..scene_program(names::SHADOW_CUBE, scene::SHADOW_CUBE, VertexInput::Mesh, &[], 0)
    },
    scene_program(names::STENCIL_PASS, scene::STENCIL_PASS, VertexInput::Mesh, &[], 1),
    scene_program(
        names::DEFERRED_AMBIENT,
        scene::DEFERRED_AMBIENT,
        VertexInput::Fullscreen,
        AMBIENT_TEXTURES,
        1,
    ),
    scene_program(
        names::DEFERRED_DIRECTIONAL,
        scene::DEFERRED_DIRECTIONAL,
        VertexInput::Fullscreen,
        DEFERRED_TEXTURES,
        1,
    ),
    scene_program(names::DEFERRED_POINT, scene::DEFERRED_POINT, VertexInput::Mesh, DEFERRED_TEXTURES, 1),
    scene_program(names::DEFERRED_SPOT, scene::DEFERRED_SPOT, VertexInput::Mesh, DEFERRED_TEXTURES, 1),
    scene_program(names::FORWARD_AMBIENT, scene::FORWARD_AMBIENT, VertexInput::Mesh, GBUFFER_TEXTURES, 1),
    scene_program(
        names::FORWARD_DIRECTIONAL,
        scene::FORWARD_DIRECTIONAL,
        VertexInput::Mesh,
        FORWARD_TEXTURES,
        1,
    ),
    scene_program(names::FORWARD_POINT, scene::FORWARD_POINT, VertexInput::Mesh, FORWARD_TEXTURES, 1),
    scene_program(names::FORWARD_SPOT, scene::FORWARD_SPOT, VertexInput::Mesh, FORWARD_TEXTURES, 1),
    scene_program(names::TRANSPARENT, scene::TRANSPARENT, VertexInput::Mesh, FORWARD_TEXTURES, 1),
    scene_program(names::SKYBOX, scene::SKYBOX, VertexInput::Mesh, SKYBOX_TEXTURES, 1),
    scene_program(
        names::ENVIRONMENT_MAP,
        scene::ENVIRONMENT_MAP,
        VertexInput::Mesh,
        ENVIRONMENT_TEXTURES,
        1,
    ),
    scene_program(names::DEBUG_VOLUME, scene::DEBUG_VOLUME, VertexInput::Mesh, &[], 1),
    ProgramInfo {
        uniforms: SSAO_UNIFORMS,
        ..screen_program(names::SSAO, screen::SSAO, SSAO_TEXTURES)
    },
    screen_program(names::SSAO_BLUR, screen::SSAO_BLUR, SOURCE_TEXTURES),
    ProgramInfo {
        subroutines: POSTPROCESS_SUBROUTINES,
        ..screen_program(names::POSTPROCESS, screen::POSTPROCESS, SOURCE_TEXTURES)
    },
    screen_program(names::TONEMAP, screen::TONEMAP, TONEMAP_TEXTURES),
    screen_program(names::FXAA, screen::FXAA, SOURCE_TEXTURES),
    screen_program(names::DEBUG_GBUFFER, screen::DEBUG_GBUFFER, SOURCE_TEXTURES),
];

pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";

/// Look up a built-in program by name
pub fn program_info(name: &str) -> Option<&'static ProgramInfo> {
    PROGRAMS.iter().find(|p| p.name == name)
}

/// Parse and validate a program's WGSL, checking both entry points exist
pub fn compile(info: &ProgramInfo) -> Result<(naga::Module, naga::valid::ModuleInfo), String> {
    let module = naga::front::wgsl::parse_str(info.source)
        .map_err(|e| format!("{}: WGSL parse error: {}", info.name, e.emit_to_string(info.source)))?;
    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    let module_info = validator
        .validate(&module)
        .map_err(|e| format!("{}: validation error: {}", info.name, e.emit_to_string(info.source)))?;

    for (entry, stage) in [
        (VERTEX_ENTRY, naga::ShaderStage::Vertex),
        (FRAGMENT_ENTRY, naga::ShaderStage::Fragment),
    ] {
        if !module.entry_points.iter().any(|ep| ep.name == entry && ep.stage == stage) {
            return Err(format!("{}: entry point '{entry}' not found for stage {stage:?}", info.name));
        }
    }
    Ok((module, module_info))
}

/// Upload the per-object transform of the bound program
pub fn update_global_uniforms(backend: &mut dyn GraphicsBackend, model: Mat4) {
    backend.set_uniform("model", model.into());
    backend.set_uniform("normal_matrix", model.inverse().transpose().into());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_scene_layout_offsets() {
        let layout = UniformLayout::new(SCENE_UNIFORMS);
        assert_eq!(layout.field("light_space").map(|f| f.offset), Some(256));
        assert_eq!(layout.field("light_intensity").map(|f| f.offset), Some(332));
        assert_eq!(layout.field("albedo").map(|f| f.offset), Some(416));
        assert_eq!(layout.field("ssao_enabled").map(|f| f.offset), Some(464));
        assert_eq!(layout.size, 480);
    }

    #[test]
    fn test_ssao_and_post_layout_sizes() {
        let ssao = UniformLayout::new(SSAO_UNIFORMS);
        assert_eq!(ssao.field("noise_scale").map(|f| f.offset), Some(1152));
        assert_eq!(ssao.size, 1184);
        let post = UniformLayout::new(POST_UNIFORMS);
        assert_eq!(post.field(SUBROUTINE_UNIFORM).map(|f| f.offset), Some(40));
        assert_eq!(post.size, 48);
    }

    #[test]
    fn test_program_table_matches_names() {
        let table: HashSet<_> = PROGRAMS.iter().map(|p| p.name).collect();
        let listed: HashSet<_> = names::ALL.iter().copied().collect();
        assert_eq!(table, listed);
        assert_eq!(PROGRAMS.len(), names::ALL.len());
    }

    #[test]
    fn test_texture_units_fit_binding_range() {
        for program in PROGRAMS {
            for (unit, _) in program.textures {
                assert!((*unit as usize) < units::COUNT, "{} unit {unit}", program.name);
            }
        }
    }
}
