//! Common types shared between backends

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::backend::traits::{RenderTargetHandle, TextureHandle};

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    R16Float,
    Depth32Float,
    Depth24PlusStencil8,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8
        )
    }

    pub fn has_stencil(&self) -> bool {
        matches!(self, TextureFormat::Depth24PlusStencil8)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::R16Float => 2,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24PlusStencil8 => 4,
            TextureFormat::Rgba16Float => 8,
        }
    }

    /// Number of meaningful channels when read back.
    pub fn channels(&self) -> usize {
        match self {
            TextureFormat::R16Float | TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8 => 1,
            _ => 4,
        }
    }
}

/// Depth attachment request for [`crate::render_target::RenderTarget::create`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DepthFormat {
    None,
    Depth32,
    #[default]
    Depth24Stencil8,
}

impl DepthFormat {
    pub fn texture_format(&self) -> Option<TextureFormat> {
        match self {
            DepthFormat::None => None,
            DepthFormat::Depth32 => Some(TextureFormat::Depth32Float),
            DepthFormat::Depth24Stencil8 => Some(TextureFormat::Depth24PlusStencil8),
        }
    }
}

/// Flat 2D target or six-layer cube target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TargetShape {
    #[default]
    Flat,
    Cube,
}

impl TargetShape {
    pub fn layers(&self) -> u32 {
        match self {
            TargetShape::Flat => 1,
            TargetShape::Cube => 6,
        }
    }
}

/// Cube map face, in layer order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    pub fn layer(&self) -> u32 {
        *self as u32
    }

    /// Unnormalized direction through texture coordinate `uv` of this face,
    /// using the standard cube-map face table (v grows downwards).
    pub fn direction(&self, uv: Vec2) -> Vec3 {
        let sc = uv.x * 2.0 - 1.0;
        let tc = uv.y * 2.0 - 1.0;
        match self {
            CubeFace::PositiveX => Vec3::new(1.0, -tc, -sc),
            CubeFace::NegativeX => Vec3::new(-1.0, -tc, sc),
            CubeFace::PositiveY => Vec3::new(sc, 1.0, tc),
            CubeFace::NegativeY => Vec3::new(sc, -1.0, -tc),
            CubeFace::PositiveZ => Vec3::new(sc, -tc, 1.0),
            CubeFace::NegativeZ => Vec3::new(-sc, -tc, -1.0),
        }
    }

    /// Face and texture coordinate a direction samples. Inverse of [`CubeFace::direction`].
    pub fn from_direction(dir: Vec3) -> (CubeFace, Vec2) {
        let a = dir.abs();
        let (face, ma, sc, tc) = if a.x >= a.y && a.x >= a.z {
            if dir.x >= 0.0 {
                (CubeFace::PositiveX, a.x, -dir.z, -dir.y)
            } else {
                (CubeFace::NegativeX, a.x, dir.z, -dir.y)
            }
        } else if a.y >= a.z {
            if dir.y >= 0.0 {
                (CubeFace::PositiveY, a.y, dir.x, dir.z)
            } else {
                (CubeFace::NegativeY, a.y, dir.x, -dir.z)
            }
        } else if dir.z >= 0.0 {
            (CubeFace::PositiveZ, a.z, dir.x, -dir.y)
        } else {
            (CubeFace::NegativeZ, a.z, -dir.x, -dir.y)
        };
        let ma = ma.max(f32::MIN_POSITIVE);
        (face, Vec2::new((sc / ma + 1.0) * 0.5, (tc / ma + 1.0) * 0.5))
    }
}

/// One attachment of a render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentDescriptor {
    pub format: TextureFormat,
    /// Linear filtering when sampled
    pub filtered: bool,
    /// Whether the attachment can be bound as a texture. Depth surfaces synthesized
    /// for MRT targets are render-only.
    pub sampled: bool,
}

impl AttachmentDescriptor {
    pub fn color(format: TextureFormat) -> Self {
        Self {
            format,
            filtered: false,
            sampled: true,
        }
    }

    pub fn depth(format: TextureFormat) -> Self {
        Self {
            format,
            filtered: false,
            sampled: true,
        }
    }

    pub fn with_filtering(mut self, filtered: bool) -> Self {
        self.filtered = filtered;
        self
    }

    pub fn render_only(mut self) -> Self {
        self.sampled = false;
        self
    }

    pub fn is_depth(&self) -> bool {
        self.format.is_depth()
    }
}

/// Backend-level description of a render target
#[derive(Debug, Clone)]
pub struct RenderTargetDescriptor {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub shape: TargetShape,
    pub attachments: Vec<AttachmentDescriptor>,
}

impl RenderTargetDescriptor {
    pub fn color_attachments(&self) -> impl Iterator<Item = &AttachmentDescriptor> {
        self.attachments.iter().filter(|a| !a.is_depth())
    }

    pub fn depth_attachment(&self) -> Option<&AttachmentDescriptor> {
        self.attachments.iter().find(|a| a.is_depth())
    }
}

/// Completeness of a render target, as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetStatus {
    Complete,
    Incomplete(String),
    Missing,
}

/// Filter mode for sampled textures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Address mode for sampled textures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
}

/// Standalone texture descriptor (noise, skybox, sentinels)
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub shape: TargetShape,
    pub filter: FilterMode,
    pub address_mode: AddressMode,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: String::new(),
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Unorm,
            shape: TargetShape::Flat,
            filter: FilterMode::Linear,
            address_mode: AddressMode::ClampToEdge,
        }
    }
}

/// Standard vertex with position, normal, UV, and tangent
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub tangent: Vec4,
}

impl Vertex {
    pub const STRIDE: u64 = std::mem::size_of::<Self>() as u64;
}

/// Front face winding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontFace {
    Ccw,
    Cw,
}

/// Cull mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// Compare function for depth/stencil
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

impl CompareFunction {
    /// Evaluates `incoming <op> stored`.
    pub fn passes<T: PartialOrd>(&self, incoming: T, stored: T) -> bool {
        match self {
            CompareFunction::Never => false,
            CompareFunction::Less => incoming < stored,
            CompareFunction::Equal => incoming == stored,
            CompareFunction::LessEqual => incoming <= stored,
            CompareFunction::Greater => incoming > stored,
            CompareFunction::NotEqual => incoming != stored,
            CompareFunction::GreaterEqual => incoming >= stored,
            CompareFunction::Always => true,
        }
    }
}

/// Stencil buffer update operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOperation {
    Keep,
    Zero,
    Replace,
    Invert,
    IncrementClamp,
    DecrementClamp,
    IncrementWrap,
    DecrementWrap,
}

impl StencilOperation {
    pub fn apply(&self, value: u8, reference: u8) -> u8 {
        match self {
            StencilOperation::Keep => value,
            StencilOperation::Zero => 0,
            StencilOperation::Replace => reference,
            StencilOperation::Invert => !value,
            StencilOperation::IncrementClamp => value.saturating_add(1),
            StencilOperation::DecrementClamp => value.saturating_sub(1),
            StencilOperation::IncrementWrap => value.wrapping_add(1),
            StencilOperation::DecrementWrap => value.wrapping_sub(1),
        }
    }
}

/// Per-face stencil behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilFaceState {
    pub compare: CompareFunction,
    pub fail_op: StencilOperation,
    pub depth_fail_op: StencilOperation,
    pub pass_op: StencilOperation,
}

impl Default for StencilFaceState {
    fn default() -> Self {
        Self {
            compare: CompareFunction::Always,
            fail_op: StencilOperation::Keep,
            depth_fail_op: StencilOperation::Keep,
            pass_op: StencilOperation::Keep,
        }
    }
}

/// Stencil test configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilState {
    pub front: StencilFaceState,
    pub back: StencilFaceState,
    pub reference: u8,
    pub read_mask: u8,
    pub write_mask: u8,
}

impl Default for StencilState {
    fn default() -> Self {
        Self {
            front: StencilFaceState::default(),
            back: StencilFaceState::default(),
            reference: 0,
            read_mask: 0xFF,
            write_mask: 0xFF,
        }
    }
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    Src,
    OneMinusSrc,
    SrcAlpha,
    OneMinusSrcAlpha,
    Dst,
    OneMinusDst,
    DstAlpha,
    OneMinusDstAlpha,
}

/// Blend operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOperation {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

/// Blend component state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendComponent {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
    pub operation: BlendOperation,
}

impl Default for BlendComponent {
    fn default() -> Self {
        Self {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::Zero,
            operation: BlendOperation::Add,
        }
    }
}

/// Blend state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

impl BlendState {
    pub fn alpha_blending() -> Self {
        Self {
            color: BlendComponent {
                src_factor: BlendFactor::SrcAlpha,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
                operation: BlendOperation::Add,
            },
            alpha: BlendComponent {
                src_factor: BlendFactor::One,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
                operation: BlendOperation::Add,
            },
        }
    }

    pub fn additive() -> Self {
        let one_one = BlendComponent {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::One,
            operation: BlendOperation::Add,
        };
        Self {
            color: one_one,
            alpha: one_one,
        }
    }
}

/// Color write mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorWrites(pub u32);

impl ColorWrites {
    pub const NONE: Self = Self(0);
    pub const RED: Self = Self(1 << 0);
    pub const GREEN: Self = Self(1 << 1);
    pub const BLUE: Self = Self(1 << 2);
    pub const ALPHA: Self = Self(1 << 3);
    pub const ALL: Self = Self(0xF);

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for ColorWrites {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Rasterizer fill mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolygonMode {
    Fill,
    Line,
}

/// Complete fixed-function state for a draw.
///
/// Passes build one of these and apply it through
/// [`crate::backend::RenderStateGuard`] instead of toggling individual flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderState {
    /// `None` disables the depth test entirely
    pub depth_test: Option<CompareFunction>,
    pub depth_write: bool,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub blend: Option<BlendState>,
    pub color_writes: ColorWrites,
    pub stencil: Option<StencilState>,
    pub polygon_mode: PolygonMode,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            depth_test: Some(CompareFunction::Less),
            depth_write: true,
            cull_mode: CullMode::Back,
            front_face: FrontFace::Ccw,
            blend: None,
            color_writes: ColorWrites::ALL,
            stencil: None,
            polygon_mode: PolygonMode::Fill,
        }
    }
}

impl RenderState {
    /// Depth-tested, depth-writing, back-face culled geometry
    pub fn opaque() -> Self {
        Self::default()
    }

    /// Full-screen triangle: no depth, no culling
    pub fn fullscreen() -> Self {
        Self {
            depth_test: None,
            depth_write: false,
            cull_mode: CullMode::None,
            ..Self::default()
        }
    }

    pub fn with_depth(mut self, test: Option<CompareFunction>, write: bool) -> Self {
        self.depth_test = test;
        self.depth_write = write;
        self
    }

    pub fn with_cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    pub fn with_front_face(mut self, front_face: FrontFace) -> Self {
        self.front_face = front_face;
        self
    }

    pub fn with_blend(mut self, blend: Option<BlendState>) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_color_writes(mut self, color_writes: ColorWrites) -> Self {
        self.color_writes = color_writes;
        self
    }

    pub fn with_stencil(mut self, stencil: Option<StencilState>) -> Self {
        self.stencil = stencil;
        self
    }

    pub fn with_polygon_mode(mut self, polygon_mode: PolygonMode) -> Self {
        self.polygon_mode = polygon_mode;
        self
    }
}

/// Shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Value of a named shader parameter
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
    Vec4Array(Vec<Vec4>),
    Mat4Array(Vec<Mat4>),
}

impl UniformValue {
    pub fn as_float(&self) -> f32 {
        match self {
            UniformValue::Float(v) => *v,
            UniformValue::Int(v) => *v as f32,
            UniformValue::Bool(v) => f32::from(u8::from(*v)),
            _ => 0.0,
        }
    }

    pub fn as_int(&self) -> i32 {
        match self {
            UniformValue::Int(v) => *v,
            UniformValue::Float(v) => *v as i32,
            UniformValue::Bool(v) => i32::from(*v),
            _ => 0,
        }
    }

    pub fn as_vec3(&self) -> Vec3 {
        match self {
            UniformValue::Vec3(v) => *v,
            UniformValue::Vec4(v) => v.truncate(),
            UniformValue::Float(v) => Vec3::splat(*v),
            _ => Vec3::ZERO,
        }
    }

    pub fn as_vec4(&self) -> Vec4 {
        match self {
            UniformValue::Vec4(v) => *v,
            UniformValue::Vec3(v) => v.extend(0.0),
            UniformValue::Vec2(v) => Vec4::new(v.x, v.y, 0.0, 0.0),
            _ => Vec4::ZERO,
        }
    }

    pub fn as_vec2(&self) -> Vec2 {
        match self {
            UniformValue::Vec2(v) => *v,
            UniformValue::Vec4(v) => v.truncate().truncate(),
            _ => Vec2::ZERO,
        }
    }

    pub fn as_mat4(&self) -> Mat4 {
        match self {
            UniformValue::Mat4(m) => *m,
            _ => Mat4::IDENTITY,
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Float(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::Int(v)
    }
}

impl From<bool> for UniformValue {
    fn from(v: bool) -> Self {
        UniformValue::Bool(v)
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        UniformValue::Vec4(v)
    }
}

impl From<Mat4> for UniformValue {
    fn from(v: Mat4) -> Self {
        UniformValue::Mat4(v)
    }
}

/// Values written by [`crate::backend::GraphicsBackend::clear`]. `None` leaves the aspect untouched.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClearValues {
    pub color: Option<Vec4>,
    pub depth: Option<f32>,
    pub stencil: Option<u8>,
}

impl ClearValues {
    pub fn all(color: Vec4) -> Self {
        Self {
            color: Some(color),
            depth: Some(1.0),
            stencil: Some(0),
        }
    }

    pub fn depth_only() -> Self {
        Self {
            color: None,
            depth: Some(1.0),
            stencil: None,
        }
    }

    pub fn stencil_only() -> Self {
        Self {
            color: None,
            depth: None,
            stencil: Some(0),
        }
    }
}

/// Aspects copied by a framebuffer blit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlitMask(u32);

impl BlitMask {
    pub const COLOR: Self = Self(1 << 0);
    pub const DEPTH: Self = Self(1 << 1);
    pub const STENCIL: Self = Self(1 << 2);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for BlitMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Pixel rectangle, origin at the top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Active draw surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetBinding {
    /// The presentation surface
    Surface,
    Target(RenderTargetHandle),
    /// One face of a cube target
    Face(RenderTargetHandle, CubeFace),
}

/// What a texture unit samples from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSource {
    /// Color attachment `index` of a render target
    Attachment {
        target: RenderTargetHandle,
        index: usize,
    },
    /// Depth attachment of a render target
    Depth(RenderTargetHandle),
    Texture(TextureHandle),
}

/// Readback request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadbackSource {
    Surface,
    Color {
        target: RenderTargetHandle,
        attachment: usize,
        layer: u32,
    },
    Depth {
        target: RenderTargetHandle,
        layer: u32,
    },
}

/// CPU copy of an image, row-major from the top-left corner
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Vec4>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, pixels: Vec<Vec4>) -> Self {
        debug_assert_eq!(pixels.len(), (width * height) as usize);
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn get(&self, x: u32, y: u32) -> Vec4 {
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn center(&self) -> Vec4 {
        self.get(self.width / 2, self.height / 2)
    }
}

/// Counters collected during a frame
#[derive(Debug, Clone, Default)]
pub struct FrameStatistics {
    pub draw_calls: u32,
    /// Shaded fragments per program name. Only CPU backends fill this in.
    pub fragments: HashMap<String, u64>,
}

impl FrameStatistics {
    pub fn fragments_for(&self, program: &str) -> u64 {
        self.fragments.get(program).copied().unwrap_or(0)
    }

    pub fn reset(&mut self) {
        self.draw_calls = 0;
        self.fragments.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stencil_wrap_ops() {
        assert_eq!(StencilOperation::IncrementWrap.apply(255, 0), 0);
        assert_eq!(StencilOperation::DecrementWrap.apply(0, 0), 255);
        assert_eq!(StencilOperation::IncrementClamp.apply(255, 0), 255);
        assert_eq!(StencilOperation::Replace.apply(3, 7), 7);
    }

    #[test]
    fn test_compare_function() {
        assert!(CompareFunction::Less.passes(0.5, 1.0));
        assert!(!CompareFunction::Less.passes(1.0, 1.0));
        assert!(CompareFunction::LessEqual.passes(1.0, 1.0));
        assert!(CompareFunction::NotEqual.passes(1u8, 0u8));
        assert!(!CompareFunction::Never.passes(0, 0));
    }

    #[test]
    fn test_cube_face_direction_round_trip() {
        for face in CubeFace::ALL {
            for uv in [Vec2::new(0.25, 0.75), Vec2::new(0.5, 0.5), Vec2::new(0.9, 0.1)] {
                let (back, back_uv) = CubeFace::from_direction(face.direction(uv));
                assert_eq!(back, face);
                assert!((back_uv - uv).length() < 1e-5, "{face:?} {uv:?} -> {back_uv:?}");
            }
        }
    }

    #[test]
    fn test_depth_format_mapping() {
        assert_eq!(DepthFormat::None.texture_format(), None);
        assert!(DepthFormat::Depth24Stencil8
            .texture_format()
            .is_some_and(|f| f.has_stencil()));
        assert!(!TextureFormat::Depth32Float.has_stencil());
    }
}
