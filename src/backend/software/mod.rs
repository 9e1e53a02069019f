//! CPU reference backend
//!
//! Implements [`GraphicsBackend`] with a deterministic scanline rasterizer so the
//! whole pipeline can run, and be tested, without a GPU. State semantics follow
//! the wgpu backend: the same programs, texture units, blend, depth, stencil and
//! cull behaviour, y-down framebuffer and `[0, 1]` depth.

mod programs;
mod raster;
mod texels;

use std::collections::HashMap;
use std::sync::Arc;

use glam::{Vec2, Vec3, Vec4};
use log::{debug, trace, warn};

use self::texels::{BoundTexture, Image, StencilPlane};
use self::programs::{ShaderContext, SoftwareProgram};
use self::raster::RasterTarget;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::Mesh;
use crate::shaders::{names, units, SUBROUTINE_UNIFORM};

/// Render target storage
struct SoftTarget {
    desc: RenderTargetDescriptor,
    colors: Vec<Image>,
    depth: Option<Image>,
    stencil: Option<StencilPlane>,
    depth_sampled: bool,
}

impl SoftTarget {
    fn new(desc: &RenderTargetDescriptor) -> Self {
        let layers = desc.shape.layers();
        let colors = desc
            .color_attachments()
            .map(|a| Image::new(desc.width, desc.height, layers, a.format))
            .collect();
        let depth_desc = desc.depth_attachment();
        let depth = depth_desc.map(|a| Image::new(desc.width, desc.height, layers, a.format));
        let stencil = depth_desc
            .filter(|a| a.format.has_stencil())
            .map(|_| StencilPlane::new(desc.width, desc.height, layers));
        Self {
            desc: desc.clone(),
            colors,
            depth,
            stencil,
            depth_sampled: depth_desc.is_some_and(|a| a.sampled),
        }
    }

    fn attachment_count(&self) -> usize {
        self.colors.len() + usize::from(self.depth.is_some())
    }

    fn filter(&self, index: usize) -> FilterMode {
        match self.desc.color_attachments().nth(index) {
            Some(a) if a.filtered => FilterMode::Linear,
            _ => FilterMode::Nearest,
        }
    }

    fn raster_target(&mut self, layer: u32) -> RasterTarget<'_> {
        RasterTarget {
            colors: self.colors.iter_mut().collect(),
            depth: self.depth.as_mut(),
            stencil: self.stencil.as_mut(),
            layer,
            width: self.desc.width,
            height: self.desc.height,
        }
    }

    fn clear(&mut self, layer: u32, values: &ClearValues) {
        if let Some(color) = values.color {
            for image in &mut self.colors {
                image.fill_layer(layer, color);
            }
        }
        if let (Some(depth), Some(image)) = (values.depth, self.depth.as_mut()) {
            image.fill_layer(layer, Vec4::splat(depth));
        }
        if let (Some(stencil), Some(plane)) = (values.stencil, self.stencil.as_mut()) {
            plane.fill_layer(layer, stencil);
        }
    }
}

struct SoftTexture {
    image: Image,
    filter: FilterMode,
    address: AddressMode,
    cube: bool,
}

struct ProgramSlot {
    program: Box<dyn SoftwareProgram>,
    uniforms: HashMap<String, UniformValue>,
    subroutine: Option<String>,
}

/// Deterministic CPU implementation of [`GraphicsBackend`]
pub struct SoftwareBackend {
    width: u32,
    height: u32,
    surface: SoftTarget,
    targets: HashMap<u64, SoftTarget>,
    textures: HashMap<u64, SoftTexture>,
    meshes: HashMap<u64, Arc<Mesh>>,
    programs: HashMap<u64, ProgramSlot>,
    program_ids: HashMap<String, u64>,
    bound_program: Option<u64>,
    draw_binding: TargetBinding,
    read_target: Option<RenderTargetHandle>,
    viewport: Viewport,
    state: RenderState,
    texture_units: [Option<TextureSource>; units::COUNT],
    stats: FrameStatistics,
    next_id: u64,
}

fn surface_descriptor(width: u32, height: u32) -> RenderTargetDescriptor {
    RenderTargetDescriptor {
        label: "surface".into(),
        width,
        height,
        shape: TargetShape::Flat,
        attachments: vec![
            AttachmentDescriptor::color(TextureFormat::Rgba8Unorm),
            AttachmentDescriptor::depth(TextureFormat::Depth24PlusStencil8).render_only(),
        ],
    }
}

/// Clip-space triangle covering the viewport, matching the WGSL vertex-index version
fn fullscreen_vertices() -> [Vertex; 3] {
    let vertex = |x: f32, y: f32, u: f32, v: f32| Vertex {
        position: Vec3::new(x, y, 0.0),
        normal: Vec3::Z,
        uv: Vec2::new(u, v),
        tangent: Vec4::ZERO,
    };
    [
        vertex(-1.0, -1.0, 0.0, 1.0),
        vertex(3.0, -1.0, 2.0, 1.0),
        vertex(-1.0, 3.0, 0.0, -1.0),
    ]
}

impl SoftwareBackend {
    pub fn new(width: u32, height: u32) -> Self {
        debug!("Software backend {width}x{height}");
        Self {
            width,
            height,
            surface: SoftTarget::new(&surface_descriptor(width, height)),
            targets: HashMap::new(),
            textures: HashMap::new(),
            meshes: HashMap::new(),
            programs: HashMap::new(),
            program_ids: HashMap::new(),
            bound_program: None,
            draw_binding: TargetBinding::Surface,
            read_target: None,
            viewport: Viewport::full(width, height),
            state: RenderState::default(),
            texture_units: [None; units::COUNT],
            stats: FrameStatistics::default(),
            next_id: 1,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn resolve_texture<'a>(
        source: TextureSource,
        targets: &'a HashMap<u64, SoftTarget>,
        textures: &'a HashMap<u64, SoftTexture>,
    ) -> Option<BoundTexture<'a>> {
        match source {
            TextureSource::Attachment { target, index } => {
                let t = targets.get(&target.0)?;
                Some(BoundTexture {
                    image: t.colors.get(index)?,
                    filter: t.filter(index),
                    address: AddressMode::ClampToEdge,
                    cube: t.desc.shape == TargetShape::Cube,
                })
            }
            TextureSource::Depth(target) => {
                let t = targets.get(&target.0)?;
                if !t.depth_sampled {
                    return None;
                }
                Some(BoundTexture {
                    image: t.depth.as_ref()?,
                    filter: FilterMode::Nearest,
                    address: AddressMode::ClampToEdge,
                    cube: t.desc.shape == TargetShape::Cube,
                })
            }
            TextureSource::Texture(handle) => {
                let t = textures.get(&handle.0)?;
                Some(BoundTexture {
                    image: &t.image,
                    filter: t.filter,
                    address: t.address,
                    cube: t.cube,
                })
            }
        }
    }

    fn draw(&mut self, vertices: &[Vertex], indices: &[u32]) {
        let Some(program_id) = self.bound_program else {
            warn!("Draw without a bound program");
            return;
        };
        let (target_id, layer) = match self.draw_binding {
            TargetBinding::Surface => (None, 0),
            TargetBinding::Target(h) => (Some(h.0), 0),
            TargetBinding::Face(h, face) => (Some(h.0), face.layer()),
        };
        // The draw target leaves the map for the duration of the draw, so a
        // target sampled while being drawn into reads as unbound
        let mut taken = match target_id {
            Some(id) => match self.targets.remove(&id) {
                Some(target) => Some(target),
                None => {
                    warn!("Draw into a destroyed render target");
                    return;
                }
            },
            None => None,
        };

        let Self {
            surface,
            targets,
            textures,
            programs,
            texture_units,
            state,
            viewport,
            stats,
            ..
        } = self;
        let (targets, textures) = (&*targets, &*textures);
        let target = match taken.as_mut() {
            Some(target) => target,
            None => surface,
        };
        if let Some(slot) = programs.get(&program_id) {
            let bound: Vec<Option<BoundTexture>> = texture_units
                .iter()
                .map(|unit| unit.and_then(|s| Self::resolve_texture(s, targets, textures)))
                .collect();
            let ctx = ShaderContext {
                uniforms: &slot.uniforms,
                textures: &bound,
                subroutine: slot.subroutine.as_deref(),
            };
            let mut raster_target = target.raster_target(layer);
            let shaded = raster::draw_triangles(
                slot.program.as_ref(),
                &ctx,
                vertices,
                indices,
                state,
                viewport,
                &mut raster_target,
            );
            stats.draw_calls += 1;
            *stats.fragments.entry(slot.program.name().to_string()).or_default() += shaded;
            trace!("{}: {} fragments", slot.program.name(), shaded);
        }

        if let (Some(id), Some(target)) = (target_id, taken) {
            self.targets.insert(id, target);
        }
    }

    fn draw_target(&self) -> Option<&SoftTarget> {
        match self.draw_binding {
            TargetBinding::Surface => Some(&self.surface),
            TargetBinding::Target(h) | TargetBinding::Face(h, _) => self.targets.get(&h.0),
        }
    }
}

impl GraphicsBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "software"
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.surface = SoftTarget::new(&surface_descriptor(width, height));
    }

    fn begin_frame(&mut self) -> BackendResult<()> {
        self.stats.reset();
        Ok(())
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        Ok(())
    }

    fn create_render_target(
        &mut self,
        desc: &RenderTargetDescriptor,
    ) -> BackendResult<RenderTargetHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::RenderTargetCreationFailed {
                label: desc.label.clone(),
                reason: format!("zero extent {}x{}", desc.width, desc.height),
            });
        }
        let id = self.allocate_id();
        self.targets.insert(id, SoftTarget::new(desc));
        Ok(RenderTargetHandle(id))
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        self.targets.remove(&target.0);
    }

    fn render_target_status(&self, target: RenderTargetHandle) -> TargetStatus {
        let Some(t) = self.targets.get(&target.0) else {
            return TargetStatus::Missing;
        };
        if t.colors.is_empty() && t.depth.is_none() {
            return TargetStatus::Incomplete("no attachments".into());
        }
        let mismatched = t
            .colors
            .iter()
            .chain(t.depth.iter())
            .any(|i| i.width != t.desc.width || i.height != t.desc.height);
        if mismatched {
            return TargetStatus::Incomplete("attachment size mismatch".into());
        }
        TargetStatus::Complete
    }

    fn live_attachment_count(&self) -> usize {
        self.targets.values().map(SoftTarget::attachment_count).sum()
    }

    fn create_texture(
        &mut self,
        desc: &TextureDescriptor,
        data: &[f32],
    ) -> BackendResult<TextureHandle> {
        let layers = desc.shape.layers();
        let mut image = Image::new(desc.width, desc.height, layers, desc.format);
        if !data.is_empty() {
            let channels = if desc.format.is_depth() { 1 } else { 4 };
            let expected = (desc.width * desc.height * layers) as usize * channels;
            if data.len() != expected {
                return Err(BackendError::TextureCreationFailed(format!(
                    "'{}' expects {expected} values, got {}",
                    desc.label,
                    data.len()
                )));
            }
            for (texel, chunk) in image.texels.iter_mut().zip(data.chunks_exact(channels)) {
                let value = match chunk {
                    [d] => Vec4::new(*d, 0.0, 0.0, 1.0),
                    [r, g, b, a] => Vec4::new(*r, *g, *b, *a),
                    _ => Vec4::ZERO,
                };
                *texel = texels::quantize(desc.format, value);
            }
        }
        let id = self.allocate_id();
        self.textures.insert(
            id,
            SoftTexture {
                image,
                filter: desc.filter,
                address: desc.address_mode,
                cube: desc.shape == TargetShape::Cube,
            },
        );
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    fn create_mesh(&mut self, mesh: &Mesh) -> BackendResult<MeshHandle> {
        let id = self.allocate_id();
        self.meshes.insert(id, Arc::new(mesh.clone()));
        Ok(MeshHandle(id))
    }

    fn destroy_mesh(&mut self, mesh: MeshHandle) {
        self.meshes.remove(&mesh.0);
    }

    fn create_shader(&mut self, name: &str) -> BackendResult<ShaderHandle> {
        if let Some(id) = self.program_ids.get(name) {
            return Ok(ShaderHandle(*id));
        }
        let program = programs::builtin(name).ok_or_else(|| BackendError::ShaderNotFound(name.into()))?;
        let id = self.allocate_id();
        let subroutine = (name == names::POSTPROCESS).then(|| names::EXTRACT_BRIGHTNESS.to_string());
        self.programs.insert(
            id,
            ProgramSlot {
                program,
                uniforms: HashMap::new(),
                subroutine,
            },
        );
        self.program_ids.insert(name.to_string(), id);
        Ok(ShaderHandle(id))
    }

    fn bind_shader(&mut self, shader: ShaderHandle) {
        if self.programs.contains_key(&shader.0) {
            self.bound_program = Some(shader.0);
        } else {
            warn!("Binding unknown program {:?}", shader);
        }
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        let Some(slot) = self.bound_program.and_then(|id| self.programs.get_mut(&id)) else {
            return;
        };
        if name == SUBROUTINE_UNIFORM {
            return;
        }
        slot.uniforms.insert(name.to_string(), value);
    }

    fn set_subroutine(&mut self, _stage: ShaderStage, name: &str) {
        if let Some(slot) = self.bound_program.and_then(|id| self.programs.get_mut(&id)) {
            slot.subroutine = Some(name.to_string());
        }
    }

    fn bind_render_target(&mut self, binding: TargetBinding) {
        self.draw_binding = binding;
    }

    fn bind_read_target(&mut self, target: Option<RenderTargetHandle>) {
        self.read_target = target;
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn clear(&mut self, values: ClearValues) {
        let (target, layer) = match self.draw_binding {
            TargetBinding::Surface => (Some(&mut self.surface), 0),
            TargetBinding::Target(h) => (self.targets.get_mut(&h.0), 0),
            TargetBinding::Face(h, face) => (self.targets.get_mut(&h.0), face.layer()),
        };
        match target {
            Some(target) => target.clear(layer, &values),
            None => warn!("Clear of a destroyed render target"),
        }
    }

    fn blit_framebuffer(&mut self, mask: BlitMask) -> BackendResult<()> {
        let source_handle = self
            .read_target
            .ok_or_else(|| BackendError::Unsupported("blit without a read target".into()))?;
        let source = self
            .targets
            .get(&source_handle.0)
            .ok_or(BackendError::InvalidHandle("render target"))?;
        let (width, height) = (source.desc.width, source.desc.height);
        let colors: Vec<Image> = if mask.contains(BlitMask::COLOR) {
            source.colors.first().cloned().into_iter().collect()
        } else {
            Vec::new()
        };
        let depth = mask
            .contains(BlitMask::DEPTH)
            .then(|| source.depth.clone())
            .flatten();
        let stencil = mask
            .contains(BlitMask::STENCIL)
            .then(|| source.stencil.clone())
            .flatten();

        let layer = match self.draw_binding {
            TargetBinding::Face(_, face) => face.layer(),
            _ => 0,
        };
        let destination = match self.draw_binding {
            TargetBinding::Surface => &mut self.surface,
            TargetBinding::Target(h) | TargetBinding::Face(h, _) => self
                .targets
                .get_mut(&h.0)
                .ok_or(BackendError::InvalidHandle("render target"))?,
        };
        if destination.desc.width != width || destination.desc.height != height {
            return Err(BackendError::Unsupported(format!(
                "blit between {}x{} and {}x{}",
                width, height, destination.desc.width, destination.desc.height
            )));
        }

        let count = (width * height) as usize;
        let range = layer as usize * count..(layer as usize + 1) * count;
        if let (Some(src), Some(dst)) = (colors.first(), destination.colors.first_mut()) {
            let format = dst.format;
            for (out, value) in dst.texels[range.clone()].iter_mut().zip(&src.texels[..count]) {
                *out = texels::quantize(format, *value);
            }
        }
        if let (Some(src), Some(dst)) = (depth.as_ref(), destination.depth.as_mut()) {
            dst.texels[range.clone()].copy_from_slice(&src.texels[..count]);
        }
        if let (Some(src), Some(dst)) = (stencil.as_ref(), destination.stencil.as_mut()) {
            dst.values[range].copy_from_slice(&src.values[..count]);
        }
        Ok(())
    }

    fn render_state(&self) -> RenderState {
        self.state
    }

    fn apply_render_state(&mut self, state: &RenderState) {
        self.state = *state;
    }

    fn bind_texture(&mut self, unit: u32, source: Option<TextureSource>) {
        match self.texture_units.get_mut(unit as usize) {
            Some(slot) => *slot = source,
            None => warn!("Texture unit {unit} out of range"),
        }
    }

    fn draw_mesh(&mut self, mesh: MeshHandle) {
        let Some(mesh) = self.meshes.get(&mesh.0).cloned() else {
            warn!("Draw of a destroyed mesh");
            return;
        };
        self.draw(&mesh.vertices, &mesh.indices);
    }

    fn draw_fullscreen(&mut self) {
        self.draw(&fullscreen_vertices(), &[0, 1, 2]);
    }

    fn read_pixels(&mut self, source: ReadbackSource) -> BackendResult<PixelBuffer> {
        let (image, layer) = match source {
            ReadbackSource::Surface => (self.surface.colors.first(), 0),
            ReadbackSource::Color {
                target,
                attachment,
                layer,
            } => {
                let t = self
                    .targets
                    .get(&target.0)
                    .ok_or(BackendError::InvalidHandle("render target"))?;
                (t.colors.get(attachment), layer)
            }
            ReadbackSource::Depth { target, layer } => {
                let t = self
                    .targets
                    .get(&target.0)
                    .ok_or(BackendError::InvalidHandle("render target"))?;
                (t.depth.as_ref(), layer)
            }
        };
        let image = image.ok_or_else(|| BackendError::ReadbackFailed(format!("{source:?} has no such attachment")))?;
        if layer >= image.layers {
            return Err(BackendError::ReadbackFailed(format!("layer {layer} out of range")));
        }
        Ok(PixelBuffer::new(
            image.width,
            image.height,
            image.layer_texels(layer).to_vec(),
        ))
    }

    fn statistics(&self) -> &FrameStatistics {
        &self.stats
    }
}

impl SoftwareBackend {
    /// Stencil values of the bound draw target, for tests and diagnostics
    pub fn stencil_values(&self) -> Option<&[u8]> {
        self.draw_target()
            .and_then(|t| t.stencil.as_ref())
            .map(|p| &p.values[..(p.width * p.height) as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(backend: &mut SoftwareBackend, shape: TargetShape) -> RenderTargetHandle {
        backend
            .create_render_target(&RenderTargetDescriptor {
                label: "test".into(),
                width: 4,
                height: 4,
                shape,
                attachments: vec![
                    AttachmentDescriptor::color(TextureFormat::Rgba16Float),
                    AttachmentDescriptor::depth(TextureFormat::Depth24PlusStencil8),
                ],
            })
            .unwrap()
    }

    #[test]
    fn test_unknown_program_is_an_error() {
        let mut backend = SoftwareBackend::new(4, 4);
        assert!(matches!(
            backend.create_shader("Nope"),
            Err(BackendError::ShaderNotFound(_))
        ));
    }

    #[test]
    fn test_clear_and_readback() {
        let mut backend = SoftwareBackend::new(4, 4);
        let t = target(&mut backend, TargetShape::Flat);
        backend.bind_render_target(TargetBinding::Target(t));
        backend.clear(ClearValues::all(Vec4::new(0.25, 0.5, 0.75, 1.0)));
        let pixels = backend
            .read_pixels(ReadbackSource::Color {
                target: t,
                attachment: 0,
                layer: 0,
            })
            .unwrap();
        assert_eq!(pixels.center(), Vec4::new(0.25, 0.5, 0.75, 1.0));
        assert_eq!(backend.live_attachment_count(), 2);
        backend.destroy_render_target(t);
        assert_eq!(backend.live_attachment_count(), 0);
        assert_eq!(backend.render_target_status(t), TargetStatus::Missing);
    }

    #[test]
    fn test_cube_face_clear_touches_one_layer() {
        let mut backend = SoftwareBackend::new(4, 4);
        let t = target(&mut backend, TargetShape::Cube);
        backend.bind_render_target(TargetBinding::Face(t, CubeFace::NegativeY));
        backend.clear(ClearValues::all(Vec4::ONE));
        for face in CubeFace::ALL {
            let pixels = backend
                .read_pixels(ReadbackSource::Color {
                    target: t,
                    attachment: 0,
                    layer: face.layer(),
                })
                .unwrap();
            let expected = if face == CubeFace::NegativeY { 1.0 } else { 0.0 };
            assert_eq!(pixels.center().x, expected, "{face:?}");
        }
    }

    #[test]
    fn test_depth_blit_copies_depth() {
        let mut backend = SoftwareBackend::new(4, 4);
        let source = target(&mut backend, TargetShape::Flat);
        let destination = target(&mut backend, TargetShape::Flat);
        backend.bind_render_target(TargetBinding::Target(source));
        backend.clear(ClearValues {
            color: None,
            depth: Some(0.25),
            stencil: None,
        });
        backend.bind_read_target(Some(source));
        backend.bind_render_target(TargetBinding::Target(destination));
        backend.blit_framebuffer(BlitMask::DEPTH).unwrap();
        let depth = backend
            .read_pixels(ReadbackSource::Depth {
                target: destination,
                layer: 0,
            })
            .unwrap();
        assert_eq!(depth.center().x, 0.25);
    }

    #[test]
    fn test_fullscreen_draw_counts_fragments() {
        let mut backend = SoftwareBackend::new(4, 4);
        let shader = backend.create_shader(names::DEBUG_GBUFFER).unwrap();
        backend.bind_shader(shader);
        backend.apply_render_state(&RenderState::fullscreen());
        backend.draw_fullscreen();
        assert_eq!(backend.statistics().fragments_for(names::DEBUG_GBUFFER), 16);
        assert_eq!(backend.statistics().draw_calls, 1);
    }
}
