//! GPU-side storage for targets, textures, meshes and programs

use glam::Vec4;
use half::f16;

use super::convert;
use crate::backend::traits::{BackendError, BackendResult};
use crate::backend::types::*;
use crate::shaders::{ProgramInfo, TextureSlot, UniformLayout};

const ATTACHMENT_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::RENDER_ATTACHMENT
    .union(wgpu::TextureUsages::TEXTURE_BINDING)
    .union(wgpu::TextureUsages::COPY_SRC)
    .union(wgpu::TextureUsages::COPY_DST);

/// One attachment texture and its views
pub(super) struct GpuAttachment {
    pub desc: AttachmentDescriptor,
    pub format: wgpu::TextureFormat,
    pub texture: wgpu::Texture,
    /// 2D or cube view, depth aspect only for depth formats
    pub sampled_view: wgpu::TextureView,
    /// One 2D view per layer, all aspects, for rendering
    pub layer_views: Vec<wgpu::TextureView>,
    /// One depth-aspect 2D view per layer, for depth copies and readback
    pub depth_layer_views: Vec<wgpu::TextureView>,
}

impl GpuAttachment {
    fn new(
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
        shape: TargetShape,
        desc: AttachmentDescriptor,
    ) -> Self {
        let format = convert::texture_format(desc.format);
        let layers = shape.layers();
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: ATTACHMENT_USAGE,
            view_formats: &[],
        });
        let sampled_aspect = if desc.is_depth() {
            wgpu::TextureAspect::DepthOnly
        } else {
            wgpu::TextureAspect::All
        };
        let sampled_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            dimension: Some(view_dimension(shape)),
            aspect: sampled_aspect,
            ..Default::default()
        });
        let layer_view = |layer: u32, aspect: wgpu::TextureAspect| {
            texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some(label),
                dimension: Some(wgpu::TextureViewDimension::D2),
                aspect,
                base_array_layer: layer,
                array_layer_count: Some(1),
                ..Default::default()
            })
        };
        let layer_views = (0..layers).map(|l| layer_view(l, wgpu::TextureAspect::All)).collect();
        let depth_layer_views = if desc.is_depth() {
            (0..layers)
                .map(|l| layer_view(l, wgpu::TextureAspect::DepthOnly))
                .collect()
        } else {
            Vec::new()
        };

        Self {
            desc,
            format,
            texture,
            sampled_view,
            layer_views,
            depth_layer_views,
        }
    }
}

/// Render target storage
pub(super) struct GpuTarget {
    pub desc: RenderTargetDescriptor,
    pub colors: Vec<GpuAttachment>,
    pub depth: Option<GpuAttachment>,
}

impl GpuTarget {
    pub fn new(device: &wgpu::Device, desc: &RenderTargetDescriptor) -> BackendResult<Self> {
        let max = device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(BackendError::RenderTargetCreationFailed {
                label: desc.label.clone(),
                reason: format!("extent {}x{} outside 1..={max}", desc.width, desc.height),
            });
        }
        let colors = desc
            .color_attachments()
            .enumerate()
            .map(|(i, a)| {
                let label = format!("{}[{i}]", desc.label);
                GpuAttachment::new(device, &label, desc.width, desc.height, desc.shape, *a)
            })
            .collect();
        let depth = desc.depth_attachment().map(|a| {
            let label = format!("{}.depth", desc.label);
            GpuAttachment::new(device, &label, desc.width, desc.height, desc.shape, *a)
        });
        Ok(Self {
            desc: desc.clone(),
            colors,
            depth,
        })
    }

    pub fn attachment_count(&self) -> usize {
        self.colors.len() + usize::from(self.depth.is_some())
    }

    pub fn is_cube(&self) -> bool {
        self.desc.shape == TargetShape::Cube
    }

    pub fn color_formats(&self) -> Vec<wgpu::TextureFormat> {
        self.colors.iter().map(|a| a.format).collect()
    }

    pub fn depth_format(&self) -> Option<wgpu::TextureFormat> {
        self.depth.as_ref().map(|a| a.format)
    }

    pub fn color_attachments(&self, layer: usize, clear: Option<Vec4>) -> Vec<Option<wgpu::RenderPassColorAttachment<'_>>> {
        let load = match clear {
            Some(c) => wgpu::LoadOp::Clear(wgpu::Color {
                r: f64::from(c.x),
                g: f64::from(c.y),
                b: f64::from(c.z),
                a: f64::from(c.w),
            }),
            None => wgpu::LoadOp::Load,
        };
        self.colors
            .iter()
            .map(|a| {
                Some(wgpu::RenderPassColorAttachment {
                    view: &a.layer_views[layer],
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect()
    }

    pub fn depth_attachment(
        &self,
        layer: usize,
        depth_clear: Option<f32>,
        stencil_clear: Option<u8>,
    ) -> Option<wgpu::RenderPassDepthStencilAttachment<'_>> {
        self.depth.as_ref().map(|a| depth_stencil_attachment(a, layer, depth_clear, stencil_clear))
    }
}

pub(super) fn depth_stencil_attachment(
    attachment: &GpuAttachment,
    layer: usize,
    depth_clear: Option<f32>,
    stencil_clear: Option<u8>,
) -> wgpu::RenderPassDepthStencilAttachment<'_> {
    wgpu::RenderPassDepthStencilAttachment {
        view: &attachment.layer_views[layer],
        depth_ops: Some(wgpu::Operations {
            load: depth_clear.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
            store: wgpu::StoreOp::Store,
        }),
        stencil_ops: attachment.format.has_stencil_aspect().then(|| wgpu::Operations {
            load: stencil_clear.map_or(wgpu::LoadOp::Load, |s| wgpu::LoadOp::Clear(u32::from(s))),
            store: wgpu::StoreOp::Store,
        }),
    }
}

fn view_dimension(shape: TargetShape) -> wgpu::TextureViewDimension {
    match shape {
        TargetShape::Flat => wgpu::TextureViewDimension::D2,
        TargetShape::Cube => wgpu::TextureViewDimension::Cube,
    }
}

/// Standalone texture
pub(super) struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub depth: bool,
    pub cube: bool,
    pub sampler: SamplerKey,
}

impl GpuTexture {
    pub fn new(device: &wgpu::Device, desc: &TextureDescriptor) -> Self {
        let format = convert::texture_format(desc.format);
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
        if desc.format.is_depth() {
            // Depth textures are initialised by clearing
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.shape.layers(),
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&desc.label),
            dimension: Some(view_dimension(desc.shape)),
            aspect: if desc.format.is_depth() {
                wgpu::TextureAspect::DepthOnly
            } else {
                wgpu::TextureAspect::All
            },
            ..Default::default()
        });
        Self {
            texture,
            view,
            depth: desc.format.is_depth(),
            cube: desc.shape == TargetShape::Cube,
            sampler: SamplerKey {
                filter: desc.filter,
                address: desc.address_mode,
            },
        }
    }
}

/// Sampler cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) struct SamplerKey {
    pub filter: FilterMode,
    pub address: AddressMode,
}

impl SamplerKey {
    pub const NEAREST_CLAMP: Self = Self {
        filter: FilterMode::Nearest,
        address: AddressMode::ClampToEdge,
    };

    pub const ALL: [Self; 4] = [
        Self::NEAREST_CLAMP,
        Self {
            filter: FilterMode::Linear,
            address: AddressMode::ClampToEdge,
        },
        Self {
            filter: FilterMode::Nearest,
            address: AddressMode::Repeat,
        },
        Self {
            filter: FilterMode::Linear,
            address: AddressMode::Repeat,
        },
    ];

    pub fn create(&self, device: &wgpu::Device) -> wgpu::Sampler {
        let address = convert::address_mode(self.address);
        let filter = convert::filter_mode(self.filter);
        device.create_sampler(&wgpu::SamplerDescriptor {
            label: None,
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        })
    }
}

/// Uploaded mesh. Empty meshes keep no buffers.
pub(super) struct GpuMesh {
    pub buffers: Option<(wgpu::Buffer, wgpu::Buffer)>,
    pub index_count: u32,
}

/// Compiled program with its CPU-side uniform block
pub(super) struct GpuProgram {
    pub info: &'static ProgramInfo,
    pub layout: UniformLayout,
    pub uniforms: Vec<u8>,
    pub module: wgpu::ShaderModule,
    pub uniform_group_layout: wgpu::BindGroupLayout,
    pub texture_group_layout: wgpu::BindGroupLayout,
    pub pipeline_layout: wgpu::PipelineLayout,
}

impl GpuProgram {
    pub fn new(device: &wgpu::Device, info: &'static ProgramInfo) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(info.name),
            source: wgpu::ShaderSource::Wgsl(info.source.into()),
        });
        let uniform_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(info.name),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let texture_entries: Vec<wgpu::BindGroupLayoutEntry> = info
            .textures
            .iter()
            .flat_map(|(unit, slot)| texture_layout_entries(*unit, *slot))
            .collect();
        let texture_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(info.name),
            entries: &texture_entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(info.name),
            bind_group_layouts: &[&uniform_group_layout, &texture_group_layout],
            push_constant_ranges: &[],
        });
        let layout = info.uniform_layout();
        Self {
            info,
            uniforms: vec![0; layout.size as usize],
            layout,
            module,
            uniform_group_layout,
            texture_group_layout,
            pipeline_layout,
        }
    }
}

fn texture_layout_entries(unit: u32, slot: TextureSlot) -> [wgpu::BindGroupLayoutEntry; 2] {
    let binding = ProgramInfo::texture_binding(unit);
    let (sample_type, view_dimension, sampler) = match slot {
        TextureSlot::Float2d => (
            wgpu::TextureSampleType::Float { filterable: true },
            wgpu::TextureViewDimension::D2,
            wgpu::SamplerBindingType::Filtering,
        ),
        TextureSlot::FloatCube => (
            wgpu::TextureSampleType::Float { filterable: true },
            wgpu::TextureViewDimension::Cube,
            wgpu::SamplerBindingType::Filtering,
        ),
        TextureSlot::Depth2d => (
            wgpu::TextureSampleType::Depth,
            wgpu::TextureViewDimension::D2,
            wgpu::SamplerBindingType::NonFiltering,
        ),
        TextureSlot::DepthCube => (
            wgpu::TextureSampleType::Depth,
            wgpu::TextureViewDimension::Cube,
            wgpu::SamplerBindingType::NonFiltering,
        ),
    };
    [
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type,
                view_dimension,
                multisampled: false,
            },
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: binding + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(sampler),
            count: None,
        },
    ]
}

/// Bytes per texel of a format the backend uploads or reads back
pub(super) fn texel_size(format: wgpu::TextureFormat) -> Option<u32> {
    match format {
        wgpu::TextureFormat::R16Float => Some(2),
        wgpu::TextureFormat::Rgba8Unorm
        | wgpu::TextureFormat::Rgba8UnormSrgb
        | wgpu::TextureFormat::Bgra8Unorm
        | wgpu::TextureFormat::Bgra8UnormSrgb
        | wgpu::TextureFormat::R32Float => Some(4),
        wgpu::TextureFormat::Rgba16Float => Some(8),
        _ => None,
    }
}

fn unorm8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Pack RGBA texels into the byte layout of a color format
pub(super) fn encode_texels(format: wgpu::TextureFormat, texels: &[f32]) -> Option<Vec<u8>> {
    let rgba = texels.chunks_exact(4);
    let bytes = match format {
        wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb => {
            rgba.flat_map(|t| [unorm8(t[0]), unorm8(t[1]), unorm8(t[2]), unorm8(t[3])]).collect()
        }
        wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb => {
            rgba.flat_map(|t| [unorm8(t[2]), unorm8(t[1]), unorm8(t[0]), unorm8(t[3])]).collect()
        }
        wgpu::TextureFormat::Rgba16Float => rgba
            .flatten()
            .flat_map(|v| f16::from_f32(*v).to_le_bytes())
            .collect(),
        wgpu::TextureFormat::R16Float => rgba.flat_map(|t| f16::from_f32(t[0]).to_le_bytes()).collect(),
        _ => return None,
    };
    Some(bytes)
}

/// Unpack one texel. Missing channels read as zero, missing alpha as one.
pub(super) fn decode_texel(format: wgpu::TextureFormat, bytes: &[u8]) -> Vec4 {
    let unorm = |b: u8| f32::from(b) / 255.0;
    let half = |i: usize| f16::from_le_bytes([bytes[i], bytes[i + 1]]).to_f32();
    match format {
        wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb => {
            Vec4::new(unorm(bytes[0]), unorm(bytes[1]), unorm(bytes[2]), unorm(bytes[3]))
        }
        wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb => {
            Vec4::new(unorm(bytes[2]), unorm(bytes[1]), unorm(bytes[0]), unorm(bytes[3]))
        }
        wgpu::TextureFormat::Rgba16Float => Vec4::new(half(0), half(2), half(4), half(6)),
        wgpu::TextureFormat::R16Float => Vec4::new(half(0), 0.0, 0.0, 1.0),
        wgpu::TextureFormat::R32Float => {
            let d = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            Vec4::new(d, 0.0, 0.0, 1.0)
        }
        _ => Vec4::ZERO,
    }
}

/// Row pitch of a buffer copy, padded to the copy alignment
pub(super) fn padded_row_bytes(width: u32, texel: u32) -> u32 {
    (width * texel).next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_texels_survive_encoding() {
        let texels = [0.25, -1.5, 2.0, 1.0];
        let bytes = encode_texels(wgpu::TextureFormat::Rgba16Float, &texels).unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(
            decode_texel(wgpu::TextureFormat::Rgba16Float, &bytes),
            Vec4::new(0.25, -1.5, 2.0, 1.0)
        );
    }

    #[test]
    fn test_bgra_swaps_channels() {
        let bytes = encode_texels(wgpu::TextureFormat::Bgra8Unorm, &[1.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(bytes, vec![0, 0, 255, 255]);
        assert_eq!(decode_texel(wgpu::TextureFormat::Bgra8Unorm, &bytes), Vec4::new(1.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn test_single_channel_formats() {
        let bytes = encode_texels(wgpu::TextureFormat::R16Float, &[0.5, 0.9, 0.9, 0.9]).unwrap();
        assert_eq!(bytes.len(), 2);
        assert_eq!(decode_texel(wgpu::TextureFormat::R16Float, &bytes), Vec4::new(0.5, 0.0, 0.0, 1.0));
        assert_eq!(encode_texels(wgpu::TextureFormat::Depth32Float, &[1.0]), None);
    }

    #[test]
    fn test_row_padding() {
        assert_eq!(padded_row_bytes(1, 4), 256);
        assert_eq!(padded_row_bytes(64, 4), 256);
        assert_eq!(padded_row_bytes(65, 4), 512);
    }
}
