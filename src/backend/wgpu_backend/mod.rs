//! wgpu backend implementation
//!
//! Immediate-mode calls are recorded into one command encoder per frame. Every
//! draw and every clear is its own render pass that loads the bound target, so
//! state can change freely between draws. Pipelines are built on first use for
//! each combination of program, [`RenderState`] and target formats.
//!
//! The presentation surface is an offscreen target copied to the swapchain in
//! [`GraphicsBackend::end_frame`], which keeps it readable and lets the backend
//! run without a window.

mod convert;
mod internal;
mod resources;

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use wgpu::util::DeviceExt;

use self::internal::{InternalOutput, InternalProgram};
use self::resources::{
    decode_texel, depth_stencil_attachment, encode_texels, padded_row_bytes, texel_size, GpuAttachment,
    GpuMesh, GpuProgram, GpuTarget, GpuTexture, SamplerKey,
};
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::Mesh;
use crate::shaders::{self, units, TextureSlot, UniformKind, VertexInput, SUBROUTINE_UNIFORM};

/// Pipeline cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: u64,
    state: RenderState,
    colors: Vec<wgpu::TextureFormat>,
    depth: Option<wgpu::TextureFormat>,
}

/// Geometry of one draw
#[derive(Debug, Clone, Copy)]
enum Geometry {
    Mesh(u64),
    Fullscreen,
}

/// Window surface plus the program that copies the offscreen surface into it
struct Presentation {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    program: InternalProgram,
    frame: Option<wgpu::SurfaceTexture>,
}

/// Views bound to units nothing else is bound to
struct Fallbacks {
    float_2d: wgpu::TextureView,
    float_cube: wgpu::TextureView,
    depth_2d: wgpu::TextureView,
    depth_cube: wgpu::TextureView,
    _textures: Vec<wgpu::Texture>,
}

impl Fallbacks {
    fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let create = |label: &str, format: wgpu::TextureFormat, layers: u32| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: layers,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            })
        };
        let view = |texture: &wgpu::Texture, dimension: wgpu::TextureViewDimension| {
            texture.create_view(&wgpu::TextureViewDescriptor {
                dimension: Some(dimension),
                ..Default::default()
            })
        };

        // Unbound color units sample opaque black
        let float_2d = create("fallback_2d", wgpu::TextureFormat::Rgba8Unorm, 1);
        let float_cube = create("fallback_cube", wgpu::TextureFormat::Rgba8Unorm, 6);
        for (texture, layers) in [(&float_2d, 1u32), (&float_cube, 6)] {
            let texels: Vec<u8> = [0u8, 0, 0, 255].repeat(layers as usize);
            queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &texels,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(4),
                    rows_per_image: Some(1),
                },
                wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: layers,
                },
            );
        }

        // Unbound depth units read as the far plane
        let depth_2d = create("fallback_depth_2d", wgpu::TextureFormat::Depth32Float, 1);
        let depth_cube = create("fallback_depth_cube", wgpu::TextureFormat::Depth32Float, 6);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Fallback Init"),
        });
        for (texture, layers) in [(&depth_2d, 1u32), (&depth_cube, 6)] {
            for layer in 0..layers {
                clear_depth_layer(&mut encoder, texture, layer, 1.0);
            }
        }
        queue.submit(std::iter::once(encoder.finish()));

        Self {
            float_2d: view(&float_2d, wgpu::TextureViewDimension::D2),
            float_cube: view(&float_cube, wgpu::TextureViewDimension::Cube),
            depth_2d: view(&depth_2d, wgpu::TextureViewDimension::D2),
            depth_cube: view(&depth_cube, wgpu::TextureViewDimension::Cube),
            _textures: vec![float_2d, float_cube, depth_2d, depth_cube],
        }
    }

    fn view(&self, slot: TextureSlot) -> &wgpu::TextureView {
        match slot {
            TextureSlot::Float2d => &self.float_2d,
            TextureSlot::FloatCube => &self.float_cube,
            TextureSlot::Depth2d => &self.depth_2d,
            TextureSlot::DepthCube => &self.depth_cube,
        }
    }
}

fn clear_depth_layer(encoder: &mut wgpu::CommandEncoder, texture: &wgpu::Texture, layer: u32, depth: f32) {
    let view = texture.create_view(&wgpu::TextureViewDescriptor {
        dimension: Some(wgpu::TextureViewDimension::D2),
        base_array_layer: layer,
        array_layer_count: Some(1),
        ..Default::default()
    });
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("Depth Init"),
        color_attachments: &[],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view: &view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(depth),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    });
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

/// Clamp to device limits while maintaining aspect ratio
fn clamp_extent(width: u32, height: u32, max_size: u32) -> (u32, u32) {
    if width > max_size || height > max_size {
        let scale = (max_size as f32 / width as f32).min(max_size as f32 / height as f32);
        (
            ((width as f32 * scale) as u32).max(1),
            ((height as f32 * scale) as u32).max(1),
        )
    } else {
        (width.max(1), height.max(1))
    }
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    device: wgpu::Device,
    queue: wgpu::Queue,
    line_mode: bool,
    presentation: Option<Presentation>,
    surface_target: GpuTarget,

    // Resource storage
    targets: HashMap<u64, GpuTarget>,
    textures: HashMap<u64, GpuTexture>,
    meshes: HashMap<u64, GpuMesh>,
    programs: HashMap<u64, GpuProgram>,
    program_ids: HashMap<&'static str, u64>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    samplers: HashMap<SamplerKey, wgpu::Sampler>,
    fallbacks: Fallbacks,
    depth_copy: HashMap<wgpu::TextureFormat, InternalProgram>,
    depth_readback: InternalProgram,
    next_id: u64,

    // Bound state
    bound_program: Option<u64>,
    draw_binding: TargetBinding,
    read_target: Option<RenderTargetHandle>,
    viewport: Viewport,
    state: RenderState,
    texture_units: [Option<TextureSource>; units::COUNT],
    stats: FrameStatistics,

    // Command encoding
    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuBackend {
    /// Create a backend presenting to `window`. `WGPU_BACKEND` selects the API.
    pub fn new(window: Arc<winit::window::Window>) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(Some(window), None))
    }

    /// Create a windowless backend whose surface is only readable
    pub fn headless(width: u32, height: u32) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(None, Some((width, height))))
    }

    async fn new_async(
        window: Option<Arc<winit::window::Window>>,
        extent: Option<(u32, u32)>,
    ) -> BackendResult<Self> {
        let backends = wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::all());
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let surface = window
            .as_ref()
            .map(|w| instance.create_surface(Arc::clone(w)))
            .transpose()
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: surface.as_ref(),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let adapter_info = adapter.get_info();
        info!("Selected GPU: {} ({:?} backend)", adapter_info.name, adapter_info.backend);

        let line_mode = adapter.features().contains(wgpu::Features::POLYGON_MODE_LINE);
        let required_features = if line_mode {
            wgpu::Features::POLYGON_MODE_LINE
        } else {
            wgpu::Features::empty()
        };
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Shading Device"),
                    required_features,
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;
        device.on_uncaptured_error(Box::new(|e| error!("wgpu: {e}")));
        if !line_mode {
            debug!("Adapter lacks line polygon mode; wireframes draw filled");
        }

        let max_size = device.limits().max_texture_dimension_2d;
        let (width, height) = match (&window, extent) {
            (Some(w), _) => {
                let size = w.inner_size();
                clamp_extent(size.width, size.height, max_size)
            }
            (None, Some((w, h))) => clamp_extent(w, h, max_size),
            (None, None) => (1, 1),
        };

        let presentation = match surface {
            Some(surface) => {
                let caps = surface.get_capabilities(&adapter);
                // The post chain applies gamma itself
                let format = caps
                    .formats
                    .iter()
                    .copied()
                    .find(|f| !f.is_srgb())
                    .or_else(|| caps.formats.first().copied())
                    .ok_or_else(|| BackendError::SurfaceCreationFailed("surface reports no formats".into()))?;
                if format.is_srgb() {
                    warn!("Only sRGB surface formats available; output will be gamma corrected twice");
                }
                let config = wgpu::SurfaceConfiguration {
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    format,
                    width,
                    height,
                    present_mode: wgpu::PresentMode::AutoVsync,
                    alpha_mode: caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
                    view_formats: vec![],
                    desired_maximum_frame_latency: 2,
                };
                surface.configure(&device, &config);
                let program = InternalProgram::new(
                    &device,
                    "Present",
                    &internal::present_source(),
                    wgpu::TextureSampleType::Float { filterable: false },
                    InternalOutput::Color(format),
                );
                Some(Presentation {
                    surface,
                    config,
                    program,
                    frame: None,
                })
            }
            None => None,
        };

        let surface_target = GpuTarget::new(&device, &surface_descriptor(width, height))?;
        let samplers = SamplerKey::ALL.iter().map(|k| (*k, k.create(&device))).collect();
        let fallbacks = Fallbacks::new(&device, &queue);
        let depth_readback = InternalProgram::new(
            &device,
            "Depth Readback",
            &internal::depth_readback_source(),
            wgpu::TextureSampleType::Depth,
            InternalOutput::Color(wgpu::TextureFormat::R32Float),
        );

        Ok(Self {
            instance,
            device,
            queue,
            line_mode,
            presentation,
            surface_target,
            targets: HashMap::new(),
            textures: HashMap::new(),
            meshes: HashMap::new(),
            programs: HashMap::new(),
            program_ids: HashMap::new(),
            pipelines: HashMap::new(),
            samplers,
            fallbacks,
            depth_copy: HashMap::new(),
            depth_readback,
            next_id: 1,
            bound_program: None,
            draw_binding: TargetBinding::Surface,
            read_target: None,
            viewport: Viewport::full(width, height),
            state: RenderState::default(),
            texture_units: [None; units::COUNT],
            stats: FrameStatistics::default(),
            encoder: None,
        })
    }

    /// Get the wgpu device
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Get the wgpu queue
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn encoder_mut(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.device;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            })
        })
    }

    /// Submit everything recorded so far
    fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    fn binding_target(&self, binding: TargetBinding) -> Option<(&GpuTarget, usize)> {
        match binding {
            TargetBinding::Surface => Some((&self.surface_target, 0)),
            TargetBinding::Target(h) => self.targets.get(&h.0).map(|t| (t, 0)),
            TargetBinding::Face(h, face) => self
                .targets
                .get(&h.0)
                .filter(|t| t.is_cube())
                .map(|t| (t, face.layer() as usize)),
        }
    }

    fn bound_target_id(&self) -> Option<u64> {
        match self.draw_binding {
            TargetBinding::Surface => None,
            TargetBinding::Target(h) | TargetBinding::Face(h, _) => Some(h.0),
        }
    }

    /// Resolve what a unit samples for `slot`, falling back to the slot's
    /// default when the unit is empty, mismatched or the current draw target.
    fn resolve_unit(&self, unit: u32, slot: TextureSlot, drawing: Option<u64>) -> (&wgpu::TextureView, SamplerKey) {
        let wants_depth = matches!(slot, TextureSlot::Depth2d | TextureSlot::DepthCube);
        let wants_cube = matches!(slot, TextureSlot::FloatCube | TextureSlot::DepthCube);
        let fallback = (self.fallbacks.view(slot), SamplerKey::NEAREST_CLAMP);

        let source = self.texture_units.get(unit as usize).copied().flatten();
        let resolved = match source {
            Some(TextureSource::Attachment { target, index }) if Some(target.0) != drawing => {
                self.targets.get(&target.0).and_then(|t| {
                    let a = t.colors.get(index)?;
                    let filter = if a.desc.filtered {
                        FilterMode::Linear
                    } else {
                        FilterMode::Nearest
                    };
                    let key = SamplerKey {
                        filter,
                        address: AddressMode::ClampToEdge,
                    };
                    (!wants_depth && wants_cube == t.is_cube()).then_some((&a.sampled_view, key))
                })
            }
            Some(TextureSource::Depth(target)) if Some(target.0) != drawing => self.targets.get(&target.0).and_then(|t| {
                let a = t.depth.as_ref().filter(|a| a.desc.sampled)?;
                (wants_depth && wants_cube == t.is_cube()).then_some((&a.sampled_view, SamplerKey::NEAREST_CLAMP))
            }),
            Some(TextureSource::Texture(handle)) => self.textures.get(&handle.0).and_then(|t| {
                let key = if t.depth { SamplerKey::NEAREST_CLAMP } else { t.sampler };
                (wants_depth == t.depth && wants_cube == t.cube).then_some((&t.view, key))
            }),
            _ => None,
        };
        if resolved.is_none() && source.is_some() {
            trace!("Unit {unit} source {source:?} does not fit {slot:?}; using fallback");
        }
        resolved.unwrap_or(fallback)
    }

    fn ensure_pipeline(&mut self, key: &PipelineKey) {
        if self.pipelines.contains_key(key) {
            return;
        }
        let Some(program) = self.programs.get(&key.program) else {
            return;
        };
        let info = program.info;
        debug!(
            "Building pipeline for {} ({} color targets, depth {:?})",
            info.name,
            key.colors.len(),
            key.depth
        );
        let attributes = convert::vertex_attributes();
        let buffers = match info.vertex {
            VertexInput::Mesh => vec![wgpu::VertexBufferLayout {
                array_stride: Vertex::STRIDE,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &attributes,
            }],
            VertexInput::Fullscreen => Vec::new(),
        };
        let color_targets: Vec<Option<wgpu::ColorTargetState>> = key
            .colors
            .iter()
            .enumerate()
            .map(|(location, format)| {
                // Locations the program never writes must be masked off
                let write_mask = if location < info.color_outputs {
                    convert::color_writes(key.state.color_writes)
                } else {
                    wgpu::ColorWrites::empty()
                };
                Some(wgpu::ColorTargetState {
                    format: *format,
                    blend: key.state.blend.as_ref().map(convert::blend_state),
                    write_mask,
                })
            })
            .collect();

        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(info.name),
            layout: Some(&program.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &program.module,
                entry_point: shaders::VERTEX_ENTRY,
                buffers: &buffers,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &program.module,
                entry_point: shaders::FRAGMENT_ENTRY,
                targets: &color_targets,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: convert::primitive_state(&key.state, self.line_mode),
            depth_stencil: key.depth.map(|f| convert::depth_stencil_state(&key.state, f)),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });
        self.pipelines.insert(key.clone(), pipeline);
    }

    fn draw(&mut self, geometry: Geometry) {
        let Some(program_id) = self.bound_program else {
            warn!("Draw without a bound program");
            return;
        };
        let Some((target, _)) = self.binding_target(self.draw_binding) else {
            warn!("Draw into a destroyed render target");
            return;
        };
        let key = PipelineKey {
            program: program_id,
            state: self.state,
            colors: target.color_formats(),
            depth: target.depth_format(),
        };
        self.ensure_pipeline(&key);

        self.encoder_mut();
        let Some(mut encoder) = self.encoder.take() else {
            return;
        };
        let recorded = self.record_draw(&mut encoder, &key, geometry);
        self.encoder = Some(encoder);
        if recorded {
            self.stats.draw_calls += 1;
        }
    }

    /// Record one draw as its own render pass. Returns whether anything was drawn.
    fn record_draw(&self, encoder: &mut wgpu::CommandEncoder, key: &PipelineKey, geometry: Geometry) -> bool {
        let (Some(program), Some(pipeline), Some((target, layer))) = (
            self.programs.get(&key.program),
            self.pipelines.get(key),
            self.binding_target(self.draw_binding),
        ) else {
            return false;
        };

        let (tw, th) = (target.desc.width, target.desc.height);
        let x = self.viewport.x.min(tw);
        let y = self.viewport.y.min(th);
        let (w, h) = (self.viewport.width.min(tw - x), self.viewport.height.min(th - y));
        if w == 0 || h == 0 {
            return false;
        }

        let uniform_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(program.info.name),
            contents: &program.uniforms,
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let uniform_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(program.info.name),
            layout: &program.uniform_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let drawing = self.bound_target_id();
        let resolved: Vec<(u32, &wgpu::TextureView, &wgpu::Sampler)> = program
            .info
            .textures
            .iter()
            .filter_map(|(unit, slot)| {
                let (view, key) = self.resolve_unit(*unit, *slot, drawing);
                self.samplers.get(&key).map(|s| (*unit, view, s))
            })
            .collect();
        let texture_entries: Vec<wgpu::BindGroupEntry> = resolved
            .iter()
            .flat_map(|(unit, view, sampler)| {
                let binding = shaders::ProgramInfo::texture_binding(*unit);
                [
                    wgpu::BindGroupEntry {
                        binding,
                        resource: wgpu::BindingResource::TextureView(view),
                    },
                    wgpu::BindGroupEntry {
                        binding: binding + 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                ]
            })
            .collect();
        let texture_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(program.info.name),
            layout: &program.texture_group_layout,
            entries: &texture_entries,
        });

        let color_attachments = target.color_attachments(layer, None);
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(program.info.name),
            color_attachments: &color_attachments,
            depth_stencil_attachment: target.depth_attachment(layer, None, None),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &uniform_group, &[]);
        pass.set_bind_group(1, &texture_group, &[]);
        pass.set_viewport(x as f32, y as f32, w as f32, h as f32, 0.0, 1.0);
        if let Some(stencil) = self.state.stencil {
            pass.set_stencil_reference(u32::from(stencil.reference));
        }
        match geometry {
            Geometry::Mesh(id) => {
                let Some(mesh) = self.meshes.get(&id) else {
                    return false;
                };
                let Some((vertices, indices)) = mesh.buffers.as_ref() else {
                    return false;
                };
                pass.set_vertex_buffer(0, vertices.slice(..));
                pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..mesh.index_count, 0, 0..1);
            }
            Geometry::Fullscreen => pass.draw(0..3, 0..1),
        }
        true
    }

    /// Copy depth between targets of different depth formats by drawing
    fn copy_depth_by_draw(&mut self, source: u64, layer: usize) -> BackendResult<()> {
        let Some((target, _)) = self.binding_target(self.draw_binding) else {
            return Err(BackendError::InvalidHandle("render target"));
        };
        let format = target
            .depth_format()
            .ok_or_else(|| BackendError::Unsupported("depth blit into a target without depth".into()))?;
        if !self.depth_copy.contains_key(&format) {
            let program = InternalProgram::new(
                &self.device,
                "Depth Copy",
                &internal::depth_copy_source(),
                wgpu::TextureSampleType::Depth,
                InternalOutput::Depth(format),
            );
            self.depth_copy.insert(format, program);
        }

        let this = &*self;
        let source_view = this
            .targets
            .get(&source)
            .and_then(|t| t.depth.as_ref())
            .and_then(|a| a.depth_layer_views.first())
            .ok_or_else(|| BackendError::Unsupported("depth blit from a target without depth".into()))?;
        let (Some(program), Some((target, _))) =
            (this.depth_copy.get(&format), this.binding_target(this.draw_binding))
        else {
            return Ok(());
        };
        let Some(depth) = target.depth.as_ref() else {
            return Ok(());
        };
        let group = program.bind_group(&this.device, source_view);
        let mut encoder = this
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Depth Copy") });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Depth Copy"),
                color_attachments: &[],
                depth_stencil_attachment: Some(depth_stencil_attachment(depth, layer, None, None)),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &group, &[]);
            pass.draw(0..3, 0..1);
        }
        let commands = encoder.finish();
        // Keep submission order: frame work first, then the copy
        self.flush();
        self.queue.submit(std::iter::once(commands));
        Ok(())
    }

    /// Render one depth layer into an `R32Float` texture so it can be copied out
    fn depth_to_color(&mut self, target: RenderTargetHandle, layer: u32) -> BackendResult<(wgpu::Texture, u32, u32)> {
        self.flush();
        let t = self
            .targets
            .get(&target.0)
            .ok_or(BackendError::InvalidHandle("render target"))?;
        let depth = t
            .depth
            .as_ref()
            .ok_or_else(|| BackendError::ReadbackFailed("target has no depth attachment".into()))?;
        let view = depth
            .depth_layer_views
            .get(layer as usize)
            .ok_or_else(|| BackendError::ReadbackFailed(format!("layer {layer} out of range")))?;
        let (width, height) = (t.desc.width, t.desc.height);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Depth Readback"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Float,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let output = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let group = self.depth_readback.bind_group(&self.device, view);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Depth Readback") });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Depth Readback"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &output,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.depth_readback.pipeline);
            pass.set_bind_group(0, &group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok((texture, width, height))
    }

    /// Copy one layer of a color texture to the CPU. Pending frame work must
    /// already be submitted.
    fn download(
        &self,
        texture: &wgpu::Texture,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        layer: u32,
    ) -> BackendResult<PixelBuffer> {
        let texel = texel_size(format)
            .ok_or_else(|| BackendError::ReadbackFailed(format!("cannot read back {format:?}")))?;
        let row = padded_row_bytes(width, texel);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback"),
            size: u64::from(row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Readback") });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let status = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&status);
        slice.map_async(wgpu::MapMode::Read, move |result| *slot.lock() = Some(result));
        let _ = self.device.poll(wgpu::Maintain::Wait);
        match status.lock().take() {
            Some(Ok(())) => {}
            Some(Err(e)) => return Err(BackendError::ReadbackFailed(e.to_string())),
            None => return Err(BackendError::ReadbackFailed("buffer map did not complete".into())),
        }

        let pixels = {
            let data = slice.get_mapped_range();
            data.chunks_exact(row as usize)
                .flat_map(|line| {
                    line[..(width * texel) as usize]
                        .chunks_exact(texel as usize)
                        .map(|bytes| decode_texel(format, bytes))
                })
                .collect()
        };
        buffer.unmap();
        Ok(PixelBuffer::new(width, height, pixels))
    }

    fn present(&mut self) {
        let Some(presentation) = self.presentation.as_mut() else {
            return;
        };
        let Some(frame) = presentation.frame.take() else {
            return;
        };
        let Some(source) = self.surface_target.colors.first() else {
            return;
        };
        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let group = presentation.program.bind_group(&self.device, &source.layer_views[0]);
        let encoder = self.encoder.get_or_insert_with(|| {
            self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            })
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Present"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&presentation.program.pipeline);
            pass.set_bind_group(0, &group, &[]);
            pass.draw(0..3, 0..1);
        }
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        frame.present();
    }
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface_target.desc.width, self.surface_target.desc.height)
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let (width, height) = clamp_extent(width, height, self.device.limits().max_texture_dimension_2d);
        if let Some(presentation) = self.presentation.as_mut() {
            presentation.frame = None;
            presentation.config.width = width;
            presentation.config.height = height;
            presentation.surface.configure(&self.device, &presentation.config);
        }
        match GpuTarget::new(&self.device, &surface_descriptor(width, height)) {
            Ok(target) => self.surface_target = target,
            Err(e) => error!("Surface resize failed: {e}"),
        }
    }

    fn begin_frame(&mut self) -> BackendResult<()> {
        self.stats.reset();
        let Some(presentation) = self.presentation.as_mut() else {
            return Ok(());
        };
        let frame = match presentation.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                presentation.surface.configure(&self.device, &presentation.config);
                return Err(BackendError::SurfaceLost);
            }
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(BackendError::OutOfMemory),
            Err(e) => return Err(BackendError::AcquireImageFailed(e.to_string())),
        };
        presentation.frame = Some(frame);
        Ok(())
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        if self.presentation.is_some() {
            self.present();
        }
        self.flush();
        Ok(())
    }

    fn create_render_target(
        &mut self,
        desc: &RenderTargetDescriptor,
    ) -> BackendResult<RenderTargetHandle> {
        let target = GpuTarget::new(&self.device, desc)?;
        let id = self.allocate_id();
        self.targets.insert(id, target);
        Ok(RenderTargetHandle(id))
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        if let Some(t) = self.targets.remove(&target.0) {
            for attachment in t.colors.iter().chain(t.depth.iter()) {
                attachment.texture.destroy();
            }
        }
    }

    fn render_target_status(&self, target: RenderTargetHandle) -> TargetStatus {
        match self.targets.get(&target.0) {
            None => TargetStatus::Missing,
            Some(t) if t.attachment_count() == 0 => TargetStatus::Incomplete("no attachments".into()),
            Some(_) => TargetStatus::Complete,
        }
    }

    fn live_attachment_count(&self) -> usize {
        self.targets.values().map(GpuTarget::attachment_count).sum()
    }

    fn create_texture(
        &mut self,
        desc: &TextureDescriptor,
        data: &[f32],
    ) -> BackendResult<TextureHandle> {
        let layers = desc.shape.layers();
        let channels = if desc.format.is_depth() { 1 } else { 4 };
        let expected = (desc.width * desc.height * layers) as usize * channels;
        if !data.is_empty() && data.len() != expected {
            return Err(BackendError::TextureCreationFailed(format!(
                "'{}' expects {expected} values, got {}",
                desc.label,
                data.len()
            )));
        }

        let texture = GpuTexture::new(&self.device, desc);
        let format = convert::texture_format(desc.format);
        if desc.format.is_depth() {
            // Depth formats cannot be written from the CPU; clear to the first value
            let value = data.first().copied().unwrap_or(1.0);
            if data.iter().any(|d| *d != value) {
                warn!("'{}': non-uniform depth data, using {value}", desc.label);
            }
            let encoder = self.encoder_mut();
            for layer in 0..layers {
                clear_depth_layer(encoder, &texture.texture, layer, value);
            }
        } else if !data.is_empty() {
            let bytes = encode_texels(format, data)
                .ok_or_else(|| BackendError::TextureCreationFailed(format!("cannot upload {format:?}")))?;
            let texel = texel_size(format).unwrap_or(4);
            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &bytes,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(desc.width * texel),
                    rows_per_image: Some(desc.height),
                },
                wgpu::Extent3d {
                    width: desc.width,
                    height: desc.height,
                    depth_or_array_layers: layers,
                },
            );
        }

        let id = self.allocate_id();
        self.textures.insert(id, texture);
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(t) = self.textures.remove(&texture.0) {
            t.texture.destroy();
        }
    }

    fn create_mesh(&mut self, mesh: &Mesh) -> BackendResult<MeshHandle> {
        let buffers = (!mesh.indices.is_empty() && !mesh.vertices.is_empty()).then(|| {
            let vertices = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&mesh.name),
                contents: bytemuck::cast_slice(&mesh.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
            let indices = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&mesh.name),
                contents: bytemuck::cast_slice(&mesh.indices),
                usage: wgpu::BufferUsages::INDEX,
            });
            (vertices, indices)
        });
        let id = self.allocate_id();
        self.meshes.insert(
            id,
            GpuMesh {
                buffers,
                index_count: mesh.indices.len() as u32,
            },
        );
        Ok(MeshHandle(id))
    }

    fn destroy_mesh(&mut self, mesh: MeshHandle) {
        self.meshes.remove(&mesh.0);
    }

    fn create_shader(&mut self, name: &str) -> BackendResult<ShaderHandle> {
        let info = shaders::program_info(name).ok_or_else(|| BackendError::ShaderNotFound(name.into()))?;
        if let Some(id) = self.program_ids.get(info.name) {
            return Ok(ShaderHandle(*id));
        }
        shaders::compile(info).map_err(BackendError::ShaderCompilationFailed)?;
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let program = GpuProgram::new(&self.device, info);
        if let Some(e) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::PipelineCreationFailed(format!("{name}: {e}")));
        }
        debug!("Compiled program {name}");
        let id = self.allocate_id();
        self.programs.insert(id, program);
        self.program_ids.insert(info.name, id);
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
        if name == SUBROUTINE_UNIFORM {
            return;
        }
        let Some(program) = self.bound_program.and_then(|id| self.programs.get_mut(&id)) else {
            return;
        };
        let Some(field) = program.layout.field(name).copied() else {
            return;
        };
        let offset = field.offset as usize;
        let out = &mut program.uniforms;
        let mut write = |bytes: &[u8]| out[offset..offset + bytes.len()].copy_from_slice(bytes);
        match field.kind {
            UniformKind::Float => write(bytemuck::bytes_of(&value.as_float())),
            UniformKind::Int => write(bytemuck::bytes_of(&value.as_int())),
            UniformKind::Vec2 => write(bytemuck::bytes_of(&value.as_vec2())),
            UniformKind::Vec3 => write(bytemuck::bytes_of(&value.as_vec3())),
            UniformKind::Vec4 => write(bytemuck::bytes_of(&value.as_vec4())),
            UniformKind::Mat4 => write(bytemuck::bytes_of(&value.as_mat4())),
            UniformKind::Vec4Array(capacity) => {
                let values: Vec<glam::Vec4> = match value {
                    UniformValue::Vec4Array(v) => v,
                    UniformValue::Mat4Array(m) => m.iter().flat_map(|m| m.to_cols_array_2d()).map(glam::Vec4::from).collect(),
                    other => vec![other.as_vec4()],
                };
                let count = values.len().min(capacity);
                write(bytemuck::cast_slice(&values[..count]));
            }
        }
    }

    fn set_subroutine(&mut self, _stage: ShaderStage, name: &str) {
        let Some(program) = self.bound_program.and_then(|id| self.programs.get_mut(&id)) else {
            return;
        };
        let Some(index) = program.info.subroutines.iter().position(|s| *s == name) else {
            warn!("{} has no subroutine '{name}'", program.info.name);
            return;
        };
        if let Some(field) = program.layout.field(SUBROUTINE_UNIFORM) {
            let offset = field.offset as usize;
            program.uniforms[offset..offset + 4].copy_from_slice(bytemuck::bytes_of(&(index as i32)));
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
        self.encoder_mut();
        let Self {
            encoder,
            targets,
            surface_target,
            draw_binding,
            ..
        } = self;
        let (target, layer) = match *draw_binding {
            TargetBinding::Surface => (Some(&*surface_target), 0),
            TargetBinding::Target(h) => (targets.get(&h.0), 0),
            TargetBinding::Face(h, face) => (targets.get(&h.0), face.layer() as usize),
        };
        let (Some(target), Some(encoder)) = (target, encoder.as_mut()) else {
            warn!("Clear of a destroyed render target");
            return;
        };
        let color_attachments = target.color_attachments(layer, values.color);
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: target.depth_attachment(layer, values.depth, values.stencil),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
    }

    fn blit_framebuffer(&mut self, mask: BlitMask) -> BackendResult<()> {
        let source_handle = self
            .read_target
            .ok_or_else(|| BackendError::Unsupported("blit without a read target".into()))?;
        let source = self
            .targets
            .get(&source_handle.0)
            .ok_or(BackendError::InvalidHandle("render target"))?;
        let (destination, layer) = self
            .binding_target(self.draw_binding)
            .ok_or(BackendError::InvalidHandle("render target"))?;
        let (width, height) = (source.desc.width, source.desc.height);
        if destination.desc.width != width || destination.desc.height != height {
            return Err(BackendError::Unsupported(format!(
                "blit between {}x{} and {}x{}",
                width, height, destination.desc.width, destination.desc.height
            )));
        }

        let copy = |src: &GpuAttachment, dst: &GpuAttachment, encoder: &mut wgpu::CommandEncoder| {
            encoder.copy_texture_to_texture(
                src.texture.as_image_copy(),
                wgpu::ImageCopyTexture {
                    texture: &dst.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: 0,
                        y: 0,
                        z: layer as u32,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Blit") });
        if mask.contains(BlitMask::COLOR) {
            if let (Some(src), Some(dst)) = (source.colors.first(), destination.colors.first()) {
                if src.format != dst.format {
                    return Err(BackendError::Unsupported(format!(
                        "color blit from {:?} to {:?}",
                        src.format, dst.format
                    )));
                }
                copy(src, dst, &mut encoder);
            }
        }

        let wants_depth = mask.contains(BlitMask::DEPTH) || mask.contains(BlitMask::STENCIL);
        let mut draw_depth = false;
        if wants_depth {
            match (source.depth.as_ref(), destination.depth.as_ref()) {
                // Depth-stencil copies always carry every aspect
                (Some(src), Some(dst)) if src.format == dst.format => copy(src, dst, &mut encoder),
                (Some(_), Some(_)) if !mask.contains(BlitMask::STENCIL) => draw_depth = true,
                (Some(src), Some(dst)) => {
                    return Err(BackendError::Unsupported(format!(
                        "stencil blit from {:?} to {:?}",
                        src.format, dst.format
                    )))
                }
                _ => trace!("Depth blit skipped: one side has no depth attachment"),
            }
        }

        let commands = encoder.finish();
        self.flush();
        self.queue.submit(std::iter::once(commands));
        if draw_depth {
            self.copy_depth_by_draw(source_handle.0, layer)?;
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
        if !self.meshes.contains_key(&mesh.0) {
            warn!("Draw of a destroyed mesh");
            return;
        }
        self.draw(Geometry::Mesh(mesh.0));
    }

    fn draw_fullscreen(&mut self) {
        self.draw(Geometry::Fullscreen);
    }

    fn read_pixels(&mut self, source: ReadbackSource) -> BackendResult<PixelBuffer> {
        self.flush();
        match source {
            ReadbackSource::Depth { target, layer } => {
                let (texture, width, height) = self.depth_to_color(target, layer)?;
                self.download(&texture, wgpu::TextureFormat::R32Float, width, height, 0)
            }
            ReadbackSource::Surface | ReadbackSource::Color { .. } => {
                let (target, attachment, layer) = match source {
                    ReadbackSource::Color {
                        target,
                        attachment,
                        layer,
                    } => (
                        self.targets
                            .get(&target.0)
                            .ok_or(BackendError::InvalidHandle("render target"))?,
                        attachment,
                        layer,
                    ),
                    _ => (&self.surface_target, 0, 0),
                };
                if layer >= target.desc.shape.layers() {
                    return Err(BackendError::ReadbackFailed(format!("layer {layer} out of range")));
                }
                let a = target
                    .colors
                    .get(attachment)
                    .ok_or_else(|| BackendError::ReadbackFailed(format!("{source:?} has no such attachment")))?;
                self.download(&a.texture, a.format, target.desc.width, target.desc.height, layer)
            }
        }
    }

    fn statistics(&self) -> &FrameStatistics {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_extent_keeps_aspect() {
        assert_eq!(clamp_extent(800, 600, 8192), (800, 600));
        assert_eq!(clamp_extent(16384, 8192, 8192), (8192, 4096));
        assert_eq!(clamp_extent(0, 0, 8192), (1, 1));
    }

    #[test]
    fn test_surface_matches_software_layout() {
        let desc = surface_descriptor(4, 2);
        assert_eq!(desc.color_attachments().count(), 1);
        assert!(desc.depth_attachment().is_some_and(|a| a.format.has_stencil()));
    }
}
