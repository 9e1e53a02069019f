//! Helper programs the backend uses for itself: depth blits, depth readback and
//! presenting the offscreen surface to the swapchain.
//!
//! All three read one texel per fragment with `textureLoad`, so they need no
//! sampler and work on any source format.

const FULLSCREEN_VERTEX: &str = r#"
@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> @builtin(position) vec4<f32> {
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    return vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
}
"#;

const DEPTH_COPY_FRAGMENT: &str = r#"
@group(0) @binding(0) var source: texture_depth_2d;

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> @builtin(frag_depth) f32 {
    return textureLoad(source, vec2<i32>(position.xy), 0);
}
"#;

const DEPTH_READBACK_FRAGMENT: &str = r#"
@group(0) @binding(0) var source: texture_depth_2d;

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    return vec4<f32>(textureLoad(source, vec2<i32>(position.xy), 0), 0.0, 0.0, 1.0);
}
"#;

const PRESENT_FRAGMENT: &str = r#"
@group(0) @binding(0) var source: texture_2d<f32>;

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    return textureLoad(source, vec2<i32>(position.xy), 0);
}
"#;

/// What an internal program writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum InternalOutput {
    Depth(wgpu::TextureFormat),
    Color(wgpu::TextureFormat),
}

pub(super) fn depth_copy_source() -> String {
    format!("{FULLSCREEN_VERTEX}{DEPTH_COPY_FRAGMENT}")
}

pub(super) fn depth_readback_source() -> String {
    format!("{FULLSCREEN_VERTEX}{DEPTH_READBACK_FRAGMENT}")
}

pub(super) fn present_source() -> String {
    format!("{FULLSCREEN_VERTEX}{PRESENT_FRAGMENT}")
}

/// Single-texture full-screen pipeline
pub(super) struct InternalProgram {
    pub layout: wgpu::BindGroupLayout,
    pub pipeline: wgpu::RenderPipeline,
}

impl InternalProgram {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        source: &str,
        sample_type: wgpu::TextureSampleType,
        output: InternalOutput,
    ) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            }],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let color_targets = match output {
            InternalOutput::Color(format) => vec![Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            InternalOutput::Depth(_) => Vec::new(),
        };
        let depth_stencil = match output {
            InternalOutput::Depth(format) => Some(wgpu::DepthStencilState {
                format,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Always,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            InternalOutput::Color(_) => None,
        };

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: "vs_main",
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: "fs_main",
                targets: &color_targets,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        Self { layout, pipeline }
    }

    pub fn bind_group(&self, device: &wgpu::Device, view: &wgpu::TextureView) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &self.layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(view),
            }],
        })
    }
}
