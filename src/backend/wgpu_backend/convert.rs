//! Conversions from backend types to wgpu types

use crate::backend::types::*;

pub(super) fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::R16Float => wgpu::TextureFormat::R16Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
    }
}

pub(super) fn compare_function(func: CompareFunction) -> wgpu::CompareFunction {
    match func {
        CompareFunction::Never => wgpu::CompareFunction::Never,
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::Equal => wgpu::CompareFunction::Equal,
        CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunction::Greater => wgpu::CompareFunction::Greater,
        CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
        CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        CompareFunction::Always => wgpu::CompareFunction::Always,
    }
}

fn stencil_operation(op: StencilOperation) -> wgpu::StencilOperation {
    match op {
        StencilOperation::Keep => wgpu::StencilOperation::Keep,
        StencilOperation::Zero => wgpu::StencilOperation::Zero,
        StencilOperation::Replace => wgpu::StencilOperation::Replace,
        StencilOperation::Invert => wgpu::StencilOperation::Invert,
        StencilOperation::IncrementClamp => wgpu::StencilOperation::IncrementClamp,
        StencilOperation::DecrementClamp => wgpu::StencilOperation::DecrementClamp,
        StencilOperation::IncrementWrap => wgpu::StencilOperation::IncrementWrap,
        StencilOperation::DecrementWrap => wgpu::StencilOperation::DecrementWrap,
    }
}

fn stencil_face(face: &StencilFaceState) -> wgpu::StencilFaceState {
    wgpu::StencilFaceState {
        compare: compare_function(face.compare),
        fail_op: stencil_operation(face.fail_op),
        depth_fail_op: stencil_operation(face.depth_fail_op),
        pass_op: stencil_operation(face.pass_op),
    }
}

fn blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::Src => wgpu::BlendFactor::Src,
        BlendFactor::OneMinusSrc => wgpu::BlendFactor::OneMinusSrc,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::Dst => wgpu::BlendFactor::Dst,
        BlendFactor::OneMinusDst => wgpu::BlendFactor::OneMinusDst,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
    }
}

fn blend_operation(op: BlendOperation) -> wgpu::BlendOperation {
    match op {
        BlendOperation::Add => wgpu::BlendOperation::Add,
        BlendOperation::Subtract => wgpu::BlendOperation::Subtract,
        BlendOperation::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
        BlendOperation::Min => wgpu::BlendOperation::Min,
        BlendOperation::Max => wgpu::BlendOperation::Max,
    }
}

fn blend_component(component: &BlendComponent) -> wgpu::BlendComponent {
    wgpu::BlendComponent {
        src_factor: blend_factor(component.src_factor),
        dst_factor: blend_factor(component.dst_factor),
        operation: blend_operation(component.operation),
    }
}

pub(super) fn blend_state(blend: &BlendState) -> wgpu::BlendState {
    wgpu::BlendState {
        color: blend_component(&blend.color),
        alpha: blend_component(&blend.alpha),
    }
}

pub(super) fn color_writes(writes: ColorWrites) -> wgpu::ColorWrites {
    wgpu::ColorWrites::from_bits_truncate(writes.bits())
}

pub(super) fn filter_mode(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

pub(super) fn address_mode(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        AddressMode::Repeat => wgpu::AddressMode::Repeat,
    }
}

pub(super) fn primitive_state(state: &RenderState, line_mode: bool) -> wgpu::PrimitiveState {
    wgpu::PrimitiveState {
        topology: wgpu::PrimitiveTopology::TriangleList,
        strip_index_format: None,
        front_face: match state.front_face {
            FrontFace::Ccw => wgpu::FrontFace::Ccw,
            FrontFace::Cw => wgpu::FrontFace::Cw,
        },
        cull_mode: match state.cull_mode {
            CullMode::None => None,
            CullMode::Front => Some(wgpu::Face::Front),
            CullMode::Back => Some(wgpu::Face::Back),
        },
        polygon_mode: match state.polygon_mode {
            PolygonMode::Line if line_mode => wgpu::PolygonMode::Line,
            _ => wgpu::PolygonMode::Fill,
        },
        ..Default::default()
    }
}

/// Depth-stencil state for a target with a depth attachment of `format`
pub(super) fn depth_stencil_state(state: &RenderState, format: wgpu::TextureFormat) -> wgpu::DepthStencilState {
    let stencil = match (&state.stencil, format.has_stencil_aspect()) {
        (Some(s), true) => wgpu::StencilState {
            front: stencil_face(&s.front),
            back: stencil_face(&s.back),
            read_mask: u32::from(s.read_mask),
            write_mask: u32::from(s.write_mask),
        },
        _ => wgpu::StencilState::default(),
    };
    wgpu::DepthStencilState {
        format,
        depth_write_enabled: state.depth_test.is_some() && state.depth_write,
        depth_compare: state
            .depth_test
            .map(compare_function)
            .unwrap_or(wgpu::CompareFunction::Always),
        stencil,
        bias: wgpu::DepthBiasState::default(),
    }
}

pub(super) fn vertex_attributes() -> [wgpu::VertexAttribute; 4] {
    wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Float32x2,
        3 => Float32x4,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_depth_test_never_writes() {
        let state = RenderState::fullscreen().with_depth(None, true);
        let ds = depth_stencil_state(&state, wgpu::TextureFormat::Depth32Float);
        assert!(!ds.depth_write_enabled);
        assert_eq!(ds.depth_compare, wgpu::CompareFunction::Always);
    }

    #[test]
    fn test_stencil_dropped_without_stencil_aspect() {
        let state = RenderState::opaque().with_stencil(Some(StencilState {
            reference: 1,
            ..Default::default()
        }));
        let ds = depth_stencil_state(&state, wgpu::TextureFormat::Depth32Float);
        assert_eq!(ds.stencil, wgpu::StencilState::default());
        let ds = depth_stencil_state(&state, wgpu::TextureFormat::Depth24PlusStencil8);
        assert_eq!(ds.stencil.read_mask, 0xFF);
    }

    #[test]
    fn test_vertex_attributes_match_stride() {
        let attrs = vertex_attributes();
        let last = attrs[3];
        assert_eq!(last.offset + last.format.size(), Vertex::STRIDE);
    }
}
