//! G-buffer visualisation
//!
//! Splits the surface into quadrants: position (top left), normal (top right),
//! albedo (bottom left) and occlusion (bottom right).

use crate::backend::{
    GraphicsBackend, RenderState, RenderStateGuard, ShaderHandle, TargetBinding, Viewport,
};
use crate::error::RenderResult;
use crate::pipeline::gbuffer_pass::{ALBEDO_ATTACHMENT, NORMAL_ATTACHMENT, POSITION_ATTACHMENT};
use crate::render_target::RenderTarget;
use crate::shaders::{names, units};

pub struct DebugGBufferView {
    shader: ShaderHandle,
}

impl DebugGBufferView {
    pub fn new(backend: &mut dyn GraphicsBackend) -> RenderResult<Self> {
        Ok(Self {
            shader: backend.create_shader(names::DEBUG_GBUFFER)?,
        })
    }

    /// Viewports of the four quadrants in channel order
    pub fn quadrants(width: u32, height: u32) -> [Viewport; 4] {
        let (w, h) = (width / 2, height / 2);
        let (rw, rh) = (width - w, height - h);
        [
            Viewport { x: 0, y: 0, width: w, height: h },
            Viewport { x: w, y: 0, width: rw, height: h },
            Viewport { x: 0, y: h, width: w, height: rh },
            Viewport { x: w, y: h, width: rw, height: rh },
        ]
    }

    /// Draw onto the surface. Without occlusion the last quadrant stays black.
    pub fn draw(&self, backend: &mut dyn GraphicsBackend, gbuffer: &RenderTarget, occlusion: Option<&RenderTarget>) {
        let (width, height) = backend.surface_size();
        backend.bind_render_target(TargetBinding::Surface);
        let mut pass = RenderStateGuard::new(backend, RenderState::fullscreen());
        pass.bind_shader(self.shader);

        let sources = [
            Some((gbuffer, POSITION_ATTACHMENT)),
            Some((gbuffer, NORMAL_ATTACHMENT)),
            Some((gbuffer, ALBEDO_ATTACHMENT)),
            occlusion.map(|ao| (ao, 0)),
        ];
        for (channel, (viewport, source)) in Self::quadrants(width, height).into_iter().zip(sources).enumerate() {
            pass.set_viewport(viewport);
            pass.set_uniform("channel", (channel as i32).into());
            match source {
                Some((target, index)) => target.bind_texture(&mut *pass, units::SOURCE, index),
                None => pass.bind_texture(units::SOURCE, None),
            }
            pass.draw_fullscreen();
        }
        pass.set_viewport(Viewport::full(width, height));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quadrants_cover_odd_sizes() {
        let q = DebugGBufferView::quadrants(5, 3);
        let area: u32 = q.iter().map(|v| v.width * v.height).sum();
        assert_eq!(area, 15);
        assert_eq!(q[3], Viewport { x: 2, y: 1, width: 3, height: 2 });
    }
}
