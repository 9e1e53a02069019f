//! Post-processing effects
//!
//! Every effect is a [`PostprocessEffect`]: one program, some input textures and a
//! full-screen draw into a target or the presentation surface. The
//! [`PostProcessChain`] strings bloom, tonemapping and FXAA together over two
//! ping-pong targets.

mod antialiasing;
mod bloom;
mod chain;
mod tonemapping;

pub use antialiasing::FxaaPass;
pub use bloom::BloomPass;
pub use chain::PostProcessChain;
pub use tonemapping::{TonemapOperator, TonemappingPass};

use glam::Vec2;

use crate::backend::{
    GraphicsBackend, RenderState, RenderStateGuard, ShaderHandle, TargetBinding, Viewport,
};
use crate::error::RenderResult;
use crate::render_target::RenderTarget;

/// Full-screen pass primitive
#[derive(Debug, Clone, Copy)]
pub struct PostprocessEffect {
    program: &'static str,
    shader: ShaderHandle,
}

impl PostprocessEffect {
    pub fn new(backend: &mut dyn GraphicsBackend, program: &'static str) -> RenderResult<Self> {
        Ok(Self {
            program,
            shader: backend.create_shader(program)?,
        })
    }

    pub fn program(&self) -> &'static str {
        self.program
    }

    pub fn shader(&self) -> ShaderHandle {
        self.shader
    }

    /// Draw into `output`, or the surface when `None`.
    ///
    /// `inputs` pairs a texture unit with the target whose first color
    /// attachment it samples. `configure` runs after the program is bound and
    /// sets its parameters. `texel_size` is always set from the first input.
    pub fn apply(
        &self,
        backend: &mut dyn GraphicsBackend,
        inputs: &[(u32, &RenderTarget)],
        output: Option<&RenderTarget>,
        configure: impl FnOnce(&mut dyn GraphicsBackend),
    ) {
        match output {
            Some(target) => target.bind(backend),
            None => {
                let (width, height) = backend.surface_size();
                backend.bind_render_target(TargetBinding::Surface);
                backend.set_viewport(Viewport::full(width, height));
            }
        }

        let mut pass = RenderStateGuard::new(backend, RenderState::fullscreen());
        pass.bind_shader(self.shader);
        if let Some((_, first)) = inputs.first() {
            let texel = Vec2::new(1.0 / first.width() as f32, 1.0 / first.height() as f32);
            pass.set_uniform("texel_size", texel.into());
        }
        for (unit, input) in inputs {
            input.bind_texture(&mut *pass, *unit, 0);
        }
        configure(&mut *pass);
        pass.draw_fullscreen();
    }
}
