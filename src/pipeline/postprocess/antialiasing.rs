//! FXAA

use crate::backend::GraphicsBackend;
use crate::error::RenderResult;
use crate::render_target::RenderTarget;
use crate::shaders::{names, units};

use super::PostprocessEffect;

/// Final pass onto the surface. Disabled, it is a plain copy.
pub struct FxaaPass {
    pub enabled: bool,
    effect: PostprocessEffect,
}

impl FxaaPass {
    pub fn new(backend: &mut dyn GraphicsBackend, enabled: bool) -> RenderResult<Self> {
        Ok(Self {
            enabled,
            effect: PostprocessEffect::new(backend, names::FXAA)?,
        })
    }

    pub fn name(&self) -> &str {
        "FXAA"
    }

    /// `None` writes the presentation surface
    pub fn execute(&self, backend: &mut dyn GraphicsBackend, source: &RenderTarget, output: Option<&RenderTarget>) {
        let enabled = self.enabled;
        self.effect.apply(backend, &[(units::SOURCE, source)], output, |backend| {
            backend.set_uniform("fxaa_enabled", enabled.into());
        });
    }
}
