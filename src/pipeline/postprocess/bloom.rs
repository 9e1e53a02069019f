//! Bloom post-processing effect

use log::debug;

use crate::backend::{GraphicsBackend, ShaderStage};
use crate::error::RenderResult;
use crate::pipeline::BloomConfig;
use crate::render_target::RenderTarget;
use crate::shaders::{names, units};

use super::PostprocessEffect;

/// Bright-pass extraction followed by separable Gaussian blur rounds.
///
/// All three steps are subroutines of the `Postprocess` program.
pub struct BloomPass {
    pub config: BloomConfig,
    effect: PostprocessEffect,
}

impl BloomPass {
    pub fn new(backend: &mut dyn GraphicsBackend, config: BloomConfig) -> RenderResult<Self> {
        Ok(Self {
            config,
            effect: PostprocessEffect::new(backend, names::POSTPROCESS)?,
        })
    }

    pub fn name(&self) -> &str {
        "Bloom"
    }

    /// Extract `source` into `ping`, then blur ping -> pong -> ping for each
    /// iteration. The result ends up in `ping`.
    pub fn execute(
        &self,
        backend: &mut dyn GraphicsBackend,
        source: &RenderTarget,
        ping: &RenderTarget,
        pong: &RenderTarget,
    ) {
        debug!(
            "{}: threshold {}, {} iterations",
            self.name(),
            self.config.threshold,
            self.config.iterations
        );
        let threshold = self.config.threshold;
        self.effect.apply(backend, &[(units::SOURCE, source)], Some(ping), |backend| {
            backend.set_subroutine(ShaderStage::Fragment, names::EXTRACT_BRIGHTNESS);
            backend.set_uniform("threshold", threshold.into());
        });

        for _ in 0..self.config.iterations {
            self.effect.apply(backend, &[(units::SOURCE, ping)], Some(pong), |backend| {
                backend.set_subroutine(ShaderStage::Fragment, names::BLUR_GAUSSIAN_HORIZONTAL);
            });
            self.effect.apply(backend, &[(units::SOURCE, pong)], Some(ping), |backend| {
                backend.set_subroutine(ShaderStage::Fragment, names::BLUR_GAUSSIAN_VERTICAL);
            });
        }
    }
}
