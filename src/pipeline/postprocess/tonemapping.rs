//! Tonemapping post-processing

use log::debug;

use crate::backend::GraphicsBackend;
use crate::error::RenderResult;
use crate::pipeline::TonemapConfig;
use crate::render_target::RenderTarget;
use crate::shaders::{names, units};

use super::PostprocessEffect;

/// Tonemapping operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TonemapOperator {
    Reinhard,
    #[default]
    Aces,
    /// Clamp to [0, 1]
    None,
}

impl TonemapOperator {
    /// Value of the `tonemap_operator` parameter
    pub fn index(&self) -> i32 {
        match self {
            TonemapOperator::Reinhard => 0,
            TonemapOperator::Aces => 1,
            TonemapOperator::None => 2,
        }
    }
}

/// Exposure, operator and gamma over the HDR scene, with bloom added first
pub struct TonemappingPass {
    pub config: TonemapConfig,
    pub bloom_strength: f32,
    effect: PostprocessEffect,
}

impl TonemappingPass {
    pub fn new(backend: &mut dyn GraphicsBackend, config: TonemapConfig, bloom_strength: f32) -> RenderResult<Self> {
        Ok(Self {
            config,
            bloom_strength,
            effect: PostprocessEffect::new(backend, names::TONEMAP)?,
        })
    }

    pub fn name(&self) -> &str {
        "Tonemapping"
    }

    pub fn execute(
        &self,
        backend: &mut dyn GraphicsBackend,
        hdr: &RenderTarget,
        bloom: Option<&RenderTarget>,
        output: &RenderTarget,
    ) {
        debug!("{}: {:?}", self.name(), self.config.operator);
        let mut inputs = vec![(units::SOURCE, hdr)];
        if let Some(bloom) = bloom {
            inputs.push((units::BLOOM, bloom));
        }
        let config = self.config;
        let strength = self.bloom_strength;
        self.effect.apply(backend, &inputs, Some(output), |backend| {
            if bloom.is_none() {
                backend.bind_texture(units::BLOOM, None);
            }
            backend.set_uniform("bloom_enabled", bloom.is_some().into());
            backend.set_uniform("bloom_strength", strength.into());
            backend.set_uniform("exposure", config.exposure.into());
            backend.set_uniform("gamma", config.gamma.into());
            backend.set_uniform("tonemap_operator", config.operator.index().into());
        });
    }
}
