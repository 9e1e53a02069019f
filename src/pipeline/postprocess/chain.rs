use log::{debug, info};

use crate::backend::{DepthFormat, GraphicsBackend, TargetShape, TextureFormat};
use crate::error::RenderResult;
use crate::pipeline::{BloomConfig, TonemapConfig};
use crate::render_target::{release_on_err, RenderTarget};

use super::{BloomPass, FxaaPass, TonemappingPass};

/// Bloom, tonemapping and FXAA over two equally sized ping-pong targets.
///
/// Bloom leaves its result in `ping`, tonemapping writes `pong` and FXAA reads
/// `pong` into the surface.
pub struct PostProcessChain {
    ping: RenderTarget,
    pong: RenderTarget,
    bloom: BloomPass,
    tonemap: TonemappingPass,
    fxaa: FxaaPass,
}

impl PostProcessChain {
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        width: u32,
        height: u32,
        bloom: BloomConfig,
        tonemap: TonemapConfig,
        fxaa: bool,
    ) -> RenderResult<Self> {
        let (ping, pong) = Self::create_targets(backend, width, height)?;
        Ok(Self {
            ping,
            pong,
            bloom: BloomPass::new(backend, bloom)?,
            tonemap: TonemappingPass::new(backend, tonemap, bloom.strength)?,
            fxaa: FxaaPass::new(backend, fxaa)?,
        })
    }

    pub(crate) fn create_targets(
        backend: &mut dyn GraphicsBackend,
        width: u32,
        height: u32,
    ) -> RenderResult<(RenderTarget, RenderTarget)> {
        let mut create = |label: &str| {
            RenderTarget::create(
                &mut *backend,
                label,
                width,
                height,
                Some(TextureFormat::Rgba16Float),
                DepthFormat::None,
                TargetShape::Flat,
                true,
            )
        };
        let mut ping = create("post_ping")?;
        let pong = create("post_pong");
        let pong = release_on_err(pong, backend, &mut [&mut ping])?;
        Ok((ping, pong))
    }

    pub fn name(&self) -> &str {
        "Post-Process Chain"
    }

    pub fn targets(&self) -> (&RenderTarget, &RenderTarget) {
        (&self.ping, &self.pong)
    }

    pub fn bloom_config(&self) -> &BloomConfig {
        &self.bloom.config
    }

    pub fn set_bloom(&mut self, config: BloomConfig) {
        self.bloom.config = config;
        self.tonemap.bloom_strength = config.strength;
    }

    pub fn tonemap_config(&self) -> &TonemapConfig {
        &self.tonemap.config
    }

    pub fn set_tonemap(&mut self, config: TonemapConfig) {
        self.tonemap.config = config;
    }

    pub fn fxaa_enabled(&self) -> bool {
        self.fxaa.enabled
    }

    pub fn set_fxaa(&mut self, enabled: bool) {
        self.fxaa.enabled = enabled;
    }

    /// Post-process `main` onto the presentation surface
    pub fn execute(&self, backend: &mut dyn GraphicsBackend, main: &RenderTarget) {
        debug!(
            "{}: bloom {}, fxaa {}",
            self.name(),
            self.bloom.config.enabled,
            self.fxaa.enabled
        );
        let bloom = if self.bloom.config.enabled {
            self.bloom.execute(backend, main, &self.ping, &self.pong);
            Some(&self.ping)
        } else {
            None
        };
        self.tonemap.execute(backend, main, bloom, &self.pong);
        self.fxaa.execute(backend, &self.pong, None);
    }

    /// Recreate both ping-pong targets together
    pub fn resize(&mut self, backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> RenderResult<()> {
        info!("{}: resize to {}x{}", self.name(), width, height);
        let targets = Self::create_targets(backend, width, height)?;
        self.replace_targets(backend, targets);
        Ok(())
    }

    /// Swap in targets built by [`PostProcessChain::create_targets`], releasing the old pair
    pub(crate) fn replace_targets(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        (ping, pong): (RenderTarget, RenderTarget),
    ) {
        std::mem::replace(&mut self.ping, ping).release(backend);
        std::mem::replace(&mut self.pong, pong).release(backend);
    }

    pub fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        self.ping.release(backend);
        self.pong.release(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ClearValues, ReadbackSource, SoftwareBackend};
    use crate::pipeline::TonemapOperator;
    use glam::{Vec3, Vec4};

    fn hdr_target(backend: &mut SoftwareBackend, color: Vec4) -> RenderTarget {
        let target = RenderTarget::create(
            backend,
            "main",
            8,
            8,
            Some(TextureFormat::Rgba16Float),
            DepthFormat::Depth24Stencil8,
            TargetShape::Flat,
            true,
        )
        .unwrap();
        target.bind(backend);
        backend.clear(ClearValues::all(color));
        target
    }

    fn linear() -> TonemapConfig {
        TonemapConfig {
            operator: TonemapOperator::None,
            exposure: 1.0,
            gamma: 1.0,
        }
    }

    #[test]
    fn test_plain_chain_copies_to_surface() {
        let mut backend = SoftwareBackend::new(8, 8);
        let main = hdr_target(&mut backend, Vec4::new(0.25, 0.5, 0.75, 1.0));
        let bloom = BloomConfig {
            enabled: false,
            ..Default::default()
        };
        let chain = PostProcessChain::new(&mut backend, 8, 8, bloom, linear(), true).unwrap();
        chain.execute(&mut backend, &main);

        let surface = backend.read_pixels(ReadbackSource::Surface).unwrap();
        let center = surface.center().truncate();
        assert!((center - Vec3::new(0.25, 0.5, 0.75)).length() < 1e-2, "{center}");
    }

    #[test]
    fn test_bright_scene_blooms() {
        let mut backend = SoftwareBackend::new(8, 8);
        let main = hdr_target(&mut backend, Vec4::new(0.6, 0.6, 0.6, 1.0));
        let config = BloomConfig {
            enabled: true,
            threshold: 0.5,
            iterations: 2,
            strength: 1.0,
        };
        let chain = PostProcessChain::new(&mut backend, 8, 8, config, linear(), false).unwrap();
        chain.execute(&mut backend, &main);

        // 0.6 scene + bloom of the same uniform image, clamped
        let surface = backend.read_pixels(ReadbackSource::Surface).unwrap();
        assert!(surface.center().x > 0.95);
    }

    #[test]
    fn test_resize_recreates_both_targets() {
        let mut backend = SoftwareBackend::new(8, 8);
        let mut chain =
            PostProcessChain::new(&mut backend, 8, 8, BloomConfig::default(), TonemapConfig::default(), true)
                .unwrap();
        let live = backend.live_attachment_count();
        chain.resize(&mut backend, 16, 4).unwrap();
        let (ping, pong) = chain.targets();
        assert_eq!(ping.size(), (16, 4));
        assert_eq!(pong.size(), (16, 4));
        assert_eq!(backend.live_attachment_count(), live);
    }
}
