//! Frame orchestrator
//!
//! [`RenderingSystem`] owns the backend, every window-sized target and all stages,
//! and runs them in a fixed order once per [`RenderingSystem::on_update`].

use bevy_ecs::prelude::*;
use log::{debug, info, warn};

use crate::backend::{
    BlitMask, ClearValues, DepthFormat, FrameStatistics, GraphicsBackend, TargetShape,
    TextureFormat,
};
use crate::error::RenderResult;
use crate::pipeline::extract::write_shadow_projections;
use crate::pipeline::{
    DebugGBufferView, DebugOptions, FrameScene, GBufferPass, LightingPass, PostProcessChain,
    RenderPath, RendererConfig, ShadowProjections, SkyboxPass, SsaoPass, TransparencyPass,
};
use crate::render_target::{release_on_err, RenderTarget};
use crate::scene::{install_render_queues, uninstall_render_queues, Skybox};

fn create_main_target(backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> RenderResult<RenderTarget> {
    RenderTarget::create(
        backend,
        "main",
        width,
        height,
        Some(TextureFormat::Rgba16Float),
        DepthFormat::Depth24Stencil8,
        TargetShape::Flat,
        true,
    )
}

/// Every window-sized target, created all together or not at all
struct WindowTargets {
    main: RenderTarget,
    gbuffer: RenderTarget,
    ssao: (RenderTarget, RenderTarget),
    post: (RenderTarget, RenderTarget),
}

impl WindowTargets {
    fn create(backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> RenderResult<Self> {
        let mut main = create_main_target(backend, width, height)?;
        let mut gbuffer = release_on_err(
            GBufferPass::create_target(backend, width, height),
            backend,
            &mut [&mut main],
        )?;
        let (mut occlusion, mut blurred) = release_on_err(
            SsaoPass::create_targets(backend, width, height),
            backend,
            &mut [&mut main, &mut gbuffer],
        )?;
        let post = release_on_err(
            PostProcessChain::create_targets(backend, width, height),
            backend,
            &mut [&mut main, &mut gbuffer, &mut occlusion, &mut blurred],
        )?;
        Ok(Self {
            main,
            gbuffer,
            ssao: (occlusion, blurred),
            post,
        })
    }
}

/// The lighting and shading pipeline
pub struct RenderingSystem {
    backend: Box<dyn GraphicsBackend>,
    config: RendererConfig,
    width: u32,
    height: u32,
    main: RenderTarget,
    gbuffer: GBufferPass,
    ssao: SsaoPass,
    lighting: LightingPass,
    skybox_pass: SkyboxPass,
    transparency: TransparencyPass,
    post: PostProcessChain,
    debug_view: DebugGBufferView,
    skybox: Option<Skybox>,
    observers: Option<[Entity; 2]>,
}

impl RenderingSystem {
    /// Create every target and stage at the configured size
    pub fn new(mut backend: Box<dyn GraphicsBackend>, config: RendererConfig) -> RenderResult<Self> {
        let (width, height) = (config.width, config.height);
        assert!(width > 0 && height > 0, "renderer size must be non-zero, got {width}x{height}");
        info!(
            "Creating {:?} renderer on {} at {}x{}",
            config.path,
            backend.name(),
            width,
            height
        );
        if backend.surface_size() != (width, height) {
            backend.resize_surface(width, height);
        }

        let b = backend.as_mut();
        let main = create_main_target(b, width, height)?;
        let gbuffer = GBufferPass::new(b, width, height)?;
        let ssao = SsaoPass::new(b, width, height, config.ssao)?;
        let lighting = LightingPass::new(b, config.shadows)?;
        let skybox_pass = SkyboxPass::new(b)?;
        let transparency = TransparencyPass::new(b)?;
        let post = PostProcessChain::new(b, width, height, config.bloom, config.tonemap, config.fxaa)?;
        let debug_view = DebugGBufferView::new(b)?;

        Ok(Self {
            backend,
            config,
            width,
            height,
            main,
            gbuffer,
            ssao,
            lighting,
            skybox_pass,
            transparency,
            post,
            debug_view,
            skybox: None,
            observers: None,
        })
    }

    /// Start tracking the world's renderables
    pub fn on_init(&mut self, world: &mut World) {
        if self.observers.is_some() {
            warn!("RenderingSystem::on_init called twice; keeping the existing queues");
            return;
        }
        self.observers = Some(install_render_queues(world));
        info!("Render queues installed");
    }

    /// Stop tracking the world's renderables
    pub fn on_destroy(&mut self, world: &mut World) {
        if let Some(observers) = self.observers.take() {
            uninstall_render_queues(world, observers);
            info!("Render queues removed");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.observers.is_some()
    }

    /// Render one frame of `world` to the surface.
    ///
    /// A frame that fails partway is still closed with `end_frame` before the
    /// error is returned.
    ///
    /// # Panics
    /// Before [`Self::on_init`], or when the world has no main camera.
    pub fn on_update(&mut self, world: &mut World, delta_time: f32) -> RenderResult<()> {
        assert!(
            self.is_initialized(),
            "RenderingSystem::on_update called without an active scene; call on_init first"
        );
        let aspect = self.width as f32 / self.height as f32;
        let mut frame = FrameScene::extract(world, aspect);
        debug!("Frame ({delta_time:.4}s): {:?} path", self.config.path);

        self.backend.begin_frame()?;
        let drawn = self.draw_frame(&mut frame);
        if let Err(e) = &drawn {
            warn!("Frame failed, closing it early: {e}");
        }
        let closed = self.backend.end_frame();
        let projections = drawn?;
        closed?;

        write_shadow_projections(world, &projections);
        Ok(())
    }

    /// Every stage between `begin_frame` and `end_frame`
    fn draw_frame(&mut self, frame: &mut FrameScene) -> RenderResult<ShadowProjections> {
        let backend = self.backend.as_mut();
        self.main.bind(backend);
        backend.clear(ClearValues::all(self.config.clear_color));

        let mut occlusion = None;
        let projections = match self.config.path {
            RenderPath::Deferred => {
                self.gbuffer.execute(backend, frame);
                if self.config.ssao.enabled {
                    self.ssao.compute(backend, self.gbuffer.target(), frame.camera.view, frame.camera.projection);
                    self.ssao.blur(backend);
                    occlusion = Some(self.ssao.output());
                }
                // Light volumes test against scene depth
                self.gbuffer.target().bind_read_only(backend);
                self.main.bind_write_only(backend);
                backend.blit_framebuffer(BlitMask::DEPTH)?;
                backend.bind_read_target(None);

                self.lighting.execute_deferred(
                    backend,
                    frame,
                    self.gbuffer.target(),
                    occlusion,
                    &self.main,
                    self.config.debug.light_volumes,
                )
            }
            RenderPath::Forward => {
                self.lighting
                    .execute_forward(backend, frame, &self.main, self.config.debug.light_volumes)
            }
        };

        self.main.bind(backend);
        if let Some(skybox) = &self.skybox {
            self.skybox_pass.draw_skybox(backend, frame, skybox);
        }
        self.skybox_pass
            .draw_environment_items(backend, frame, self.skybox.as_ref(), self.lighting.shadow_maps());
        self.transparency.execute(backend, frame, self.lighting.shadow_maps());

        if self.config.debug.gbuffer && self.config.path == RenderPath::Deferred {
            self.debug_view.draw(backend, self.gbuffer.target(), occlusion);
        } else {
            self.post.execute(backend, &self.main);
        }
        Ok(projections)
    }

    /// Recreate every window-sized target at the new size.
    ///
    /// The new targets are all created before any old one is released, so a
    /// failed resize leaves the renderer at its previous size and still usable.
    ///
    /// # Panics
    /// On a zero dimension.
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        assert!(width > 0 && height > 0, "cannot resize renderer to {width}x{height}");
        info!("Resizing renderer to {width}x{height}");
        let backend = self.backend.as_mut();
        let targets = match WindowTargets::create(backend, width, height) {
            Ok(targets) => targets,
            Err(e) => {
                warn!("Resize to {width}x{height} failed, keeping {}x{}: {e}", self.width, self.height);
                return Err(e);
            }
        };

        backend.resize_surface(width, height);
        std::mem::replace(&mut self.main, targets.main).release(backend);
        self.gbuffer.replace_target(backend, targets.gbuffer);
        self.ssao.replace_targets(backend, targets.ssao);
        self.post.replace_targets(backend, targets.post);
        self.width = width;
        self.height = height;
        self.config.width = width;
        self.config.height = height;
        Ok(())
    }

    pub fn set_skybox(&mut self, skybox: Option<Skybox>) {
        self.skybox = skybox;
    }

    pub fn skybox(&self) -> Option<&Skybox> {
        self.skybox.as_ref()
    }

    pub fn set_path(&mut self, path: RenderPath) {
        info!("Render path: {path:?}");
        self.config.path = path;
    }

    pub fn set_debug_options(&mut self, debug: DebugOptions) {
        self.config.debug = debug;
    }

    /// Flip the G-buffer overlay
    pub fn toggle_debug_view(&mut self) {
        self.config.debug.gbuffer = !self.config.debug.gbuffer;
        if self.config.debug.gbuffer && self.config.path == RenderPath::Forward {
            warn!("G-buffer view needs the deferred path; forward frames ignore it");
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn backend(&self) -> &dyn GraphicsBackend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn GraphicsBackend {
        self.backend.as_mut()
    }

    pub fn statistics(&self) -> &FrameStatistics {
        self.backend.statistics()
    }

    pub fn main_target(&self) -> &RenderTarget {
        &self.main
    }

    pub fn gbuffer(&self) -> &GBufferPass {
        &self.gbuffer
    }

    pub fn ssao(&self) -> &SsaoPass {
        &self.ssao
    }

    pub fn ssao_mut(&mut self) -> &mut SsaoPass {
        &mut self.ssao
    }

    pub fn lighting(&self) -> &LightingPass {
        &self.lighting
    }

    pub fn post_chain(&self) -> &PostProcessChain {
        &self.post
    }

    pub fn post_chain_mut(&mut self) -> &mut PostProcessChain {
        &mut self.post
    }
}

impl Drop for RenderingSystem {
    fn drop(&mut self) {
        let backend = self.backend.as_mut();
        self.main.release(backend);
        self.gbuffer.release(backend);
        self.ssao.release(backend);
        self.lighting.release(backend);
        self.skybox_pass.release(backend);
        self.post.release(backend);
    }
}
