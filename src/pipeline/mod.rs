//! Lighting and shading pipeline
//!
//! Stages, in the order a frame runs them:
//! 1. G-buffer pass - opaque geometry into position/normal/albedo attachments
//! 2. SSAO - occlusion from G-buffer position and normal, then blurred
//! 3. Lighting - per light a shadow pass followed by an additive lighting pass
//! 4. Skybox and environment-mapped objects
//! 5. Transparency - sorted alpha geometry, forward lit
//! 6. Post-processing - bloom, tonemapping, FXAA onto the surface
//!
//! The forward path skips 1 and 2 and re-renders opaque geometry once per light.

pub mod debug;
pub mod extract;
pub mod gbuffer_pass;
pub mod light_volume;
pub mod lighting_pass;
pub mod postprocess;
pub mod shadow;
pub mod skybox;
pub mod ssao;
pub mod transparency;

pub use debug::DebugGBufferView;
pub use extract::{DrawItem, FrameScene, LightKind, LightView};
pub use gbuffer_pass::GBufferPass;
pub use light_volume::{DepthVolumeCulling, LightVolume, StencilVolumeCulling, VolumeCulling};
pub use lighting_pass::LightingPass;
pub use postprocess::{PostProcessChain, PostprocessEffect, TonemapOperator};
pub use shadow::{ShadowMaps, ShadowProjections};
pub use skybox::SkyboxPass;
pub use ssao::SsaoPass;
pub use transparency::TransparencyPass;

use glam::Vec4;

use crate::backend::{GraphicsBackend, TextureSource};
use crate::scene::CameraView;
use crate::shaders::{self, units, MAX_KERNEL_SIZE};

/// Which lighting strategy a frame uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderPath {
    /// G-buffer, screen-space lighting with stencil light volumes
    #[default]
    Deferred,
    /// Opaque geometry re-rendered additively once per light
    Forward,
}

/// Shadow map resolutions and depth bias
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowConfig {
    pub directional_size: u32,
    pub spot_size: u32,
    /// Edge length of each cube face
    pub point_size: u32,
    pub bias: f32,
    /// Near plane of spot and point shadow projections
    pub near: f32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            directional_size: 2048,
            spot_size: 1024,
            point_size: 512,
            bias: 0.005,
            near: 0.1,
        }
    }
}

/// Screen-space ambient occlusion settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SsaoConfig {
    pub enabled: bool,
    pub kernel_size: usize,
    pub radius: f32,
    pub bias: f32,
    pub power: f32,
    /// Seed of the kernel and noise generator
    pub seed: u64,
}

impl Default for SsaoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            kernel_size: MAX_KERNEL_SIZE,
            radius: 0.5,
            bias: 0.025,
            power: 1.0,
            seed: 0x55A0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomConfig {
    pub enabled: bool,
    /// Luminance above which pixels contribute to bloom
    pub threshold: f32,
    /// Horizontal + vertical blur rounds
    pub iterations: u32,
    pub strength: f32,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 1.0,
            iterations: 5,
            strength: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TonemapConfig {
    pub operator: TonemapOperator,
    pub exposure: f32,
    pub gamma: f32,
}

impl Default for TonemapConfig {
    fn default() -> Self {
        Self {
            operator: TonemapOperator::Aces,
            exposure: 1.0,
            gamma: 2.2,
        }
    }
}

/// Diagnostic overlays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DebugOptions {
    /// Wireframe light volumes in the main target
    pub light_volumes: bool,
    /// Four-way split of position, normal, albedo and occlusion on the surface
    pub gbuffer: bool,
}

/// Configuration for [`crate::renderer::RenderingSystem`]
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub width: u32,
    pub height: u32,
    pub path: RenderPath,
    pub shadows: ShadowConfig,
    pub ssao: SsaoConfig,
    pub bloom: BloomConfig,
    pub tonemap: TonemapConfig,
    pub fxaa: bool,
    pub clear_color: Vec4,
    pub debug: DebugOptions,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            path: RenderPath::Deferred,
            shadows: ShadowConfig::default(),
            ssao: SsaoConfig::default(),
            bloom: BloomConfig::default(),
            tonemap: TonemapConfig::default(),
            fxaa: true,
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            debug: DebugOptions::default(),
        }
    }
}

impl RendererConfig {
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_path(mut self, path: RenderPath) -> Self {
        self.path = path;
        self
    }

    pub fn with_shadows(mut self, shadows: ShadowConfig) -> Self {
        self.shadows = shadows;
        self
    }

    pub fn with_ssao(mut self, ssao: SsaoConfig) -> Self {
        self.ssao = ssao;
        self
    }

    pub fn with_bloom(mut self, bloom: BloomConfig) -> Self {
        self.bloom = bloom;
        self
    }

    pub fn with_tonemap(mut self, tonemap: TonemapConfig) -> Self {
        self.tonemap = tonemap;
        self
    }

    pub fn with_fxaa(mut self, fxaa: bool) -> Self {
        self.fxaa = fxaa;
        self
    }

    pub fn with_clear_color(mut self, clear_color: Vec4) -> Self {
        self.clear_color = clear_color;
        self
    }

    pub fn with_debug(mut self, debug: DebugOptions) -> Self {
        self.debug = debug;
        self
    }
}

/// Upload view, projection and eye position to the bound program
pub(crate) fn set_camera_uniforms(backend: &mut dyn GraphicsBackend, camera: &CameraView) {
    backend.set_uniform("view", camera.view.into());
    backend.set_uniform("projection", camera.projection.into());
    backend.set_uniform("camera_position", camera.position.into());
}

/// Upload an item's transform and material to the bound program and draw it
pub(crate) fn draw_item(backend: &mut dyn GraphicsBackend, item: &DrawItem) {
    shaders::update_global_uniforms(backend, item.model);
    let material = &item.material;
    backend.set_uniform("albedo", material.albedo_alpha().into());
    backend.set_uniform("specular", material.specular.into());
    backend.set_uniform("reflectivity", material.reflectivity.into());
    backend.set_uniform("has_diffuse_map", material.diffuse_texture.is_some().into());
    backend.bind_texture(units::DIFFUSE, material.diffuse_texture.map(TextureSource::Texture));
    backend.draw_mesh(item.mesh);
}

/// Transform-only draw for depth passes
pub(crate) fn draw_geometry(backend: &mut dyn GraphicsBackend, item: &DrawItem) {
    shaders::update_global_uniforms(backend, item.model);
    backend.draw_mesh(item.mesh);
}
