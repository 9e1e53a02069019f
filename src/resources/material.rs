//! Material definitions for the lighting pipeline

use crate::backend::traits::TextureHandle;
use crate::scene::RenderQueue;
use glam::{Vec3, Vec4};

/// Surface description consumed by the geometry, forward and transparency passes.
///
/// The material also decides which render queue its renderers land in.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub albedo: Vec3,
    /// Opacity, only used by the alpha queue
    pub alpha: f32,
    /// Specular intensity stored in the G-buffer albedo alpha channel
    pub specular: f32,
    /// Skybox reflection mix for environment-mapped queues
    pub reflectivity: f32,
    pub diffuse_texture: Option<TextureHandle>,
    pub queue: RenderQueue,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            albedo: Vec3::ONE,
            alpha: 1.0,
            specular: 0.5,
            reflectivity: 0.0,
            diffuse_texture: None,
            queue: RenderQueue::Opaque,
        }
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_albedo(mut self, albedo: Vec3) -> Self {
        self.albedo = albedo;
        self
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_specular(mut self, specular: f32) -> Self {
        self.specular = specular;
        self
    }

    pub fn with_reflectivity(mut self, reflectivity: f32) -> Self {
        self.reflectivity = reflectivity;
        self
    }

    pub fn with_diffuse_texture(mut self, texture: TextureHandle) -> Self {
        self.diffuse_texture = Some(texture);
        self
    }

    pub fn with_queue(mut self, queue: RenderQueue) -> Self {
        self.queue = queue;
        self
    }

    /// Albedo and opacity packed for the `albedo` shader parameter
    pub fn albedo_alpha(&self) -> Vec4 {
        self.albedo.extend(self.alpha)
    }

    // Preset materials

    pub fn plastic(color: Vec3) -> Self {
        Self::new("plastic").with_albedo(color).with_specular(0.6)
    }

    pub fn rubber(color: Vec3) -> Self {
        Self::new("rubber").with_albedo(color).with_specular(0.05)
    }

    pub fn glass(color: Vec3, alpha: f32) -> Self {
        Self::new("glass")
            .with_albedo(color)
            .with_alpha(alpha)
            .with_specular(0.9)
            .with_queue(RenderQueue::Alpha)
    }

    pub fn chrome() -> Self {
        Self::new("chrome")
            .with_albedo(Vec3::splat(0.55))
            .with_specular(1.0)
            .with_reflectivity(0.8)
            .with_queue(RenderQueue::EnviroMapStatic)
    }
}
