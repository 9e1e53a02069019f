//! Scene components and resources
//!
//! The ECS world owns entities; the renderer only reads them, apart from the
//! camera aspect and the light-space projections it writes back each frame.

mod camera;
mod light;
mod queues;
mod transform;

pub use camera::*;
pub use light::*;
pub use queues::*;
pub use transform::*;

use bevy_ecs::prelude::*;
use glam::Vec3;

use crate::backend::TextureHandle;

/// Scene-wide ambient term, multiplied into every lit surface
#[derive(Resource, Debug, Clone, Copy, PartialEq)]
pub struct AmbientLight {
    pub color: Vec3,
    pub intensity: f32,
}

impl Default for AmbientLight {
    fn default() -> Self {
        Self {
            color: Vec3::splat(0.05),
            intensity: 1.0,
        }
    }
}

impl AmbientLight {
    pub fn new(color: Vec3, intensity: f32) -> Self {
        Self { color, intensity }
    }

    pub fn radiance(&self) -> Vec3 {
        self.color * self.intensity
    }
}

/// Cube texture drawn behind the scene and reflected by environment-mapped materials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Skybox {
    pub texture: TextureHandle,
}

impl Skybox {
    pub fn new(texture: TextureHandle) -> Self {
        Self { texture }
    }
}
