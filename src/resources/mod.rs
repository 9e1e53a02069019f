//! Resource management
//!
//! Mesh generation, materials, procedural textures and frame capture.

mod material;
mod mesh;
mod texture;

pub use material::*;
pub use mesh::*;
pub use texture::*;
