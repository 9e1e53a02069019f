//! Procedural texture data and frame capture

use crate::backend::traits::*;
use crate::backend::types::*;
use glam::{Vec2, Vec3, Vec4};
use std::path::Path;

/// Texel data ready for [`GraphicsBackend::create_texture`]
#[derive(Debug, Clone)]
pub struct TextureData {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub shape: TargetShape,
    /// One `f32` per channel per texel, faces in layer order for cube textures
    pub data: Vec<f32>,
}

impl TextureData {
    /// Create a solid color texture
    pub fn solid_color(color: Vec4, name: &str) -> Self {
        Self {
            name: name.to_string(),
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Unorm,
            shape: TargetShape::Flat,
            data: color.to_array().to_vec(),
        }
    }

    /// Create a default white texture
    pub fn white() -> Self {
        Self::solid_color(Vec4::ONE, "white")
    }

    /// Create a checkerboard texture
    pub fn checkerboard(size: u32, cell: u32, color1: Vec4, color2: Vec4) -> Self {
        let cell = cell.max(1);
        let mut data = Vec::with_capacity((size * size * 4) as usize);

        for y in 0..size {
            for x in 0..size {
                let is_even = ((x / cell) + (y / cell)) % 2 == 0;
                let color = if is_even { color1 } else { color2 };
                data.extend_from_slice(&color.to_array());
            }
        }

        Self {
            name: "checkerboard".to_string(),
            width: size,
            height: size,
            format: TextureFormat::Rgba8Unorm,
            shape: TargetShape::Flat,
            data,
        }
    }

    /// Vertical gradient sky as a cube texture: `ground` below the horizon,
    /// blending from `horizon` to `zenith` above it.
    pub fn sky_gradient(size: u32, zenith: Vec3, horizon: Vec3, ground: Vec3) -> Self {
        let mut data = Vec::with_capacity((size * size * 6 * 4) as usize);
        for face in CubeFace::ALL {
            for y in 0..size {
                for x in 0..size {
                    let uv = Vec2::new(
                        (x as f32 + 0.5) / size as f32,
                        (y as f32 + 0.5) / size as f32,
                    );
                    let dir = face.direction(uv).normalize();
                    let color = if dir.y >= 0.0 {
                        horizon.lerp(zenith, dir.y.sqrt())
                    } else {
                        ground
                    };
                    data.extend_from_slice(&color.extend(1.0).to_array());
                }
            }
        }

        Self {
            name: "sky_gradient".to_string(),
            width: size,
            height: size,
            format: TextureFormat::Rgba16Float,
            shape: TargetShape::Cube,
            data,
        }
    }

    /// Upload to the backend
    pub fn upload(
        &self,
        backend: &mut dyn GraphicsBackend,
        filter: FilterMode,
        address_mode: AddressMode,
    ) -> BackendResult<TextureHandle> {
        backend.create_texture(
            &TextureDescriptor {
                label: self.name.clone(),
                width: self.width,
                height: self.height,
                format: self.format,
                shape: self.shape,
                filter,
                address_mode,
            },
            &self.data,
        )
    }
}

/// Save a readback as an 8-bit RGBA PNG, clamping each channel to [0, 1].
pub fn save_png<P: AsRef<Path>>(pixels: &PixelBuffer, path: P) -> Result<(), image::ImageError> {
    let mut img = image::RgbaImage::new(pixels.width, pixels.height);
    for (i, texel) in img.pixels_mut().enumerate() {
        let p = pixels.pixels[i].clamp(Vec4::ZERO, Vec4::ONE) * 255.0 + Vec4::splat(0.5);
        *texel = image::Rgba([p.x as u8, p.y as u8, p.z as u8, p.w as u8]);
    }
    img.save(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sky_gradient_layout() {
        let sky = TextureData::sky_gradient(4, Vec3::Z, Vec3::Y, Vec3::X);
        assert_eq!(sky.data.len(), 4 * 4 * 6 * 4);
        // First texel of -Y face is ground colored
        let face = CubeFace::NegativeY.layer() as usize;
        let offset = face * 4 * 4 * 4;
        assert_eq!(&sky.data[offset..offset + 3], &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_checkerboard_cells() {
        let tex = TextureData::checkerboard(4, 2, Vec4::ONE, Vec4::ZERO);
        assert_eq!(tex.data[0], 1.0);
        // texel (2, 0) starts the second cell
        assert_eq!(tex.data[2 * 4], 0.0);
    }
}
