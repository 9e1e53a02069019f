//! Texel storage and sampling for the software backend

use glam::{IVec2, UVec2, Vec2, Vec3, Vec4};

use crate::backend::types::{AddressMode, CubeFace, FilterMode, TextureFormat};

/// Layered RGBA float image. Single channel formats keep their value in `x`.
#[derive(Debug, Clone)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub format: TextureFormat,
    pub texels: Vec<Vec4>,
}

impl Image {
    pub fn new(width: u32, height: u32, layers: u32, format: TextureFormat) -> Self {
        let fill = if format.is_depth() { Vec4::ONE } else { Vec4::ZERO };
        Self {
            width,
            height,
            layers,
            format,
            texels: vec![fill; (width * height * layers) as usize],
        }
    }

    #[inline]
    pub fn index(&self, layer: u32, x: u32, y: u32) -> usize {
        ((layer * self.height + y) * self.width + x) as usize
    }

    #[inline]
    pub fn get(&self, layer: u32, x: u32, y: u32) -> Vec4 {
        self.texels[self.index(layer, x, y)]
    }

    /// Store a value, quantizing it the way the format would
    #[inline]
    pub fn set(&mut self, layer: u32, x: u32, y: u32, value: Vec4) {
        let i = self.index(layer, x, y);
        self.texels[i] = quantize(self.format, value);
    }

    pub fn fill_layer(&mut self, layer: u32, value: Vec4) {
        let value = quantize(self.format, value);
        let start = self.index(layer, 0, 0);
        let len = (self.width * self.height) as usize;
        self.texels[start..start + len].fill(value);
    }

    pub fn layer_texels(&self, layer: u32) -> &[Vec4] {
        let start = self.index(layer, 0, 0);
        &self.texels[start..start + (self.width * self.height) as usize]
    }
}

/// Clamp and round a value to what `format` can hold
pub fn quantize(format: TextureFormat, value: Vec4) -> Vec4 {
    match format {
        TextureFormat::Rgba8Unorm
        | TextureFormat::Rgba8UnormSrgb
        | TextureFormat::Bgra8Unorm
        | TextureFormat::Bgra8UnormSrgb => {
            (value.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round() / 255.0
        }
        TextureFormat::Rgba16Float => value.clamp(Vec4::splat(-65504.0), Vec4::splat(65504.0)),
        TextureFormat::R16Float => Vec4::new(value.x.clamp(-65504.0, 65504.0), 0.0, 0.0, 1.0),
        TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8 => {
            Vec4::new(value.x.clamp(0.0, 1.0), 0.0, 0.0, 1.0)
        }
    }
}

/// Stencil plane matching a depth attachment
#[derive(Debug, Clone)]
pub struct StencilPlane {
    pub width: u32,
    pub height: u32,
    pub values: Vec<u8>,
}

impl StencilPlane {
    pub fn new(width: u32, height: u32, layers: u32) -> Self {
        Self {
            width,
            height,
            values: vec![0; (width * height * layers) as usize],
        }
    }

    #[inline]
    pub fn index(&self, layer: u32, x: u32, y: u32) -> usize {
        ((layer * self.height + y) * self.width + x) as usize
    }

    pub fn fill_layer(&mut self, layer: u32, value: u8) {
        let start = self.index(layer, 0, 0);
        let len = (self.width * self.height) as usize;
        self.values[start..start + len].fill(value);
    }
}

/// A texture unit resolved for one draw
#[derive(Clone, Copy)]
pub struct BoundTexture<'a> {
    pub image: &'a Image,
    pub filter: FilterMode,
    pub address: AddressMode,
    pub cube: bool,
}

impl BoundTexture<'_> {
    pub fn size(&self) -> UVec2 {
        UVec2::new(self.image.width, self.image.height)
    }

    fn wrap(&self, coord: i32, extent: u32) -> u32 {
        let extent = extent as i32;
        match self.address {
            AddressMode::ClampToEdge => coord.clamp(0, extent - 1) as u32,
            AddressMode::Repeat => coord.rem_euclid(extent) as u32,
        }
    }

    /// Texel fetch without filtering, out-of-range coordinates clamped
    pub fn load(&self, pixel: IVec2, layer: u32) -> Vec4 {
        let x = pixel.x.clamp(0, self.image.width as i32 - 1) as u32;
        let y = pixel.y.clamp(0, self.image.height as i32 - 1) as u32;
        self.image.get(layer.min(self.image.layers - 1), x, y)
    }

    fn sample_layer(&self, uv: Vec2, layer: u32) -> Vec4 {
        let w = self.image.width;
        let h = self.image.height;
        match self.filter {
            FilterMode::Nearest => {
                let x = self.wrap((uv.x * w as f32).floor() as i32, w);
                let y = self.wrap((uv.y * h as f32).floor() as i32, h);
                self.image.get(layer, x, y)
            }
            FilterMode::Linear => {
                let px = uv.x * w as f32 - 0.5;
                let py = uv.y * h as f32 - 0.5;
                let x0 = px.floor();
                let y0 = py.floor();
                let fx = px - x0;
                let fy = py - y0;
                let (x0, y0) = (x0 as i32, y0 as i32);
                let (xa, xb) = (self.wrap(x0, w), self.wrap(x0 + 1, w));
                let (ya, yb) = (self.wrap(y0, h), self.wrap(y0 + 1, h));
                let top = self.image.get(layer, xa, ya).lerp(self.image.get(layer, xb, ya), fx);
                let bottom = self.image.get(layer, xa, yb).lerp(self.image.get(layer, xb, yb), fx);
                top.lerp(bottom, fy)
            }
        }
    }

    /// 2D sample in normalized coordinates, origin top-left
    pub fn sample(&self, uv: Vec2) -> Vec4 {
        self.sample_layer(uv, 0)
    }

    /// Cube sample along `dir`
    pub fn sample_cube(&self, dir: Vec3) -> Vec4 {
        let (face, uv) = CubeFace::from_direction(dir);
        if !self.cube {
            return self.sample_layer(uv, 0);
        }
        // Faces are sampled independently, so clamp at face edges
        let clamped = BoundTexture {
            address: AddressMode::ClampToEdge,
            ..*self
        };
        clamped.sample_layer(uv, face.layer())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unorm_quantization() {
        let v = quantize(TextureFormat::Rgba8Unorm, Vec4::new(1.5, -1.0, 0.5, 0.25));
        assert_eq!(v.x, 1.0);
        assert_eq!(v.y, 0.0);
        assert!((v.z - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_linear_sampling_blends_neighbours() {
        let mut image = Image::new(2, 1, 1, TextureFormat::Rgba16Float);
        image.set(0, 0, 0, Vec4::ZERO);
        image.set(0, 1, 0, Vec4::ONE);
        let tex = BoundTexture {
            image: &image,
            filter: FilterMode::Linear,
            address: AddressMode::ClampToEdge,
            cube: false,
        };
        let mid = tex.sample(Vec2::new(0.5, 0.5));
        assert!((mid.x - 0.5).abs() < 1e-6);
        assert_eq!(tex.sample(Vec2::new(0.25, 0.5)).x, 0.0);
    }

    #[test]
    fn test_repeat_addressing() {
        let mut image = Image::new(4, 4, 1, TextureFormat::Rgba16Float);
        image.set(0, 1, 0, Vec4::splat(7.0));
        let tex = BoundTexture {
            image: &image,
            filter: FilterMode::Nearest,
            address: AddressMode::Repeat,
            cube: false,
        };
        assert_eq!(tex.sample(Vec2::new(1.0 + 1.5 / 4.0, 0.1)).x, 7.0);
    }

    #[test]
    fn test_cube_sampling_picks_face() {
        let mut image = Image::new(1, 1, 6, TextureFormat::Rgba16Float);
        for face in CubeFace::ALL {
            image.set(face.layer(), 0, 0, Vec4::splat(face.layer() as f32));
        }
        let tex = BoundTexture {
            image: &image,
            filter: FilterMode::Nearest,
            address: AddressMode::ClampToEdge,
            cube: true,
        };
        assert_eq!(tex.sample_cube(Vec3::new(0.0, -2.0, 0.1)).x, 3.0);
        assert_eq!(tex.sample_cube(Vec3::new(0.0, 0.0, -1.0)).x, 5.0);
    }
}
