//! Screen-space ambient occlusion
//!
//! A hemisphere kernel oriented along each pixel's normal is compared against the
//! G-buffer positions around it. A 4x4 tiled noise texture rotates the kernel
//! per pixel, and a 4x4 box blur removes the resulting pattern.

use glam::{Mat4, Vec2, Vec3, Vec4};
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backend::{
    AddressMode, DepthFormat, FilterMode, GraphicsBackend, RenderState, RenderStateGuard,
    ShaderHandle, TargetShape, TextureDescriptor, TextureFormat, TextureHandle, TextureSource,
    UniformValue,
};
use crate::error::RenderResult;
use crate::pipeline::gbuffer_pass::{NORMAL_ATTACHMENT, POSITION_ATTACHMENT};
use crate::pipeline::SsaoConfig;
use crate::render_target::{release_on_err, RenderTarget};
use crate::shaders::{names, units, MAX_KERNEL_SIZE};

/// Edge length of the tiled rotation texture
pub const NOISE_SIZE: u32 = 4;

/// Hemisphere samples along +Z, denser near the origin.
///
/// Sample `i` is scaled by `lerp(0.1, 1.0, t^2)` with `t = i / size`.
pub fn generate_kernel(size: usize, seed: u64) -> Vec<Vec4> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..size)
        .map(|i| {
            let direction = Vec3::new(
                rng.gen::<f32>() * 2.0 - 1.0,
                rng.gen::<f32>() * 2.0 - 1.0,
                rng.gen::<f32>(),
            )
            .try_normalize()
            .unwrap_or(Vec3::Z);
            let t = i as f32 / size as f32;
            let scale = 0.1 + (1.0 - 0.1) * t * t;
            (direction * rng.gen::<f32>() * scale).extend(0.0)
        })
        .collect()
}

/// Random rotations around +Z, one RGBA texel each
pub fn generate_noise(seed: u64) -> Vec<f32> {
    // Separate stream from the kernel so resizing the kernel keeps the noise
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    (0..NOISE_SIZE * NOISE_SIZE)
        .flat_map(|_| {
            [
                rng.gen::<f32>() * 2.0 - 1.0,
                rng.gen::<f32>() * 2.0 - 1.0,
                0.0,
                1.0,
            ]
        })
        .collect()
}

pub struct SsaoPass {
    config: SsaoConfig,
    kernel: Vec<Vec4>,
    noise: TextureHandle,
    occlusion: RenderTarget,
    blurred: RenderTarget,
    ssao_shader: ShaderHandle,
    blur_shader: ShaderHandle,
}

impl SsaoPass {
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        width: u32,
        height: u32,
        config: SsaoConfig,
    ) -> RenderResult<Self> {
        let noise = backend.create_texture(
            &TextureDescriptor {
                label: "ssao_noise".to_string(),
                width: NOISE_SIZE,
                height: NOISE_SIZE,
                format: TextureFormat::Rgba16Float,
                shape: TargetShape::Flat,
                filter: FilterMode::Nearest,
                address_mode: AddressMode::Repeat,
            },
            &generate_noise(config.seed),
        )?;
        let (occlusion, blurred) = Self::create_targets(backend, width, height)?;
        let mut pass = Self {
            config,
            kernel: Vec::new(),
            noise,
            occlusion,
            blurred,
            ssao_shader: backend.create_shader(names::SSAO)?,
            blur_shader: backend.create_shader(names::SSAO_BLUR)?,
        };
        pass.set_kernel_size(config.kernel_size);
        Ok(pass)
    }

    pub(crate) fn create_targets(
        backend: &mut dyn GraphicsBackend,
        width: u32,
        height: u32,
    ) -> RenderResult<(RenderTarget, RenderTarget)> {
        let single = |backend: &mut dyn GraphicsBackend, label: &str| {
            RenderTarget::create(
                backend,
                label,
                width,
                height,
                Some(TextureFormat::R16Float),
                DepthFormat::None,
                TargetShape::Flat,
                false,
            )
        };
        let mut occlusion = single(&mut *backend, "ssao")?;
        let blurred = release_on_err(single(&mut *backend, "ssao_blur"), backend, &mut [&mut occlusion])?;
        Ok((occlusion, blurred))
    }

    pub fn name(&self) -> &str {
        "SSAO"
    }

    pub fn config(&self) -> &SsaoConfig {
        &self.config
    }

    pub fn kernel(&self) -> &[Vec4] {
        &self.kernel
    }

    /// Regenerate the kernel. Sizes above the shader limit are clamped.
    pub fn set_kernel_size(&mut self, size: usize) {
        let size = if size > MAX_KERNEL_SIZE {
            warn!("SSAO kernel size {size} exceeds {MAX_KERNEL_SIZE}; clamping");
            MAX_KERNEL_SIZE
        } else {
            size
        };
        self.config.kernel_size = size;
        self.kernel = generate_kernel(size, self.config.seed);
    }

    pub fn set_radius(&mut self, radius: f32) {
        self.config.radius = radius;
    }

    pub fn set_bias(&mut self, bias: f32) {
        self.config.bias = bias;
    }

    pub fn set_power(&mut self, power: f32) {
        self.config.power = power;
    }

    /// Raw occlusion into the first target
    pub fn compute(
        &self,
        backend: &mut dyn GraphicsBackend,
        gbuffer: &RenderTarget,
        view: Mat4,
        projection: Mat4,
    ) {
        debug!("{}: {} samples", self.name(), self.kernel.len());
        self.occlusion.bind(backend);
        let mut pass = RenderStateGuard::new(backend, RenderState::fullscreen());
        pass.bind_shader(self.ssao_shader);
        pass.set_uniform("view", view.into());
        pass.set_uniform("projection", projection.into());
        pass.set_uniform("samples", UniformValue::Vec4Array(self.kernel.clone()));
        pass.set_uniform("kernel_size", (self.kernel.len() as i32).into());
        pass.set_uniform("radius", self.config.radius.into());
        pass.set_uniform("bias", self.config.bias.into());
        pass.set_uniform("power", self.config.power.into());
        let (width, height) = self.occlusion.size();
        let noise_scale = Vec2::new(width as f32, height as f32) / NOISE_SIZE as f32;
        pass.set_uniform("noise_scale", noise_scale.into());

        gbuffer.bind_texture(&mut *pass, units::POSITION, POSITION_ATTACHMENT);
        gbuffer.bind_texture(&mut *pass, units::NORMAL, NORMAL_ATTACHMENT);
        pass.bind_texture(units::NOISE, Some(TextureSource::Texture(self.noise)));
        pass.draw_fullscreen();
    }

    /// 4x4 box blur of the raw occlusion into the second target
    pub fn blur(&self, backend: &mut dyn GraphicsBackend) {
        self.blurred.bind(backend);
        let mut pass = RenderStateGuard::new(backend, RenderState::fullscreen());
        pass.bind_shader(self.blur_shader);
        self.occlusion.bind_texture(&mut *pass, units::SOURCE, 0);
        pass.draw_fullscreen();
    }

    /// Blurred occlusion, read by the ambient lighting pass
    pub fn output(&self) -> &RenderTarget {
        &self.blurred
    }

    pub fn raw_output(&self) -> &RenderTarget {
        &self.occlusion
    }

    pub fn resize(&mut self, backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> RenderResult<()> {
        let targets = Self::create_targets(backend, width, height)?;
        self.replace_targets(backend, targets);
        Ok(())
    }

    /// Swap in targets built by [`SsaoPass::create_targets`], releasing the old pair
    pub(crate) fn replace_targets(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        (occlusion, blurred): (RenderTarget, RenderTarget),
    ) {
        std::mem::replace(&mut self.occlusion, occlusion).release(backend);
        std::mem::replace(&mut self.blurred, blurred).release(backend);
    }

    pub fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        self.occlusion.release(backend);
        self.blurred.release(backend);
        backend.destroy_texture(self.noise);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ClearValues, ReadbackSource, SoftwareBackend};
    use crate::pipeline::gbuffer_pass::GBufferPass;

    #[test]
    fn test_kernel_respects_scale_bound() {
        let size = 64;
        let kernel = generate_kernel(size, 7);
        assert_eq!(kernel.len(), size);
        for (i, sample) in kernel.iter().enumerate() {
            let t = i as f32 / size as f32;
            let bound = 0.1 + 0.9 * t * t;
            assert!(sample.truncate().length() <= bound + 1e-5, "sample {i} too long");
            assert!(sample.z >= 0.0, "sample {i} below the hemisphere");
        }
    }

    #[test]
    fn test_kernel_is_reproducible() {
        assert_eq!(generate_kernel(16, 42), generate_kernel(16, 42));
        assert_ne!(generate_kernel(16, 42), generate_kernel(16, 43));
    }

    #[test]
    fn test_noise_is_in_plane() {
        let noise = generate_noise(3);
        assert_eq!(noise.len(), (NOISE_SIZE * NOISE_SIZE * 4) as usize);
        assert!(noise.chunks(4).all(|t| t[2] == 0.0));
    }

    #[test]
    fn test_kernel_size_clamped() {
        let mut backend = SoftwareBackend::new(8, 8);
        let mut pass = SsaoPass::new(&mut backend, 8, 8, SsaoConfig::default()).unwrap();
        pass.set_kernel_size(200);
        assert_eq!(pass.kernel().len(), MAX_KERNEL_SIZE);
        pass.set_kernel_size(8);
        assert_eq!(pass.kernel().len(), 8);
        assert_eq!(pass.config().kernel_size, 8);
    }

    #[test]
    fn test_background_is_unoccluded() {
        let mut backend = SoftwareBackend::new(8, 8);
        let gbuffer = GBufferPass::new(&mut backend, 8, 8).unwrap();
        gbuffer.target().bind(&mut backend);
        backend.clear(ClearValues::all(Vec4::ZERO));

        let pass = SsaoPass::new(&mut backend, 8, 8, SsaoConfig::default()).unwrap();
        pass.compute(&mut backend, gbuffer.target(), Mat4::IDENTITY, Mat4::IDENTITY);
        pass.blur(&mut backend);
        let ao = backend
            .read_pixels(ReadbackSource::Color {
                target: pass.output().handle(),
                attachment: 0,
                layer: 0,
            })
            .unwrap();
        assert!(ao.pixels.iter().all(|p| (p.x - 1.0).abs() < 1e-3));
    }
}
