//! Off-screen render targets
//!
//! A [`RenderTarget`] owns a backend target with zero or more color attachments
//! and a depth (or depth/stencil) attachment. Attachments are fixed for the life
//! of the target; resizing releases it and creates a new one.

use log::debug;

use crate::backend::{
    AttachmentDescriptor, CubeFace, DepthFormat, GraphicsBackend, RenderTargetDescriptor,
    RenderTargetHandle, TargetBinding, TargetShape, TargetStatus, TextureFormat, TextureSource,
    Viewport,
};
use crate::error::{RenderError, RenderResult};

#[derive(Debug)]
pub struct RenderTarget {
    label: String,
    handle: Option<RenderTargetHandle>,
    width: u32,
    height: u32,
    shape: TargetShape,
    attachments: Vec<AttachmentDescriptor>,
}

impl RenderTarget {
    /// Single color attachment plus optional depth, or depth only when `color` is `None`.
    ///
    /// # Panics
    /// When both `color` and `depth` are absent.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        width: u32,
        height: u32,
        color: Option<TextureFormat>,
        depth: DepthFormat,
        shape: TargetShape,
        filtered: bool,
    ) -> RenderResult<Self> {
        let depth_format = depth.texture_format();
        assert!(
            color.is_some() || depth_format.is_some(),
            "render target '{label}' requested depth-only without a depth format"
        );
        let mut attachments = Vec::with_capacity(2);
        if let Some(format) = color {
            attachments.push(AttachmentDescriptor::color(format).with_filtering(filtered));
        }
        if let Some(format) = depth_format {
            attachments.push(AttachmentDescriptor::depth(format));
        }
        Self::build(backend, label, width, height, attachments, shape)
    }

    /// Several color attachments. A render-only depth/stencil attachment is added
    /// when `entries` declares none.
    pub fn create_mrt(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        width: u32,
        height: u32,
        entries: &[AttachmentDescriptor],
        shape: TargetShape,
    ) -> RenderResult<Self> {
        let mut attachments = entries.to_vec();
        if !attachments.iter().any(AttachmentDescriptor::is_depth) {
            attachments
                .push(AttachmentDescriptor::depth(TextureFormat::Depth24PlusStencil8).render_only());
        }
        Self::build(backend, label, width, height, attachments, shape)
    }

    fn build(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        width: u32,
        height: u32,
        attachments: Vec<AttachmentDescriptor>,
        shape: TargetShape,
    ) -> RenderResult<Self> {
        let desc = RenderTargetDescriptor {
            label: label.to_string(),
            width,
            height,
            shape,
            attachments,
        };
        let handle = backend.create_render_target(&desc)?;
        let mut target = Self {
            label: desc.label,
            handle: Some(handle),
            width,
            height,
            shape,
            attachments: desc.attachments,
        };
        let reason = match backend.render_target_status(handle) {
            TargetStatus::Complete => None,
            TargetStatus::Incomplete(reason) => Some(reason),
            TargetStatus::Missing => Some("missing after creation".to_string()),
        };
        if let Some(reason) = reason {
            target.release(backend);
            return Err(RenderError::IncompleteRenderTarget {
                label: label.to_string(),
                reason,
            });
        }
        debug!(
            "Created render target '{}' {}x{} ({} attachments)",
            target.label,
            width,
            height,
            target.attachments.len()
        );
        Ok(target)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn shape(&self) -> TargetShape {
        self.shape
    }

    pub fn attachments(&self) -> &[AttachmentDescriptor] {
        &self.attachments
    }

    pub fn color_count(&self) -> usize {
        self.attachments.iter().filter(|a| !a.is_depth()).count()
    }

    pub fn has_stencil(&self) -> bool {
        self.attachments.iter().any(|a| a.format.has_stencil())
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }

    /// Backend handle.
    ///
    /// # Panics
    /// After [`RenderTarget::release`].
    pub fn handle(&self) -> RenderTargetHandle {
        match self.handle {
            Some(handle) => handle,
            None => panic!("render target '{}' used after release", self.label),
        }
    }

    fn viewport(&self) -> Viewport {
        Viewport::full(self.width, self.height)
    }

    /// Make this the active draw surface with a matching viewport. Does not clear.
    pub fn bind(&self, backend: &mut dyn GraphicsBackend) {
        backend.bind_render_target(TargetBinding::Target(self.handle()));
        backend.set_viewport(self.viewport());
    }

    /// Draw into one face of a cube target
    pub fn bind_face(&self, backend: &mut dyn GraphicsBackend, face: CubeFace) {
        debug_assert_eq!(self.shape, TargetShape::Cube, "'{}' is not a cube target", self.label);
        backend.bind_render_target(TargetBinding::Face(self.handle(), face));
        backend.set_viewport(self.viewport());
    }

    /// Source of a framebuffer blit
    pub fn bind_read_only(&self, backend: &mut dyn GraphicsBackend) {
        backend.bind_read_target(Some(self.handle()));
    }

    /// Destination of a framebuffer blit
    pub fn bind_write_only(&self, backend: &mut dyn GraphicsBackend) {
        backend.bind_render_target(TargetBinding::Target(self.handle()));
    }

    /// Sample color attachment `index` on texture `unit`
    pub fn bind_texture(&self, backend: &mut dyn GraphicsBackend, unit: u32, index: usize) {
        backend.bind_texture(
            unit,
            Some(TextureSource::Attachment {
                target: self.handle(),
                index,
            }),
        );
    }

    /// Sample the depth attachment on texture `unit`
    pub fn bind_depth_texture(&self, backend: &mut dyn GraphicsBackend, unit: u32) {
        backend.bind_texture(unit, Some(TextureSource::Depth(self.handle())));
    }

    /// Completeness as reported by the backend
    pub fn validate(&self, backend: &dyn GraphicsBackend) -> bool {
        self.handle
            .is_some_and(|h| backend.render_target_status(h) == TargetStatus::Complete)
    }

    /// Release the backend target. Safe to call more than once.
    pub fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Some(handle) = self.handle.take() {
            backend.destroy_render_target(handle);
        }
    }
}

/// Pass `result` through, releasing every target in `built` when it is an error.
/// Lets a group of targets be created all together or not at all.
pub(crate) fn release_on_err<T>(
    result: RenderResult<T>,
    backend: &mut dyn GraphicsBackend,
    built: &mut [&mut RenderTarget],
) -> RenderResult<T> {
    if result.is_err() {
        for target in built {
            target.release(backend);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ClearValues, ReadbackSource, SoftwareBackend};
    use glam::Vec4;

    fn gbuffer_entries() -> Vec<AttachmentDescriptor> {
        vec![
            AttachmentDescriptor::color(TextureFormat::Rgba16Float),
            AttachmentDescriptor::color(TextureFormat::Rgba16Float),
            AttachmentDescriptor::color(TextureFormat::Rgba8Unorm),
        ]
    }

    #[test]
    fn test_create_color_and_depth() {
        let mut backend = SoftwareBackend::new(8, 8);
        let target = RenderTarget::create(
            &mut backend,
            "scene",
            8,
            8,
            Some(TextureFormat::Rgba16Float),
            DepthFormat::Depth24Stencil8,
            TargetShape::Flat,
            true,
        )
        .unwrap();
        assert_eq!(target.color_count(), 1);
        assert!(target.has_stencil());
        assert!(target.validate(&backend));
        assert_eq!(backend.live_attachment_count(), 2);
    }

    #[test]
    fn test_depth_only_target() {
        let mut backend = SoftwareBackend::new(8, 8);
        let target = RenderTarget::create(
            &mut backend,
            "shadow",
            16,
            16,
            None,
            DepthFormat::Depth32,
            TargetShape::Cube,
            false,
        )
        .unwrap();
        assert_eq!(target.color_count(), 0);
        assert!(!target.has_stencil());
        assert_eq!(target.shape(), TargetShape::Cube);
    }

    #[test]
    #[should_panic(expected = "depth-only")]
    fn test_no_attachments_panics() {
        let mut backend = SoftwareBackend::new(8, 8);
        let _ = RenderTarget::create(
            &mut backend,
            "empty",
            8,
            8,
            None,
            DepthFormat::None,
            TargetShape::Flat,
            false,
        );
    }

    #[test]
    fn test_mrt_adds_render_only_depth() {
        let mut backend = SoftwareBackend::new(8, 8);
        let target =
            RenderTarget::create_mrt(&mut backend, "gbuffer", 8, 8, &gbuffer_entries(), TargetShape::Flat)
                .unwrap();
        assert_eq!(target.color_count(), 3);
        assert_eq!(target.attachments().len(), 4);
        let depth = target.attachments().iter().find(|a| a.is_depth()).unwrap();
        assert!(!depth.sampled);
        assert!(depth.format.has_stencil());
    }

    #[test]
    fn test_zero_extent_is_an_error() {
        let mut backend = SoftwareBackend::new(8, 8);
        let result = RenderTarget::create_mrt(&mut backend, "bad", 0, 8, &gbuffer_entries(), TargetShape::Flat);
        assert!(matches!(result, Err(RenderError::Backend(_))));
        assert_eq!(backend.live_attachment_count(), 0);
    }

    #[test]
    fn test_bind_then_clear_reaches_target() {
        let mut backend = SoftwareBackend::new(8, 8);
        let target = RenderTarget::create(
            &mut backend,
            "scene",
            4,
            4,
            Some(TextureFormat::Rgba8Unorm),
            DepthFormat::Depth24Stencil8,
            TargetShape::Flat,
            false,
        )
        .unwrap();
        target.bind(&mut backend);
        backend.clear(ClearValues::all(Vec4::new(1.0, 0.0, 0.0, 1.0)));
        let pixels = backend
            .read_pixels(ReadbackSource::Color {
                target: target.handle(),
                attachment: 0,
                layer: 0,
            })
            .unwrap();
        assert_eq!(pixels.width, 4);
        assert!((pixels.center() - Vec4::new(1.0, 0.0, 0.0, 1.0)).length() < 1e-3);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut backend = SoftwareBackend::new(8, 8);
        let mut target =
            RenderTarget::create_mrt(&mut backend, "gbuffer", 8, 8, &gbuffer_entries(), TargetShape::Flat)
                .unwrap();
        target.release(&mut backend);
        target.release(&mut backend);
        assert!(target.is_released());
        assert!(!target.validate(&backend));
        assert_eq!(backend.live_attachment_count(), 0);
    }
}
