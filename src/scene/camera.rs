//! Camera system

use bevy_ecs::prelude::*;
use glam::{Mat4, Vec3};

use super::Transform;

/// Camera projection type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        /// Half of the visible height in world units
        size: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
}

impl Default for Projection {
    fn default() -> Self {
        Projection::Perspective {
            fov_y: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Projection {
    pub fn matrix(&self) -> Mat4 {
        match *self {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov_y, aspect, near, far),
            Projection::Orthographic {
                size,
                aspect,
                near,
                far,
            } => Mat4::orthographic_rh(-size * aspect, size * aspect, -size, size, near, far),
        }
    }

    pub fn near(&self) -> f32 {
        match self {
            Projection::Perspective { near, .. } | Projection::Orthographic { near, .. } => *near,
        }
    }

    pub fn far(&self) -> f32 {
        match self {
            Projection::Perspective { far, .. } | Projection::Orthographic { far, .. } => *far,
        }
    }

    pub fn aspect(&self) -> f32 {
        match self {
            Projection::Perspective { aspect, .. } | Projection::Orthographic { aspect, .. } => {
                *aspect
            }
        }
    }
}

/// Camera component. The view comes from the entity's [`Transform`]; the
/// projection matrix is cached and rebuilt by every setter.
#[derive(Component, Debug, Clone)]
pub struct Camera {
    projection: Projection,
    matrix: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self::from_projection(Projection::default())
    }
}

impl Camera {
    pub fn from_projection(projection: Projection) -> Self {
        Self {
            projection,
            matrix: projection.matrix(),
        }
    }

    pub fn perspective(fov_y_degrees: f32, near: f32, far: f32) -> Self {
        Self::from_projection(Projection::Perspective {
            fov_y: fov_y_degrees.to_radians(),
            aspect: 1.0,
            near,
            far,
        })
    }

    pub fn orthographic(size: f32, near: f32, far: f32) -> Self {
        Self::from_projection(Projection::Orthographic {
            size,
            aspect: 1.0,
            near,
            far,
        })
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Get the projection matrix
    pub fn projection_matrix(&self) -> Mat4 {
        self.matrix
    }

    pub fn near(&self) -> f32 {
        self.projection.near()
    }

    pub fn far(&self) -> f32 {
        self.projection.far()
    }

    pub fn set_fov(&mut self, fov_y_degrees: f32) {
        if let Projection::Perspective { fov_y, .. } = &mut self.projection {
            *fov_y = fov_y_degrees.to_radians();
        }
        self.rebuild();
    }

    pub fn set_clip_planes(&mut self, near: f32, far: f32) {
        match &mut self.projection {
            Projection::Perspective { near: n, far: f, .. }
            | Projection::Orthographic { near: n, far: f, .. } => {
                *n = near;
                *f = far;
            }
        }
        self.rebuild();
    }

    pub fn set_ortho_size(&mut self, size: f32) {
        if let Projection::Orthographic { size: s, .. } = &mut self.projection {
            *s = size;
        }
        self.rebuild();
    }

    /// Update the aspect ratio. Returns whether it changed.
    pub fn set_aspect(&mut self, aspect: f32) -> bool {
        if (self.projection.aspect() - aspect).abs() <= f32::EPSILON {
            return false;
        }
        match &mut self.projection {
            Projection::Perspective { aspect: a, .. } | Projection::Orthographic { aspect: a, .. } => {
                *a = aspect;
            }
        }
        self.rebuild();
        true
    }

    fn rebuild(&mut self) {
        self.matrix = self.projection.matrix();
    }

    /// Snapshot the matrices the passes need for this frame
    pub fn view(&self, transform: &Transform) -> CameraView {
        CameraView {
            view: transform.view_matrix(),
            projection: self.matrix,
            position: transform.position,
            near: self.near(),
            far: self.far(),
        }
    }
}

/// Marks the camera the renderer draws from. Exactly one per frame.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct MainCamera;

/// Per-frame camera matrices
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraView {
    pub view: Mat4,
    pub projection: Mat4,
    pub position: Vec3,
    pub near: f32,
    pub far: f32,
}

impl CameraView {
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_rebuilt_on_change() {
        let mut camera = Camera::perspective(60.0, 0.1, 50.0);
        let before = camera.projection_matrix();
        assert!(camera.set_aspect(2.0));
        assert_ne!(camera.projection_matrix(), before);
        assert!(!camera.set_aspect(2.0));

        let before = camera.projection_matrix();
        camera.set_clip_planes(1.0, 10.0);
        assert_ne!(camera.projection_matrix(), before);
        assert_eq!(camera.far(), 10.0);
    }

    #[test]
    fn test_orthographic_size() {
        let mut camera = Camera::orthographic(5.0, 0.1, 10.0);
        camera.set_ortho_size(10.0);
        let p = camera.projection_matrix().project_point3(Vec3::new(0.0, 10.0, -1.0));
        assert!((p.y - 1.0).abs() < 1e-5);
    }
}
