//! Entity placement
//!
//! Lights, cameras and renderables all take their pose from this component.
//! Forward is local -Z, matching the right-handed view convention.

use bevy_ecs::prelude::*;
use glam::{Mat3, Mat4, Quat, Vec3};

#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Pose at `position` facing `target`
    pub fn looking_at(position: Vec3, target: Vec3, up: Vec3) -> Self {
        let mut transform = Self::from_position(position);
        transform.look_at(target, up);
        transform
    }

    /// Pose at `position` facing along `direction`
    pub fn looking_to(position: Vec3, direction: Vec3, up: Vec3) -> Self {
        Self::looking_at(position, position + direction, up)
    }

    /// Model matrix: scale, then rotate, then translate
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * -Vec3::Z
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    /// Turn in place until [`Transform::forward`] points at `target`.
    /// A target at the current position leaves the rotation unchanged.
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        let forward = (target - self.position).normalize_or_zero();
        if forward == Vec3::ZERO {
            return;
        }
        // Looking along `up` leaves no plane to build a basis in
        let up = if forward.cross(up).length_squared() >= 1e-8 {
            up
        } else if forward.y.abs() > 0.9 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        let right = forward.cross(up).normalize();
        let up = right.cross(forward);
        self.rotation = Quat::from_mat3(&Mat3::from_cols(right, up, -forward));
    }

    /// World-to-view matrix for a camera at this pose
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward(), self.up())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_look_at_orients_forward() {
        let t = Transform::looking_at(Vec3::new(0.0, 5.0, 10.0), Vec3::ZERO, Vec3::Y);
        let expected = (-Vec3::new(0.0, 5.0, 10.0)).normalize();
        assert!((t.forward() - expected).length() < 1e-5);
        assert!(t.up().y > 0.0);
    }

    #[test]
    fn test_look_straight_down() {
        let t = Transform::looking_to(Vec3::Y, -Vec3::Y, Vec3::Y);
        assert!((t.forward() + Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_view_matrix_maps_target_onto_negative_z() {
        let t = Transform::looking_at(Vec3::new(3.0, 1.0, 2.0), Vec3::ZERO, Vec3::Y);
        let p = t.view_matrix().transform_point3(Vec3::ZERO);
        assert!(p.x.abs() < 1e-4 && p.y.abs() < 1e-4);
        assert!(p.z < 0.0);
    }
}
