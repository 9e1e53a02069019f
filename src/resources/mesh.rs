//! Procedural meshes
//!
//! All generators emit counter-clockwise front faces seen from outside, which the
//! stencil light-volume pass relies on.

use crate::backend::types::Vertex;
use glam::{Vec2, Vec3, Vec4};
use std::f32::consts::{PI, TAU};

/// Indexed triangle list
#[derive(Debug, Clone)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub name: String,
}

/// Outward normal and in-face (u, v) axes of each cube face, with u × v = normal
const CUBE_FACES: [(Vec3, Vec3, Vec3); 6] = [
    (Vec3::Z, Vec3::X, Vec3::Y),
    (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
    (Vec3::X, Vec3::NEG_Z, Vec3::Y),
    (Vec3::NEG_X, Vec3::Z, Vec3::Y),
    (Vec3::Y, Vec3::X, Vec3::NEG_Z),
    (Vec3::NEG_Y, Vec3::X, Vec3::Z),
];

impl Mesh {
    fn empty(name: &str) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            name: name.to_string(),
        }
    }

    /// Triangles as vertex triples
    pub fn triangles(&self) -> impl Iterator<Item = [&Vertex; 3]> + '_ {
        self.indices
            .chunks_exact(3)
            .map(move |tri| [tri[0], tri[1], tri[2]].map(|i| &self.vertices[i as usize]))
    }

    /// Unit cube centered at the origin, four vertices per face
    pub fn cube() -> Self {
        let mut mesh = Mesh::empty("cube");
        for (normal, u, v) in CUBE_FACES {
            let base = mesh.vertices.len() as u32;
            for (s, t) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
                let position = (normal + u * (2.0 * s - 1.0) + v * (2.0 * t - 1.0)) * 0.5;
                mesh.vertices.push(Vertex {
                    position,
                    normal,
                    uv: Vec2::new(s, 1.0 - t),
                    tangent: u.extend(1.0),
                });
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        mesh
    }

    /// UV sphere from pole to pole
    pub fn sphere(radius: f32, segments: u32, rings: u32) -> Self {
        Mesh::grid("sphere", segments, rings, |u, v| {
            let (theta, phi) = (u * TAU, v * PI);
            let normal = Vec3::new(phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin());
            Vertex {
                position: normal * radius,
                normal,
                uv: Vec2::new(u, v),
                tangent: Vec4::new(-theta.sin(), 0.0, theta.cos(), 1.0),
            }
        })
    }

    /// Closed cone with its apex at the origin, opening along -Z to a base of
    /// radius 1 at z = -1. Scaling by (r, r, h) gives a cone of base radius r and
    /// height h, matching a spot light looking down its local -Z.
    pub fn cone(segments: u32) -> Self {
        let mut mesh = Mesh::empty("cone");
        let step = TAU / segments as f32;
        let rim = |a: f32| Vec3::new(a.cos(), a.sin(), -1.0);

        // Apex duplicated per slice so each slice keeps a flat normal
        for i in 0..segments {
            let (a0, a1) = (i as f32 * step, (i + 1) as f32 * step);
            let mid = (a0 + a1) * 0.5;
            let normal = Vec3::new(mid.cos(), mid.sin(), 1.0).normalize();
            let base = mesh.vertices.len() as u32;
            for position in [Vec3::ZERO, rim(a0), rim(a1)] {
                mesh.vertices.push(Vertex {
                    position,
                    normal,
                    uv: Vec2::ZERO,
                    tangent: Vec4::new(-mid.sin(), mid.cos(), 0.0, 1.0),
                });
            }
            mesh.indices.extend_from_slice(&[base, base + 1, base + 2]);
        }

        let cap = |position: Vec3| Vertex {
            position,
            normal: Vec3::NEG_Z,
            uv: position.truncate() * 0.5 + 0.5,
            tangent: Vec4::X + Vec4::W,
        };
        let center = mesh.vertices.len() as u32;
        mesh.vertices.push(cap(Vec3::NEG_Z));
        mesh.vertices.extend((0..=segments).map(|i| cap(rim(i as f32 * step))));
        for i in 0..segments {
            let edge = center + 1 + i;
            mesh.indices.extend_from_slice(&[center, edge + 1, edge]);
        }
        mesh
    }

    /// Flat plane in XZ facing +Y
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        Mesh::grid("plane", subdivisions, subdivisions, |u, v| Vertex {
            position: Vec3::new((u - 0.5) * width, 0.0, (0.5 - v) * depth),
            normal: Vec3::Y,
            uv: Vec2::new(u, v),
            tangent: Vec4::X + Vec4::W,
        })
    }

    /// `(columns + 1) × (rows + 1)` vertices from `vertex(u, v)` with u, v in [0, 1].
    /// Quads wind (u, v) → (u + du, v) → (u, v + dv) as front faces.
    fn grid(name: &str, columns: u32, rows: u32, vertex: impl Fn(f32, f32) -> Vertex) -> Self {
        let mut mesh = Mesh::empty(name);
        for row in 0..=rows {
            for column in 0..=columns {
                mesh.vertices
                    .push(vertex(column as f32 / columns as f32, row as f32 / rows as f32));
            }
        }
        let stride = columns + 1;
        for row in 0..rows {
            for column in 0..columns {
                let a = row * stride + column;
                let below = a + stride;
                mesh.indices
                    .extend_from_slice(&[a, a + 1, below, a + 1, below + 1, below]);
            }
        }
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every triangle's geometric normal must point away from the mesh center.
    fn assert_outward_winding(mesh: &Mesh, center: Vec3) {
        for [a, b, c] in mesh.triangles() {
            let n = (b.position - a.position).cross(c.position - a.position);
            if n.length_squared() < 1e-10 {
                continue;
            }
            let centroid = (a.position + b.position + c.position) / 3.0;
            assert!(
                n.dot(centroid - center) > 0.0,
                "{} has an inward-facing triangle at {centroid:?}",
                mesh.name
            );
        }
    }

    #[test]
    fn test_cube_winding() {
        let cube = Mesh::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert!(cube.vertices.iter().all(|v| v.position.abs().max_element() == 0.5));
        assert_outward_winding(&cube, Vec3::ZERO);
    }

    #[test]
    fn test_sphere_winding_and_radius() {
        let sphere = Mesh::sphere(1.0, 16, 12);
        assert_outward_winding(&sphere, Vec3::ZERO);
        for v in &sphere.vertices {
            assert!((v.position.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_cone_winding_and_extent() {
        let cone = Mesh::cone(16);
        // Interior point of the cone
        assert_outward_winding(&cone, Vec3::new(0.0, 0.0, -0.7));
        let min_z = cone
            .vertices
            .iter()
            .map(|v| v.position.z)
            .fold(f32::MAX, f32::min);
        assert!((min_z + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_plane_faces_up() {
        let plane = Mesh::plane(2.0, 2.0, 2);
        assert_eq!(plane.indices.len(), 2 * 2 * 6);
        for [a, b, c] in plane.triangles() {
            let n = (b.position - a.position).cross(c.position - a.position);
            assert!(n.y > 0.0);
        }
    }
}
