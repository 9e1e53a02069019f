//! Triangle setup and per-fragment operations
//!
//! Clip space follows the wgpu conventions: depth in `[0, 1]`, counter-clockwise
//! front faces in NDC, framebuffer origin at the top-left corner.

use glam::{Vec2, Vec4, Vec4Swizzles};

use super::texels::{Image, StencilPlane};
use super::programs::{Fragment, ShaderContext, SoftwareProgram, Varyings, VertexOut};
use crate::backend::types::{
    BlendComponent, BlendFactor, BlendOperation, BlendState, ColorWrites, CullMode, FrontFace,
    PolygonMode, RenderState, StencilOperation, StencilState, Vertex, Viewport,
};

/// Attachments of one layer of a target, ready to be drawn into
pub struct RasterTarget<'a> {
    pub colors: Vec<&'a mut Image>,
    pub depth: Option<&'a mut Image>,
    pub stencil: Option<&'a mut StencilPlane>,
    pub layer: u32,
    pub width: u32,
    pub height: u32,
}

const W_EPSILON: f32 = 1e-5;

#[derive(Clone, Copy)]
struct ClipVertex {
    clip: Vec4,
    varyings: Varyings,
}

impl ClipVertex {
    fn lerp(a: &Self, b: &Self, t: f32) -> Self {
        Self {
            clip: a.clip.lerp(b.clip, t),
            varyings: a.varyings * (1.0 - t) + b.varyings * t,
        }
    }
}

/// Sutherland-Hodgman against `z >= 0`, `z <= w` and `w >= eps`
fn clip_polygon(triangle: [ClipVertex; 3]) -> Vec<ClipVertex> {
    let planes: [fn(Vec4) -> f32; 3] = [|c| c.z, |c| c.w - c.z, |c| c.w - W_EPSILON];
    let mut polygon = triangle.to_vec();
    for plane in planes {
        if polygon.is_empty() {
            break;
        }
        let mut out = Vec::with_capacity(polygon.len() + 2);
        for i in 0..polygon.len() {
            let a = &polygon[i];
            let b = &polygon[(i + 1) % polygon.len()];
            let da = plane(a.clip);
            let db = plane(b.clip);
            if da >= 0.0 {
                out.push(*a);
            }
            if (da >= 0.0) != (db >= 0.0) {
                out.push(ClipVertex::lerp(a, b, da / (da - db)));
            }
        }
        polygon = out;
    }
    polygon
}

#[derive(Clone, Copy)]
struct ScreenVertex {
    position: Vec2,
    depth: f32,
    inv_w: f32,
    varyings: Varyings,
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Top-left fill rule for edges of a triangle with positive screen-space area
fn is_top_left(a: Vec2, b: Vec2) -> bool {
    let d = b - a;
    (d.y == 0.0 && d.x > 0.0) || d.y < 0.0
}

fn blend_factor(factor: BlendFactor, src: Vec4, dst: Vec4, channel: Vec4) -> Vec4 {
    match factor {
        BlendFactor::Zero => Vec4::ZERO,
        BlendFactor::One => Vec4::ONE,
        BlendFactor::Src => channel,
        BlendFactor::OneMinusSrc => Vec4::ONE - channel,
        BlendFactor::SrcAlpha => Vec4::splat(src.w),
        BlendFactor::OneMinusSrcAlpha => Vec4::splat(1.0 - src.w),
        BlendFactor::Dst => dst,
        BlendFactor::OneMinusDst => Vec4::ONE - dst,
        BlendFactor::DstAlpha => Vec4::splat(dst.w),
        BlendFactor::OneMinusDstAlpha => Vec4::splat(1.0 - dst.w),
    }
}

fn blend_component(component: &BlendComponent, src: Vec4, dst: Vec4) -> Vec4 {
    let s = src * blend_factor(component.src_factor, src, dst, src);
    let d = dst * blend_factor(component.dst_factor, src, dst, dst);
    match component.operation {
        BlendOperation::Add => s + d,
        BlendOperation::Subtract => s - d,
        BlendOperation::ReverseSubtract => d - s,
        BlendOperation::Min => src.min(dst),
        BlendOperation::Max => src.max(dst),
    }
}

fn blend(state: &BlendState, src: Vec4, dst: Vec4) -> Vec4 {
    let color = blend_component(&state.color, src, dst);
    let alpha = blend_component(&state.alpha, src, dst);
    color.xyz().extend(alpha.w)
}

fn mask_write(writes: ColorWrites, old: Vec4, new: Vec4) -> Vec4 {
    Vec4::new(
        if writes.contains(ColorWrites::RED) { new.x } else { old.x },
        if writes.contains(ColorWrites::GREEN) { new.y } else { old.y },
        if writes.contains(ColorWrites::BLUE) { new.z } else { old.z },
        if writes.contains(ColorWrites::ALPHA) { new.w } else { old.w },
    )
}

struct Rasterizer<'p, 'c, 't> {
    program: &'p dyn SoftwareProgram,
    ctx: &'p ShaderContext<'c>,
    state: &'p RenderState,
    target: &'p mut RasterTarget<'t>,
    /// Inclusive-exclusive pixel bounds
    min: (i32, i32),
    max: (i32, i32),
    shaded: u64,
}

impl Rasterizer<'_, '_, '_> {
    fn needs_shading(&self) -> bool {
        self.state.color_writes != ColorWrites::NONE || self.program.writes_depth()
    }

    fn update_stencil(&mut self, index: usize, state: &StencilState, op: StencilOperation) {
        if let Some(plane) = self.target.stencil.as_mut() {
            let old = plane.values[index];
            let new = op.apply(old, state.reference);
            plane.values[index] = (old & !state.write_mask) | (new & state.write_mask);
        }
    }

    fn fragment(&mut self, x: i32, y: i32, depth: f32, front_facing: bool, varyings: Varyings) {
        if x < self.min.0 || y < self.min.1 || x >= self.max.0 || y >= self.max.1 {
            return;
        }
        let (ux, uy) = (x as u32, y as u32);
        let layer = self.target.layer;
        let fragment = Fragment {
            coord: Vec2::new(x as f32 + 0.5, y as f32 + 0.5),
            depth: depth.clamp(0.0, 1.0),
            front_facing,
            varyings,
        };

        // Stencil test
        let stencil = self.state.stencil.map(|s| {
            let face = if front_facing { s.front } else { s.back };
            (s, face)
        });
        let stencil_index = self.target.stencil.as_ref().map(|p| p.index(layer, ux, uy));
        if let (Some((state, face)), Some(index)) = (stencil, stencil_index) {
            let passed = self.target.stencil.as_ref().is_some_and(|plane| {
                let stored = plane.values[index] & state.read_mask;
                face.compare.passes(state.reference & state.read_mask, stored)
            });
            if !passed {
                self.update_stencil(index, &state, face.fail_op);
                return;
            }
        }

        // Depth-writing programs run before the depth test
        let mut output = None;
        let mut fragment_depth = fragment.depth;
        if self.program.writes_depth() {
            let out = self.program.fragment(self.ctx, &fragment);
            self.shaded += 1;
            if out.discard {
                return;
            }
            if let Some(d) = out.depth {
                fragment_depth = d;
            }
            output = Some(out);
        }

        let depth_passed = match (self.state.depth_test, self.target.depth.as_ref()) {
            (Some(compare), Some(depth_image)) => {
                compare.passes(fragment_depth, depth_image.get(layer, ux, uy).x)
            }
            _ => true,
        };
        if !depth_passed {
            if let (Some((state, face)), Some(index)) = (stencil, stencil_index) {
                self.update_stencil(index, &state, face.depth_fail_op);
            }
            return;
        }
        if let (Some((state, face)), Some(index)) = (stencil, stencil_index) {
            self.update_stencil(index, &state, face.pass_op);
        }

        if output.is_none() && self.needs_shading() {
            let out = self.program.fragment(self.ctx, &fragment);
            self.shaded += 1;
            output = Some(out);
        }
        if output.as_ref().is_some_and(|o| o.discard) {
            return;
        }

        if self.state.depth_write {
            if let Some(depth_image) = self.target.depth.as_mut() {
                depth_image.set(layer, ux, uy, Vec4::splat(fragment_depth));
            }
        }

        let Some(output) = output else {
            return;
        };
        if self.state.color_writes == ColorWrites::NONE {
            return;
        }
        for (i, image) in self.target.colors.iter_mut().enumerate().take(output.colors.len()) {
            let dst = image.get(layer, ux, uy);
            let src = output.colors[i];
            let color = match &self.state.blend {
                Some(blend_state) => blend(blend_state, src, dst),
                None => src,
            };
            image.set(layer, ux, uy, mask_write(self.state.color_writes, dst, color));
        }
    }

    fn fill(&mut self, v: [ScreenVertex; 3], front_facing: bool) {
        let area = edge(v[0].position, v[1].position, v[2].position);
        if area <= 0.0 {
            return;
        }
        let lo = v[0].position.min(v[1].position).min(v[2].position);
        let hi = v[0].position.max(v[1].position).max(v[2].position);
        let x0 = (lo.x.floor() as i32).max(self.min.0);
        let y0 = (lo.y.floor() as i32).max(self.min.1);
        let x1 = (hi.x.ceil() as i32).min(self.max.0);
        let y1 = (hi.y.ceil() as i32).min(self.max.1);

        let edges = [(1, 2), (2, 0), (0, 1)];
        let top_left = edges.map(|(a, b)| is_top_left(v[a].position, v[b].position));

        for y in y0..y1 {
            for x in x0..x1 {
                let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let mut weights = [0.0f32; 3];
                let mut inside = true;
                for (k, (a, b)) in edges.iter().enumerate() {
                    let e = edge(v[*a].position, v[*b].position, p);
                    if e < 0.0 || (e == 0.0 && !top_left[k]) {
                        inside = false;
                        break;
                    }
                    weights[k] = e / area;
                }
                if !inside {
                    continue;
                }
                let depth = weights[0] * v[0].depth + weights[1] * v[1].depth + weights[2] * v[2].depth;
                let varyings = perspective_varyings(&v, weights);
                self.fragment(x, y, depth, front_facing, varyings);
            }
        }
    }

    fn line(&mut self, a: ScreenVertex, b: ScreenVertex, front_facing: bool) {
        let delta = b.position - a.position;
        let steps = delta.x.abs().max(delta.y.abs()).ceil().max(1.0) as u32;
        for i in 0..=steps {
            let t = i as f32 / steps as f32;
            let p = a.position + delta * t;
            let depth = a.depth + (b.depth - a.depth) * t;
            let varyings = a.varyings * (1.0 - t) + b.varyings * t;
            self.fragment(p.x.floor() as i32, p.y.floor() as i32, depth, front_facing, varyings);
        }
    }
}

fn perspective_varyings(v: &[ScreenVertex; 3], weights: [f32; 3]) -> Varyings {
    let w = [
        weights[0] * v[0].inv_w,
        weights[1] * v[1].inv_w,
        weights[2] * v[2].inv_w,
    ];
    let sum = w[0] + w[1] + w[2];
    if sum.abs() <= f32::MIN_POSITIVE {
        return v[0].varyings;
    }
    (v[0].varyings * w[0] + v[1].varyings * w[1] + v[2].varyings * w[2]) * (1.0 / sum)
}

fn to_screen(vertex: &ClipVertex, viewport: &Viewport) -> ScreenVertex {
    let inv_w = 1.0 / vertex.clip.w;
    let ndc = vertex.clip.xyz() * inv_w;
    ScreenVertex {
        position: Vec2::new(
            viewport.x as f32 + (ndc.x * 0.5 + 0.5) * viewport.width as f32,
            viewport.y as f32 + (0.5 - ndc.y * 0.5) * viewport.height as f32,
        ),
        depth: ndc.z,
        inv_w,
        varyings: vertex.varyings,
    }
}

/// Run `program` over an indexed triangle list. Returns the number of shaded fragments.
pub fn draw_triangles(
    program: &dyn SoftwareProgram,
    ctx: &ShaderContext,
    vertices: &[Vertex],
    indices: &[u32],
    state: &RenderState,
    viewport: &Viewport,
    target: &mut RasterTarget,
) -> u64 {
    let transformed: Vec<VertexOut> = vertices.iter().map(|v| program.vertex(ctx, v)).collect();
    let min = (viewport.x as i32, viewport.y as i32);
    let max = (
        (viewport.x + viewport.width).min(target.width) as i32,
        (viewport.y + viewport.height).min(target.height) as i32,
    );
    let mut raster = Rasterizer {
        program,
        ctx,
        state,
        target,
        min,
        max,
        shaded: 0,
    };

    for tri in indices.chunks_exact(3) {
        let Some(corners) = tri
            .iter()
            .map(|&i| transformed.get(i as usize))
            .collect::<Option<Vec<_>>>()
        else {
            continue;
        };
        let triangle = [0, 1, 2].map(|k| ClipVertex {
            clip: corners[k].clip,
            varyings: corners[k].varyings,
        });
        let polygon = clip_polygon(triangle);
        if polygon.len() < 3 {
            continue;
        }
        let screen: Vec<ScreenVertex> = polygon.iter().map(|v| to_screen(v, viewport)).collect();

        for i in 1..screen.len() - 1 {
            let mut v = [screen[0], screen[i], screen[i + 1]];
            let area = edge(v[0].position, v[1].position, v[2].position);
            if area == 0.0 {
                continue;
            }
            // The y flip to screen space reverses the sign of the area
            let ccw = area < 0.0;
            let front_facing = match state.front_face {
                FrontFace::Ccw => ccw,
                FrontFace::Cw => !ccw,
            };
            let culled = match state.cull_mode {
                CullMode::None => false,
                CullMode::Front => front_facing,
                CullMode::Back => !front_facing,
            };
            if culled {
                continue;
            }
            if area < 0.0 {
                v.swap(1, 2);
            }
            match state.polygon_mode {
                PolygonMode::Fill => raster.fill(v, front_facing),
                PolygonMode::Line => {
                    raster.line(v[0], v[1], front_facing);
                    raster.line(v[1], v[2], front_facing);
                    raster.line(v[2], v[0], front_facing);
                }
            }
        }
    }
    raster.shaded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::{CompareFunction, TextureFormat};
    use crate::backend::software::programs::FragmentOut;
    use glam::Vec3;
    use std::collections::HashMap;

    struct Solid(Vec4);

    impl SoftwareProgram for Solid {
        fn name(&self) -> &'static str {
            "Solid"
        }

        fn fragment(&self, _ctx: &ShaderContext, _f: &Fragment) -> FragmentOut {
            FragmentOut::color(self.0)
        }
    }

    fn vertex(x: f32, y: f32, z: f32) -> Vertex {
        Vertex {
            position: Vec3::new(x, y, z),
            normal: Vec3::Z,
            uv: Vec2::ZERO,
            tangent: Vec4::ZERO,
        }
    }

    fn run(vertices: &[Vertex], state: &RenderState, color: &mut Image, depth: &mut Image) -> u64 {
        let uniforms = HashMap::new();
        let ctx = ShaderContext {
            uniforms: &uniforms,
            textures: &[],
            subroutine: None,
        };
        let (w, h) = (color.width, color.height);
        let mut target = RasterTarget {
            colors: vec![color],
            depth: Some(depth),
            stencil: None,
            layer: 0,
            width: w,
            height: h,
        };
        draw_triangles(
            &Solid(Vec4::ONE),
            &ctx,
            vertices,
            &[0, 1, 2],
            state,
            &Viewport::full(w, h),
            &mut target,
        )
    }

    #[test]
    fn test_full_screen_quad_covers_each_pixel_once() {
        let mut color = Image::new(8, 8, 1, TextureFormat::Rgba16Float);
        let mut depth = Image::new(8, 8, 1, TextureFormat::Depth32Float);
        let state = RenderState::fullscreen().with_blend(Some(BlendState::additive()));
        let tri_a = [vertex(-1.0, -1.0, 0.5), vertex(1.0, -1.0, 0.5), vertex(1.0, 1.0, 0.5)];
        let tri_b = [vertex(-1.0, -1.0, 0.5), vertex(1.0, 1.0, 0.5), vertex(-1.0, 1.0, 0.5)];
        let shaded = run(&tri_a, &state, &mut color, &mut depth) + run(&tri_b, &state, &mut color, &mut depth);
        assert_eq!(shaded, 64);
        assert!(color.texels.iter().all(|t| t.x == 1.0));
    }

    #[test]
    fn test_back_faces_are_culled() {
        let mut color = Image::new(4, 4, 1, TextureFormat::Rgba8Unorm);
        let mut depth = Image::new(4, 4, 1, TextureFormat::Depth32Float);
        let clockwise = [vertex(-1.0, -1.0, 0.5), vertex(-1.0, 3.0, 0.5), vertex(3.0, -1.0, 0.5)];
        assert_eq!(run(&clockwise, &RenderState::opaque(), &mut color, &mut depth), 0);
        let state = RenderState::opaque().with_front_face(FrontFace::Cw);
        assert_eq!(run(&clockwise, &state, &mut color, &mut depth), 16);
    }

    #[test]
    fn test_depth_test_rejects_farther_fragments() {
        let mut color = Image::new(4, 4, 1, TextureFormat::Rgba8Unorm);
        let mut depth = Image::new(4, 4, 1, TextureFormat::Depth32Float);
        let near = [vertex(-1.0, -1.0, 0.2), vertex(3.0, -1.0, 0.2), vertex(-1.0, 3.0, 0.2)];
        let far = [vertex(-1.0, -1.0, 0.6), vertex(3.0, -1.0, 0.6), vertex(-1.0, 3.0, 0.6)];
        let state = RenderState::opaque().with_depth(Some(CompareFunction::Less), true);
        run(&near, &state, &mut color, &mut depth);
        assert!((depth.get(0, 1, 1).x - 0.2).abs() < 1e-6);
        let state = state.with_color_writes(ColorWrites::NONE);
        run(&far, &state, &mut color, &mut depth);
        assert!((depth.get(0, 1, 1).x - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_triangle_behind_near_plane_is_clipped() {
        let mut color = Image::new(4, 4, 1, TextureFormat::Rgba8Unorm);
        let mut depth = Image::new(4, 4, 1, TextureFormat::Depth32Float);
        let behind = [vertex(-1.0, -1.0, -0.5), vertex(3.0, -1.0, -0.5), vertex(-1.0, 3.0, -0.5)];
        assert_eq!(run(&behind, &RenderState::fullscreen(), &mut color, &mut depth), 0);
    }
}
