//! Shared harness for the integration tests.
//!
//! Everything renders through the software backend at small sizes so the suite
//! runs without a GPU.

#![allow(dead_code)]

pub mod faulty;

use std::sync::Arc;

use glam::{Vec3, Vec4};
use parking_lot::Mutex;
use shading_pipeline::{
    backend::{PixelBuffer, ReadbackSource, SoftwareBackend},
    pipeline::{BloomConfig, ShadowConfig, SsaoConfig},
    resources::{Material, Mesh},
    scene::{
        Attenuation, Camera, DirectionalLight, MainCamera, MeshRenderer, PointLight, SpotLight,
        Transform,
    },
    Entity, RenderPath, RendererConfig, RenderingSystem, World,
};

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;

/// Route `log` output through the test harness. Safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Small shadow maps and a short bloom keep software frames fast
pub fn test_config(width: u32, height: u32, path: RenderPath) -> RendererConfig {
    RendererConfig::default()
        .with_size(width, height)
        .with_path(path)
        .with_shadows(ShadowConfig {
            directional_size: 128,
            spot_size: 64,
            point_size: 32,
            ..ShadowConfig::default()
        })
        .with_ssao(SsaoConfig {
            kernel_size: 8,
            ..SsaoConfig::default()
        })
        .with_bloom(BloomConfig {
            iterations: 1,
            ..BloomConfig::default()
        })
}

pub fn renderer_with(config: RendererConfig) -> RenderingSystem {
    let backend = SoftwareBackend::new(config.width, config.height);
    RenderingSystem::new(Box::new(backend), config).expect("renderer")
}

/// Renderer over a [`faulty::FaultyBackend`], with the handle that arms its faults
pub fn faulty_renderer(path: RenderPath) -> (RenderingSystem, Arc<Mutex<faulty::Faults>>) {
    let (backend, faults) = faulty::FaultyBackend::new(WIDTH, HEIGHT);
    let renderer = RenderingSystem::new(Box::new(backend), test_config(WIDTH, HEIGHT, path)).expect("renderer");
    (renderer, faults)
}

pub fn renderer(path: RenderPath) -> RenderingSystem {
    renderer_with(test_config(WIDTH, HEIGHT, path))
}

/// A world whose render queues are tracked by `renderer`
pub fn world_for(renderer: &mut RenderingSystem) -> World {
    init_logging();
    let mut world = World::new();
    renderer.on_init(&mut world);
    world
}

pub fn spawn_camera(world: &mut World, eye: Vec3, target: Vec3) -> Entity {
    world
        .spawn((
            Camera::perspective(60.0, 0.1, 100.0),
            Transform::looking_at(eye, target, Vec3::Y),
            MainCamera,
        ))
        .id()
}

pub fn spawn_mesh(
    renderer: &mut RenderingSystem,
    world: &mut World,
    mesh: &Mesh,
    material: Material,
    transform: Transform,
) -> Entity {
    let handle = renderer.backend_mut().create_mesh(mesh).expect("mesh upload");
    world.spawn((MeshRenderer::new(handle, material), transform)).id()
}

/// White unit cube at the origin
pub fn spawn_cube(renderer: &mut RenderingSystem, world: &mut World) -> Entity {
    spawn_mesh(
        renderer,
        world,
        &Mesh::cube(),
        Material::plastic(Vec3::ONE),
        Transform::from_position(Vec3::ZERO),
    )
}

pub fn spawn_ground(renderer: &mut RenderingSystem, world: &mut World) -> Entity {
    spawn_mesh(
        renderer,
        world,
        &Mesh::plane(20.0, 20.0, 1),
        Material::rubber(Vec3::splat(0.8)),
        Transform::from_position(Vec3::new(0.0, -0.5, 0.0)),
    )
}

/// Directional light shining from behind the default camera down onto the scene
pub fn spawn_sun(world: &mut World, shadows: bool) -> Entity {
    world
        .spawn((
            DirectionalLight::new(Vec3::ONE, 1.0)
                .with_half_size(20.0)
                .with_shadows(shadows),
            Transform::looking_to(Vec3::new(0.0, 10.0, 10.0), Vec3::new(0.0, -0.5, -1.0), Vec3::Y),
        ))
        .id()
}

pub fn spawn_point(world: &mut World, position: Vec3, shadows: bool) -> Entity {
    world
        .spawn((
            PointLight::new(Vec3::new(1.0, 0.8, 0.6), 1.5, Attenuation::new(1.0, 0.35, 0.44)).with_shadows(shadows),
            Transform::from_position(position),
        ))
        .id()
}

pub fn spawn_spot(world: &mut World, position: Vec3, target: Vec3, shadows: bool) -> Entity {
    world
        .spawn((
            SpotLight::new(Vec3::new(0.6, 0.8, 1.0), 2.0, Attenuation::new(1.0, 0.09, 0.032), 30.0).with_shadows(shadows),
            Transform::looking_at(position, target, Vec3::Y),
        ))
        .id()
}

/// The standard scene: camera at (0, 5, 10) looking at a cube on a ground plane
pub fn cube_scene(renderer: &mut RenderingSystem) -> World {
    let mut world = world_for(renderer);
    spawn_camera(&mut world, Vec3::new(0.0, 5.0, 10.0), Vec3::ZERO);
    spawn_cube(renderer, &mut world);
    world
}

pub fn render(renderer: &mut RenderingSystem, world: &mut World) {
    renderer.on_update(world, 1.0 / 60.0).expect("frame");
}

/// HDR color of the main target
pub fn main_color(renderer: &mut RenderingSystem) -> PixelBuffer {
    let target = renderer.main_target().handle();
    renderer
        .backend_mut()
        .read_pixels(ReadbackSource::Color {
            target,
            attachment: 0,
            layer: 0,
        })
        .expect("main color readback")
}

pub fn main_depth(renderer: &mut RenderingSystem) -> PixelBuffer {
    let target = renderer.main_target().handle();
    renderer
        .backend_mut()
        .read_pixels(ReadbackSource::Depth { target, layer: 0 })
        .expect("main depth readback")
}

pub fn surface(renderer: &mut RenderingSystem) -> PixelBuffer {
    renderer
        .backend_mut()
        .read_pixels(ReadbackSource::Surface)
        .expect("surface readback")
}

pub fn center(pixels: &PixelBuffer) -> Vec4 {
    pixels.get(pixels.width / 2, pixels.height / 2)
}

/// Pixels with any color channel above `threshold`
pub fn lit_pixel_count(pixels: &PixelBuffer, threshold: f32) -> usize {
    pixels
        .pixels
        .iter()
        .filter(|p| p.truncate().max_element() > threshold)
        .count()
}

pub fn assert_images_match(a: &PixelBuffer, b: &PixelBuffer, tolerance: f32) {
    assert_eq!((a.width, a.height), (b.width, b.height), "image sizes differ");
    for (i, (pa, pb)) in a.pixels.iter().zip(&b.pixels).enumerate() {
        let diff = (*pa - *pb).abs().max_element();
        assert!(
            diff <= tolerance,
            "pixel ({}, {}) differs: {pa} vs {pb}",
            i as u32 % a.width,
            i as u32 / a.width
        );
    }
}
