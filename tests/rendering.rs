//! End-to-end frames through the software backend.
//!
//! These cover whole-pipeline behavior: what reaches the main target, which
//! lighting programs shade how many fragments, stale shadow maps and resizing.
//!
//! ```bash
//! cargo test --test rendering
//! RUST_LOG=debug cargo test --test rendering -- --nocapture
//! ```

mod common;

use glam::Vec3;
use rstest::rstest;

use common::{
    assert_images_match, center, cube_scene, faulty_renderer, lit_pixel_count, main_color, main_depth, render, renderer,
    renderer_with, spawn_camera, spawn_cube, spawn_ground, spawn_point, spawn_spot, spawn_sun, surface,
    test_config, world_for, HEIGHT, WIDTH,
};
use shading_pipeline::{
    backend::{BackendError, GraphicsBackend},
    scene::{Attenuation, DirectionalLight, PointLight, RenderQueues, SpotLight, Transform},
    shaders::names,
    Entity, RenderError, RenderPath, RenderingSystem, World,
};

#[derive(Debug, Clone, Copy)]
enum LightCase {
    Directional,
    Point,
    Spot,
}

impl LightCase {
    fn spawn(self, world: &mut World, shadows: bool) -> Entity {
        match self {
            LightCase::Directional => spawn_sun(world, shadows),
            LightCase::Point => spawn_point(world, Vec3::new(1.5, 2.5, 1.5), shadows),
            LightCase::Spot => spawn_spot(world, Vec3::new(0.0, 4.0, 3.0), Vec3::ZERO, shadows),
        }
    }

    fn set_shadows(self, world: &mut World, light: Entity, shadows: bool) {
        let mut entity = world.entity_mut(light);
        match self {
            LightCase::Directional => entity.get_mut::<DirectionalLight>().expect("light").shadow.casts_shadows = shadows,
            LightCase::Point => entity.get_mut::<PointLight>().expect("light").shadow.casts_shadows = shadows,
            LightCase::Spot => entity.get_mut::<SpotLight>().expect("light").shadow.casts_shadows = shadows,
        }
    }

    fn deferred_program(self) -> &'static str {
        match self {
            LightCase::Directional => names::DEFERRED_DIRECTIONAL,
            LightCase::Point => names::DEFERRED_POINT,
            LightCase::Spot => names::DEFERRED_SPOT,
        }
    }

    fn forward_program(self) -> &'static str {
        match self {
            LightCase::Directional => names::FORWARD_DIRECTIONAL,
            LightCase::Point => names::FORWARD_POINT,
            LightCase::Spot => names::FORWARD_SPOT,
        }
    }
}

// ============================================================================
// End-to-end
// ============================================================================

#[rstest]
#[case::deferred(RenderPath::Deferred)]
#[case::forward(RenderPath::Forward)]
fn test_directional_light_lights_cube(#[case] path: RenderPath) {
    let mut renderer = renderer(path);
    let mut world = cube_scene(&mut renderer);
    spawn_sun(&mut world, true);

    render(&mut renderer, &mut world);

    let depth = main_depth(&mut renderer);
    assert!(
        depth.pixels.iter().any(|d| d.x < 1.0),
        "main target depth is empty"
    );

    let color = center(&main_color(&mut renderer)).truncate();
    let light = Vec3::ONE;
    assert!(
        color.distance(light) < color.distance(Vec3::ZERO),
        "center {color} is closer to black than to the light color"
    );
}

#[rstest]
fn test_every_light_kind_shades_something(
    #[values(RenderPath::Deferred, RenderPath::Forward)] path: RenderPath,
    #[values(LightCase::Directional, LightCase::Point, LightCase::Spot)] light: LightCase,
) {
    let mut renderer = renderer(path);
    let mut world = cube_scene(&mut renderer);
    spawn_ground(&mut renderer, &mut world);
    light.spawn(&mut world, true);

    render(&mut renderer, &mut world);

    let program = match path {
        RenderPath::Deferred => light.deferred_program(),
        RenderPath::Forward => light.forward_program(),
    };
    assert!(
        renderer.statistics().fragments_for(program) > 0,
        "{program} shaded no fragments"
    );
    assert!(lit_pixel_count(&main_color(&mut renderer), 0.05) > 0);
}

#[test]
fn test_post_chain_reaches_surface() {
    let mut renderer = renderer(RenderPath::Deferred);
    let mut world = cube_scene(&mut renderer);
    spawn_sun(&mut world, false);

    render(&mut renderer, &mut world);

    let output = surface(&mut renderer);
    assert_eq!((output.width, output.height), (WIDTH, HEIGHT));
    assert!(lit_pixel_count(&output, 0.05) > 0, "surface stayed black");
}

#[test]
fn test_empty_scene_renders_clear_color() {
    let mut renderer = renderer(RenderPath::Deferred);
    let mut world = world_for(&mut renderer);
    spawn_camera(&mut world, Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);

    render(&mut renderer, &mut world);

    assert_eq!(lit_pixel_count(&main_color(&mut renderer), 0.0), 0);
}

// ============================================================================
// Light volume culling
// ============================================================================

#[test]
fn test_point_light_outside_frustum_shades_nothing() {
    let mut renderer = renderer(RenderPath::Deferred);
    let mut world = cube_scene(&mut renderer);
    // Camera looks down -Z from z = 10; the light's sphere (range ~29) lies entirely behind it
    let light = spawn_point(&mut world, Vec3::new(0.0, 5.0, 100.0), false);
    let range = world.get::<PointLight>(light).expect("light").range();
    assert!(range < 80.0, "range {range} reaches the frustum");

    render(&mut renderer, &mut world);
    assert_eq!(renderer.statistics().fragments_for(names::DEFERRED_POINT), 0);

    world.entity_mut(light).insert(Transform::from_position(Vec3::new(1.0, 1.5, 1.0)));
    render(&mut renderer, &mut world);
    assert!(renderer.statistics().fragments_for(names::DEFERRED_POINT) > 0);
}

#[test]
fn test_point_light_shades_only_inside_its_volume() {
    let mut renderer = renderer(RenderPath::Deferred);
    let mut world = world_for(&mut renderer);
    spawn_camera(&mut world, Vec3::new(0.0, 12.0, 0.1), Vec3::ZERO);
    spawn_ground(&mut renderer, &mut world);
    // Range ~1.8: lights a small disc of the ground
    let light = PointLight::new(Vec3::ONE, 1.0, Attenuation::new(1.0, 4.5, 75.0));
    assert!(light.range() < 2.0);
    world.spawn((light, Transform::from_position(Vec3::new(0.0, 0.5, 0.0))));

    render(&mut renderer, &mut world);

    let shaded = renderer.statistics().fragments_for(names::DEFERRED_POINT);
    assert!(shaded > 0);
    assert!(
        shaded < u64::from(WIDTH * HEIGHT),
        "the volume should not cover the whole ground"
    );
}

// ============================================================================
// Shadows
// ============================================================================

#[rstest]
#[case::directional(LightCase::Directional)]
#[case::point(LightCase::Point)]
#[case::spot(LightCase::Spot)]
fn test_disabled_shadows_ignore_stale_maps(#[case] light: LightCase) {
    let build = |shadows: bool| {
        let mut renderer = renderer(RenderPath::Deferred);
        let mut world = cube_scene(&mut renderer);
        spawn_ground(&mut renderer, &mut world);
        let entity = light.spawn(&mut world, shadows);
        (renderer, world, entity)
    };

    let (mut fresh, mut fresh_world, _) = build(false);
    render(&mut fresh, &mut fresh_world);
    let expected = main_color(&mut fresh);

    // Fill the shadow map, then switch shadows off and render again
    let (mut stale, mut stale_world, entity) = build(true);
    render(&mut stale, &mut stale_world);
    light.set_shadows(&mut stale_world, entity, false);
    render(&mut stale, &mut stale_world);
    let actual = main_color(&mut stale);

    assert_images_match(&expected, &actual, 1e-5);
}

#[test]
fn test_shadow_projection_written_back_after_frame() {
    let mut renderer = renderer(RenderPath::Deferred);
    let mut world = cube_scene(&mut renderer);
    let sun = spawn_sun(&mut world, true);

    render(&mut renderer, &mut world);

    let light = world.get::<DirectionalLight>(sun).expect("light");
    assert_ne!(light.shadow.projection, glam::Mat4::IDENTITY);
}

// ============================================================================
// Resize
// ============================================================================

#[test]
fn test_resize_twice_is_idempotent() {
    let mut renderer = renderer(RenderPath::Deferred);

    renderer.resize(80, 40).expect("first resize");
    let attachments = renderer.backend().live_attachment_count();
    renderer.resize(80, 40).expect("second resize");

    assert_eq!(renderer.backend().live_attachment_count(), attachments);
    assert_eq!(renderer.size(), (80, 40));
    assert_eq!(renderer.main_target().size(), (80, 40));
    assert_eq!(renderer.gbuffer().target().size(), (80, 40));
    assert_eq!(renderer.ssao().output().size(), (80, 40));
    let (ping, pong) = renderer.post_chain().targets();
    assert_eq!(ping.size(), (80, 40));
    assert_eq!(pong.size(), (80, 40));
    assert_eq!(renderer.backend().surface_size(), (80, 40));
}

#[test]
fn test_resize_then_render() {
    let mut renderer = renderer_with(test_config(800, 600, RenderPath::Deferred));
    let mut world = cube_scene(&mut renderer);
    spawn_sun(&mut world, true);
    render(&mut renderer, &mut world);
    assert_eq!(surface(&mut renderer).width, 800);

    renderer.resize(1600, 1200).expect("resize");
    render(&mut renderer, &mut world);

    let output = surface(&mut renderer);
    assert_eq!((output.width, output.height), (1600, 1200));
    assert_eq!(main_color(&mut renderer).width, 1600);
}

fn assert_window_targets_sized(renderer: &RenderingSystem, size: (u32, u32)) {
    assert_eq!(renderer.size(), size);
    assert_eq!(renderer.main_target().size(), size);
    assert_eq!(renderer.gbuffer().target().size(), size);
    assert_eq!(renderer.ssao().output().size(), size);
    let (ping, pong) = renderer.post_chain().targets();
    assert_eq!(ping.size(), size);
    assert_eq!(pong.size(), size);
    assert_eq!(renderer.backend().surface_size(), size);
}

#[rstest]
#[case::main("main")]
#[case::gbuffer("gbuffer")]
#[case::ssao_blur("ssao_blur")]
#[case::post_pong("post_pong")]
fn test_failed_resize_keeps_previous_targets(#[case] refused: &'static str) {
    let (mut renderer, faults) = faulty_renderer(RenderPath::Deferred);
    let mut world = cube_scene(&mut renderer);
    spawn_sun(&mut world, false);
    render(&mut renderer, &mut world);
    let attachments = renderer.backend().live_attachment_count();

    faults.lock().refuse_target = Some((refused, 100));
    let result = renderer.resize(200, 150);

    assert!(
        matches!(
            result,
            Err(RenderError::Backend(BackendError::RenderTargetCreationFailed { ref label, .. })) if label == refused
        ),
        "{result:?}"
    );
    assert_window_targets_sized(&renderer, (WIDTH, HEIGHT));
    assert_eq!(renderer.backend().live_attachment_count(), attachments, "partial targets leaked");
    assert!(renderer.main_target().validate(renderer.backend()));

    render(&mut renderer, &mut world);
    assert!(center(&main_color(&mut renderer)).truncate().max_element() > 0.0);

    faults.lock().refuse_target = None;
    renderer.resize(200, 150).expect("resize");
    assert_window_targets_sized(&renderer, (200, 150));
    render(&mut renderer, &mut world);
}

#[test]
#[should_panic(expected = "cannot resize")]
fn test_resize_to_zero_panics() {
    let mut renderer = renderer(RenderPath::Deferred);
    let _ = renderer.resize(0, HEIGHT);
}

#[test]
fn test_failed_frame_is_still_closed() {
    let (mut renderer, faults) = faulty_renderer(RenderPath::Deferred);
    let mut world = cube_scene(&mut renderer);
    spawn_sun(&mut world, false);

    faults.lock().fail_blit = true;
    let result = renderer.on_update(&mut world, 1.0 / 60.0);
    assert!(matches!(result, Err(RenderError::Backend(BackendError::Unsupported(_)))), "{result:?}");
    {
        let faults = faults.lock();
        assert_eq!(faults.frames_begun, 1);
        assert_eq!(faults.frames_ended, 1);
    }

    faults.lock().fail_blit = false;
    render(&mut renderer, &mut world);
    let faults = faults.lock();
    assert_eq!((faults.frames_begun, faults.frames_ended), (2, 2));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
#[should_panic(expected = "call on_init first")]
fn test_update_before_init_panics() {
    let mut renderer = renderer(RenderPath::Deferred);
    let mut world = World::new();
    spawn_camera(&mut world, Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
    let _ = renderer.on_update(&mut world, 0.016);
}

#[test]
fn test_destroy_stops_tracking() {
    let mut renderer = renderer(RenderPath::Deferred);
    let mut world = cube_scene(&mut renderer);
    assert!(renderer.is_initialized());

    renderer.on_destroy(&mut world);
    assert!(!renderer.is_initialized());
    assert!(world.get_resource::<RenderQueues>().is_none());

    // A second scene can be attached afterwards
    renderer.on_init(&mut world);
    spawn_cube(&mut renderer, &mut world);
    render(&mut renderer, &mut world);
}
