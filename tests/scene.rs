//! Scene bookkeeping: render queue membership and transparent draw order.
//!
//! ```bash
//! cargo test --test scene
//! ```

mod common;

use glam::{Mat4, Vec3};
use rstest::rstest;

use common::{renderer, spawn_camera, world_for};
use shading_pipeline::{
    backend::{GraphicsBackend, MeshHandle, SoftwareBackend},
    pipeline::{transparency::sort_alpha, DrawItem, FrameScene},
    resources::{Material, Mesh},
    scene::{MeshRenderer, RenderQueue, RenderQueues, Transform},
    Entity, RenderPath, World,
};

fn tracked_world() -> World {
    let mut renderer = renderer(RenderPath::Deferred);
    world_for(&mut renderer)
}

fn cube_handle() -> MeshHandle {
    SoftwareBackend::new(4, 4).create_mesh(&Mesh::cube()).expect("mesh upload")
}

fn mesh_renderer(queue: RenderQueue) -> MeshRenderer {
    MeshRenderer::new(cube_handle(), Material::default().with_queue(queue))
}

fn queues(world: &World) -> &RenderQueues {
    world.resource::<RenderQueues>()
}

// ============================================================================
// Queue membership
// ============================================================================

#[rstest]
#[case::opaque(RenderQueue::Opaque)]
#[case::alpha(RenderQueue::Alpha)]
#[case::enviro_static(RenderQueue::EnviroMapStatic)]
#[case::enviro_dynamic(RenderQueue::EnviroMapDynamic)]
fn test_spawn_registers_in_material_queue(#[case] queue: RenderQueue) {
    let mut world = tracked_world();
    let entity = world.spawn((mesh_renderer(queue), Transform::new())).id();

    assert!(queues(&world).contains(queue, entity));
    assert_eq!(queues(&world).queue_of(entity), Some(queue));
    assert_eq!(queues(&world).len(), 1);
}

#[test]
fn test_replacing_renderer_moves_queue() {
    let mut world = tracked_world();
    let entity = world.spawn((mesh_renderer(RenderQueue::Opaque), Transform::new())).id();

    world.entity_mut(entity).insert(mesh_renderer(RenderQueue::Alpha));

    assert!(!queues(&world).contains(RenderQueue::Opaque, entity));
    assert!(queues(&world).contains(RenderQueue::Alpha, entity));
    assert_eq!(queues(&world).len(), 1);
}

#[test]
fn test_despawn_and_remove_leave_queues() {
    let mut world = tracked_world();
    let despawned = world.spawn((mesh_renderer(RenderQueue::Opaque), Transform::new())).id();
    let stripped = world.spawn((mesh_renderer(RenderQueue::Alpha), Transform::new())).id();
    let kept = world.spawn((mesh_renderer(RenderQueue::Opaque), Transform::new())).id();

    world.despawn(despawned);
    world.entity_mut(stripped).remove::<MeshRenderer>();

    assert_eq!(queues(&world).queue_of(despawned), None);
    assert_eq!(queues(&world).queue_of(stripped), None);
    assert_eq!(queues(&world).get(RenderQueue::Opaque), &[kept]);
    assert!(queues(&world).get(RenderQueue::Alpha).is_empty());
}

#[test]
fn test_entities_without_renderer_are_ignored() {
    let mut world = tracked_world();
    world.spawn(Transform::new());
    spawn_camera(&mut world, Vec3::Z, Vec3::ZERO);

    assert!(queues(&world).is_empty());
}

// ============================================================================
// Frame extraction
// ============================================================================

#[test]
fn test_extract_splits_queues() {
    let mut world = tracked_world();
    spawn_camera(&mut world, Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO);
    world.spawn((mesh_renderer(RenderQueue::Opaque), Transform::new()));
    world.spawn((mesh_renderer(RenderQueue::Alpha), Transform::from_position(Vec3::X)));
    world.spawn((mesh_renderer(RenderQueue::Alpha), Transform::from_position(Vec3::new(0.0, 0.0, -5.0))));

    let frame = FrameScene::extract(&mut world, 1.5);

    assert_eq!(frame.opaque.len(), 1);
    assert_eq!(frame.alpha.len(), 2);
    assert!(frame.enviro_static.is_empty() && frame.enviro_dynamic.is_empty());
    assert!((frame.camera.position - Vec3::new(0.0, 0.0, 10.0)).length() < 1e-5);
}

// ============================================================================
// Transparent ordering
// ============================================================================

fn item(index: u32, position: Vec3) -> DrawItem {
    DrawItem {
        entity: Entity::from_raw(index),
        mesh: cube_handle(),
        material: Material::glass(Vec3::ONE, 0.5),
        model: Mat4::from_translation(position),
    }
}

#[test]
fn test_sort_alpha_back_to_front() {
    let camera = Vec3::new(0.0, 0.0, 10.0);
    let mut items: Vec<_> = [0.0, 8.0, -3.0, 4.0, -20.0, 9.5]
        .into_iter()
        .enumerate()
        .map(|(i, z)| item(i as u32, Vec3::new(0.5, 0.0, z)))
        .collect();

    sort_alpha(&mut items, camera);

    let distances: Vec<f32> = items.iter().map(|i| i.position().distance(camera)).collect();
    assert!(
        distances.windows(2).all(|w| w[0] >= w[1]),
        "not back to front: {distances:?}"
    );
}

#[test]
fn test_sort_alpha_keeps_equal_distances_stable() {
    let camera = Vec3::ZERO;
    let mut items = vec![
        item(0, Vec3::X * 2.0),
        item(1, Vec3::Y * 2.0),
        item(2, Vec3::X * 5.0),
        item(3, Vec3::Z * 2.0),
    ];

    sort_alpha(&mut items, camera);

    let order: Vec<u32> = items.iter().map(|i| i.entity.index()).collect();
    assert_eq!(order, vec![2, 0, 1, 3]);
}
