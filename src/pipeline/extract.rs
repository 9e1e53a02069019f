//! Per-frame snapshot of the ECS world
//!
//! Lights are discovered by query every frame and renderables are read through
//! the render queues, so the passes never touch the world themselves.

use bevy_ecs::prelude::*;
use glam::{Mat4, Vec3};
use log::{trace, warn};

use crate::backend::MeshHandle;
use crate::resources::Material;
use crate::scene::{
    AmbientLight, Attenuation, Camera, CameraView, DirectionalLight, MainCamera, MeshRenderer,
    PointLight, RenderQueue, RenderQueues, SpotLight, Transform,
};

/// One renderable with its resolved world transform
#[derive(Debug, Clone)]
pub struct DrawItem {
    pub entity: Entity,
    pub mesh: MeshHandle,
    pub material: Material,
    pub model: Mat4,
}

impl DrawItem {
    pub fn position(&self) -> Vec3 {
        self.model.w_axis.truncate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightKind {
    Directional,
    Point,
    Spot,
}

/// A light as the passes see it, positioned by its entity's transform
#[derive(Debug, Clone)]
pub struct LightView {
    pub entity: Entity,
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    pub position: Vec3,
    /// Unit vector the light shines along
    pub direction: Vec3,
    pub attenuation: Attenuation,
    /// Cosine of the spot half-angle, 1 for other kinds
    pub cutoff: f32,
    /// Volume radius or length, 0 for directional lights
    pub range: f32,
    /// Orthographic shadow extent of directional lights
    pub half_size: f32,
    pub casts_shadows: bool,
}

#[derive(Debug, Clone)]
pub struct FrameScene {
    pub camera: CameraView,
    pub ambient: Vec3,
    /// Directional lights first, then point lights, then spot lights
    pub lights: Vec<LightView>,
    pub opaque: Vec<DrawItem>,
    pub alpha: Vec<DrawItem>,
    pub enviro_static: Vec<DrawItem>,
    pub enviro_dynamic: Vec<DrawItem>,
}

impl FrameScene {
    /// Snapshot `world`, updating the main camera's aspect first.
    ///
    /// # Panics
    /// Without a [`MainCamera`] or without the [`RenderQueues`] resource.
    pub fn extract(world: &mut World, aspect: f32) -> Self {
        let camera = main_camera(world, aspect);
        let ambient = world
            .get_resource::<AmbientLight>()
            .copied()
            .unwrap_or_default()
            .radiance();
        let lights = discover_lights(world);

        let Some(queues) = world.get_resource::<RenderQueues>() else {
            panic!("render queues are not installed; call RenderingSystem::on_init first");
        };
        let collect = |queue: RenderQueue| -> Vec<DrawItem> {
            queues
                .get(queue)
                .iter()
                .filter_map(|&entity| {
                    let renderer = world.get::<MeshRenderer>(entity)?;
                    let model = world
                        .get::<Transform>(entity)
                        .map(Transform::matrix)
                        .unwrap_or(Mat4::IDENTITY);
                    Some(DrawItem {
                        entity,
                        mesh: renderer.mesh,
                        material: renderer.material.clone(),
                        model,
                    })
                })
                .collect()
        };
        let scene = Self {
            camera,
            ambient,
            lights,
            opaque: collect(RenderQueue::Opaque),
            alpha: collect(RenderQueue::Alpha),
            enviro_static: collect(RenderQueue::EnviroMapStatic),
            enviro_dynamic: collect(RenderQueue::EnviroMapDynamic),
        };
        trace!(
            "frame: {} lights, {} opaque, {} alpha, {} environment",
            scene.lights.len(),
            scene.opaque.len(),
            scene.alpha.len(),
            scene.enviro_static.len() + scene.enviro_dynamic.len()
        );
        scene
    }

    /// Light used by the transparency and environment-map passes
    pub fn first_directional(&self) -> Option<&LightView> {
        self.lights.iter().find(|l| l.kind == LightKind::Directional)
    }

    /// Geometry rendered into shadow maps
    pub fn shadow_casters(&self) -> impl Iterator<Item = &DrawItem> {
        self.opaque.iter().chain(&self.enviro_static)
    }

    pub fn environment_items(&self) -> impl Iterator<Item = &DrawItem> {
        self.enviro_static.iter().chain(&self.enviro_dynamic)
    }
}

fn main_camera(world: &mut World, aspect: f32) -> CameraView {
    let mut cameras = world.query_filtered::<(&mut Camera, &Transform), With<MainCamera>>();
    let mut found = None;
    for (mut camera, transform) in cameras.iter_mut(world) {
        if found.is_some() {
            warn!("More than one main camera; using the first");
            break;
        }
        if aspect.is_finite() && aspect > 0.0 {
            camera.set_aspect(aspect);
        }
        found = Some(camera.view(transform));
    }
    match found {
        Some(view) => view,
        None => panic!("no entity with Camera, Transform and MainCamera; a frame needs exactly one main camera"),
    }
}

fn discover_lights(world: &mut World) -> Vec<LightView> {
    let mut lights = Vec::new();

    let mut directional = world.query::<(Entity, &DirectionalLight, &Transform)>();
    for (entity, light, transform) in directional.iter(world) {
        lights.push(LightView {
            entity,
            kind: LightKind::Directional,
            color: light.color,
            intensity: light.intensity,
            position: transform.position,
            direction: transform.forward().normalize_or_zero(),
            attenuation: Attenuation::new(1.0, 0.0, 0.0),
            cutoff: 1.0,
            range: 0.0,
            half_size: light.half_size,
            casts_shadows: light.shadow.casts_shadows,
        });
    }

    let mut points = world.query::<(Entity, &PointLight, &Transform)>();
    for (entity, light, transform) in points.iter(world) {
        lights.push(LightView {
            entity,
            kind: LightKind::Point,
            color: light.color,
            intensity: light.intensity,
            position: transform.position,
            direction: transform.forward().normalize_or_zero(),
            attenuation: light.attenuation,
            cutoff: 1.0,
            range: light.range(),
            half_size: 0.0,
            casts_shadows: light.shadow.casts_shadows,
        });
    }

    let mut spots = world.query::<(Entity, &SpotLight, &Transform)>();
    for (entity, light, transform) in spots.iter(world) {
        lights.push(LightView {
            entity,
            kind: LightKind::Spot,
            color: light.color,
            intensity: light.intensity,
            position: transform.position,
            direction: transform.forward().normalize_or_zero(),
            attenuation: light.attenuation,
            cutoff: light.effective_cutoff(),
            range: light.range(),
            half_size: 0.0,
            casts_shadows: light.shadow.casts_shadows,
        });
    }

    lights
}

/// Store the light-space projection each shadow pass used on its light component
pub fn write_shadow_projections(world: &mut World, projections: &[(Entity, Mat4)]) {
    for &(entity, projection) in projections {
        let Ok(mut entity) = world.get_entity_mut(entity) else {
            continue;
        };
        if let Some(mut light) = entity.get_mut::<DirectionalLight>() {
            light.shadow.projection = projection;
        } else if let Some(mut light) = entity.get_mut::<SpotLight>() {
            light.shadow.projection = projection;
        } else if let Some(mut light) = entity.get_mut::<PointLight>() {
            light.shadow.projection = projection;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::install_render_queues;

    fn world_with_camera() -> World {
        let mut world = World::new();
        install_render_queues(&mut world);
        world.spawn((
            Camera::perspective(60.0, 0.1, 100.0),
            Transform::looking_at(Vec3::new(0.0, 5.0, 10.0), Vec3::ZERO, Vec3::Y),
            MainCamera,
        ));
        world
    }

    #[test]
    #[should_panic(expected = "main camera")]
    fn test_missing_camera_panics() {
        let mut world = World::new();
        install_render_queues(&mut world);
        FrameScene::extract(&mut world, 1.0);
    }

    #[test]
    fn test_aspect_written_to_camera() {
        let mut world = world_with_camera();
        FrameScene::extract(&mut world, 2.0);
        let mut cameras = world.query::<&Camera>();
        let camera = cameras.single(&world);
        assert!((camera.projection().aspect() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_lights_ordered_by_kind() {
        let mut world = world_with_camera();
        world.spawn((SpotLight::default(), Transform::default()));
        world.spawn((PointLight::default(), Transform::default()));
        world.spawn((DirectionalLight::default(), Transform::default()));
        let scene = FrameScene::extract(&mut world, 1.0);
        let kinds: Vec<_> = scene.lights.iter().map(|l| l.kind).collect();
        assert_eq!(kinds, [LightKind::Directional, LightKind::Point, LightKind::Spot]);
        assert!(scene.lights[1].range > 0.0);
        assert_eq!(scene.first_directional().map(|l| l.kind), Some(LightKind::Directional));
    }

    #[test]
    fn test_items_follow_queues() {
        let mut world = world_with_camera();
        let material = Material::default().with_queue(RenderQueue::EnviroMapStatic);
        let e = world
            .spawn((
                MeshRenderer::new(MeshHandle(7), material),
                Transform::from_position(Vec3::new(1.0, 2.0, 3.0)),
            ))
            .id();
        let scene = FrameScene::extract(&mut world, 1.0);
        assert!(scene.opaque.is_empty());
        assert_eq!(scene.enviro_static.len(), 1);
        assert_eq!(scene.enviro_static[0].entity, e);
        assert_eq!(scene.enviro_static[0].position(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(scene.shadow_casters().count(), 1);
    }

    #[test]
    fn test_shadow_projection_written_back() {
        let mut world = world_with_camera();
        let light = world
            .spawn((PointLight::default(), Transform::default()))
            .id();
        let projection = Mat4::from_scale(Vec3::splat(2.0));
        write_shadow_projections(&mut world, &[(light, projection)]);
        assert_eq!(world.get::<PointLight>(light).unwrap().shadow.projection, projection);
    }
}
