//! Render queues maintained incrementally from `MeshRenderer` insertions and removals

use bevy_ecs::prelude::*;
use log::trace;

use crate::backend::traits::MeshHandle;
use crate::resources::Material;

/// Named bucket a renderable is drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderQueue {
    #[default]
    Opaque,
    Alpha,
    /// Environment-mapped, also rendered into shadow maps
    EnviroMapStatic,
    EnviroMapDynamic,
}

impl RenderQueue {
    pub const ALL: [RenderQueue; 4] = [
        RenderQueue::Opaque,
        RenderQueue::Alpha,
        RenderQueue::EnviroMapStatic,
        RenderQueue::EnviroMapDynamic,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Mesh plus material attached to an entity with a [`super::Transform`]
#[derive(Component, Debug, Clone)]
pub struct MeshRenderer {
    pub mesh: MeshHandle,
    pub material: Material,
}

impl MeshRenderer {
    pub fn new(mesh: MeshHandle, material: Material) -> Self {
        Self { mesh, material }
    }

    pub fn queue(&self) -> RenderQueue {
        self.material.queue
    }
}

/// Entity ids per queue. The world owns the entities; queues only reference them.
#[derive(Resource, Debug, Default)]
pub struct RenderQueues {
    queues: [Vec<Entity>; 4],
}

impl RenderQueues {
    pub fn get(&self, queue: RenderQueue) -> &[Entity] {
        &self.queues[queue.index()]
    }

    pub fn contains(&self, queue: RenderQueue, entity: Entity) -> bool {
        self.get(queue).contains(&entity)
    }

    /// Queue currently holding `entity`
    pub fn queue_of(&self, entity: Entity) -> Option<RenderQueue> {
        RenderQueue::ALL
            .into_iter()
            .find(|q| self.contains(*q, entity))
    }

    pub fn insert(&mut self, queue: RenderQueue, entity: Entity) {
        self.remove(entity);
        self.queues[queue.index()].push(entity);
    }

    /// Linear scan-and-erase across all queues
    pub fn remove(&mut self, entity: Entity) {
        for list in &mut self.queues {
            list.retain(|e| *e != entity);
        }
    }

    pub fn len(&self) -> usize {
        self.queues.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        for list in &mut self.queues {
            list.clear();
        }
    }
}

fn on_renderer_inserted(
    trigger: Trigger<OnInsert, MeshRenderer>,
    renderers: Query<&MeshRenderer>,
    mut queues: ResMut<RenderQueues>,
) {
    let entity = trigger.entity();
    if let Ok(renderer) = renderers.get(entity) {
        trace!("queue {:?} <- {:?}", renderer.queue(), entity);
        queues.insert(renderer.queue(), entity);
    }
}

fn on_renderer_removed(trigger: Trigger<OnRemove, MeshRenderer>, mut queues: ResMut<RenderQueues>) {
    trace!("queues -= {:?}", trigger.entity());
    queues.remove(trigger.entity());
}

/// Insert the [`RenderQueues`] resource, enqueue existing renderers and register
/// the observers that keep it current. Returns the observer entities.
pub fn install_render_queues(world: &mut World) -> [Entity; 2] {
    let mut queues = RenderQueues::default();
    let mut existing = world.query::<(Entity, &MeshRenderer)>();
    for (entity, renderer) in existing.iter(world) {
        queues.insert(renderer.queue(), entity);
    }
    world.insert_resource(queues);

    let inserted = world.add_observer(on_renderer_inserted).id();
    let removed = world.add_observer(on_renderer_removed).id();
    [inserted, removed]
}

/// Undo [`install_render_queues`]
pub fn uninstall_render_queues(world: &mut World, observers: [Entity; 2]) {
    for observer in observers {
        world.despawn(observer);
    }
    world.remove_resource::<RenderQueues>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Transform;

    fn renderer(queue: RenderQueue) -> MeshRenderer {
        MeshRenderer::new(MeshHandle(1), Material::default().with_queue(queue))
    }

    #[test]
    fn test_spawn_and_despawn_follow_queues() {
        let mut world = World::new();
        install_render_queues(&mut world);

        let a = world.spawn((Transform::default(), renderer(RenderQueue::Opaque))).id();
        let b = world.spawn((Transform::default(), renderer(RenderQueue::Alpha))).id();

        let queues = world.resource::<RenderQueues>();
        assert_eq!(queues.get(RenderQueue::Opaque), &[a]);
        assert_eq!(queues.get(RenderQueue::Alpha), &[b]);

        world.despawn(a);
        let queues = world.resource::<RenderQueues>();
        assert!(queues.get(RenderQueue::Opaque).is_empty());
        assert_eq!(queues.len(), 1);
    }

    #[test]
    fn test_replacing_material_moves_entity() {
        let mut world = World::new();
        install_render_queues(&mut world);

        let e = world.spawn(renderer(RenderQueue::Opaque)).id();
        world.entity_mut(e).insert(renderer(RenderQueue::EnviroMapDynamic));

        let queues = world.resource::<RenderQueues>();
        assert_eq!(queues.queue_of(e), Some(RenderQueue::EnviroMapDynamic));
        assert_eq!(queues.len(), 1);
    }

    #[test]
    fn test_component_removal_dequeues() {
        let mut world = World::new();
        install_render_queues(&mut world);

        let e = world.spawn((Transform::default(), renderer(RenderQueue::Alpha))).id();
        world.entity_mut(e).remove::<MeshRenderer>();
        assert!(world.resource::<RenderQueues>().is_empty());
    }

    #[test]
    fn test_existing_renderers_are_picked_up() {
        let mut world = World::new();
        let e = world.spawn(renderer(RenderQueue::EnviroMapStatic)).id();
        let observers = install_render_queues(&mut world);
        assert!(world
            .resource::<RenderQueues>()
            .contains(RenderQueue::EnviroMapStatic, e));

        uninstall_render_queues(&mut world, observers);
        assert!(world.get_resource::<RenderQueues>().is_none());
        // Observers are gone, so spawning no longer touches a missing resource
        world.spawn(renderer(RenderQueue::Opaque));
    }
}
