use strata_ecs::query::{Not, Opt};
use strata_ecs::World;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Velocity {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Debug, Clone, Copy, Default)]
struct Static;

#[test]
fn basic_create_edit_destroy() {
    let mut world = World::new();

    let e = world.create_entity().unwrap();
    assert_eq!(e.version(), 1);
    assert!(world.is_valid(e));

    world.add_component(e, Position { x: 1.0, y: 2.0, z: 3.0 }).unwrap();
    assert_eq!(world.get_component::<Position>(e), Some(&Position { x: 1.0, y: 2.0, z: 3.0 }));

    world.add_component(e, Velocity { x: 4.0, y: 5.0, z: 6.0 }).unwrap();
    world.remove_component::<Position>(e).unwrap();

    assert!(!world.has_component::<Position>(e));
    assert_eq!(world.get_component::<Velocity>(e), Some(&Velocity { x: 4.0, y: 5.0, z: 6.0 }));

    world.destroy_entity(e).unwrap();
    assert!(!world.is_valid(e));

    let fresh = world.create_entity().unwrap();
    assert_eq!(fresh.id(), 0);
    assert_eq!(fresh.version(), 2);
}

#[test]
fn chunk_overflow() {
    let mut world = World::new();

    // Force a small, known entities-per-chunk by using a component large enough that only a
    // handful fit in one 16 KiB chunk, so the test doesn't depend on the concrete default.
    #[derive(Debug, Clone, Copy, Default)]
    struct Big([u8; 4096]);

    let mut entities = Vec::new();
    // 4 entities worth of `Big` (16 KiB) plus the entity array already exceeds one chunk, so
    // entities-per-chunk must be small; create comfortably more than that to force overflow.
    for i in 0..10u32 {
        let e = world.create_entity().unwrap();
        world.add_component(e, Position { x: i as f32, y: 0.0, z: 0.0 }).unwrap();
        world.add_component(e, Big([0; 4096])).unwrap();
        entities.push(e);
    }

    let query = world.query::<&Position>();
    let mut seen = Vec::new();
    {
        let view = world.view(&query);
        view.for_each_chunk(|ents, positions| {
            for (_, p) in ents.iter().zip(positions.iter()) {
                seen.push(p.x as u32);
            }
        });
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
    assert!(
        world.total_chunk_count() >= 2,
        "10 entities of a >4KiB component must overflow a single 16 KiB chunk"
    );
}

#[test]
fn swap_remove_preserves_data() {
    let mut world = World::new();
    let entities: Vec<_> = (0..5)
        .map(|i| {
            let e = world.create_entity().unwrap();
            world.add_component(e, Position { x: i as f32, y: 0.0, z: 0.0 }).unwrap();
            e
        })
        .collect();

    world.destroy_entity(entities[2]).unwrap();

    let query = world.query::<&Position>();
    let mut count = 0;
    {
        let view = world.view(&query);
        view.for_each_chunk(|ents, _| count += ents.len());
    }
    assert_eq!(count, 4);

    assert!(!world.is_valid(entities[2]));
    assert_eq!(
        world.get_component::<Position>(entities[4]),
        Some(&Position { x: 4.0, y: 0.0, z: 0.0 })
    );
}

#[test]
fn batch_add() {
    let mut world = World::new();
    let entities = world.create_entities(1000).unwrap();
    for (i, &e) in entities.iter().enumerate() {
        world
            .add_component(e, Position { x: i as f32, y: 0.0, z: 0.0 })
            .unwrap();
        world
            .add_component(e, Velocity { x: 0.0, y: i as f32, z: 0.0 })
            .unwrap();
    }

    assert_eq!(
        world.get_component::<Position>(entities[777]),
        Some(&Position { x: 777.0, y: 0.0, z: 0.0 })
    );
    assert_eq!(
        world.get_component::<Velocity>(entities[777]),
        Some(&Velocity { x: 0.0, y: 777.0, z: 0.0 })
    );

    let query = world.query::<(&Position, &Velocity)>();
    let mut count = 0;
    {
        let view = world.view(&query);
        view.for_each_chunk(|ents, _| count += ents.len());
    }
    assert_eq!(count, 1000);
}

#[test]
fn query_with_modifiers() {
    let mut world = World::new();

    let a = world.create_entity().unwrap();
    world.add_component(a, Position::default()).unwrap();
    world.add_component(a, Velocity { x: 1.0, y: 0.0, z: 0.0 }).unwrap();

    let b = world.create_entity().unwrap();
    world.add_component(b, Position::default()).unwrap();
    world.add_component(b, Static).unwrap();

    let not_static = world.query::<(strata_ecs::Entity, Not<Static>)>();
    let mut not_static_entities = Vec::new();
    {
        let view = world.view(&not_static);
        view.for_each_chunk(|ents, _| not_static_entities.extend_from_slice(ents));
    }
    assert_eq!(not_static_entities, vec![a]);

    let with_opt_velocity = world.query::<(strata_ecs::Entity, Opt<Velocity>)>();
    let mut seen = Vec::new();
    {
        let view = world.view(&with_opt_velocity);
        view.for_each_chunk(|ents, (_, vel)| {
            for (i, &e) in ents.iter().enumerate() {
                let v = vel.map(|slice| slice[i]);
                seen.push((e, v));
            }
        });
    }
    seen.sort_by_key(|(e, _)| e.id());
    assert_eq!(seen.len(), 2);
    assert!(seen[0].1.is_some());
    assert!(seen[1].1.is_none());
}

#[test]
fn remove_component_returns_value() {
    let mut world = World::new();
    let e = world.create_entity().unwrap();
    world.add_component(e, Position { x: 1.0, y: 2.0, z: 3.0 }).unwrap();

    let removed = world.remove_component::<Position>(e).unwrap();
    assert_eq!(removed, Position { x: 1.0, y: 2.0, z: 3.0 });
    assert!(!world.has_component::<Position>(e));
}

#[test]
fn batch_component_ops() {
    let mut world = World::new();
    let entities = world.create_entities(4).unwrap();
    let values: Vec<_> = (0..4).map(|i| Position { x: i as f32, y: 0.0, z: 0.0 }).collect();
    world.add_components_batch(&entities, &values).unwrap();

    for (i, &e) in entities.iter().enumerate() {
        assert_eq!(world.get_component::<Position>(e), Some(&Position { x: i as f32, y: 0.0, z: 0.0 }));
    }

    let removed = world.remove_components_batch::<Position>(&entities).unwrap();
    assert_eq!(removed, values);
    assert!(entities.iter().all(|&e| !world.has_component::<Position>(e)));

    world.destroy_entities(&entities).unwrap();
    assert!(entities.iter().all(|&e| !world.is_valid(e)));
}

#[test]
fn view_count_is_empty_first() {
    let mut world = World::new();
    let query = world.query::<&Position>();
    {
        let view = world.view(&query);
        assert_eq!(view.count(), 0);
        assert!(view.is_empty());
        assert_eq!(view.first(), None);
    }

    let entities = world.create_entities(3).unwrap();
    for &e in &entities {
        world.add_component(e, Position::default()).unwrap();
    }

    let view = world.view(&query);
    assert_eq!(view.count(), 3);
    assert!(!view.is_empty());
    assert_eq!(view.first(), Some(entities[0]));
}

#[test]
fn archetype_snapshot_round_trip() {
    let mut world = World::new();
    let entities: Vec<_> = (0..5)
        .map(|i| {
            let e = world.create_entity().unwrap();
            world.add_component(e, Position { x: i as f32, y: 0.0, z: 0.0 }).unwrap();
            world.add_component(e, Velocity { x: 0.0, y: i as f32, z: 0.0 }).unwrap();
            e
        })
        .collect();

    let archetype_id = world
        .archetype_stats()
        .into_iter()
        .find(|s| s.entity_count == entities.len())
        .expect("archetype holding all 5 entities")
        .id;

    let snapshot = world.write_archetype_snapshot(archetype_id);
    let total: u32 = snapshot.chunks.iter().map(|c| c.count).sum();
    assert_eq!(total as usize, entities.len());

    let mut fresh = World::new();
    fresh.register_component::<Position>().unwrap();
    fresh.register_component::<Velocity>().unwrap();
    let loaded_id = fresh.read_archetype_snapshot(&snapshot).unwrap();
    assert_eq!(fresh.archetype_stats().iter().find(|s| s.id == loaded_id).unwrap().entity_count, 5);
}

#[test]
fn cleanup_and_coalesce_release_chunks() {
    use strata_ecs::CleanupOptions;

    let mut world = World::new();
    let entities = world.create_entities(8).unwrap();
    for &e in &entities {
        world.add_component(e, Position::default()).unwrap();
    }
    world.destroy_entities(&entities).unwrap();

    let before = world.structural_change_counter();
    let released = world.cleanup_empty_archetypes(CleanupOptions {
        min_empty_duration: 0,
        ..Default::default()
    });
    assert!(released > 0);
    assert_eq!(world.structural_change_counter(), before);

    world.coalesce_chunks();
    assert_eq!(world.total_chunk_count(), 0);
}

#[test]
fn archetype_graph_caching() {
    let mut world = World::new();
    let entities = world.create_entities(10_000).unwrap();

    for &e in &entities {
        world.add_component(e, Position::default()).unwrap();
    }

    // Every entity made the same (empty -> {Position}) transition; only two archetypes should
    // ever have been materialized, regardless of entity count.
    assert_eq!(world.archetype_count(), 2);
    assert_eq!(world.archetype_graph_edge_count(), 2);
}
