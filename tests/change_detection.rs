use chunk_ecs::{Component, Constraint, EntityId, World};
use glam::Vec3;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position(Vec3);
impl Component for Position {}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity(Vec3);
impl Component for Velocity {}

fn spawn_mover(world: &mut World, pos: Vec3, vel: Vec3) -> EntityId {
    let e = world.add_entity().unwrap();
    world.add_component(e, Position(pos)).unwrap();
    world.add_component(e, Velocity(vel)).unwrap();
    e
}

#[test]
fn test_change_filter_flow() {
    let mut world = World::new();
    let e1 = spawn_mover(&mut world, Vec3::ZERO, Vec3::X);
    let e2 = spawn_mover(&mut world, Vec3::ONE, Vec3::Y);

    let changed = world.query().changed::<Position>().build().unwrap();

    // Frame 1: the spawn writes are fresh.
    let mut seen = 0;
    changed.each(&mut world, |view| seen += view.len()).unwrap();
    assert_eq!(seen, 2);

    // Frame 2: nothing written since the cursor advanced.
    let mut seen = 0;
    changed.each(&mut world, |view| seen += view.len()).unwrap();
    assert_eq!(seen, 0);

    // A plain set surfaces the chunk again.
    world.set(e1, Position(Vec3::splat(5.0))).unwrap();
    let mut seen = Vec::new();
    changed
        .each(&mut world, |view| seen.extend_from_slice(view.entities()))
        .unwrap();
    assert!(seen.contains(&e1));

    // Both entities share a chunk, so e2 rides along: the filter is
    // per chunk, not per row.
    assert!(seen.contains(&e2));
}

#[test]
fn test_writer_query_wakes_observer() {
    let mut world = World::new();
    for i in 0..8 {
        spawn_mover(&mut world, Vec3::splat(i as f32), Vec3::X);
    }

    let integrate = world
        .query()
        .all_mut::<Position>()
        .all::<Velocity>()
        .build()
        .unwrap();
    let observer = world.query().changed::<Position>().build().unwrap();

    // Drain the spawn writes.
    observer.each(&mut world, |_| {}).unwrap();

    integrate
        .each(&mut world, |mut view| {
            let vels: Vec<Velocity> = view.view::<Velocity>().to_vec();
            for (p, v) in view.view_mut::<Position>().iter_mut().zip(vels) {
                p.0 += v.0;
            }
        })
        .unwrap();

    let mut woken = 0;
    observer.each(&mut world, |view| woken += view.len()).unwrap();
    assert_eq!(woken, 8);

    // Values actually moved.
    let probe = world.query().all::<Position>().build().unwrap();
    let mut max_x = f32::MIN;
    probe
        .each(&mut world, |view| {
            for p in view.view::<Position>() {
                max_x = max_x.max(p.0.x);
            }
        })
        .unwrap();
    assert_eq!(max_x, 8.0);
}

#[test]
fn test_silent_writes_stay_dark() {
    let mut world = World::new();
    let e = spawn_mover(&mut world, Vec3::ZERO, Vec3::X);

    let observer = world.query().changed::<Position>().build().unwrap();
    observer.each(&mut world, |_| {}).unwrap();

    world.set_silent(e, Position(Vec3::NEG_ONE)).unwrap();
    assert_eq!(observer.count(&world, Constraint::EnabledOnly), 1);

    let mut seen = 0;
    observer.each(&mut world, |view| seen += view.len()).unwrap();
    assert_eq!(seen, 0);
    assert_eq!(world.get::<Position>(e), Some(&Position(Vec3::NEG_ONE)));
}
