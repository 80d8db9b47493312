//! Minimal tour: entities, components, queries and change detection.
//!
//! Run with: cargo run --example basic

use chunk_ecs::{Component, Constraint, World};

#[derive(Debug, Clone, Copy)]
struct Position {
    x: f32,
    y: f32,
}
impl Component for Position {}

#[derive(Debug, Clone, Copy)]
struct Velocity {
    x: f32,
    y: f32,
}
impl Component for Velocity {}

#[derive(Debug, Clone, Copy)]
struct Frozen;
impl Component for Frozen {}

fn main() {
    let mut world = World::new();

    for i in 0..1_000 {
        let e = world.add_entity().unwrap();
        world
            .add_component(
                e,
                Position {
                    x: i as f32,
                    y: 0.0,
                },
            )
            .unwrap();
        world
            .add_component(e, Velocity { x: 1.0, y: 0.5 })
            .unwrap();
        if i % 10 == 0 {
            world.add_component(e, Frozen).unwrap();
        }
    }

    // Integrate everything that moves and is not frozen.
    let integrate = world
        .query()
        .all_mut::<Position>()
        .all::<Velocity>()
        .none::<Frozen>()
        .build()
        .unwrap();

    integrate
        .each(&mut world, |mut chunk| {
            let velocities: Vec<Velocity> = chunk.view::<Velocity>().to_vec();
            for (p, v) in chunk.view_mut::<Position>().iter_mut().zip(velocities) {
                p.x += v.x;
                p.y += v.y;
            }
        })
        .unwrap();

    println!(
        "moved {} entities, skipped {} frozen ones",
        integrate.count(&world, Constraint::EnabledOnly),
        world.query().all::<Frozen>().build().unwrap().count(&world, Constraint::EnabledOnly),
    );

    // Change detection: only chunks written since the observer last looked.
    let observer = world.query().changed::<Position>().build().unwrap();
    let mut rows = 0;
    observer.each(&mut world, |chunk| rows += chunk.len()).unwrap();
    println!("observer saw {rows} freshly moved rows");

    world.update();
    println!("{:?}", world.stats());
}
