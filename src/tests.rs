// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end integration tests

use crate::archetype::ROOT_ARCHETYPE;
use crate::component::{ComponentHooks, ComponentKind, SoaSpec};
use crate::{registry, Component, Constraint, EcsError, EntityId, World};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}
impl Component for Position {}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity {
    x: f32,
    y: f32,
}
impl Component for Velocity {}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Health(u32);
impl Component for Health {}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Gravity(f64);
impl Component for Gravity {
    const KIND: ComponentKind = ComponentKind::Unique;
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SoaPoint {
    x: f32,
    y: f32,
    z: f32,
}
impl Component for SoaPoint {
    const SOA: SoaSpec = SoaSpec::split(8, &[4, 4, 4]);
}

#[test]
fn test_add_remove_round_trip() {
    let mut world = World::new();
    let e0 = world.add_entity().unwrap();
    assert_eq!(world.entity_archetype(e0), Some(ROOT_ARCHETYPE));

    world.add_component(e0, Health(7)).unwrap();
    assert_eq!(world.get::<Health>(e0), Some(&Health(7)));
    assert!(world.has::<Health>(e0));

    world.remove_component::<Health>(e0).unwrap();
    assert!(!world.has::<Health>(e0));
    assert_eq!(world.entity_archetype(e0), Some(ROOT_ARCHETYPE));
    assert!(world.validate_entities());
}

#[test]
fn test_entity_lifecycle_and_generations() {
    let mut world = World::new();
    let a = world.add_entity().unwrap();
    let b = world.add_entity().unwrap();
    assert!(world.is_valid(a) && world.is_valid(b));

    world.delete_entity(a).unwrap();
    assert!(!world.is_valid(a));
    assert!(world.delete_entity(a).is_err());

    // The slot comes back with a bumped generation.
    let c = world.add_entity().unwrap();
    assert_eq!(c.id(), a.id());
    assert_ne!(c, a);
    assert!(world.is_valid(c));
    assert!(world.validate_entities());
}

#[test]
fn test_duplicate_and_missing_component_rejected() {
    let mut world = World::new();
    let e = world.add_entity().unwrap();
    world.add_component(e, Health(1)).unwrap();

    assert!(matches!(
        world.add_component(e, Health(2)),
        Err(EcsError::DuplicateComponent(_))
    ));
    assert!(matches!(
        world.remove_component::<Velocity>(e),
        Err(EcsError::MissingComponent(_))
    ));
    // The failed calls left the stored value alone.
    assert_eq!(world.get::<Health>(e), Some(&Health(1)));
}

#[test]
fn test_disable_partitioning() {
    let mut world = World::new();
    let entities: Vec<EntityId> = (0..5)
        .map(|i| {
            let e = world.add_entity().unwrap();
            world.add_component(e, Health(i)).unwrap();
            e
        })
        .collect();

    world.enable_entity(entities[2], false).unwrap();

    let arch = world
        .archetype(world.entity_archetype(entities[0]).unwrap())
        .unwrap();
    assert_eq!(arch.chunks()[0].size_disabled(), 1);
    assert_eq!(arch.chunks()[0].size(), 5);

    let q = world.query().all::<Health>().build().unwrap();

    let mut enabled = Vec::new();
    q.each_with(&mut world, Constraint::EnabledOnly, |view| {
        enabled.extend_from_slice(view.entities());
    })
    .unwrap();
    assert_eq!(enabled.len(), 4);
    assert!(!enabled.contains(&entities[2]));

    let mut disabled = Vec::new();
    q.each_with(&mut world, Constraint::DisabledOnly, |view| {
        disabled.extend_from_slice(view.entities());
    })
    .unwrap();
    assert_eq!(disabled, vec![entities[2]]);

    let mut all = Vec::new();
    q.each_with(&mut world, Constraint::AcceptAll, |view| {
        all.extend_from_slice(view.entities());
    })
    .unwrap();
    assert_eq!(all.len(), 5);

    // Enabling an already-enabled entity is a no-op.
    world.enable_entity(entities[0], true).unwrap();
    let arch = world
        .archetype(world.entity_archetype(entities[0]).unwrap())
        .unwrap();
    assert_eq!(arch.chunks()[0].size_disabled(), 1);

    // Re-enable and check the partition closes.
    world.enable_entity(entities[2], true).unwrap();
    assert_eq!(q.count(&world, Constraint::DisabledOnly), 0);
    assert_eq!(q.count(&world, Constraint::EnabledOnly), 5);
}

#[test]
fn test_change_filter() {
    let mut world = World::new();
    let entities: Vec<EntityId> = (0..3)
        .map(|i| {
            let e = world.add_entity().unwrap();
            world.add_component(e, Health(i)).unwrap();
            e
        })
        .collect();

    let q = world.query().changed::<Health>().build().unwrap();

    // First run sees the initial writes and primes the cursor.
    let mut first = 0;
    q.each(&mut world, |view| first += view.len()).unwrap();
    assert_eq!(first, 3);

    // No writes since: nothing to visit.
    let mut second = 0;
    q.each(&mut world, |view| second += view.len()).unwrap();
    assert_eq!(second, 0);

    // A non-silent write surfaces the chunk again.
    world.set(entities[1], Health(99)).unwrap();
    let mut third = 0;
    q.each(&mut world, |view| third += view.len()).unwrap();
    assert!(third > 0);

    // A silent write does not.
    world.set_silent(entities[0], Health(5)).unwrap();
    let mut fourth = 0;
    q.each(&mut world, |view| fourth += view.len()).unwrap();
    assert_eq!(fourth, 0);
    assert_eq!(world.get::<Health>(entities[0]), Some(&Health(5)));
}

#[test]
fn test_archetype_graph_transitivity() {
    let mut world = World::new();
    let e = world.add_entity().unwrap();
    world.add_component(e, Position { x: 1.0, y: 2.0 }).unwrap();
    world.add_component(e, Velocity { x: 0.1, y: 0.2 }).unwrap();

    let home = world.entity_archetype(e).unwrap();
    let baseline = world.archetype_count();

    world.remove_component::<Position>(e).unwrap();
    assert_ne!(world.entity_archetype(e).unwrap(), home);

    world.add_component(e, Position { x: 1.0, y: 2.0 }).unwrap();
    assert_eq!(world.entity_archetype(e).unwrap(), home);
    assert!(world.archetype_count() - baseline <= 2);

    // The other component's value survived both moves.
    assert_eq!(world.get::<Velocity>(e), Some(&Velocity { x: 0.1, y: 0.2 }));
}

#[test]
fn test_chunk_overflow_allocates_sibling() {
    let mut world = World::new();
    let e = world.add_entity().unwrap();
    world.add_component(e, Health(0)).unwrap();

    let aid = world.entity_archetype(e).unwrap();
    let capacity = world.archetype(aid).unwrap().layout().capacity;

    for i in 1..=capacity {
        let e = world.add_entity().unwrap();
        world.add_component(e, Health(i)).unwrap();
    }

    let arch = world.archetype(aid).unwrap();
    assert_eq!(arch.entity_count() as u32, capacity + 1);
    assert_eq!(arch.chunk_count(), 2);
    assert!(arch.chunks()[0].is_full());
    assert_eq!(arch.chunks()[1].size(), 1);
}

#[test]
fn test_defragmentation_converges() {
    let mut world = World::new();
    let seed = world.add_entity().unwrap();
    world.add_component(seed, Health(0)).unwrap();
    let aid = world.entity_archetype(seed).unwrap();
    let capacity = world.archetype(aid).unwrap().layout().capacity;

    let mut entities = vec![seed];
    for i in 1..capacity * 2 {
        let e = world.add_entity().unwrap();
        world.add_component(e, Health(i)).unwrap();
        entities.push(e);
    }
    assert_eq!(world.archetype(aid).unwrap().chunk_count(), 2);

    // Delete every second entity from both chunks.
    let mut survivors = Vec::new();
    for (i, &e) in entities.iter().enumerate() {
        if i % 2 == 0 {
            world.delete_entity(e).unwrap();
        } else {
            survivors.push(e);
        }
    }

    for _ in 0..64 {
        world.update();
    }

    let arch = world.archetype(aid).unwrap();
    assert_eq!(arch.entity_count() as u32, capacity);
    // Rows compacted into one full chunk; the drained chunk was reclaimed.
    assert_eq!(arch.chunk_count(), 1);
    assert!(arch.chunks()[0].is_full());

    // Every survivor is still reachable through its record.
    for (i, &e) in survivors.iter().enumerate() {
        assert_eq!(world.get::<Health>(e), Some(&Health(i as u32 * 2 + 1)));
    }
    assert!(world.validate_entities());
}

#[test]
fn test_query_cache_reuse() {
    let mut world = World::new();
    let e = world.add_entity().unwrap();
    world.add_component(e, Health(3)).unwrap();

    let q1 = world.query().all::<Health>().none::<Velocity>().build().unwrap();
    let mut seen = 0;
    q1.each(&mut world, |view| seen += view.len()).unwrap();
    assert_eq!(seen, 1);

    let cache_size = world.cached_query_count();
    let q2 = world.query().all::<Health>().none::<Velocity>().build().unwrap();
    assert_eq!(q1.id(), q2.id());
    assert_eq!(world.cached_query_count(), cache_size);

    // Counts are stable without intervening mutation.
    assert_eq!(
        q1.count(&world, Constraint::EnabledOnly),
        q2.count(&world, Constraint::EnabledOnly)
    );
}

#[test]
fn test_zero_term_query_matches_all() {
    let mut world = World::new();
    let plain = world.add_entity().unwrap();
    let tagged = world.add_entity().unwrap();
    world.add_component(tagged, Health(1)).unwrap();

    let q = world.query().build().unwrap();
    let mut seen = Vec::new();
    q.each_with(&mut world, Constraint::AcceptAll, |view| {
        seen.extend_from_slice(view.entities());
    })
    .unwrap();
    assert!(seen.contains(&plain));
    assert!(seen.contains(&tagged));
    assert_eq!(seen.len(), 2);
}

#[test]
fn test_clone_copies_row_components() {
    let mut world = World::new();
    let src = world.add_entity().unwrap();
    world.add_component(src, Position { x: 4.0, y: 5.0 }).unwrap();
    world.add_component(src, Health(42)).unwrap();

    let copy = world.add_entity_cloned(src).unwrap();
    assert_eq!(world.entity_archetype(copy), world.entity_archetype(src));
    assert_eq!(world.get::<Position>(copy), Some(&Position { x: 4.0, y: 5.0 }));
    assert_eq!(world.get::<Health>(copy), Some(&Health(42)));

    // Values are independent after the clone.
    world.set(copy, Health(7)).unwrap();
    assert_eq!(world.get::<Health>(src), Some(&Health(42)));
}

#[test]
fn test_unique_component_shared_per_chunk() {
    let mut world = World::new();
    let a = world.add_entity().unwrap();
    world.add_component(a, Health(1)).unwrap();
    world.add_component(a, Gravity(-9.8)).unwrap();

    let b = world.add_entity().unwrap();
    world.add_component(b, Health(2)).unwrap();
    world.add_component(b, Gravity(-1.6)).unwrap();

    // Both entities share one archetype and one chunk: the singleton is
    // stored once, so the second write is visible through both.
    assert_eq!(world.entity_archetype(a), world.entity_archetype(b));
    assert_eq!(world.get::<Gravity>(a), Some(&Gravity(-1.6)));
    assert_eq!(world.get::<Gravity>(b), Some(&Gravity(-1.6)));

    world.set(a, Gravity(-3.7)).unwrap();
    assert_eq!(world.get::<Gravity>(b), Some(&Gravity(-3.7)));
}

#[test]
fn test_soa_component_round_trip() {
    let mut world = World::new();
    let entities: Vec<EntityId> = (0..10)
        .map(|i| {
            let e = world.add_entity().unwrap();
            world
                .add_component(
                    e,
                    SoaPoint {
                        x: i as f32,
                        y: i as f32 * 2.0,
                        z: i as f32 * 3.0,
                    },
                )
                .unwrap();
            e
        })
        .collect();

    assert_eq!(
        world.get_value::<SoaPoint>(entities[4]),
        Some(SoaPoint {
            x: 4.0,
            y: 8.0,
            z: 12.0
        })
    );

    let q = world.query().all::<SoaPoint>().build().unwrap();
    let mut sum_y = 0.0f32;
    q.each(&mut world, |view| {
        let soa = view.soa_view::<SoaPoint>();
        let ys = soa.sub::<f32>(1);
        for row in view.rows() {
            sum_y += ys[row];
        }
    })
    .unwrap();
    assert_eq!(sum_y, (0..10).map(|i| i as f32 * 2.0).sum());
}

#[test]
fn test_relations_and_wildcards() {
    let mut world = World::new();
    let likes = world.add_entity().unwrap();
    let apples = world.add_entity().unwrap();
    let pears = world.add_entity().unwrap();

    let a = world.add_entity().unwrap();
    let b = world.add_entity().unwrap();
    world.add_relation(a, likes, apples).unwrap();
    world.add_relation(b, likes, pears).unwrap();

    assert!(world.has_relation(a, likes, apples));
    assert!(world.has_relation(a, likes, EntityId::WILDCARD));
    assert!(!world.has_relation(a, likes, pears));

    // Wildcard query sweeps both relation targets.
    let q = world
        .query()
        .all_pair(likes, EntityId::WILDCARD)
        .build()
        .unwrap();
    let mut seen = Vec::new();
    q.each(&mut world, |view| seen.extend_from_slice(view.entities()))
        .unwrap();
    seen.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(seen, expected);

    // Exact-pair query narrows to one.
    let q = world.query().all_pair(likes, apples).build().unwrap();
    let mut seen = Vec::new();
    q.each(&mut world, |view| seen.extend_from_slice(view.entities()))
        .unwrap();
    assert_eq!(seen, vec![a]);

    world.remove_relation(a, likes, apples).unwrap();
    assert!(!world.has_relation(a, likes, EntityId::WILDCARD));
}

#[test]
fn test_component_hooks_fire() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy)]
    struct Hooked(#[allow(dead_code)] u32);
    impl Component for Hooked {}

    static ADDS: AtomicUsize = AtomicUsize::new(0);
    static SETS: AtomicUsize = AtomicUsize::new(0);
    static REMOVES: AtomicUsize = AtomicUsize::new(0);

    registry()
        .set_hooks::<Hooked>(ComponentHooks {
            on_add: Some(|_, _, _| {
                ADDS.fetch_add(1, Ordering::Relaxed);
            }),
            on_remove: Some(|world, _, entity| {
                // The value must still be readable before the commit.
                assert!(world.has::<Hooked>(entity));
                REMOVES.fetch_add(1, Ordering::Relaxed);
            }),
            on_set: Some(|_, _, _| {
                SETS.fetch_add(1, Ordering::Relaxed);
            }),
        })
        .unwrap();

    let mut world = World::new();
    let e = world.add_entity().unwrap();
    world.add_component(e, Hooked(1)).unwrap();
    world.set(e, Hooked(2)).unwrap();
    world.set_silent(e, Hooked(3)).unwrap();
    world.remove_component::<Hooked>(e).unwrap();

    assert_eq!(ADDS.load(Ordering::Relaxed), 1);
    assert_eq!(SETS.load(Ordering::Relaxed), 1);
    assert_eq!(REMOVES.load(Ordering::Relaxed), 1);
}

#[test]
fn test_world_version_monotone() {
    let mut world = World::new();
    let mut last = world.version();
    let e = world.add_entity().unwrap();
    assert!(world.version() >= last);
    last = world.version();

    world.add_component(e, Health(1)).unwrap();
    assert!(world.version() > last);
    last = world.version();

    world.set(e, Health(2)).unwrap();
    assert!(world.version() > last);
    last = world.version();

    // Silent writes and reads leave the version alone.
    world.set_silent(e, Health(3)).unwrap();
    let _ = world.get::<Health>(e);
    let _ = world.has::<Health>(e);
    assert_eq!(world.version(), last);

    world.update();
    assert!(world.version() > last);
}

#[test]
fn test_batch_entity_creation() {
    let mut world = World::new();
    let entities = world.add_entity_n(1000).unwrap();
    assert_eq!(entities.len(), 1000);
    assert_eq!(world.entity_count(), 1000);
    for &e in &entities {
        assert!(world.is_valid(e));
        assert_eq!(world.entity_archetype(e), Some(ROOT_ARCHETYPE));
    }
    assert!(world.validate_entities());

    let stats = world.stats();
    assert_eq!(stats.entities, 1000);
    assert!(stats.chunks >= 1);
}

#[cfg(feature = "parallel")]
#[test]
fn test_parallel_query_visits_every_row() {
    use std::sync::atomic::{AtomicU64, Ordering};

    let mut world = World::new();
    for i in 0..5000u32 {
        let e = world.add_entity().unwrap();
        world.add_component(e, Health(i)).unwrap();
    }

    let q = world.query().all::<Health>().build().unwrap();
    let total = AtomicU64::new(0);
    q.each_par(&mut world, Constraint::EnabledOnly, |view| {
        let mut local = 0u64;
        for h in view.view::<Health>() {
            local += h.0 as u64;
        }
        total.fetch_add(local, Ordering::Relaxed);
    })
    .unwrap();

    let expected: u64 = (0..5000u64).sum();
    assert_eq!(total.load(Ordering::Relaxed), expected);
}

#[test]
fn test_query_write_marks_chunks_for_readers() {
    let mut world = World::new();
    for i in 0..4u32 {
        let e = world.add_entity().unwrap();
        world.add_component(e, Position { x: i as f32, y: 0.0 }).unwrap();
        world.add_component(e, Velocity { x: 1.0, y: 0.0 }).unwrap();
    }

    let movers = world
        .query()
        .all_mut::<Position>()
        .all::<Velocity>()
        .build()
        .unwrap();
    let observers = world.query().changed::<Position>().build().unwrap();

    // Prime the observer cursor past the spawn writes.
    let mut n = 0;
    observers.each(&mut world, |view| n += view.len()).unwrap();
    assert_eq!(n, 4);

    // A mutable view bumps the position version for the whole chunk.
    movers
        .each(&mut world, |mut view| {
            let vels: Vec<Velocity> = view.view::<Velocity>().to_vec();
            for (p, v) in view.view_mut::<Position>().iter_mut().zip(vels) {
                p.x += v.x;
            }
        })
        .unwrap();

    let mut n = 0;
    observers.each(&mut world, |view| n += view.len()).unwrap();
    assert_eq!(n, 4);

    // A silent view does not re-surface the chunk.
    movers
        .each(&mut world, |mut view| {
            for p in view.sview_mut::<Position>() {
                p.y = 0.0;
            }
        })
        .unwrap();
    let mut n = 0;
    observers.each(&mut world, |view| n += view.len()).unwrap();
    assert_eq!(n, 0);
}

#[test]
fn test_first_and_arr_terminals() {
    let mut world = World::new();
    let entities: Vec<EntityId> = (0..6)
        .map(|i| {
            let e = world.add_entity().unwrap();
            world.add_component(e, Health(i)).unwrap();
            e
        })
        .collect();

    let q = world.query().all::<Health>().build().unwrap();
    assert_eq!(q.first(&world, Constraint::EnabledOnly), Some(entities[0]));
    assert!(!q.is_empty(&world, Constraint::EnabledOnly));

    let mut out = Vec::new();
    q.arr(&world, Constraint::EnabledOnly, &mut out);
    assert_eq!(out.len(), 6);

    let none = world.query().all::<Gravity>().build().unwrap();
    assert_eq!(none.first(&world, Constraint::EnabledOnly), None);
    assert!(none.is_empty(&world, Constraint::EnabledOnly));
}
