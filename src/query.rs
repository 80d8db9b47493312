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

//! Query building, compilation, caching and archetype matching.
//!
//! Builder calls append encoded commands to a per-query byte buffer;
//! [`QueryBuilder::build`] drains the buffer into an immutable, hashed
//! [`QueryPlan`]. Plans are cached by lookup hash in the world; match state
//! (per-component cursors and the matched-archetype list) advances lazily as
//! new archetypes register.

use std::sync::Arc;

use ahash::AHashSet;
use rustc_hash::FxHashMap;
use speedy::{Readable, Writable};
use tinyvec::ArrayVec;

use crate::archetype::{Archetype, ArchetypeId};
use crate::component::{registry, Component, ComponentKind};
use crate::entity::{EntityId, Id};
use crate::error::{EcsError, Result};
use crate::iter::{self, ChunkView, Constraint};
use crate::utils::{hash_combine, hash_sequence};
use crate::world::World;
use crate::MAX_QUERY_TERMS;

/// Term operation kind; the sort order (All < Any < Not) partitions a
/// compiled plan's term list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TermOp {
    #[default]
    All = 0,
    Any = 1,
    Not = 2,
}

/// One compiled query term
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTerm {
    pub id: Id,
    pub kind: ComponentKind,
    pub op: TermOp,
    /// Fixed source entity; NULL means "the iterated entity"
    pub source: EntityId,
}

impl Default for QueryTerm {
    fn default() -> Self {
        QueryTerm {
            id: Id::from_component(0),
            kind: ComponentKind::Generic,
            op: TermOp::All,
            source: EntityId::NULL,
        }
    }
}

/// Builder command, serialized into the query's byte buffer
#[derive(Debug, Readable, Writable)]
struct TermCmd {
    op: u8,
    id: u64,
    kind: u8,
    write: bool,
    changed: bool,
    source: u64,
}

/// Immutable compiled query
#[derive(Debug)]
pub struct QueryPlan {
    /// Terms sorted by (op, id, source); `[0, first_any)` are All,
    /// `[first_any, first_not)` are Any, `[first_not, len)` are Not
    terms: ArrayVec<[QueryTerm; MAX_QUERY_TERMS]>,
    first_any: u8,
    first_not: u8,
    /// Bit i set: sorted term i requests write access
    write_mask: u8,
    /// Component ids gated behind "changed since last seen version"
    changed: ArrayVec<[Id; MAX_QUERY_TERMS]>,
    /// User term position to sorted position
    remap: [u8; MAX_QUERY_TERMS],
    /// Wildcard or fixed-source terms disqualify the component-index
    /// fast path
    complex: bool,
    hash: u64,
}

impl QueryPlan {
    pub fn terms(&self) -> &[QueryTerm] {
        &self.terms
    }

    pub fn all_terms(&self) -> &[QueryTerm] {
        &self.terms[..self.first_any as usize]
    }

    pub fn any_terms(&self) -> &[QueryTerm] {
        &self.terms[self.first_any as usize..self.first_not as usize]
    }

    pub fn not_terms(&self) -> &[QueryTerm] {
        &self.terms[self.first_not as usize..]
    }

    pub fn changed_ids(&self) -> &[Id] {
        &self.changed
    }

    pub fn is_write(&self, sorted_term: usize) -> bool {
        self.write_mask & (1 << sorted_term) != 0
    }

    /// True when any term requests write access
    pub fn has_writes(&self) -> bool {
        self.write_mask != 0
    }

    /// Sorted position of the term at the given builder-call position
    pub fn remap(&self, user_term: usize) -> usize {
        self.remap[user_term] as usize
    }

    pub fn is_complex(&self) -> bool {
        self.complex
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    fn term_matches(arch: &Archetype, term: &QueryTerm) -> bool {
        if term.id.is_pair() && term.id.has_wildcard() {
            arch.matches_id(term.id)
        } else {
            arch.has_id(term.id)
        }
    }

    /// Admission test: every All present, one Any present (or the group is
    /// empty), no Not present.
    pub fn matches_archetype(&self, arch: &Archetype) -> bool {
        for term in self.all_terms() {
            if !Self::term_matches(arch, term) {
                return false;
            }
        }
        let any = self.any_terms();
        if !any.is_empty() && !any.iter().any(|t| Self::term_matches(arch, t)) {
            return false;
        }
        for term in self.not_terms() {
            if Self::term_matches(arch, term) {
                return false;
            }
        }
        true
    }
}

/// Cached plan plus its lazily advanced match state
pub(crate) struct CachedQuery {
    pub(crate) plan: Arc<QueryPlan>,
    pub(crate) matched: Vec<ArchetypeId>,
    admitted: AHashSet<ArchetypeId>,
    /// Per-component cursor into the world's component-to-archetype lists
    cursors: FxHashMap<Id, u32>,
    /// Scan cursor for plans that cannot use the component index
    arch_cursor: u32,
    pub(crate) last_seen_version: u32,
}

impl CachedQuery {
    pub(crate) fn new(plan: Arc<QueryPlan>) -> Self {
        CachedQuery {
            plan,
            matched: Vec::new(),
            admitted: AHashSet::new(),
            cursors: FxHashMap::default(),
            arch_cursor: 0,
            last_seen_version: 0,
        }
    }

    /// Consider archetypes registered since the last call and admit the
    /// matching ones, in discovery order.
    pub(crate) fn match_new(
        &mut self,
        archetypes: &[Archetype],
        by_component: &ahash::AHashMap<Id, Vec<ArchetypeId>>,
    ) {
        let plan = self.plan.clone();
        let scan_all = plan.is_complex() || plan.first_not == 0;

        if scan_all {
            for aid in self.arch_cursor as usize..archetypes.len() {
                let aid = aid as ArchetypeId;
                if self.admitted.contains(&aid) {
                    continue;
                }
                if plan.matches_archetype(&archetypes[aid as usize]) {
                    self.matched.push(aid);
                    self.admitted.insert(aid);
                }
            }
            self.arch_cursor = archetypes.len() as u32;
            return;
        }

        // Candidates are only discoverable through the All/Any term lists;
        // Not lists are walked too, but merely advance their cursors.
        for term in plan.terms() {
            let list = match by_component.get(&term.id) {
                Some(list) => list,
                None => continue,
            };
            let cursor = self.cursors.entry(term.id).or_insert(0);
            for &aid in &list[*cursor as usize..] {
                if term.op == TermOp::Not || self.admitted.contains(&aid) {
                    continue;
                }
                if plan.matches_archetype(&archetypes[aid as usize]) {
                    self.matched.push(aid);
                    self.admitted.insert(aid);
                }
            }
            *cursor = list.len() as u32;
        }
    }
}

/// Compiled query handle; cheap to copy. Only valid against the world that
/// built it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Query {
    hash: u64,
}

impl Query {
    /// The plan's lookup hash; identical term sequences share it
    pub fn id(&self) -> u64 {
        self.hash
    }

    /// Run over enabled rows, handing each matching chunk to `f`.
    pub fn each<F: FnMut(ChunkView<'_>)>(&self, world: &mut World, f: F) -> Result<()> {
        iter::run_query(world, self.hash, Constraint::EnabledOnly, f)
    }

    /// Run with an explicit enabled/disabled constraint.
    pub fn each_with<F: FnMut(ChunkView<'_>)>(
        &self,
        world: &mut World,
        constraint: Constraint,
        f: F,
    ) -> Result<()> {
        iter::run_query(world, self.hash, constraint, f)
    }

    /// Fan matching chunks out on the rayon pool. The callback must confine
    /// itself to the chunk it is handed.
    #[cfg(feature = "parallel")]
    pub fn each_par<F: Fn(ChunkView<'_>) + Send + Sync>(
        &self,
        world: &mut World,
        constraint: Constraint,
        f: F,
    ) -> Result<()> {
        iter::run_query_par(world, self.hash, constraint, f)
    }

    /// Rows matched under the constraint. Ignores change filters and does
    /// not advance the last-seen version, so repeated calls agree.
    pub fn count(&self, world: &World, constraint: Constraint) -> usize {
        iter::count_query(world, self.hash, constraint)
    }

    pub fn is_empty(&self, world: &World, constraint: Constraint) -> bool {
        self.count(world, constraint) == 0
    }

    /// First matched entity under the constraint
    pub fn first(&self, world: &World, constraint: Constraint) -> Option<EntityId> {
        iter::first_entity(world, self.hash, constraint)
    }

    /// Append all matched entities to `out`
    pub fn arr(&self, world: &World, constraint: Constraint, out: &mut Vec<EntityId>) {
        iter::collect_entities(world, self.hash, constraint, out)
    }
}

/// Fluent query description. Term calls append encoded commands to an
/// internal byte buffer; [`build`](Self::build) compiles and caches the plan.
pub struct QueryBuilder<'w> {
    world: &'w World,
    buf: Vec<u8>,
    err: Option<EcsError>,
}

impl<'w> QueryBuilder<'w> {
    pub(crate) fn new(world: &'w World) -> Self {
        QueryBuilder {
            world,
            buf: Vec::new(),
            err: None,
        }
    }

    /// Require `T` with read access.
    pub fn all<T: Component>(self) -> Self {
        self.push_typed::<T>(TermOp::All, false, false)
    }

    /// Require `T` with write access.
    pub fn all_mut<T: Component>(self) -> Self {
        self.push_typed::<T>(TermOp::All, true, false)
    }

    /// Admit archetypes holding at least one `any` component.
    pub fn any<T: Component>(self) -> Self {
        self.push_typed::<T>(TermOp::Any, false, false)
    }

    /// Reject archetypes holding `T`.
    pub fn none<T: Component>(self) -> Self {
        self.push_typed::<T>(TermOp::Not, false, false)
    }

    /// Require `T` and only visit chunks whose `T` version advanced past
    /// the query's last seen world version.
    pub fn changed<T: Component>(self) -> Self {
        self.push_typed::<T>(TermOp::All, false, true)
    }

    /// Require a relation pair; wildcards admitted in either position.
    pub fn all_pair(self, relation: EntityId, target: EntityId) -> Self {
        self.push_pair(TermOp::All, relation, target)
    }

    pub fn any_pair(self, relation: EntityId, target: EntityId) -> Self {
        self.push_pair(TermOp::Any, relation, target)
    }

    pub fn none_pair(self, relation: EntityId, target: EntityId) -> Self {
        self.push_pair(TermOp::Not, relation, target)
    }

    fn push_typed<T: Component>(mut self, op: TermOp, write: bool, changed: bool) -> Self {
        match registry().get_or_create::<T>() {
            Ok(desc) => {
                let cmd = TermCmd {
                    op: op as u8,
                    id: desc.component_id().to_bits(),
                    kind: desc.kind as u8,
                    write,
                    changed,
                    source: EntityId::NULL.to_bits(),
                };
                self.push_cmd(&cmd);
            }
            Err(e) => self.err = Some(e),
        }
        self
    }

    fn push_pair(mut self, op: TermOp, relation: EntityId, target: EntityId) -> Self {
        let cmd = TermCmd {
            op: op as u8,
            id: Id::from_pair(EntityId::pair(relation, target)).to_bits(),
            kind: ComponentKind::Generic as u8,
            write: false,
            changed: false,
            source: EntityId::NULL.to_bits(),
        };
        self.push_cmd(&cmd);
        self
    }

    fn push_cmd(&mut self, cmd: &TermCmd) {
        if self.err.is_some() {
            return;
        }
        if let Err(e) = cmd.write_to_stream(&mut self.buf) {
            self.err = Some(EcsError::QueryDecode(e.to_string()));
        }
    }

    /// Compile the buffered terms and return the cached query.
    pub fn build(self) -> Result<Query> {
        if let Some(e) = self.err {
            return Err(e);
        }

        let plan = compile(&self.buf)?;
        let hash = plan.hash();

        let mut queries = self.world.queries.borrow_mut();
        queries
            .entry(hash)
            .or_insert_with(|| CachedQuery::new(Arc::new(plan)));
        Ok(Query { hash })
    }
}

/// Drain the command buffer into a sorted, hashed plan.
fn compile(buf: &[u8]) -> Result<QueryPlan> {
    // Decode the command stream back into terms, in builder-call order.
    let mut user_terms: Vec<(QueryTerm, bool, bool)> = Vec::new();
    let mut cursor = buf;
    while !cursor.is_empty() {
        let cmd = TermCmd::read_from_stream_unbuffered(&mut cursor)
            .map_err(|e| EcsError::QueryDecode(e.to_string()))?;
        let term = QueryTerm {
            id: Id::from_bits(cmd.id),
            kind: match cmd.kind {
                0 => ComponentKind::Generic,
                _ => ComponentKind::Unique,
            },
            op: match cmd.op {
                0 => TermOp::All,
                1 => TermOp::Any,
                _ => TermOp::Not,
            },
            source: EntityId::from_bits(cmd.source),
        };
        user_terms.push((term, cmd.write, cmd.changed));
    }

    if user_terms.len() > MAX_QUERY_TERMS {
        return Err(EcsError::QueryTooManyTerms {
            count: user_terms.len(),
            max: MAX_QUERY_TERMS,
        });
    }

    // Stable sort by (op, id, source); the write mask and the remap table
    // are permuted in lockstep.
    let mut order: Vec<usize> = (0..user_terms.len()).collect();
    order.sort_by_key(|&i| {
        let t = &user_terms[i].0;
        (t.op, t.id, t.source.to_bits())
    });

    let mut terms: ArrayVec<[QueryTerm; MAX_QUERY_TERMS]> = ArrayVec::new();
    let mut write_mask = 0u8;
    let mut changed: ArrayVec<[Id; MAX_QUERY_TERMS]> = ArrayVec::new();
    let mut remap = [0u8; MAX_QUERY_TERMS];
    let mut first_any = 0u8;
    let mut first_not = 0u8;

    for (sorted_pos, &user_pos) in order.iter().enumerate() {
        let (term, write, is_changed) = user_terms[user_pos];
        if write {
            write_mask |= 1 << sorted_pos;
        }
        if is_changed {
            changed.push(term.id);
        }
        remap[user_pos] = sorted_pos as u8;
        if term.op == TermOp::All {
            first_any += 1;
        }
        if term.op != TermOp::Not {
            first_not += 1;
        }
        terms.push(term);
    }

    let complex = terms
        .iter()
        .any(|t| (t.id.is_pair() && t.id.has_wildcard()) || !t.source.is_null());

    let mut hash = hash_sequence(terms.iter().flat_map(|t| {
        [
            t.id.to_bits(),
            t.op as u64,
            t.kind as u64,
            t.source.to_bits(),
        ]
    }));
    hash = hash_combine(hash, write_mask as u64);
    hash = hash_combine(hash, hash_sequence(changed.iter().map(|id| id.to_bits())));
    hash = hash_combine(hash, terms.len() as u64);

    Ok(QueryPlan {
        terms,
        first_any,
        first_not,
        write_mask,
        changed,
        remap,
        complex,
        hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy)]
    struct Qa(#[allow(dead_code)] u32);
    impl Component for Qa {}

    #[derive(Clone, Copy)]
    struct Qb(#[allow(dead_code)] u32);
    impl Component for Qb {}

    #[derive(Clone, Copy)]
    struct Qc(#[allow(dead_code)] u32);
    impl Component for Qc {}

    #[test]
    fn test_identical_builders_share_hash() {
        let world = World::new();
        let q1 = world.query().all::<Qa>().none::<Qb>().build().unwrap();
        let q2 = world.query().all::<Qa>().none::<Qb>().build().unwrap();
        assert_eq!(q1.id(), q2.id());
        assert_eq!(world.cached_query_count(), 1);
    }

    #[test]
    fn test_term_order_does_not_change_hash() {
        let world = World::new();
        let q1 = world.query().all::<Qa>().all::<Qb>().build().unwrap();
        let q2 = world.query().all::<Qb>().all::<Qa>().build().unwrap();
        assert_eq!(q1.id(), q2.id());
    }

    #[test]
    fn test_operation_changes_hash() {
        let world = World::new();
        let q1 = world.query().all::<Qa>().none::<Qb>().build().unwrap();
        let q2 = world.query().all::<Qa>().any::<Qb>().build().unwrap();
        let q3 = world.query().all::<Qa>().all::<Qb>().build().unwrap();
        assert_ne!(q1.id(), q2.id());
        assert_ne!(q2.id(), q3.id());
        assert_ne!(q1.id(), q3.id());
    }

    #[test]
    fn test_write_access_changes_hash() {
        let world = World::new();
        let q1 = world.query().all::<Qa>().build().unwrap();
        let q2 = world.query().all_mut::<Qa>().build().unwrap();
        assert_ne!(q1.id(), q2.id());
    }

    #[test]
    fn test_too_many_terms_rejected() {
        #[derive(Clone, Copy)]
        struct T0;
        impl Component for T0 {}
        #[derive(Clone, Copy)]
        struct T1;
        impl Component for T1 {}
        #[derive(Clone, Copy)]
        struct T2;
        impl Component for T2 {}
        #[derive(Clone, Copy)]
        struct T3;
        impl Component for T3 {}
        #[derive(Clone, Copy)]
        struct T4;
        impl Component for T4 {}
        #[derive(Clone, Copy)]
        struct T5;
        impl Component for T5 {}
        #[derive(Clone, Copy)]
        struct T6;
        impl Component for T6 {}
        #[derive(Clone, Copy)]
        struct T7;
        impl Component for T7 {}
        #[derive(Clone, Copy)]
        struct T8;
        impl Component for T8 {}

        let world = World::new();
        let err = world
            .query()
            .all::<T0>()
            .all::<T1>()
            .all::<T2>()
            .all::<T3>()
            .all::<T4>()
            .all::<T5>()
            .all::<T6>()
            .all::<T7>()
            .all::<T8>()
            .build()
            .unwrap_err();
        assert!(matches!(err, EcsError::QueryTooManyTerms { count: 9, .. }));
    }

    #[test]
    fn test_plan_partition_ranges() {
        let world = World::new();
        world
            .query()
            .none::<Qc>()
            .all::<Qa>()
            .any::<Qb>()
            .build()
            .unwrap();
        let queries = world.queries.borrow();
        let cached = queries.values().next().unwrap();
        assert_eq!(cached.plan.all_terms().len(), 1);
        assert_eq!(cached.plan.any_terms().len(), 1);
        assert_eq!(cached.plan.not_terms().len(), 1);
        assert_eq!(cached.plan.terms()[0].op, TermOp::All);
        assert_eq!(cached.plan.terms()[2].op, TermOp::Not);
    }

    #[test]
    fn test_remap_restores_user_order() {
        let world = World::new();
        world.query().none::<Qa>().all::<Qb>().build().unwrap();
        let queries = world.queries.borrow();
        let cached = queries.values().next().unwrap();
        // Builder call 0 (none Qa) sorted after builder call 1 (all Qb).
        assert_eq!(cached.plan.remap(0), 1);
        assert_eq!(cached.plan.remap(1), 0);
    }

    #[test]
    fn test_wildcard_term_is_complex() {
        let world = World::new();
        let rel = EntityId::new(1, 0);
        world
            .query()
            .all_pair(rel, EntityId::WILDCARD)
            .build()
            .unwrap();
        let queries = world.queries.borrow();
        let cached = queries.values().next().unwrap();
        assert!(cached.plan.is_complex());
    }
}
