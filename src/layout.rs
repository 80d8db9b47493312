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

//! Chunk layout computation.
//!
//! Given an archetype's signatures, computes per-component byte offsets
//! inside the fixed chunk buffer and the row capacity. The buffer packs, in
//! order: the entity id column, AoS columns (densest-first), SoA column
//! groups padded for their lane width, and per-chunk singletons.

use smallvec::SmallVec;

use crate::component::{ComponentDescriptor, MAX_SOA_SUBS};
use crate::entity::Id;
use crate::utils::align_to;
use crate::CHUNK_BYTES;

/// Per-component placement inside the chunk buffer
#[derive(Debug, Clone)]
pub enum ColumnData {
    /// Packed rows at a single offset
    Aos { offset: u32 },
    /// Parallel sub-arrays, each sized for `padded_rows` elements
    Soa {
        sub_offsets: [u32; MAX_SOA_SUBS],
        padded_rows: u32,
    },
}

/// A per-row component column
#[derive(Debug, Clone)]
pub struct Column {
    pub id: Id,
    pub desc: &'static ComponentDescriptor,
    pub data: ColumnData,
}

/// A per-chunk singleton slot
#[derive(Debug, Clone)]
pub struct UniqueColumn {
    pub id: Id,
    pub desc: &'static ComponentDescriptor,
    pub offset: u32,
}

/// Computed offsets and capacity for one archetype's chunks.
/// Shared by every chunk of the archetype; immutable once computed.
#[derive(Debug)]
pub struct ChunkLayout {
    pub capacity: u32,
    /// Generic columns, ordered by id
    pub columns: SmallVec<[Column; 8]>,
    /// Per-chunk singletons, ordered by id
    pub unique: SmallVec<[UniqueColumn; 4]>,
    pub bytes_used: u32,
}

/// Sub-array alignment for a lane width: enough for the widest load the
/// pack width implies, capped at a cache line.
fn soa_sub_align(lanes: u8, sub_size: u8) -> usize {
    ((lanes as usize) * (sub_size as usize))
        .next_power_of_two()
        .min(64)
}

/// SoA groups over-read up to this many bytes past the last lane; the
/// trailing pad makes that read stay inside the buffer.
fn soa_tail_pad(arity: u8) -> usize {
    arity as usize * 4
}

impl ChunkLayout {
    /// Compute the layout for the given sized components.
    ///
    /// `generic` and `unique` are (id, descriptor) lists sorted by id; pure
    /// tag ids (pairs) carry no descriptor and are not passed here.
    pub fn compute(
        generic: &[(Id, &'static ComponentDescriptor)],
        unique: &[(Id, &'static ComponentDescriptor)],
    ) -> ChunkLayout {
        let per_row: usize = std::mem::size_of::<u64>()
            + generic.iter().map(|(_, d)| d.size as usize).sum::<usize>();

        let mut capacity = CHUNK_BYTES / per_row;
        let mut used = Self::pack(capacity, generic, unique, None);
        while capacity > 1 && used > CHUNK_BYTES {
            // The first estimate ignores alignment slack and fixed costs;
            // walk down until everything fits.
            capacity -= 1;
            used = Self::pack(capacity, generic, unique, None);
        }
        assert!(
            used <= CHUNK_BYTES,
            "component set does not fit a single chunk row"
        );

        let mut layout = ChunkLayout {
            capacity: capacity as u32,
            columns: SmallVec::new(),
            unique: SmallVec::new(),
            bytes_used: 0,
        };
        let used = Self::pack(capacity, generic, unique, Some(&mut layout));
        layout.bytes_used = used as u32;
        layout
    }

    /// One packing pass at a fixed row count. Returns total bytes; when
    /// `out` is given, records the offsets into it.
    fn pack(
        capacity: usize,
        generic: &[(Id, &'static ComponentDescriptor)],
        unique: &[(Id, &'static ComponentDescriptor)],
        mut out: Option<&mut ChunkLayout>,
    ) -> usize {
        // Entity id column first, at offset 0.
        let mut cursor = capacity * std::mem::size_of::<u64>();

        // AoS columns, highest alignment first, then largest size first.
        let mut aos: SmallVec<[usize; 8]> = (0..generic.len())
            .filter(|&i| !generic[i].1.soa.is_soa())
            .collect();
        aos.sort_by(|&a, &b| {
            let (da, db) = (generic[a].1, generic[b].1);
            db.align.cmp(&da.align).then(db.size.cmp(&da.size))
        });

        let mut offsets: SmallVec<[(usize, ColumnData); 8]> = SmallVec::new();
        for &i in &aos {
            let desc = generic[i].1;
            cursor = align_to(cursor, (desc.align as usize).max(1));
            offsets.push((i, ColumnData::Aos { offset: cursor as u32 }));
            cursor += capacity * desc.size as usize;
        }

        // SoA groups: aligned sub-arrays plus the over-read tail pad.
        for (i, (_, desc)) in generic.iter().enumerate() {
            if !desc.soa.is_soa() {
                continue;
            }
            let soa = desc.soa;
            let padded_rows = align_to(capacity, soa.lanes as usize);
            let mut sub_offsets = [0u32; MAX_SOA_SUBS];
            for (s, sub) in sub_offsets.iter_mut().zip(&soa.sub_sizes[..soa.arity as usize]) {
                cursor = align_to(cursor, soa_sub_align(soa.lanes, *sub));
                *s = cursor as u32;
                cursor += padded_rows * *sub as usize;
            }
            cursor += soa_tail_pad(soa.arity);
            offsets.push((
                i,
                ColumnData::Soa {
                    sub_offsets,
                    padded_rows: padded_rows as u32,
                },
            ));
        }

        // Per-chunk singletons last.
        let mut unique_offsets: SmallVec<[u32; 4]> = SmallVec::new();
        for (_, desc) in unique {
            cursor = align_to(cursor, (desc.align as usize).max(1));
            unique_offsets.push(cursor as u32);
            cursor += desc.size as usize;
        }

        if let Some(layout) = out.as_deref_mut() {
            offsets.sort_by_key(|(i, _)| *i);
            layout.columns = offsets
                .into_iter()
                .map(|(i, data)| Column {
                    id: generic[i].0,
                    desc: generic[i].1,
                    data,
                })
                .collect();
            layout.unique = unique
                .iter()
                .zip(unique_offsets)
                .map(|((id, desc), offset)| UniqueColumn {
                    id: *id,
                    desc,
                    offset,
                })
                .collect();
        }

        cursor
    }

    /// Index of a generic column by id
    pub fn column_index(&self, id: Id) -> Option<usize> {
        self.columns.binary_search_by(|c| c.id.cmp(&id)).ok()
    }

    /// Index of a per-chunk singleton by id
    pub fn unique_index(&self, id: Id) -> Option<usize> {
        self.unique.binary_search_by(|c| c.id.cmp(&id)).ok()
    }

    /// Version slot for a generic column
    pub fn version_index(&self, column: usize) -> usize {
        column
    }

    /// Version slot for a unique column
    pub fn unique_version_index(&self, unique: usize) -> usize {
        self.columns.len() + unique
    }

    /// Per-component version slots tracked per chunk
    pub fn version_count(&self) -> usize {
        self.columns.len() + self.unique.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{registry, Component, ComponentKind, SoaSpec};

    #[derive(Clone, Copy)]
    struct P {
        _x: f32,
        _y: f32,
        _z: f32,
    }
    impl Component for P {}

    #[derive(Clone, Copy)]
    struct Flag(#[allow(dead_code)] u8);
    impl Component for Flag {}

    #[derive(Clone, Copy)]
    struct Settings {
        _gravity: f64,
    }
    impl Component for Settings {
        const KIND: ComponentKind = ComponentKind::Unique;
    }

    #[derive(Clone, Copy)]
    struct Vel {
        _x: f32,
        _y: f32,
    }
    impl Component for Vel {
        const SOA: SoaSpec = SoaSpec::split(4, &[4, 4]);
    }

    fn desc_list<T: Component>() -> (Id, &'static ComponentDescriptor) {
        let d = registry().get_or_create::<T>().unwrap();
        (d.component_id(), d)
    }

    fn sorted(mut v: Vec<(Id, &'static ComponentDescriptor)>) -> Vec<(Id, &'static ComponentDescriptor)> {
        v.sort_by_key(|(id, _)| *id);
        v
    }

    #[test]
    fn test_empty_layout_holds_entities_only() {
        let layout = ChunkLayout::compute(&[], &[]);
        assert_eq!(layout.capacity as usize, CHUNK_BYTES / 8);
        assert!(layout.columns.is_empty());
        assert!(layout.bytes_used as usize <= CHUNK_BYTES);
    }

    #[test]
    fn test_capacity_accounts_for_row_size() {
        let generic = sorted(vec![desc_list::<P>()]);
        let layout = ChunkLayout::compute(&generic, &[]);
        // 8 bytes of entity id + 12 bytes of P per row.
        assert_eq!(layout.capacity as usize, CHUNK_BYTES / 20);
        assert!(layout.bytes_used as usize <= CHUNK_BYTES);
    }

    #[test]
    fn test_offsets_aligned_and_disjoint() {
        let generic = sorted(vec![desc_list::<P>(), desc_list::<Flag>()]);
        let layout = ChunkLayout::compute(&generic, &[]);
        let cap = layout.capacity as usize;

        let mut ranges: Vec<(usize, usize)> = vec![(0, cap * 8)];
        for col in &layout.columns {
            if let ColumnData::Aos { offset } = col.data {
                let off = offset as usize;
                assert_eq!(off % (col.desc.align as usize), 0);
                ranges.push((off, off + cap * col.desc.size as usize));
            }
        }
        ranges.sort();
        for pair in ranges.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "columns overlap: {ranges:?}");
        }
    }

    #[test]
    fn test_soa_padding_and_tail() {
        let generic = sorted(vec![desc_list::<Vel>()]);
        let layout = ChunkLayout::compute(&generic, &[]);
        let col = &layout.columns[0];
        match col.data {
            ColumnData::Soa {
                sub_offsets,
                padded_rows,
            } => {
                assert_eq!(padded_rows % 4, 0);
                assert!(padded_rows >= layout.capacity);
                // Second sub-array starts after the first, aligned for 4 lanes.
                assert!(sub_offsets[1] >= sub_offsets[0] + padded_rows * 4);
                assert_eq!(sub_offsets[0] as usize % soa_sub_align(4, 4), 0);
                // Tail pad: last sub plus over-read stays inside the buffer.
                let end = sub_offsets[1] as usize + padded_rows as usize * 4 + soa_tail_pad(2);
                assert!(end <= layout.bytes_used as usize);
            }
            _ => panic!("expected SoA column"),
        }
    }

    #[test]
    fn test_unique_singleton_not_scaled_by_rows() {
        let generic = sorted(vec![desc_list::<P>()]);
        let unique = sorted(vec![desc_list::<Settings>()]);
        let with = ChunkLayout::compute(&generic, &unique);
        let without = ChunkLayout::compute(&generic, &[]);
        // One singleton costs at most its size plus alignment, independent
        // of capacity.
        assert!(with.capacity == without.capacity || with.capacity + 1 == without.capacity);
        assert_eq!(with.unique.len(), 1);
        assert_eq!(with.unique[0].offset % 8, 0);
    }

    #[test]
    fn test_column_lookup_by_id() {
        let generic = sorted(vec![desc_list::<P>(), desc_list::<Flag>()]);
        let layout = ChunkLayout::compute(&generic, &[]);
        for (id, _) in &generic {
            assert!(layout.column_index(*id).is_some());
        }
        assert!(layout.column_index(Id::from_component(9999)).is_none());
    }
}
