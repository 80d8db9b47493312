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

//! Fixed-capacity chunk: packed rows for one archetype.
//!
//! Rows are partitioned into a disabled prefix `[0, disabled)` and an enabled
//! suffix `[disabled, count)`. Per-component version counters support change
//! filters; the structural-lock counter rejects row mutation while a query
//! callback is running over the chunk.

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::component::Component;
use crate::entity::{EntityId, Id};
use crate::entity_list::EntityList;
use crate::layout::{ChunkLayout, ColumnData};
use crate::registry;
use crate::{CHUNK_ALIGN, CHUNK_BYTES, CHUNK_DEATH_TICKS};

/// Fixed-size block of rows sharing one archetype signature
pub struct Chunk {
    data: NonNull<u8>,
    layout: Arc<ChunkLayout>,
    archetype: u32,
    index: u32,
    count: u32,
    disabled: u32,
    lock: u32,
    death_tick: u32,
    versions: SmallVec<[u32; 8]>,
    unique_init: u32,
}

// SAFETY: the buffer is uniquely owned and only holds component values,
// which are Send + Sync by the Component bound.
unsafe impl Send for Chunk {}
unsafe impl Sync for Chunk {}

impl Chunk {
    pub(crate) fn new(layout: Arc<ChunkLayout>, archetype: u32, index: u32) -> Chunk {
        let alloc_layout = Layout::from_size_align(CHUNK_BYTES, CHUNK_ALIGN).unwrap();
        // SAFETY: CHUNK_BYTES is non-zero. Zeroed so SoA lane over-reads and
        // alignment padding never touch uninitialized memory.
        let ptr = unsafe { alloc_zeroed(alloc_layout) };
        let data = match NonNull::new(ptr) {
            Some(p) => p,
            None => handle_alloc_error(alloc_layout),
        };
        let versions = smallvec::smallvec![0; layout.version_count()];
        Chunk {
            data,
            layout,
            archetype,
            index,
            count: 0,
            disabled: 0,
            lock: 0,
            death_tick: 0,
            versions,
            unique_init: 0,
        }
    }

    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    pub fn archetype_id(&self) -> u32 {
        self.archetype
    }

    pub(crate) fn index(&self) -> u32 {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: u32) {
        self.index = index;
    }

    pub fn capacity(&self) -> u32 {
        self.layout.capacity
    }

    /// Total rows, enabled and disabled
    pub fn size(&self) -> u32 {
        self.count
    }

    pub fn size_enabled(&self) -> u32 {
        self.count - self.disabled
    }

    pub fn size_disabled(&self) -> u32 {
        self.disabled
    }

    pub fn is_full(&self) -> bool {
        self.count == self.layout.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Increment or decrement the structural-lock counter
    pub fn lock(&mut self, enable: bool) {
        if enable {
            self.lock += 1;
        } else {
            debug_assert!(self.lock > 0, "structural lock underflow");
            self.lock -= 1;
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock > 0
    }

    // ---- death countdown (chunk GC) ----

    pub(crate) fn begin_death_countdown(&mut self) {
        self.death_tick = CHUNK_DEATH_TICKS;
    }

    /// Advance the countdown; true once it has elapsed on an empty chunk
    pub(crate) fn tick_death_countdown(&mut self) -> bool {
        if !self.is_empty() {
            self.death_tick = 0;
            return false;
        }
        if self.death_tick > 0 {
            self.death_tick -= 1;
        }
        self.death_tick == 0
    }

    // ---- entity column ----

    fn entity_bits_ptr(&self) -> *mut u64 {
        self.data.as_ptr() as *mut u64
    }

    /// Entity handles of the stored rows
    pub fn entities(&self) -> &[EntityId] {
        // SAFETY: rows [0, count) are initialized; EntityId is a transparent
        // wrapper over u64 and the column sits at offset 0, aligned for u64.
        unsafe {
            std::slice::from_raw_parts(self.entity_bits_ptr() as *const EntityId, self.count as usize)
        }
    }

    pub fn row_entity(&self, row: u32) -> EntityId {
        debug_assert!(row < self.count);
        // SAFETY: bounds asserted above.
        unsafe { EntityId::from_bits(*self.entity_bits_ptr().add(row as usize)) }
    }

    fn set_row_entity(&mut self, row: u32, entity: EntityId) {
        debug_assert!(row < self.layout.capacity);
        // SAFETY: row is within the fixed-size column.
        unsafe { *self.entity_bits_ptr().add(row as usize) = entity.to_bits() }
    }

    // ---- row mutation ----

    /// Append a row to the enabled region. The caller must initialize every
    /// sized column cell before the row becomes observable.
    pub(crate) fn add_row(&mut self, entity: EntityId, world_version: u32, bump: bool) -> u32 {
        debug_assert!(!self.is_full(), "add_row on a full chunk");
        debug_assert!(!self.is_locked(), "structural change on a locked chunk");
        let row = self.count;
        self.set_row_entity(row, entity);
        self.count += 1;
        self.death_tick = 0;
        if bump {
            self.bump_all_versions(world_version);
        }
        row
    }

    /// Swap-erase a row, preserving the enabled/disabled partition, dropping
    /// its cells and patching the entity table for any row that moved.
    pub(crate) fn remove_row(&mut self, row: u32, entities: &mut EntityList, world_version: u32, bump: bool) {
        debug_assert!(row < self.count);
        debug_assert!(!self.is_locked(), "structural change on a locked chunk");

        let mut row = row;
        if row < self.disabled {
            // Move the victim to the partition boundary so the erase happens
            // against the tail of the array.
            let boundary = self.disabled - 1;
            self.swap_rows(row, boundary, entities);
            row = boundary;
            self.disabled -= 1;
        }

        self.drop_row_cells(row);

        let last = self.count - 1;
        if row != last {
            self.move_row_bits(last, row);
            let moved = self.row_entity_at_unchecked(row);
            entities.record_mut(moved.id()).row = row;
        }
        self.count -= 1;
        if bump {
            self.bump_all_versions(world_version);
        }
    }

    /// Swap-erase a row without dropping any cell data. Used when the row's
    /// contents have been moved to another chunk.
    pub(crate) fn discard_row(&mut self, row: u32, entities: &mut EntityList, world_version: u32, bump: bool) {
        debug_assert!(row < self.count);
        debug_assert!(!self.is_locked(), "structural change on a locked chunk");

        let mut row = row;
        if row < self.disabled {
            let boundary = self.disabled - 1;
            self.swap_rows(row, boundary, entities);
            row = boundary;
            self.disabled -= 1;
        }

        let last = self.count - 1;
        if row != last {
            self.move_row_bits(last, row);
            let moved = self.row_entity_at_unchecked(row);
            entities.record_mut(moved.id()).row = row;
        }
        self.count -= 1;
        if bump {
            self.bump_all_versions(world_version);
        }
    }

    /// Move a row across the enabled/disabled boundary. Enabling an enabled
    /// row (or disabling a disabled one) is a no-op.
    pub(crate) fn enable_row(&mut self, row: u32, enable: bool, entities: &mut EntityList) {
        debug_assert!(row < self.count);
        debug_assert!(!self.is_locked(), "structural change on a locked chunk");

        if enable && row < self.disabled {
            let target = self.disabled - 1;
            let entity = self.row_entity(row);
            self.swap_rows(row, target, entities);
            self.disabled -= 1;
            entities.record_mut(entity.id()).disabled = false;
        } else if !enable && row >= self.disabled {
            let target = self.disabled;
            let entity = self.row_entity(row);
            self.swap_rows(row, target, entities);
            self.disabled += 1;
            entities.record_mut(entity.id()).disabled = true;
        }
    }

    fn row_entity_at_unchecked(&self, row: u32) -> EntityId {
        // SAFETY: caller guarantees the slot holds a written entity id.
        unsafe { EntityId::from_bits(*self.entity_bits_ptr().add(row as usize)) }
    }

    /// Swap two rows bitwise, entity ids included, and patch their entity
    /// table rows. Disabled bits are the caller's responsibility.
    fn swap_rows(&mut self, a: u32, b: u32, entities: &mut EntityList) {
        if a == b {
            return;
        }
        debug_assert!(a < self.count && b < self.count);

        let ea = self.row_entity(a);
        let eb = self.row_entity(b);
        self.set_row_entity(a, eb);
        self.set_row_entity(b, ea);
        entities.record_mut(ea.id()).row = b;
        entities.record_mut(eb.id()).row = a;

        let mut tmp = [0u8; crate::MAX_COMPONENT_SIZE];
        for col in 0..self.layout.columns.len() {
            self.for_each_cell_part(col, |size, at| {
                let (pa, pb) = (at(a), at(b));
                // SAFETY: distinct rows of the same column never overlap.
                unsafe {
                    std::ptr::copy_nonoverlapping(pa, tmp.as_mut_ptr(), size);
                    std::ptr::copy_nonoverlapping(pb, pa, size);
                    std::ptr::copy_nonoverlapping(tmp.as_ptr(), pb, size);
                }
            });
        }
    }

    /// Bitwise move of every cell from row `from` to row `to` (no drops)
    fn move_row_bits(&mut self, from: u32, to: u32) {
        let entity = self.row_entity_at_unchecked(from);
        self.set_row_entity(to, entity);
        for col in 0..self.layout.columns.len() {
            self.for_each_cell_part(col, |size, at| {
                let (src, dst) = (at(from), at(to));
                // SAFETY: distinct rows of the same column never overlap.
                unsafe { std::ptr::copy_nonoverlapping(src, dst, size) }
            });
        }
    }

    /// Visit every byte range making up one cell of `col`: once for an AoS
    /// column, once per sub-array for SoA. The callback receives the part
    /// size and a row-to-pointer mapping.
    fn for_each_cell_part(&self, col: usize, mut f: impl FnMut(usize, &dyn Fn(u32) -> *mut u8)) {
        let base = self.data.as_ptr();
        let column = &self.layout.columns[col];
        match &column.data {
            ColumnData::Aos { offset } => {
                let size = column.desc.size as usize;
                if size == 0 {
                    return;
                }
                let start = *offset as usize;
                let at = move |row: u32| {
                    // SAFETY: offsets were computed to stay inside the buffer.
                    unsafe { base.add(start + row as usize * size) }
                };
                f(size, &at);
            }
            ColumnData::Soa { sub_offsets, .. } => {
                let soa = column.desc.soa;
                for (i, &sub) in soa.sub_sizes[..soa.arity as usize].iter().enumerate() {
                    let size = sub as usize;
                    if size == 0 {
                        continue;
                    }
                    let start = sub_offsets[i] as usize;
                    let at = move |row: u32| {
                        // SAFETY: offsets were computed to stay inside the buffer.
                        unsafe { base.add(start + row as usize * size) }
                    };
                    f(size, &at);
                }
            }
        }
    }

    fn drop_row_cells(&mut self, row: u32) {
        let base = self.data.as_ptr();
        for column in self.layout.columns.iter() {
            if let (Some(drop_fn), ColumnData::Aos { offset }) = (column.desc.drop_fn, &column.data)
            {
                let ptr =
                    // SAFETY: live row cell, initialized by the writer that
                    // populated the row.
                    unsafe { base.add(*offset as usize + row as usize * column.desc.size as usize) };
                unsafe { drop_fn(ptr) };
            }
        }
    }

    // ---- cell access ----

    pub(crate) fn aos_cell_ptr(&self, col: usize, row: u32) -> *mut u8 {
        let column = &self.layout.columns[col];
        match &column.data {
            ColumnData::Aos { offset } => {
                // SAFETY: offsets stay inside the buffer for row < capacity.
                unsafe {
                    self.data
                        .as_ptr()
                        .add(*offset as usize + row as usize * column.desc.size as usize)
                }
            }
            ColumnData::Soa { .. } => unreachable!("aos_cell_ptr on SoA column"),
        }
    }

    /// Copy one cell bitwise from `src` into `self`. Both columns must carry
    /// the same descriptor.
    pub(crate) fn copy_cell_from(
        &mut self,
        dst_col: usize,
        dst_row: u32,
        src: &Chunk,
        src_col: usize,
        src_row: u32,
    ) {
        let dst_column = &self.layout.columns[dst_col];
        let src_column = &src.layout.columns[src_col];
        debug_assert!(std::ptr::eq(dst_column.desc, src_column.desc));

        match (&src_column.data, &dst_column.data) {
            (ColumnData::Aos { .. }, ColumnData::Aos { .. }) => {
                let size = dst_column.desc.size as usize;
                if size > 0 {
                    // SAFETY: cells sit in distinct buffers.
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            src.aos_cell_ptr(src_col, src_row),
                            self.aos_cell_ptr(dst_col, dst_row),
                            size,
                        );
                    }
                }
            }
            (
                ColumnData::Soa { sub_offsets: so, .. },
                ColumnData::Soa { sub_offsets: do_, .. },
            ) => {
                let soa = dst_column.desc.soa;
                for (i, &sub) in soa.sub_sizes[..soa.arity as usize].iter().enumerate() {
                    let size = sub as usize;
                    // SAFETY: sub-array offsets stay inside their buffers.
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            src.data.as_ptr().add(so[i] as usize + src_row as usize * size),
                            self.data.as_ptr().add(do_[i] as usize + dst_row as usize * size),
                            size,
                        );
                    }
                }
            }
            _ => unreachable!("column storage mismatch for one descriptor"),
        }
    }

    /// Clone one cell between two rows of this chunk.
    pub(crate) fn clone_row_cell_within(&mut self, col: usize, src_row: u32, dst_row: u32) {
        debug_assert_ne!(src_row, dst_row);
        let desc = self.layout.columns[col].desc;
        let is_aos = matches!(self.layout.columns[col].data, ColumnData::Aos { .. });
        if let (Some(clone_fn), true) = (desc.clone_fn, is_aos) {
            // SAFETY: distinct rows; source is initialized, destination
            // cell is fresh.
            unsafe {
                clone_fn(
                    self.aos_cell_ptr(col, src_row),
                    self.aos_cell_ptr(col, dst_row),
                )
            }
        } else {
            self.for_each_cell_part(col, |size, at| {
                let (src, dst) = (at(src_row), at(dst_row));
                // SAFETY: distinct rows of the same column never overlap.
                unsafe { std::ptr::copy_nonoverlapping(src, dst, size) }
            });
        }
    }

    /// Clone one cell from `src` into `self` using the descriptor's clone
    /// hook; trivially copyable cells fall back to a bitwise copy.
    pub(crate) fn clone_cell_from(
        &mut self,
        dst_col: usize,
        dst_row: u32,
        src: &Chunk,
        src_col: usize,
        src_row: u32,
    ) {
        let desc = self.layout.columns[dst_col].desc;
        let is_aos = matches!(self.layout.columns[dst_col].data, ColumnData::Aos { .. });
        if let (Some(clone_fn), true) = (desc.clone_fn, is_aos) {
            // SAFETY: source cell is initialized; destination cell is
            // fresh (never dropped).
            unsafe {
                clone_fn(
                    src.aos_cell_ptr(src_col, src_row),
                    self.aos_cell_ptr(dst_col, dst_row),
                )
            }
        } else {
            self.copy_cell_from(dst_col, dst_row, src, src_col, src_row);
        }
    }

    /// Write a value into a fresh cell (no drop of prior contents)
    pub(crate) fn write_cell_init<T: Component>(&mut self, col: usize, row: u32, value: T) {
        let column = &self.layout.columns[col];
        debug_assert_eq!(column.desc.type_id, std::any::TypeId::of::<T>());
        match &column.data {
            ColumnData::Aos { .. } => {
                // SAFETY: type checked against the descriptor; cell is fresh.
                unsafe { std::ptr::write(self.aos_cell_ptr(col, row) as *mut T, value) }
            }
            ColumnData::Soa { sub_offsets, .. } => {
                let soa = column.desc.soa;
                let src = &value as *const T as *const u8;
                let mut field = 0usize;
                for (i, &sub) in soa.sub_sizes[..soa.arity as usize].iter().enumerate() {
                    let size = sub as usize;
                    // SAFETY: SoA types are field-packed; sub sizes were
                    // validated to cover the whole value.
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            src.add(field),
                            self.data
                                .as_ptr()
                                .add(sub_offsets[i] as usize + row as usize * size),
                            size,
                        );
                    }
                    field += size;
                }
                std::mem::forget(value);
            }
        }
    }

    /// Overwrite a live cell, dropping the previous value
    pub(crate) fn write_cell_replace<T: Component>(&mut self, col: usize, row: u32, value: T) {
        let column = &self.layout.columns[col];
        if let (Some(drop_fn), ColumnData::Aos { .. }) = (column.desc.drop_fn, &column.data) {
            // SAFETY: live rows always hold initialized cells.
            unsafe { drop_fn(self.aos_cell_ptr(col, row)) };
        }
        self.write_cell_init(col, row, value);
    }

    /// Read a cell by value, reassembling SoA fields
    pub(crate) fn read_cell<T: Component>(&self, col: usize, row: u32) -> T {
        let column = &self.layout.columns[col];
        debug_assert_eq!(column.desc.type_id, std::any::TypeId::of::<T>());
        match &column.data {
            ColumnData::Aos { .. } => {
                // SAFETY: live cell of the checked type; T: Clone.
                unsafe { (*(self.aos_cell_ptr(col, row) as *const T)).clone() }
            }
            ColumnData::Soa { sub_offsets, .. } => {
                let soa = column.desc.soa;
                let mut out = std::mem::MaybeUninit::<T>::uninit();
                let dst = out.as_mut_ptr() as *mut u8;
                let mut field = 0usize;
                for (i, &sub) in soa.sub_sizes[..soa.arity as usize].iter().enumerate() {
                    let size = sub as usize;
                    // SAFETY: every field byte is covered by the sub arrays.
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            self.data
                                .as_ptr()
                                .add(sub_offsets[i] as usize + row as usize * size),
                            dst.add(field),
                            size,
                        );
                    }
                    field += size;
                }
                // SAFETY: all bytes written above.
                unsafe { out.assume_init() }
            }
        }
    }

    // ---- typed views ----

    fn column_of<T: Component>(&self) -> Option<usize> {
        let desc = registry().get::<T>()?;
        self.layout.column_index(desc.component_id())
    }

    /// Read-only AoS view over all stored rows
    pub fn view<T: Component>(&self) -> Option<&[T]> {
        let col = self.column_of::<T>()?;
        let column = &self.layout.columns[col];
        match &column.data {
            ColumnData::Aos { .. } => {
                debug_assert_eq!(column.desc.type_id, std::any::TypeId::of::<T>());
                // SAFETY: rows [0, count) are initialized values of T.
                Some(unsafe {
                    std::slice::from_raw_parts(
                        self.aos_cell_ptr(col, 0) as *const T,
                        self.count as usize,
                    )
                })
            }
            ColumnData::Soa { .. } => None,
        }
    }

    /// Writable AoS view; bumps the column's version to `world_version`
    pub fn view_mut<T: Component>(&mut self, world_version: u32) -> Option<&mut [T]> {
        let col = self.column_of::<T>()?;
        self.versions[self.layout.version_index(col)] = world_version;
        self.sview_mut_at(col)
    }

    /// Writable AoS view without a version bump ("silent")
    pub fn sview_mut<T: Component>(&mut self) -> Option<&mut [T]> {
        let col = self.column_of::<T>()?;
        self.sview_mut_at(col)
    }

    fn sview_mut_at<T: Component>(&mut self, col: usize) -> Option<&mut [T]> {
        let column = &self.layout.columns[col];
        match &column.data {
            ColumnData::Aos { .. } => {
                debug_assert_eq!(column.desc.type_id, std::any::TypeId::of::<T>());
                // SAFETY: rows [0, count) are initialized values of T; the
                // &mut self borrow makes the view exclusive.
                Some(unsafe {
                    std::slice::from_raw_parts_mut(
                        self.aos_cell_ptr(col, 0) as *mut T,
                        self.count as usize,
                    )
                })
            }
            ColumnData::Soa { .. } => None,
        }
    }

    /// Lane-aware read-only view of a SoA column
    pub fn soa_view<T: Component>(&self) -> Option<SoaView<'_>> {
        let col = self.column_of::<T>()?;
        let column = &self.layout.columns[col];
        match &column.data {
            ColumnData::Soa { sub_offsets, padded_rows } => Some(SoaView {
                data: self.data,
                sub_offsets: *sub_offsets,
                sub_sizes: column.desc.soa.sub_sizes,
                arity: column.desc.soa.arity,
                padded_rows: *padded_rows,
                _marker: std::marker::PhantomData,
            }),
            ColumnData::Aos { .. } => None,
        }
    }

    /// Lane-aware writable view; bumps the column's version
    pub fn soa_view_mut<T: Component>(&mut self, world_version: u32) -> Option<SoaViewMut<'_>> {
        let col = self.column_of::<T>()?;
        self.versions[self.layout.version_index(col)] = world_version;
        let column = &self.layout.columns[col];
        match &column.data {
            ColumnData::Soa { sub_offsets, padded_rows } => Some(SoaViewMut {
                data: self.data,
                sub_offsets: *sub_offsets,
                sub_sizes: column.desc.soa.sub_sizes,
                arity: column.desc.soa.arity,
                padded_rows: *padded_rows,
                _marker: std::marker::PhantomData,
            }),
            ColumnData::Aos { .. } => None,
        }
    }

    // ---- per-chunk singletons ----

    /// Read the chunk singleton, if it has been set
    pub fn unique<T: Component>(&self) -> Option<&T> {
        let desc = registry().get::<T>()?;
        let idx = self.layout.unique_index(desc.component_id())?;
        if self.unique_init & (1 << idx) == 0 {
            return None;
        }
        let offset = self.layout.unique[idx].offset as usize;
        // SAFETY: initialization tracked by unique_init; type checked via
        // the descriptor.
        Some(unsafe { &*(self.data.as_ptr().add(offset) as *const T) })
    }

    /// Write the chunk singleton, dropping any previous value
    pub fn set_unique<T: Component>(&mut self, value: T, world_version: u32) -> bool {
        let desc = match registry().get::<T>() {
            Some(d) => d,
            None => return false,
        };
        let idx = match self.layout.unique_index(desc.component_id()) {
            Some(i) => i,
            None => return false,
        };
        let offset = self.layout.unique[idx].offset as usize;
        let ptr = unsafe { self.data.as_ptr().add(offset) };
        if self.unique_init & (1 << idx) != 0 {
            if let Some(drop_fn) = desc.drop_fn {
                // SAFETY: slot was initialized.
                unsafe { drop_fn(ptr) };
            }
        }
        // SAFETY: slot is aligned and sized for T.
        unsafe { std::ptr::write(ptr as *mut T, value) };
        self.unique_init |= 1 << idx;
        self.versions[self.layout.unique_version_index(idx)] = world_version;
        true
    }

    // ---- change versions ----

    /// True iff the component's stored version strictly exceeds `since`
    pub fn changed(&self, id: Id, since: u32) -> bool {
        if let Some(col) = self.layout.column_index(id) {
            return self.versions[self.layout.version_index(col)] > since;
        }
        if let Some(idx) = self.layout.unique_index(id) {
            return self.versions[self.layout.unique_version_index(idx)] > since;
        }
        false
    }

    pub(crate) fn bump_version(&mut self, id: Id, world_version: u32) {
        if let Some(col) = self.layout.column_index(id) {
            self.versions[self.layout.version_index(col)] = world_version;
        } else if let Some(idx) = self.layout.unique_index(id) {
            self.versions[self.layout.unique_version_index(idx)] = world_version;
        }
    }

    fn bump_all_versions(&mut self, world_version: u32) {
        for v in self.versions.iter_mut() {
            *v = world_version;
        }
    }

    /// Stored version for a component id, if the chunk carries it
    pub(crate) fn version_of(&self, id: Id) -> Option<u32> {
        if let Some(col) = self.layout.column_index(id) {
            return Some(self.versions[self.layout.version_index(col)]);
        }
        self.layout
            .unique_index(id)
            .map(|u| self.versions[self.layout.unique_version_index(u)])
    }

    pub(crate) fn data_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        for row in 0..self.count {
            self.drop_row_cells(row);
        }
        for (idx, unique) in self.layout.unique.iter().enumerate() {
            if self.unique_init & (1 << idx) != 0 {
                if let Some(drop_fn) = unique.desc.drop_fn {
                    // SAFETY: initialization tracked by unique_init.
                    unsafe { drop_fn(self.data.as_ptr().add(unique.offset as usize)) };
                }
            }
        }
        let alloc_layout = Layout::from_size_align(CHUNK_BYTES, CHUNK_ALIGN).unwrap();
        // SAFETY: allocated with the identical layout in Chunk::new.
        unsafe { dealloc(self.data.as_ptr(), alloc_layout) };
    }
}

/// Read-only accessor over a SoA column's sub-arrays.
///
/// Sub-arrays span the padded row range `[0, padded_rows)`; callers index by
/// absolute row. Reads up to one lane past the last live row are in-bounds
/// thanks to the layout's tail padding.
pub struct SoaView<'a> {
    data: NonNull<u8>,
    sub_offsets: [u32; crate::component::MAX_SOA_SUBS],
    sub_sizes: [u8; crate::component::MAX_SOA_SUBS],
    arity: u8,
    padded_rows: u32,
    _marker: std::marker::PhantomData<&'a Chunk>,
}

impl<'a> SoaView<'a> {
    pub fn arity(&self) -> usize {
        self.arity as usize
    }

    pub fn padded_rows(&self) -> usize {
        self.padded_rows as usize
    }

    /// Typed slice over sub-array `i`
    pub fn sub<F: Copy + 'static>(&self, i: usize) -> &'a [F] {
        assert!(i < self.arity as usize);
        debug_assert_eq!(std::mem::size_of::<F>(), self.sub_sizes[i] as usize);
        // SAFETY: sub-array i holds padded_rows elements of this size; the
        // buffer was zero-initialized so padding lanes are defined.
        unsafe {
            std::slice::from_raw_parts(
                self.data.as_ptr().add(self.sub_offsets[i] as usize) as *const F,
                self.padded_rows as usize,
            )
        }
    }
}

/// Writable accessor over a SoA column's sub-arrays
pub struct SoaViewMut<'a> {
    data: NonNull<u8>,
    sub_offsets: [u32; crate::component::MAX_SOA_SUBS],
    sub_sizes: [u8; crate::component::MAX_SOA_SUBS],
    arity: u8,
    padded_rows: u32,
    _marker: std::marker::PhantomData<&'a mut Chunk>,
}

impl<'a> SoaViewMut<'a> {
    pub fn arity(&self) -> usize {
        self.arity as usize
    }

    pub fn padded_rows(&self) -> usize {
        self.padded_rows as usize
    }

    pub fn sub<F: Copy + 'static>(&self, i: usize) -> &[F] {
        assert!(i < self.arity as usize);
        debug_assert_eq!(std::mem::size_of::<F>(), self.sub_sizes[i] as usize);
        // SAFETY: as in SoaView::sub.
        unsafe {
            std::slice::from_raw_parts(
                self.data.as_ptr().add(self.sub_offsets[i] as usize) as *const F,
                self.padded_rows as usize,
            )
        }
    }

    /// Mutable typed slice over sub-array `i`
    pub fn sub_mut<F: Copy + 'static>(&mut self, i: usize) -> &mut [F] {
        assert!(i < self.arity as usize);
        debug_assert_eq!(std::mem::size_of::<F>(), self.sub_sizes[i] as usize);
        // SAFETY: exclusive access guaranteed by the &mut Chunk borrow this
        // view was created from.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.data.as_ptr().add(self.sub_offsets[i] as usize) as *mut F,
                self.padded_rows as usize,
            )
        }
    }
}
