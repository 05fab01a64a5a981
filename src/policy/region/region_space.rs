use std::marker::PhantomData;
use std::ops::Range;

use super::collection_set::CollectionSet;
use super::free_set::FreeSet;
use super::marking_context::MarkingContext;
use super::region::{Affiliation, Region, RegionState};
use super::remset::RememberedSet;
use crate::util::memory::HeapMemory;
use crate::util::options::Options;
use crate::util::{Address, ObjectReference};
use crate::vm::{ObjectModel, VMBinding};

/// The heap: one contiguous block of memory split into power-of-two sized regions, with the
/// side tables that cover it.
pub struct RegionSpace<VM: VMBinding> {
    memory: HeapMemory,
    regions: Vec<Region>,
    log_region_size: usize,
    remset: RememberedSet,
    marking_context: MarkingContext,
    collection_set: CollectionSet,
    free_set: spin::Mutex<FreeSet>,
    phantom: PhantomData<VM>,
}

impl<VM: VMBinding> RegionSpace<VM> {
    /// Reserve the heap. Returns `None` if the memory cannot be reserved or the heap would not
    /// hold a single region.
    pub fn new(options: &Options) -> Option<Self> {
        let log_region_size = options.log_region_size;
        let region_size = 1usize << log_region_size;
        let n_regions = options.heap_size >> log_region_size;
        if n_regions == 0 {
            warn!(
                "Heap size {} is smaller than one region ({} bytes)",
                options.heap_size, region_size
            );
            return None;
        }
        let memory = HeapMemory::reserve(n_regions << log_region_size, region_size)?;
        let start = memory.start();
        let end = memory.end();
        let regions = (0..n_regions)
            .map(|i| {
                let bottom = start + (i << log_region_size);
                Region::new(i, bottom, bottom + region_size)
            })
            .collect();
        debug!(
            "Heap [{}, {}): {} regions of {} bytes",
            start, end, n_regions, region_size
        );
        Some(Self {
            regions,
            log_region_size,
            remset: RememberedSet::new(start, end, options),
            marking_context: MarkingContext::new(start, end),
            collection_set: CollectionSet::new(start, n_regions, log_region_size),
            free_set: spin::Mutex::new(FreeSet::new(n_regions)),
            memory,
            phantom: PhantomData,
        })
    }

    pub fn start(&self) -> Address {
        self.memory.start()
    }

    pub fn end(&self) -> Address {
        self.memory.end()
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.memory.contains(addr)
    }

    pub fn region_size(&self) -> usize {
        1 << self.log_region_size
    }

    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region(&self, index: usize) -> &Region {
        &self.regions[index]
    }

    pub fn region_index(&self, addr: Address) -> usize {
        debug_assert!(self.contains(addr), "{} is not in the heap", addr);
        (addr - self.start()) >> self.log_region_size
    }

    pub fn region_of(&self, addr: Address) -> &Region {
        &self.regions[self.region_index(addr)]
    }

    pub fn remset(&self) -> &RememberedSet {
        &self.remset
    }

    pub fn marking_context(&self) -> &MarkingContext {
        &self.marking_context
    }

    pub fn collection_set(&self) -> &CollectionSet {
        &self.collection_set
    }

    /// Is `object` in a region selected for evacuation?
    #[inline(always)]
    pub fn in_cset(&self, object: ObjectReference) -> bool {
        let addr = object.to_raw_address();
        self.contains(addr) && self.collection_set.is_in(addr)
    }

    pub fn is_in_young(&self, addr: Address) -> bool {
        self.contains(addr) && self.region_of(addr).is_young()
    }

    pub fn is_in_old(&self, addr: Address) -> bool {
        self.contains(addr) && self.region_of(addr).is_old()
    }

    /// Carve at least `min_bytes` and at most `desired_bytes` from a region of the given
    /// affiliation. Starts a new region if the current one is too full. Returns `None` when no
    /// free region is left.
    pub fn allocate_lab(
        &self,
        affiliation: Affiliation,
        min_bytes: usize,
        desired_bytes: usize,
    ) -> Option<Range<Address>> {
        debug_assert!(affiliation != Affiliation::Free);
        debug_assert!(min_bytes <= desired_bytes);
        debug_assert!(min_bytes <= self.region_size());
        let mut free_set = self.free_set.lock();
        if let Some(index) = free_set.current(affiliation) {
            if let Some(chunk) = self.carve(index, min_bytes, desired_bytes) {
                return Some(chunk);
            }
        }
        let index = free_set.take_free()?;
        self.commit_region(index, affiliation);
        free_set.set_current(affiliation, Some(index));
        self.carve(index, min_bytes, desired_bytes)
    }

    /// Allocate `bytes` outside any LAB.
    pub fn allocate_shared(&self, affiliation: Affiliation, bytes: usize) -> Option<Address> {
        self.allocate_lab(affiliation, bytes, bytes)
            .map(|chunk| chunk.start)
    }

    fn carve(&self, index: usize, min_bytes: usize, desired_bytes: usize) -> Option<Range<Address>> {
        let region = &self.regions[index];
        debug_assert_eq!(region.state(), RegionState::Regular);
        let top = region.top();
        let available = region.end() - top;
        if available < min_bytes {
            return None;
        }
        let size = desired_bytes.min(available);
        region.set_top(top + size);
        Some(top..top + size)
    }

    fn commit_region(&self, index: usize, affiliation: Affiliation) {
        let region = &self.regions[index];
        debug_assert!(region.is_empty_state(), "{:?}", region);
        let range = region.bottom()..region.end();
        self.remset.card_table().on_commit(range.clone());
        self.marking_context.clear_range(range);
        region.set_top(region.bottom());
        region.reset_tams();
        region.reset_update_watermark();
        region.clear_live_bytes();
        region.reset_age();
        region.set_evacuation_failed(false);
        region.set_affiliation(affiliation);
        region.set_state(RegionState::Regular);
        trace!("Committed {:?}", region);
    }

    /// Return an evacuated or empty region to the free set.
    pub fn recycle_region(&self, index: usize) {
        let region = &self.regions[index];
        debug_assert!(!region.is_empty_state(), "{:?}", region);
        let mut free_set = self.free_set.lock();
        for affiliation in [Affiliation::Young, Affiliation::Old] {
            if free_set.current(affiliation) == Some(index) {
                free_set.set_current(affiliation, None);
            }
        }
        region.set_state(RegionState::Trash);
        self.remset
            .card_table()
            .clear(region.bottom()..region.end());
        region.set_top(region.bottom());
        region.reset_tams();
        region.reset_update_watermark();
        region.clear_live_bytes();
        region.reset_age();
        region.set_evacuation_failed(false);
        region.set_affiliation(Affiliation::Free);
        region.set_state(RegionState::EmptyCommitted);
        free_set.put_free(index);
    }

    /// Make allocation start new regions. Used at the start of evacuation so that selected
    /// regions get no new objects.
    pub fn retire_current_regions(&self) {
        self.free_set.lock().retire_current();
    }

    pub fn free_regions(&self) -> usize {
        self.free_set.lock().free_regions()
    }

    pub fn count_regions(&self, affiliation: Affiliation) -> usize {
        self.regions
            .iter()
            .filter(|r| r.is_active() && r.affiliation() == affiliation)
            .count()
    }

    pub fn used_bytes(&self) -> usize {
        self.regions
            .iter()
            .filter(|r| r.is_active())
            .map(|r| r.used())
            .sum()
    }

    /// Call `f` on each object in `range`, which must start at an object and end at an object
    /// boundary.
    pub fn walk_objects<F: FnMut(ObjectReference)>(&self, range: Range<Address>, mut f: F) {
        let mut cursor = range.start;
        while cursor < range.end {
            let object = VM::VMObjectModel::address_to_ref(cursor);
            let size = VM::VMObjectModel::get_current_size(object);
            debug_assert!(size > 0, "Unparsable object at {}", cursor);
            f(object);
            cursor += size;
        }
        debug_assert!(cursor == range.end, "Object crosses {}", range.end);
    }

    /// Replace every maximal run of dead objects in `range` with one dummy object. Returns the
    /// number of bytes filled.
    pub fn fill_dead_objects<F: FnMut(ObjectReference) -> bool>(
        &self,
        range: Range<Address>,
        mut is_live: F,
    ) -> usize {
        let mut filled = 0;
        let mut dead_start: Option<Address> = None;
        let mut cursor = range.start;
        while cursor < range.end {
            let object = VM::VMObjectModel::address_to_ref(cursor);
            let size = VM::VMObjectModel::get_current_size(object);
            if is_live(object) {
                if let Some(start) = dead_start.take() {
                    VM::VMObjectModel::fill_with_dummy_object(start, cursor - start);
                    filled += cursor - start;
                }
            } else if dead_start.is_none() {
                dead_start = Some(cursor);
            }
            cursor += size;
        }
        if let Some(start) = dead_start {
            VM::VMObjectModel::fill_with_dummy_object(start, cursor - start);
            filled += cursor - start;
        }
        filled
    }

    /// Mark `object` if it is below its region's TAMS and not marked yet. Returns true if this
    /// call marked it.
    pub fn mark_object(&self, object: ObjectReference) -> bool {
        let addr = object.to_raw_address();
        let region = self.region_of(addr);
        if addr >= region.tams() {
            return false;
        }
        if self.marking_context.mark(addr) {
            region.add_live_bytes(VM::VMObjectModel::get_current_size(object));
            true
        } else {
            false
        }
    }

    pub fn is_marked(&self, object: ObjectReference) -> bool {
        self.marking_context.is_marked(object.to_raw_address())
    }

    /// Does marking still need to visit the object at `addr`? False for objects allocated
    /// since marking started and for objects that are already marked.
    pub fn requires_marking(&self, addr: Address) -> bool {
        self.contains(addr)
            && addr < self.region_of(addr).tams()
            && !self.marking_context.is_marked(addr)
    }

    /// Is `object` live according to the last marking?
    pub fn is_marked_or_above_tams(&self, object: ObjectReference) -> bool {
        let addr = object.to_raw_address();
        addr >= self.region_of(addr).tams() || self.marking_context.is_marked(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::BYTES_IN_WORD;
    use crate::util::test_util::mock_vm::{self, MockVM};
    use crate::vm::Scanning;

    fn space(regions: usize) -> RegionSpace<MockVM> {
        let mut options = Options::new();
        options.log_region_size = 16;
        options.heap_size = regions << 16;
        RegionSpace::new(&options).unwrap()
    }

    #[test]
    fn too_small_heap() {
        let mut options = Options::new();
        options.log_region_size = 16;
        options.heap_size = 1 << 15;
        assert!(RegionSpace::<MockVM>::new(&options).is_none());
    }

    #[test]
    fn labs_fill_regions_in_order() {
        let s = space(4);
        let a = s.allocate_lab(Affiliation::Young, 64, 40 << 10).unwrap();
        assert_eq!(a.start, s.start());
        assert_eq!(s.region(0).affiliation(), Affiliation::Young);
        // Only 24K is left in region 0.
        let b = s.allocate_lab(Affiliation::Young, 64, 40 << 10).unwrap();
        assert_eq!(b.end - b.start, 24 << 10);
        assert_eq!(b.end, s.region(0).end());
        let c = s.allocate_lab(Affiliation::Young, 64, 40 << 10).unwrap();
        assert_eq!(s.region_index(c.start), 1);

        let d = s.allocate_shared(Affiliation::Old, 128).unwrap();
        assert_eq!(s.region_index(d), 2);
        assert!(s.is_in_old(d));
        assert_eq!(s.count_regions(Affiliation::Young), 2);
        assert_eq!(s.free_regions(), 1);

        // Region 2 cannot take a whole region's worth, so the last free region is used.
        let e = s.allocate_shared(Affiliation::Old, 1 << 16).unwrap();
        assert_eq!(s.region_index(e), 3);
        assert_eq!(s.free_regions(), 0);
        assert!(s.allocate_shared(Affiliation::Young, 1 << 16).is_none());
        assert!(s.allocate_shared(Affiliation::Young, 64).is_some());
    }

    #[test]
    fn recycled_regions_are_reused() {
        let s = space(2);
        let a = s.allocate_shared(Affiliation::Young, 1 << 16).unwrap();
        let b = s.allocate_shared(Affiliation::Old, 1 << 16).unwrap();
        assert!(s.allocate_shared(Affiliation::Young, 64).is_none());
        s.remset().card_table().mark_card_dirty(0);
        s.recycle_region(s.region_index(a));
        assert!(s.region(0).is_empty_state());
        assert_eq!(s.region(0).affiliation(), Affiliation::Free);
        assert!(s.remset().card_table().is_card_clean(0));
        let c = s.allocate_shared(Affiliation::Young, 64).unwrap();
        assert_eq!(c, a);
        assert_ne!(b, c);
    }

    #[test]
    fn marking_respects_tams() {
        let s = space(2);
        let chunk = s.allocate_lab(Affiliation::Young, 64, 64).unwrap();
        let o1 = mock_vm::init_object(chunk.start, 1, 1);
        let o2 = mock_vm::init_object(chunk.start + 32usize, 1, 1);
        s.region(0).capture_tams();
        let chunk = s.allocate_lab(Affiliation::Young, 32, 32).unwrap();
        let o3 = mock_vm::init_object(chunk.start, 1, 1);

        assert!(s.requires_marking(o1.to_raw_address()));
        assert!(!s.requires_marking(o3.to_raw_address()));
        assert!(s.mark_object(o1));
        assert!(!s.mark_object(o1));
        assert!(!s.mark_object(o3));
        assert!(!s.requires_marking(o1.to_raw_address()));
        assert!(s.is_marked_or_above_tams(o1));
        assert!(!s.is_marked_or_above_tams(o2));
        assert!(s.is_marked_or_above_tams(o3));
        assert_eq!(s.region(0).live_bytes(), 4 * BYTES_IN_WORD);
        assert_eq!(s.region(0).garbage_bytes(), 4 * BYTES_IN_WORD);
    }

    #[test]
    fn dead_runs_are_coalesced() {
        let s = space(1);
        let chunk = s.allocate_lab(Affiliation::Old, 256, 256).unwrap();
        let mut objects = vec![];
        let mut cursor = chunk.start;
        for _ in 0..8 {
            let o = mock_vm::init_object(cursor, 1, 1);
            cursor += MockVM::get_current_size(o);
            objects.push(o);
        }
        let live = [objects[0], objects[4]];
        let filled = s.fill_dead_objects(chunk.start..cursor, |o| live.contains(&o));
        assert_eq!(filled, 6 * 4 * BYTES_IN_WORD);

        let mut seen = vec![];
        s.walk_objects(chunk.start..cursor, |o| seen.push(o));
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0], objects[0]);
        assert_eq!(seen[2], objects[4]);
        assert_eq!(MockVM::get_current_size(seen[1]), 3 * 4 * BYTES_IN_WORD);
        assert_eq!(MockVM::num_slots(seen[3]), 0);
    }
}
