use std::collections::VecDeque;

use enum_map::EnumMap;

use super::region::Affiliation;

/// Region bookkeeping for allocation. Always accessed under the heap's free set lock.
pub struct FreeSet {
    /// Indices of empty regions. Lower indices are handed out first.
    free: VecDeque<usize>,
    /// The region each affiliation currently allocates from.
    current: EnumMap<Affiliation, Option<usize>>,
}

impl FreeSet {
    pub fn new(n_regions: usize) -> Self {
        Self {
            free: (0..n_regions).collect(),
            current: EnumMap::default(),
        }
    }

    pub fn current(&self, affiliation: Affiliation) -> Option<usize> {
        self.current[affiliation]
    }

    pub fn set_current(&mut self, affiliation: Affiliation, index: Option<usize>) {
        debug_assert!(affiliation != Affiliation::Free);
        self.current[affiliation] = index;
    }

    /// Stop allocating into the current regions. New allocations start new regions.
    pub fn retire_current(&mut self) {
        for (_, current) in self.current.iter_mut() {
            *current = None;
        }
    }

    pub fn take_free(&mut self) -> Option<usize> {
        self.free.pop_front()
    }

    pub fn put_free(&mut self, index: usize) {
        debug_assert!(!self.free.contains(&index), "Region {} freed twice", index);
        debug_assert!(self.current.values().all(|c| *c != Some(index)));
        // Keep the list sorted so that the heap stays compact.
        let pos = self.free.partition_point(|&i| i < index);
        self.free.insert(pos, index);
    }

    pub fn free_regions(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_free_region_first() {
        let mut fs = FreeSet::new(4);
        assert_eq!(fs.take_free(), Some(0));
        assert_eq!(fs.take_free(), Some(1));
        assert_eq!(fs.take_free(), Some(2));
        fs.put_free(1);
        fs.put_free(0);
        assert_eq!(fs.free_regions(), 3);
        assert_eq!(fs.take_free(), Some(0));
        assert_eq!(fs.take_free(), Some(1));
        assert_eq!(fs.take_free(), Some(3));
        assert_eq!(fs.take_free(), None);
    }

    #[test]
    fn current_regions() {
        let mut fs = FreeSet::new(2);
        fs.set_current(Affiliation::Young, Some(0));
        fs.set_current(Affiliation::Old, Some(1));
        assert_eq!(fs.current(Affiliation::Young), Some(0));
        fs.retire_current();
        assert_eq!(fs.current(Affiliation::Young), None);
        assert_eq!(fs.current(Affiliation::Old), None);
    }
}
