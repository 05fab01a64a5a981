use crate::util::constants::OBJECT_ALIGNMENT;
use crate::util::Address;
use crate::vm::{ObjectModel, VMBinding};

use super::region::Affiliation;

/// A thread-local bump allocation buffer carved out of a region: a TLAB for mutators or a
/// GCLAB for evacuating threads.
pub struct LocalAllocBuffer {
    affiliation: Affiliation,
    cursor: Address,
    limit: Address,
}

impl LocalAllocBuffer {
    pub fn new(affiliation: Affiliation) -> Self {
        Self {
            affiliation,
            cursor: Address::ZERO,
            limit: Address::ZERO,
        }
    }

    pub fn affiliation(&self) -> Affiliation {
        self.affiliation
    }

    pub fn cursor(&self) -> Address {
        self.cursor
    }

    pub fn limit(&self) -> Address {
        self.limit
    }

    pub fn free_bytes(&self) -> usize {
        self.limit - self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.is_zero()
    }

    /// Start allocating from `[start, end)`. The old buffer must have been retired.
    pub fn set(&mut self, start: Address, end: Address) {
        debug_assert!(self.is_empty() || self.cursor == self.limit);
        debug_assert!(start.is_aligned_to(OBJECT_ALIGNMENT));
        self.cursor = start;
        self.limit = end;
    }

    #[inline(always)]
    pub fn alloc(&mut self, bytes: usize) -> Option<Address> {
        debug_assert!(bytes % OBJECT_ALIGNMENT == 0);
        let result = self.cursor;
        if self.limit - result < bytes || self.cursor.is_zero() {
            return None;
        }
        self.cursor = result + bytes;
        Some(result)
    }

    /// Give back the most recent allocation. Returns false if `start` was not the last
    /// allocation from this buffer.
    pub fn undo_allocation(&mut self, start: Address, bytes: usize) -> bool {
        if !self.cursor.is_zero() && start + bytes == self.cursor {
            self.cursor = start;
            true
        } else {
            false
        }
    }

    /// Fill the unused part with a dummy object and drop the buffer. Returns the number of
    /// wasted bytes.
    pub fn retire<VM: VMBinding>(&mut self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let waste = self.free_bytes();
        if waste > 0 {
            VM::VMObjectModel::fill_with_dummy_object(self.cursor, waste);
        }
        self.cursor = Address::ZERO;
        self.limit = Address::ZERO;
        waste
    }
}
