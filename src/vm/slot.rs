//! Slots: memory locations that hold object references.
//!
//! A slot holds either the zero word (null) or the address of an object. Slots live in heap
//! objects, in the root table, and in weak tables.

use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::util::{Address, ObjectReference};

/// A `SimpleSlot` points to a word that holds an uncompressed, untagged object reference.
///
/// A `SimpleSlot` value *points to* a slot, and is not the slot itself. It can be copied freely,
/// and the copies point to the same slot.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct SimpleSlot {
    slot_addr: Address,
}

impl SimpleSlot {
    /// Create a simple slot from an address.
    ///
    /// Arguments:
    /// *   `address`: The address in memory where an `ObjectReference` is stored.
    pub fn from_address(address: Address) -> Self {
        debug_assert!(address.is_aligned_to(std::mem::align_of::<AtomicUsize>()));
        Self { slot_addr: address }
    }

    /// Get the address of the slot.
    pub fn as_address(&self) -> Address {
        self.slot_addr
    }

    /// Load the object reference from the slot.
    pub fn load(&self) -> Option<ObjectReference> {
        let raw = unsafe { self.slot_addr.atomic_load::<AtomicUsize>(Ordering::Acquire) };
        ObjectReference::decode(raw)
    }

    /// Store an object reference (or null) into the slot.
    pub fn store(&self, object: Option<ObjectReference>) {
        unsafe {
            self.slot_addr
                .atomic_store::<AtomicUsize>(ObjectReference::encode(object), Ordering::Release)
        }
    }

    /// Atomically replace `old` with `new`. On failure, returns the value found in the slot.
    pub fn compare_exchange(
        &self,
        old: Option<ObjectReference>,
        new: Option<ObjectReference>,
    ) -> Result<Option<ObjectReference>, Option<ObjectReference>> {
        unsafe {
            self.slot_addr
                .compare_exchange::<AtomicUsize>(
                    ObjectReference::encode(old),
                    ObjectReference::encode(new),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .map(ObjectReference::decode)
                .map_err(ObjectReference::decode)
        }
    }
}

impl Debug for SimpleSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.slot_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_store_cas() {
        let word = AtomicUsize::new(0);
        let slot = SimpleSlot::from_address(Address::from_ref(&word));
        assert_eq!(slot.load(), None);

        let a = ObjectReference::decode(0x1000);
        let b = ObjectReference::decode(0x2000);
        slot.store(a);
        assert_eq!(slot.load(), a);
        assert_eq!(slot.compare_exchange(b, None), Err(a));
        assert_eq!(slot.compare_exchange(a, b), Ok(a));
        assert_eq!(word.load(Ordering::SeqCst), 0x2000);
    }
}
