use crate::util::constants::{BYTES_IN_WORD, OBJECT_ALIGNMENT};
use crate::util::memory;
use crate::util::{Address, ObjectReference};
use crate::vm::VMBinding;

/// VM-specific methods for object model.
///
/// An object reference is the address of the first word of the object. Objects are
/// [`OBJECT_ALIGNMENT`]-aligned and their sizes are multiples of it, so that a region can be
/// walked object by object from its bottom to its top.
///
/// The collector owns one word per object (the forwarding word). The binding decides where it
/// lives. It must be zero in a freshly allocated object and must not be used by the binding.
pub trait ObjectModel<VM: VMBinding> {
    /// The address of the word that holds the forwarding state of `object`.
    fn forwarding_word_address(object: ObjectReference) -> Address;

    /// The size of `object` in bytes. Must be a multiple of [`OBJECT_ALIGNMENT`].
    fn get_current_size(object: ObjectReference) -> usize;

    /// The number of young collections `object` has survived.
    fn get_age(object: ObjectReference) -> usize;

    /// Update the age of `object`. Called on a fresh copy only.
    fn set_age(object: ObjectReference, age: usize);

    /// Format `[start, start + bytes)` as an object without reference slots, so that the memory
    /// stays parsable. `bytes` is at least [`OBJECT_ALIGNMENT`] and a multiple of it.
    fn fill_with_dummy_object(start: Address, bytes: usize);

    /// Copy `from` to `to` and return the reference of the copy. The copy is not forwarded.
    ///
    /// The default implementation copies the object word by word and clears the forwarding
    /// word of the copy.
    fn copy(from: ObjectReference, to: Address) -> ObjectReference {
        let bytes = Self::get_current_size(from);
        debug_assert!(bytes % OBJECT_ALIGNMENT == 0);
        unsafe {
            memory::copy_words(from.to_raw_address(), to, bytes / BYTES_IN_WORD);
        }
        let copy = unsafe { ObjectReference::from_raw_address_unchecked(to) };
        unsafe { memory::store_word(Self::forwarding_word_address(copy), 0) };
        copy
    }

    /// Get the reference of the object that starts at `start`.
    fn address_to_ref(start: Address) -> ObjectReference {
        debug_assert!(start.is_aligned_to(OBJECT_ALIGNMENT));
        unsafe { ObjectReference::from_raw_address_unchecked(start) }
    }

    /// The address right after the last byte of `object`.
    fn object_end(object: ObjectReference) -> Address {
        object.to_raw_address() + Self::get_current_size(object)
    }
}
