//! The forwarding word protocol.
//!
//! The forwarding word of an object is `0` while the object has not been forwarded, and
//! `new_address | FORWARDED` once a copy has been installed. Installation is a single CAS, so
//! exactly one copy wins and every later reader observes the same forwardee. An object that
//! could not be copied is forwarded to itself; barriers then resolve it to itself.

use crate::util::{Address, ObjectReference};
use crate::vm::ObjectModel;
use crate::vm::VMBinding;
use std::sync::atomic::{AtomicUsize, Ordering};

const FORWARDING_NOT_TRIGGERED_YET: usize = 0b00;
const FORWARDED: usize = 0b11;
const FORWARDING_MASK: usize = 0b11;

fn forwarding_word_address<VM: VMBinding>(object: ObjectReference) -> Address {
    VM::VMObjectModel::forwarding_word_address(object)
}

/// Return the raw forwarding word of an object.
pub fn get_forwarding_word<VM: VMBinding>(object: ObjectReference) -> usize {
    unsafe { forwarding_word_address::<VM>(object).atomic_load::<AtomicUsize>(Ordering::Acquire) }
}

fn decode_forwardee(word: usize) -> Option<ObjectReference> {
    if word & FORWARDING_MASK == FORWARDED {
        ObjectReference::decode(word & !FORWARDING_MASK)
    } else {
        debug_assert_eq!(
            word, FORWARDING_NOT_TRIGGERED_YET,
            "Invalid/Corrupted forwarding word {:#x}",
            word
        );
        None
    }
}

pub fn is_forwarded<VM: VMBinding>(object: ObjectReference) -> bool {
    get_forwarding_word::<VM>(object) & FORWARDING_MASK == FORWARDED
}

/// Return the forwardee of `object`, or `None` if it has not been forwarded.
pub fn get_forwardee<VM: VMBinding>(object: ObjectReference) -> Option<ObjectReference> {
    decode_forwardee(get_forwarding_word::<VM>(object))
}

/// Return the forwardee of `object`, or `object` itself if it has not been forwarded.
pub fn resolve_forwarded<VM: VMBinding>(object: ObjectReference) -> ObjectReference {
    get_forwardee::<VM>(object).unwrap_or(object)
}

/// Was `object` forwarded to itself after a failed evacuation?
pub fn is_self_forwarded<VM: VMBinding>(object: ObjectReference) -> bool {
    get_forwardee::<VM>(object) == Some(object)
}

/// Try to install `copy` as the forwardee of `object`.
///
/// Returns the winning forwardee: `copy` if this thread installed it, or the forwardee that
/// another thread installed first.
pub fn try_update_forwardee<VM: VMBinding>(
    object: ObjectReference,
    copy: ObjectReference,
) -> ObjectReference {
    let new_word = copy.to_raw_address().as_usize() | FORWARDED;
    let result = unsafe {
        forwarding_word_address::<VM>(object).compare_exchange::<AtomicUsize>(
            FORWARDING_NOT_TRIGGERED_YET,
            new_word,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
    };
    match result {
        Ok(_) => {
            trace!("forwarded {} -> {}", object, copy);
            copy
        }
        Err(witness) => {
            let winner = decode_forwardee(witness);
            debug_assert!(winner.is_some(), "CAS failed on an unforwarded object");
            winner.unwrap_or(object)
        }
    }
}

/// Forward `object` to itself. Returns the winning forwardee, which may be a copy installed by
/// another thread.
pub fn self_forward<VM: VMBinding>(object: ObjectReference) -> ObjectReference {
    try_update_forwardee::<VM>(object, object)
}

/// Reset the forwarding word of an object. Only used during pauses, on objects that are not
/// being evacuated.
pub fn clear_forwarding<VM: VMBinding>(object: ObjectReference) {
    unsafe {
        forwarding_word_address::<VM>(object)
            .atomic_store::<AtomicUsize>(FORWARDING_NOT_TRIGGERED_YET, Ordering::Release)
    }
}
