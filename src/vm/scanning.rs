use crate::util::ObjectReference;
use crate::vm::slot::SimpleSlot;
use crate::vm::VMBinding;

/// Callback trait of scanning functions that report slots.
pub trait SlotVisitor {
    /// Call this function for each slot.
    fn visit_slot(&mut self, slot: SimpleSlot);
}

/// This lets us use closures as SlotVisitor.
impl<F: FnMut(SimpleSlot)> SlotVisitor for F {
    fn visit_slot(&mut self, slot: SimpleSlot) {
        self(slot)
    }
}

/// Callback trait of tracing functions that may update a reference in place.
///
/// `trace_object` returns the new location of `object`, which the caller stores back.
pub trait ObjectTracer {
    /// Call this function to trace through an object graph edge.
    fn trace_object(&mut self, object: ObjectReference) -> ObjectReference;
}

/// This lets us use closures as ObjectTracer.
impl<F: FnMut(ObjectReference) -> ObjectReference> ObjectTracer for F {
    fn trace_object(&mut self, object: ObjectReference) -> ObjectReference {
        self(object)
    }
}

/// VM-specific methods for scanning objects.
///
/// The reference slots of an object are numbered `0..num_slots(object)`. Large objects are
/// scanned in chunks of consecutive slot indices.
pub trait Scanning<VM: VMBinding> {
    /// The number of reference slots in `object`.
    fn num_slots(object: ObjectReference) -> usize;

    /// The `index`-th reference slot of `object`.
    fn slot(object: ObjectReference, index: usize) -> SimpleSlot;

    /// Report the reference slots `start..end` of `object`.
    fn scan_object_range<SV: SlotVisitor>(
        object: ObjectReference,
        start: usize,
        end: usize,
        slot_visitor: &mut SV,
    ) {
        for i in start..end {
            slot_visitor.visit_slot(Self::slot(object, i));
        }
    }

    /// Report every reference slot of `object`.
    fn scan_object<SV: SlotVisitor>(object: ObjectReference, slot_visitor: &mut SV) {
        Self::scan_object_range(object, 0, Self::num_slots(object), slot_visitor)
    }
}
