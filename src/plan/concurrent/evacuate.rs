use std::marker::PhantomData;

use crate::policy::region::Affiliation;
use crate::scheduler::{GCWorker, GangTask};
use crate::util::copy::CopySemantics;
use crate::util::object_forwarding;
use crate::vm::VMBinding;

/// How objects leave a collection set region with the given affiliation.
pub(super) fn evacuation_semantics(affiliation: Affiliation) -> CopySemantics {
    match affiliation {
        Affiliation::Old => CopySemantics::Old,
        _ => CopySemantics::Young,
    }
}

/// Copies every live object out of the collection set. Workers claim whole regions. Mutators
/// run at the same time and may copy objects first through the load-reference barrier.
pub(super) struct EvacuateTask<VM: VMBinding> {
    pub phantom: PhantomData<VM>,
}

impl<VM: VMBinding> GangTask<VM> for EvacuateTask<VM> {
    fn name(&self) -> &'static str {
        "ConcurrentEvacuation"
    }

    fn work(&self, worker: &mut GCWorker<VM>) {
        let rgc = worker.rgc();
        let heap = &rgc.heap;
        let copy = worker.get_copy_context_mut();
        let mut regions = 0;
        while let Some(index) = heap.collection_set().claim_next() {
            let region = heap.region(index);
            let tams = region.tams();
            let semantics = evacuation_semantics(region.affiliation());
            heap.walk_objects(region.used_range(), |object| {
                let live = object.to_raw_address() >= tams || heap.is_marked(object);
                if live && !object_forwarding::is_forwarded::<VM>(object) {
                    copy.evacuate_object(object, semantics, None);
                }
            });
            regions += 1;
        }
        trace!("Evacuated {} regions", regions);
    }
}
