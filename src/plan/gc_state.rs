use std::sync::atomic::{AtomicU8, Ordering};

/// The heap-wide gc state byte read by barrier fast paths. It only changes inside pauses, so
/// mutators observe a stable value for the duration of a safepoint scope.
#[derive(Default)]
pub struct GcState {
    state: AtomicU8,
}

impl GcState {
    /// Concurrent marking is active. Pre-write barriers log overwritten values.
    pub const MARKING: u8 = 1 << 0;
    /// Collection-set objects are being evacuated. Loads of them copy them.
    pub const EVACUATION: u8 = 1 << 1;
    /// References to the collection set are being updated.
    pub const UPDATE_REFS: u8 = 1 << 2;
    /// Some objects may be forwarded. Loads must resolve collection-set references.
    pub const HAS_FORWARDED: u8 = 1 << 3;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    pub fn is_set(&self, flags: u8) -> bool {
        self.load() & flags != 0
    }

    pub fn set(&self, flags: u8) {
        self.state.fetch_or(flags, Ordering::AcqRel);
    }

    pub fn clear(&self, flags: u8) {
        self.state.fetch_and(!flags, Ordering::AcqRel);
    }

    pub fn clear_all(&self) {
        self.state.store(0, Ordering::Release);
    }

    pub fn is_marking(&self) -> bool {
        self.is_set(Self::MARKING)
    }

    pub fn is_evacuation_in_progress(&self) -> bool {
        self.is_set(Self::EVACUATION)
    }

    pub fn is_update_refs_in_progress(&self) -> bool {
        self.is_set(Self::UPDATE_REFS)
    }

    pub fn has_forwarded(&self) -> bool {
        self.is_set(Self::HAS_FORWARDED)
    }

    pub fn is_idle(&self) -> bool {
        self.load() == 0
    }
}

impl std::fmt::Debug for GcState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.load();
        let names = [
            (Self::MARKING, "MARKING"),
            (Self::EVACUATION, "EVACUATION"),
            (Self::UPDATE_REFS, "UPDATE_REFS"),
            (Self::HAS_FORWARDED, "HAS_FORWARDED"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| state & flag != 0)
            .map(|(_, name)| *name)
            .collect();
        write!(f, "GcState({})", set.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags() {
        let s = GcState::new();
        assert!(s.is_idle());
        s.set(GcState::MARKING);
        assert!(s.is_marking());
        assert!(!s.has_forwarded());
        s.set(GcState::EVACUATION | GcState::HAS_FORWARDED);
        s.clear(GcState::MARKING);
        assert!(s.is_evacuation_in_progress() && s.has_forwarded() && !s.is_marking());
        assert_eq!(format!("{:?}", s), "GcState(EVACUATION|HAS_FORWARDED)");
        s.clear_all();
        assert!(s.is_idle());
    }
}
