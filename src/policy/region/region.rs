use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use atomic::Atomic;
use bytemuck::NoUninit;
use enum_map::Enum;

use crate::util::Address;

/// The lifecycle of a region.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, NoUninit)]
pub enum RegionState {
    /// Never handed out since the heap was created.
    EmptyUncommitted,
    /// Free, and was used before.
    EmptyCommitted,
    /// In use by mutators or as an evacuation target.
    Regular,
    /// Selected for evacuation in the current cycle.
    CSet,
    /// Evacuated, waiting to be recycled.
    Trash,
}

/// The generation a region belongs to.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, NoUninit, Enum)]
pub enum Affiliation {
    Free,
    Young,
    Old,
}

/// A fixed-size, aligned part of the heap.
///
/// `top` only grows while the region is in use, and all updates to it happen under the free set
/// lock. Other threads read it to bound heap parsing.
pub struct Region {
    index: usize,
    bottom: Address,
    end: Address,
    state: Atomic<RegionState>,
    affiliation: Atomic<Affiliation>,
    top: AtomicUsize,
    /// Top at mark start. Objects at or above it were allocated during marking and are live.
    tams: AtomicUsize,
    /// Objects below this address may hold references that need updating.
    update_watermark: AtomicUsize,
    /// Bytes of marked objects below TAMS.
    live_bytes: AtomicUsize,
    /// Number of concurrent cycles this young region has survived.
    age: AtomicUsize,
    evacuation_failed: AtomicBool,
}

impl Region {
    pub fn new(index: usize, bottom: Address, end: Address) -> Self {
        Self {
            index,
            bottom,
            end,
            state: Atomic::new(RegionState::EmptyUncommitted),
            affiliation: Atomic::new(Affiliation::Free),
            top: AtomicUsize::new(bottom.as_usize()),
            tams: AtomicUsize::new(bottom.as_usize()),
            update_watermark: AtomicUsize::new(bottom.as_usize()),
            live_bytes: AtomicUsize::new(0),
            age: AtomicUsize::new(0),
            evacuation_failed: AtomicBool::new(false),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn bottom(&self) -> Address {
        self.bottom
    }

    pub fn end(&self) -> Address {
        self.end
    }

    pub fn capacity(&self) -> usize {
        self.end - self.bottom
    }

    pub fn state(&self) -> RegionState {
        self.state.load(Ordering::Acquire)
    }

    pub fn set_state(&self, state: RegionState) {
        trace!("Region {}: {:?} -> {:?}", self.index, self.state(), state);
        self.state.store(state, Ordering::Release)
    }

    pub fn affiliation(&self) -> Affiliation {
        self.affiliation.load(Ordering::Acquire)
    }

    pub fn set_affiliation(&self, affiliation: Affiliation) {
        self.affiliation.store(affiliation, Ordering::Release)
    }

    pub fn is_young(&self) -> bool {
        self.affiliation() == Affiliation::Young
    }

    pub fn is_old(&self) -> bool {
        self.affiliation() == Affiliation::Old
    }

    /// Regular or in the collection set.
    pub fn is_active(&self) -> bool {
        matches!(self.state(), RegionState::Regular | RegionState::CSet)
    }

    pub fn is_empty_state(&self) -> bool {
        matches!(
            self.state(),
            RegionState::EmptyUncommitted | RegionState::EmptyCommitted
        )
    }

    pub fn top(&self) -> Address {
        unsafe { Address::from_usize(self.top.load(Ordering::Acquire)) }
    }

    pub(crate) fn set_top(&self, top: Address) {
        debug_assert!(top >= self.bottom && top <= self.end);
        self.top.store(top.as_usize(), Ordering::Release)
    }

    pub fn used(&self) -> usize {
        self.top() - self.bottom
    }

    pub fn free(&self) -> usize {
        self.end - self.top()
    }

    pub fn used_range(&self) -> Range<Address> {
        self.bottom..self.top()
    }

    pub fn tams(&self) -> Address {
        unsafe { Address::from_usize(self.tams.load(Ordering::Acquire)) }
    }

    pub fn capture_tams(&self) {
        self.tams.store(self.top.load(Ordering::Acquire), Ordering::Release)
    }

    pub(crate) fn reset_tams(&self) {
        self.tams.store(self.bottom.as_usize(), Ordering::Release)
    }

    pub fn update_watermark(&self) -> Address {
        unsafe { Address::from_usize(self.update_watermark.load(Ordering::Acquire)) }
    }

    pub fn capture_update_watermark(&self) {
        self.update_watermark
            .store(self.top.load(Ordering::Acquire), Ordering::Release)
    }

    pub(crate) fn reset_update_watermark(&self) {
        self.update_watermark
            .store(self.bottom.as_usize(), Ordering::Release)
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }

    pub fn add_live_bytes(&self, bytes: usize) {
        self.live_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn clear_live_bytes(&self) {
        self.live_bytes.store(0, Ordering::Relaxed)
    }

    /// Bytes below TAMS that marking did not find live.
    pub fn garbage_bytes(&self) -> usize {
        (self.tams() - self.bottom).saturating_sub(self.live_bytes())
    }

    pub fn age(&self) -> usize {
        self.age.load(Ordering::Relaxed)
    }

    pub fn increment_age(&self) {
        self.age.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reset_age(&self) {
        self.age.store(0, Ordering::Relaxed)
    }

    pub fn evacuation_failed(&self) -> bool {
        self.evacuation_failed.load(Ordering::Relaxed)
    }

    pub fn set_evacuation_failed(&self, failed: bool) {
        self.evacuation_failed.store(failed, Ordering::Relaxed)
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.bottom && addr < self.end
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Region#{}[{}, {}) {:?} {:?} top={} tams={} live={}",
            self.index,
            self.bottom,
            self.end,
            self.state(),
            self.affiliation(),
            self.top(),
            self.tams(),
            self.live_bytes()
        )
    }
}
