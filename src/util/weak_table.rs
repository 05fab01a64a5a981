//! Canonicalizing tables that map keys to heap objects.
//!
//! A table entry does not keep its object alive, unless the entry is shared: shared entries come
//! from a persisted snapshot, are never unlinked, and act as roots. Collections unlink entries
//! whose objects died and update entries whose objects moved.

use std::borrow::Borrow;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::util::{Address, ObjectReference};
use crate::vm::slot::SimpleSlot;
use crate::vm::{ObjectTracer, SlotVisitor};

/// Index of an entry in a table's arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EntryHandle(usize);

struct Entry<K> {
    /// `None` while the entry is on the free list.
    key: Option<K>,
    hash: u64,
    value: AtomicUsize,
    next: Option<EntryHandle>,
    shared: bool,
}

impl<K> Entry<K> {
    fn slot(&self) -> SimpleSlot {
        SimpleSlot::from_address(Address::from_ref(&self.value))
    }

    fn value(&self) -> Option<ObjectReference> {
        ObjectReference::decode(self.value.load(Ordering::Acquire))
    }
}

pub struct WeakTable<K: Hash + Eq> {
    buckets: Vec<Option<EntryHandle>>,
    entries: Vec<Entry<K>>,
    free: Vec<EntryHandle>,
    len: usize,
}

impl<K: Hash + Eq> Default for WeakTable<K> {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BUCKETS)
    }
}

impl<K: Hash + Eq> WeakTable<K> {
    pub const DEFAULT_BUCKETS: usize = 64;

    pub fn new(n_buckets: usize) -> Self {
        debug_assert!(n_buckets.is_power_of_two());
        Self {
            buckets: vec![None; n_buckets],
            entries: vec![],
            free: vec![],
            len: 0,
        }
    }

    fn hash_of<Q: Hash + ?Sized>(key: &Q) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn bucket_of(&self, hash: u64) -> usize {
        hash as usize & (self.buckets.len() - 1)
    }

    fn find<Q>(&self, key: &Q) -> Option<EntryHandle>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = Self::hash_of(key);
        let mut cursor = self.buckets[self.bucket_of(hash)];
        while let Some(handle) = cursor {
            let entry = &self.entries[handle.0];
            if entry.hash == hash && entry.key.as_ref().is_some_and(|k| <K as Borrow<Q>>::borrow(k) == key) {
                return Some(handle);
            }
            cursor = entry.next;
        }
        None
    }

    /// The canonical object for `key`, without any barrier.
    pub fn lookup<Q>(&self, key: &Q) -> Option<ObjectReference>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).and_then(|h| self.entries[h.0].value())
    }

    /// The slot that holds the canonical object for `key`. Barriers use it to heal the entry.
    pub fn lookup_slot<Q>(&self, key: &Q) -> Option<SimpleSlot>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).map(|h| self.entries[h.0].slot())
    }

    fn insert(&mut self, key: K, value: ObjectReference, shared: bool) -> EntryHandle {
        let hash = Self::hash_of(&key);
        if self.len >= self.buckets.len() * 2 {
            self.grow();
        }
        let bucket = self.bucket_of(hash);
        let entry = Entry {
            key: Some(key),
            hash,
            value: AtomicUsize::new(ObjectReference::encode(Some(value))),
            next: self.buckets[bucket],
            shared,
        };
        let handle = match self.free.pop() {
            Some(handle) => {
                self.entries[handle.0] = entry;
                handle
            }
            None => {
                self.entries.push(entry);
                EntryHandle(self.entries.len() - 1)
            }
        };
        self.buckets[bucket] = Some(handle);
        self.len += 1;
        handle
    }

    fn grow(&mut self) {
        let n_buckets = self.buckets.len() * 2;
        trace!("Grow weak table to {} buckets", n_buckets);
        self.buckets = vec![None; n_buckets];
        for i in 0..self.entries.len() {
            if self.entries[i].key.is_none() {
                continue;
            }
            let bucket = self.entries[i].hash as usize & (n_buckets - 1);
            self.entries[i].next = self.buckets[bucket];
            self.buckets[bucket] = Some(EntryHandle(i));
        }
    }

    /// Return the canonical object for `key`, creating it with `make_value` if there is none.
    pub fn intern<F: FnOnce() -> ObjectReference>(
        &mut self,
        key: K,
        make_value: F,
    ) -> ObjectReference {
        if let Some(existing) = self.lookup(&key) {
            return existing;
        }
        let value = make_value();
        self.insert(key, value, false);
        value
    }

    /// Add an entry from a persisted snapshot. Shared entries are never unlinked.
    pub fn insert_shared(&mut self, key: K, value: ObjectReference) {
        debug_assert!(self.find(&key).is_none(), "Duplicate shared entry");
        self.insert(key, value, true);
    }

    /// Unlink the entries whose objects are dead. Returns the number of unlinked entries.
    pub fn unlink<F: FnMut(ObjectReference) -> bool>(&mut self, mut is_alive: F) -> usize {
        let mut unlinked = 0;
        for bucket in 0..self.buckets.len() {
            let mut prev: Option<EntryHandle> = None;
            let mut cursor = self.buckets[bucket];
            while let Some(handle) = cursor {
                let entry = &self.entries[handle.0];
                let next = entry.next;
                let dead = !entry.shared && entry.value().map_or(true, |v| !is_alive(v));
                if dead {
                    match prev {
                        Some(p) => self.entries[p.0].next = next,
                        None => self.buckets[bucket] = next,
                    }
                    let entry = &mut self.entries[handle.0];
                    entry.key = None;
                    entry.next = None;
                    entry.value.store(0, Ordering::Relaxed);
                    self.free.push(handle);
                    self.len -= 1;
                    unlinked += 1;
                } else {
                    prev = Some(handle);
                }
                cursor = next;
            }
        }
        if unlinked > 0 {
            debug!("Unlinked {} dead weak table entries", unlinked);
        }
        unlinked
    }

    /// Replace each entry's object with what `tracer` returns for it.
    pub fn oops_do<T: ObjectTracer>(&self, tracer: &mut T) {
        for entry in self.entries.iter().filter(|e| e.key.is_some()) {
            if let Some(value) = entry.value() {
                let new_value = tracer.trace_object(value);
                if new_value != value {
                    entry.slot().store(Some(new_value));
                }
            }
        }
    }

    /// Visit the slots of shared entries, which are strong roots.
    pub fn shared_slots_do<V: SlotVisitor>(&self, visitor: &mut V) {
        for entry in self.entries.iter().filter(|e| e.key.is_some() && e.shared) {
            visitor.visit_slot(entry.slot());
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of unlinked entries kept for reuse.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

/// Interned strings.
#[derive(Default)]
pub struct StringDedupTable {
    table: WeakTable<String>,
}

impl StringDedupTable {
    delegate::delegate! {
        to self.table {
            pub fn unlink<F: FnMut(ObjectReference) -> bool>(&mut self, is_alive: F) -> usize;
            pub fn oops_do<T: ObjectTracer>(&self, tracer: &mut T);
            pub fn shared_slots_do<V: SlotVisitor>(&self, visitor: &mut V);
            pub fn len(&self) -> usize;
            pub fn is_empty(&self) -> bool;
            pub fn free_count(&self) -> usize;
        }
    }

    pub fn lookup(&self, s: &str) -> Option<ObjectReference> {
        self.table.lookup(s)
    }

    pub fn lookup_slot(&self, s: &str) -> Option<SimpleSlot> {
        self.table.lookup_slot(s)
    }

    pub fn intern<F: FnOnce() -> ObjectReference>(&mut self, s: &str, make_value: F) -> ObjectReference {
        if let Some(existing) = self.table.lookup(s) {
            return existing;
        }
        self.table.intern(s.to_owned(), make_value)
    }

    pub fn insert_shared(&mut self, s: &str, value: ObjectReference) {
        self.table.insert_shared(s.to_owned(), value)
    }
}

/// Canonical objects for protection domains, keyed by the VM's domain handle.
#[derive(Default)]
pub struct ProtectionDomainCache {
    table: WeakTable<u64>,
}

impl ProtectionDomainCache {
    delegate::delegate! {
        to self.table {
            pub fn unlink<F: FnMut(ObjectReference) -> bool>(&mut self, is_alive: F) -> usize;
            pub fn oops_do<T: ObjectTracer>(&self, tracer: &mut T);
            pub fn shared_slots_do<V: SlotVisitor>(&self, visitor: &mut V);
            pub fn len(&self) -> usize;
            pub fn is_empty(&self) -> bool;
            pub fn free_count(&self) -> usize;
            pub fn insert_shared(&mut self, key: u64, value: ObjectReference);
            pub fn intern<F: FnOnce() -> ObjectReference>(&mut self, key: u64, make_value: F) -> ObjectReference;
        }
    }

    pub fn lookup(&self, key: u64) -> Option<ObjectReference> {
        self.table.lookup(&key)
    }

    pub fn lookup_slot(&self, key: u64) -> Option<SimpleSlot> {
        self.table.lookup_slot(&key)
    }
}
