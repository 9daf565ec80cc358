//! Registry of handles currently blocked inside an intercepted call.
//!
//! Entries live in a dense slab. Free slots are recycled LIFO and every slot
//! carries a generation that is bumped on removal, so a stale [`EntryToken`]
//! can never remove an entry that reused its slot. Live entries are threaded
//! through an intrusive doubly linked list, most recently registered first.
//!
//! All operations take one process-wide lock and are O(1), except traversal
//! which holds the lock for its whole duration.

use parking_lot::Mutex;

const NIL: u32 = u32::MAX;

/// An OS handle as seen by the interrupt primitive: a file descriptor on
/// POSIX, a `HANDLE` or `SOCKET` on Windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoHandle(usize);

impl IoHandle {
    #[must_use]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_raw(self) -> usize {
        self.0
    }

    /// Wrap a file descriptor. Negative descriptors are kept bit-for-bit.
    #[must_use]
    pub const fn from_fd(fd: i32) -> Self {
        Self(fd as u32 as usize)
    }

    #[must_use]
    pub const fn as_fd(self) -> i32 {
        self.0 as u32 as i32
    }
}

/// Proof of one registration. Consumed by [`ActiveRegistry::unregister`].
#[derive(Debug, PartialEq, Eq)]
pub struct EntryToken {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    handle: IoHandle,
    generation: u32,
    prev: u32,
    next: u32,
    occupied: bool,
}

#[derive(Debug)]
struct Slab {
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: u32,
    len: usize,
    peak: usize,
}

impl Slab {
    const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: NIL,
            len: 0,
            peak: 0,
        }
    }

    fn insert(&mut self, handle: IoHandle) -> EntryToken {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    handle,
                    generation: 0,
                    prev: NIL,
                    next: NIL,
                    occupied: false,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let old_head = self.head;
        let slot = &mut self.slots[index as usize];
        slot.handle = handle;
        slot.prev = NIL;
        slot.next = old_head;
        slot.occupied = true;
        let generation = slot.generation;

        if old_head != NIL {
            self.slots[old_head as usize].prev = index;
        }
        self.head = index;
        self.len += 1;
        self.peak = self.peak.max(self.len);

        EntryToken { index, generation }
    }

    fn remove(&mut self, token: &EntryToken) -> bool {
        let Some(slot) = self.slots.get_mut(token.index as usize) else {
            return false;
        };
        if !slot.occupied || slot.generation != token.generation {
            return false;
        }

        slot.occupied = false;
        slot.generation = slot.generation.wrapping_add(1);
        let (prev, next) = (slot.prev, slot.next);

        if prev == NIL {
            self.head = next;
        } else {
            self.slots[prev as usize].next = next;
        }
        if next != NIL {
            self.slots[next as usize].prev = prev;
        }

        self.free.push(token.index);
        self.len -= 1;
        true
    }
}

/// Thread-safe set of in-flight blocking calls.
#[derive(Debug)]
pub struct ActiveRegistry {
    inner: Mutex<Slab>,
}

impl Default for ActiveRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Slab::new()),
        }
    }

    /// Insert `handle` at the front of the traversal order.
    pub fn register(&self, handle: IoHandle) -> EntryToken {
        self.inner.lock().insert(handle)
    }

    /// Remove the entry `token` was issued for.
    ///
    /// Returns `false` when the entry is already gone; the registry is left
    /// untouched in that case.
    pub fn unregister(&self, token: EntryToken) -> bool {
        self.inner.lock().remove(&token)
    }

    /// Register `handle` for the lifetime of the returned guard.
    pub fn enter(&self, handle: IoHandle) -> ActiveCall<'_> {
        let mut slab = self.inner.lock();
        let token = slab.insert(handle);
        let active = slab.len;
        drop(slab);
        ActiveCall {
            registry: self,
            token: Some(token),
            active,
        }
    }

    /// Visit every live handle, most recently registered first, under one
    /// lock acquisition. Returns the number of entries visited.
    ///
    /// `action` must not call back into this registry.
    pub fn for_each_entry<F>(&self, mut action: F) -> usize
    where
        F: FnMut(IoHandle),
    {
        let slab = self.inner.lock();
        let mut visited = 0;
        let mut cursor = slab.head;
        while cursor != NIL {
            let slot = &slab.slots[cursor as usize];
            action(slot.handle);
            visited += 1;
            cursor = slot.next;
        }
        visited
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest number of simultaneous entries seen so far.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.inner.lock().peak
    }

    /// Live handles in traversal order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<IoHandle> {
        let mut handles = Vec::new();
        self.for_each_entry(|h| handles.push(h));
        handles
    }
}

/// Registration held across one blocking call. Dropping it unregisters,
/// including during unwinding.
#[derive(Debug)]
pub struct ActiveCall<'a> {
    registry: &'a ActiveRegistry,
    token: Option<EntryToken>,
    active: usize,
}

impl ActiveCall<'_> {
    /// Number of live entries right after this one was inserted.
    #[must_use]
    pub fn active_at_entry(&self) -> usize {
        self.active
    }
}

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.registry.unregister(token);
        }
    }
}
