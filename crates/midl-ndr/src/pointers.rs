//! NDR pointer semantics
//!
//! NDR supports three pointer semantics:
//!
//! - Reference (`[ref]`): never null. At the top level of a call it has no
//!   wire representation; embedded, it carries a non-zero referent ID
//! - Unique (`[unique]`): nullable, referent ID (0 = null), no aliasing
//! - Full (`[ptr]`): nullable, referent ID, aliasing allowed
//!
//! Referent data of embedded pointers is deferred: it is written after the
//! fixed part of the enclosing aggregate, in the order the pointers were
//! met, each referent followed by its own deferred data (depth first).

use std::collections::VecDeque;

/// First referent ID handed out by a writer
pub const FIRST_REFERENT_ID: u64 = 0x0002_0000;

/// Pointer attribute of a pointer type or field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PointerKind {
    /// No attribute: resolved to the interface `pointer_default`
    #[default]
    None,
    Ref,
    Unique,
    Full,
}

impl PointerKind {
    /// Replace `None` with the interface default
    pub fn resolve(self, pointer_default: PointerKind) -> PointerKind {
        match self {
            Self::None => match pointer_default {
                Self::None => Self::Unique,
                other => other,
            },
            other => other,
        }
    }

    pub fn is_nullable(self) -> bool {
        !matches!(self, Self::Ref)
    }
}

/// Referent ID allocator for one marshal call
#[derive(Debug, Clone)]
pub struct ReferentIds {
    next: u64,
}

impl ReferentIds {
    pub fn new() -> Self {
        Self {
            next: FIRST_REFERENT_ID,
        }
    }

    /// Allocate the next non-zero referent ID
    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 4;
        id
    }
}

impl Default for ReferentIds {
    fn default() -> Self {
        Self::new()
    }
}

/// Work queue of deferred pointer referents
///
/// Items are pushed while the fixed part of an aggregate is processed.
/// [`DeferredQueue::take`] hands the pending batch out in FIFO order; the
/// caller processes each item and drains whatever that item enqueued
/// before moving to the next one.
#[derive(Debug)]
pub struct DeferredQueue<T> {
    pending: VecDeque<T>,
}

impl<T> DeferredQueue<T> {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }

    pub fn push(&mut self, item: T) {
        self.pending.push_back(item);
    }

    /// Take every pending item, leaving the queue empty
    pub fn take(&mut self) -> VecDeque<T> {
        std::mem::take(&mut self.pending)
    }

    /// Pending items, oldest first
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.pending.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<T> Default for DeferredQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referent_ids_are_distinct() {
        let mut ids = ReferentIds::new();
        assert_eq!(ids.next_id(), 0x20000);
        assert_eq!(ids.next_id(), 0x20004);
        assert_eq!(ids.next_id(), 0x20008);
    }

    #[test]
    fn test_pointer_default_resolution() {
        assert_eq!(PointerKind::None.resolve(PointerKind::Ref), PointerKind::Ref);
        assert_eq!(PointerKind::None.resolve(PointerKind::None), PointerKind::Unique);
        assert_eq!(PointerKind::Full.resolve(PointerKind::Ref), PointerKind::Full);
        assert!(!PointerKind::Ref.is_nullable());
    }

    #[test]
    fn test_deferred_depth_first_drain() {
        // item n enqueues its children n*10+1, n*10+2 when processed
        fn drain(queue: &mut DeferredQueue<u32>, out: &mut Vec<u32>) {
            for item in queue.take() {
                out.push(item);
                if item < 10 {
                    queue.push(item * 10 + 1);
                    queue.push(item * 10 + 2);
                }
                drain(queue, out);
            }
        }

        let mut queue = DeferredQueue::new();
        queue.push(1);
        queue.push(2);
        let mut out = Vec::new();
        drain(&mut queue, &mut out);
        assert_eq!(out, vec![1, 11, 12, 2, 21, 22]);
        assert!(queue.is_empty());
    }
}
