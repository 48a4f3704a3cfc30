//! Intrusive circular doubly linked lists of observers.
//!
//! Every target that is observed by weak refs or finalization records owns one
//! list head; the observers themselves carry the `next`/`prev` links. Links are
//! weak: they never keep anything alive and are never traced.
//!
//! A link is an [`ObserverListPtr`], a single tagged word that points either at
//! an element (a weak ref or a record) or at a list head:
//!
//! ```text
//! bits: IIII....IIII K
//!       I = arena index (31..1 bits)
//!       K = kind: 0 = element, 1 = list head
//! ```
//!
//! An empty list points at itself in both directions. An element that is not in
//! any list stores no links at all.

use std::fmt;

use crate::heap::ArenaIndex;

const KIND_MASK: u64 = 0b1;

/// What an [`ObserverListPtr`] points at
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtrKind {
    /// A weak ref or finalization record
    Element = 0,
    /// A list head
    ListHead = 1,
}

/// Tagged weak link to a list element or list head.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverListPtr(u64);

impl ObserverListPtr {
    /// Link to the observer stored at arena slot `index`
    pub const fn element(index: u32) -> Self {
        Self((index as u64) << 1)
    }

    /// Link to the list head stored at arena slot `index`
    pub const fn list_head(index: u32) -> Self {
        Self(((index as u64) << 1) | KIND_MASK)
    }

    /// Rebuild a link from its stored bits
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw stored bits
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Kind of thing this link points at
    pub const fn kind(self) -> PtrKind {
        if self.0 & KIND_MASK == 0 {
            PtrKind::Element
        } else {
            PtrKind::ListHead
        }
    }

    /// Check if this link points at an element
    pub const fn is_element(self) -> bool {
        self.0 & KIND_MASK == 0
    }

    /// Arena slot index, without the kind bit
    pub const fn index(self) -> u32 {
        (self.0 >> 1) as u32
    }
}

impl fmt::Debug for ObserverListPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            PtrKind::Element => write!(f, "Element({})", self.index()),
            PtrKind::ListHead => write!(f, "ListHead({})", self.index()),
        }
    }
}

/// The two links of a list node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListLinks {
    /// Next node
    pub next: ObserverListPtr,
    /// Previous node
    pub prev: ObserverListPtr,
}

impl ListLinks {
    /// Links of an empty list whose head is `head`
    pub const fn empty(head: ObserverListPtr) -> Self {
        Self {
            next: head,
            prev: head,
        }
    }
}

/// Handle to a list head in the observer heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListId(pub(crate) ArenaIndex);

impl ListId {
    /// Link pointing at this head
    pub fn ptr(self) -> ObserverListPtr {
        ObserverListPtr::list_head(self.0.index())
    }
}

/// Anything that can be linked into an observer list.
pub trait ObserverListObject {
    /// Current links, `None` when not in a list
    fn list_links(&self) -> Option<ListLinks>;

    /// Replace the links
    fn set_list_links(&mut self, links: Option<ListLinks>);

    /// Check if linked into a list
    fn is_in_list(&self) -> bool {
        self.list_links().is_some()
    }
}

/// Storage that resolves [`ObserverListPtr`]s to link slots.
///
/// The list algorithms are provided methods so that any storage holding both
/// the elements and the heads gets them for free.
pub trait ObserverLinks {
    /// Links of a node. List heads always have links; unlinked elements have none.
    fn links(&self, ptr: ObserverListPtr) -> Option<ListLinks>;

    /// Overwrite the links of a node
    fn set_links(&mut self, ptr: ObserverListPtr, links: Option<ListLinks>);

    /// Successor of a linked node
    fn next_of(&self, ptr: ObserverListPtr) -> Option<ObserverListPtr> {
        self.links(ptr).map(|links| links.next)
    }

    /// Predecessor of a linked node
    fn prev_of(&self, ptr: ObserverListPtr) -> Option<ObserverListPtr> {
        self.links(ptr).map(|links| links.prev)
    }

    /// Point `ptr` forward at `next`
    fn set_next(&mut self, ptr: ObserverListPtr, next: ObserverListPtr) {
        if let Some(mut links) = self.links(ptr) {
            links.next = next;
            self.set_links(ptr, Some(links));
        }
    }

    /// Point `ptr` backward at `prev`
    fn set_prev(&mut self, ptr: ObserverListPtr, prev: ObserverListPtr) {
        if let Some(mut links) = self.links(ptr) {
            links.prev = prev;
            self.set_links(ptr, Some(links));
        }
    }

    /// Check if the element at `index` is in a list
    fn is_in_list(&self, index: u32) -> bool {
        self.links(ObserverListPtr::element(index)).is_some()
    }

    /// Check if the list whose head is at `list` has no elements
    fn is_list_empty(&self, list: u32) -> bool {
        let this = ObserverListPtr::list_head(list);
        match self.links(this) {
            Some(links) => {
                debug_assert_eq!(links.next == this, links.prev == this);
                links.next == this
            }
            None => true,
        }
    }

    /// First element of a list
    fn list_first(&self, list: u32) -> Option<u32> {
        let head = ObserverListPtr::list_head(list);
        let next = self.next_of(head)?;
        (next != head).then_some(next.index())
    }

    /// Insert an unlinked element at the front of a list.
    fn insert_front(&mut self, list: u32, element: u32) {
        debug_assert!(!self.is_in_list(element));

        let head = ObserverListPtr::list_head(list);
        let this = ObserverListPtr::element(element);
        let old_next = self.next_of(head).unwrap_or(head);

        self.set_next(head, this);
        self.set_links(
            this,
            Some(ListLinks {
                next: old_next,
                prev: head,
            }),
        );
        self.set_prev(old_next, this);
    }

    /// Remove an element from whatever list it is in.
    ///
    /// Returns false if it was not linked.
    fn unlink(&mut self, element: u32) -> bool {
        let this = ObserverListPtr::element(element);
        let Some(links) = self.links(this) else {
            return false;
        };

        debug_assert_eq!(self.next_of(links.prev), Some(this));
        debug_assert_eq!(self.prev_of(links.next), Some(this));

        self.set_prev(links.next, links.prev);
        self.set_next(links.prev, links.next);
        self.set_links(this, None);
        true
    }

    /// Move all elements of list `from` onto the empty list `to`, leaving
    /// `from` empty. Both neighbors of the old head are re-pointed.
    fn move_list(&mut self, from: u32, to: u32) {
        debug_assert_ne!(from, to);
        debug_assert!(self.is_list_empty(to));

        let old_head = ObserverListPtr::list_head(from);
        let new_head = ObserverListPtr::list_head(to);
        if self.is_list_empty(from) {
            return;
        }
        let Some(links) = self.links(old_head) else {
            return;
        };

        debug_assert_eq!(self.prev_of(links.next), Some(old_head));
        debug_assert_eq!(self.next_of(links.prev), Some(old_head));

        self.set_links(new_head, Some(links));
        self.set_prev(links.next, new_head);
        self.set_next(links.prev, new_head);
        self.set_links(old_head, Some(ListLinks::empty(old_head)));
    }

    /// Relocation hook: `new` holds a copy of the links that `old` had.
    /// Re-point both neighbors at the new location.
    fn element_moved(&mut self, old: ObserverListPtr, new: ObserverListPtr) {
        let Some(links) = self.links(new) else {
            return;
        };

        debug_assert_ne!(links.next, old);
        debug_assert_eq!(self.prev_of(links.next), Some(old));
        debug_assert_eq!(self.next_of(links.prev), Some(old));

        self.set_prev(links.next, new);
        self.set_next(links.prev, new);
    }

    /// Cursor over a list, front to back
    fn list_iter(&self, list: u32) -> ObserverListIter {
        ObserverListIter::new(self, list, Direction::Forward)
    }

    /// Cursor over a list, back to front (oldest insertion first)
    fn list_iter_back(&self, list: u32) -> ObserverListIter {
        ObserverListIter::new(self, list, Direction::Backward)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// Cursor over an observer list.
///
/// The cursor does not borrow the storage, so the caller may mutate it between
/// steps. The successor of an element is captured when the element is
/// returned, which makes it safe to unlink the element just returned. Unlinking
/// any other element of the list during iteration is not supported.
#[derive(Debug, Clone)]
pub struct ObserverListIter {
    end: ObserverListPtr,
    ptr: ObserverListPtr,
    direction: Direction,
}

impl ObserverListIter {
    fn new<S: ObserverLinks + ?Sized>(store: &S, list: u32, direction: Direction) -> Self {
        let end = ObserverListPtr::list_head(list);
        let ptr = match direction {
            Direction::Forward => store.next_of(end),
            Direction::Backward => store.prev_of(end),
        }
        .unwrap_or(end);
        Self {
            end,
            ptr,
            direction,
        }
    }

    /// Check if the cursor is past the last element
    pub fn done(&self) -> bool {
        self.ptr == self.end
    }

    /// Return the current element's index and step past it.
    pub fn next_element<S: ObserverLinks + ?Sized>(&mut self, store: &S) -> Option<u32> {
        if self.done() {
            return None;
        }
        let current = self.ptr;
        debug_assert!(current.is_element());
        let step = match self.direction {
            Direction::Forward => store.next_of(current),
            Direction::Backward => store.prev_of(current),
        };
        self.ptr = step.unwrap_or(self.end);
        Some(current.index())
    }
}
