//! Intrusive doubly linked list backed by a [`Pool`].
//!
//! Elements are linked by pool indices rather than references, so a single
//! `&mut Pool<T>` borrow is enough to walk and splice any number of lists.
//! The caller supplies an accessor closure projecting an element to its
//! [`Link`] field, which allows one element type to participate in several
//! mutually exclusive lists through a single embedded link.
use super::pool::{Pool, PoolPtr};

/// List head. An empty list has both ends `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ListHead {
    pub(crate) first: Option<PoolPtr>,
    pub(crate) last: Option<PoolPtr>,
}

/// Links to neighbor items, embedded in a list element.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Link {
    pub(crate) prev: Option<PoolPtr>,
    pub(crate) next: Option<PoolPtr>,
}

impl ListHead {
    pub(crate) const fn new() -> Self {
        Self {
            first: None,
            last: None,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.first.is_none()
    }
}

impl Default for ListHead {
    fn default() -> Self {
        Self::new()
    }
}

/// Append `item` to the back of the list.
///
/// `item`'s link must not currently be part of any list.
pub(crate) fn push_back<T>(
    head: &mut ListHead,
    pool: &mut Pool<T>,
    item: PoolPtr,
    link: impl Fn(&mut T) -> &mut Link,
) {
    let old_last = head.last;
    {
        let l = link(&mut pool[item]);
        l.prev = old_last;
        l.next = None;
    }
    match old_last {
        Some(p) => link(&mut pool[p]).next = Some(item),
        None => head.first = Some(item),
    }
    head.last = Some(item);
}

/// Detach and return the front item, or `None` if the list is empty.
pub(crate) fn pop_front<T>(
    head: &mut ListHead,
    pool: &mut Pool<T>,
    link: impl Fn(&mut T) -> &mut Link,
) -> Option<PoolPtr> {
    let item = head.first?;
    remove(head, pool, item, link);
    Some(item)
}

/// Detach `item` from the list it is currently part of.
pub(crate) fn remove<T>(
    head: &mut ListHead,
    pool: &mut Pool<T>,
    item: PoolPtr,
    link: impl Fn(&mut T) -> &mut Link,
) {
    let Link { prev, next } = *link(&mut pool[item]);
    match prev {
        Some(p) => link(&mut pool[p]).next = next,
        None => head.first = next,
    }
    match next {
        Some(n) => link(&mut pool[n]).prev = prev,
        None => head.last = prev,
    }
    *link(&mut pool[item]) = Link::default();
}
