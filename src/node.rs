//! HashNode and NodeCache: the public hash-consing surface.

use crate::boxed::ValueBox;
use crate::canon_table::{CanonTable, Slot};
use crate::reentrancy::DebugReentrancy;
use core::fmt;
use core::hash::{BuildHasher, Hash, Hasher};
use std::collections::hash_map::RandomState;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The head of a (sub)list: a strong, shared reference to its first node.
/// The empty list is represented by `None` in `Option<Head<T, S>>`.
pub type Head<T, S = RandomState> = Arc<HashNode<T, S>>;

/// Successor-from-another-cache error for node constructors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ForeignNode;

struct Shared<T, S> {
    hasher: S,
    table: Mutex<CanonTable<T, S>>,
    reentrancy: DebugReentrancy,
}

impl<T, S> Shared<T, S> {
    fn table(&self) -> MutexGuard<'_, CanonTable<T, S>> {
        // A panicking element Eq can poison the lock mid-probe, but probing
        // never leaves the table inconsistent, and node Drops must still be
        // able to unlink their entries afterwards.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Immutable singly linked list node, using hash consing.
///
/// Node equality is reference equality, and for nodes minted by one cache
/// that coincides with structural equality of the lists they head: the
/// cache guarantees that requesting a node for an already-represented
/// `(value, next)` pair returns the identical `Arc`.
///
/// A node strongly owns its value box and successor, so holding a head
/// keeps the whole chain alive. Dropping the last reference to a node
/// unlinks its cache entry immediately.
pub struct HashNode<T, S = RandomState> {
    boxed: ValueBox<T>,
    next: Option<Head<T, S>>,
    hash: u64,
    slot: Slot,
    cache: Arc<Shared<T, S>>,
}

impl<T, S> HashNode<T, S> {
    /// The value held by this node.
    pub fn value(&self) -> &T {
        self.boxed.value()
    }

    /// The wrapper holding this node's value. Reusing it in `node_boxed`
    /// presents the literal same value object to the cache again.
    pub fn boxed(&self) -> &ValueBox<T> {
        &self.boxed
    }

    /// The next node: the head of this node's tail.
    pub fn next(&self) -> Option<&Head<T, S>> {
        self.next.as_ref()
    }

    /// Lazily traverse the list this node heads, yielding values front to
    /// back.
    pub fn values(&self) -> Values<'_, T, S> {
        Values { cur: Some(self) }
    }
}

impl<T, S> PartialEq for HashNode<T, S> {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self, other)
    }
}

impl<T, S> Eq for HashNode<T, S> {}

impl<T, S> Hash for HashNode<T, S> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self as *const Self as usize).hash(state);
    }
}

impl<T: fmt::Debug, S> fmt::Debug for HashNode<T, S> {
    /// Shows the whole list, front to back. Iterative, so heads of long
    /// chains print without deep recursion.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HashNode")?;
        f.debug_list().entries(self.values()).finish()
    }
}

impl<T, S> Drop for HashNode<T, S> {
    fn drop(&mut self) {
        {
            let _g = self.cache.reentrancy.enter();
            self.cache.table().remove(self.slot, self.hash);
        }
        // Peel exclusively owned successors iteratively. Each unwrapped
        // node runs this Drop with `next` already taken, so recursion
        // depth stays constant and the lock is never held across a
        // successor's Drop. A shared suffix ends the walk.
        let mut next = self.next.take();
        while let Some(head) = next {
            match Arc::try_unwrap(head) {
                Ok(mut node) => next = node.next.take(),
                Err(_shared) => break,
            }
        }
    }
}

/// Iterator over the values of a chain, front to back.
pub struct Values<'a, T, S = RandomState> {
    cur: Option<&'a HashNode<T, S>>,
}

impl<'a, T, S> Iterator for Values<'a, T, S> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let node = self.cur?;
        self.cur = node.next().map(|head| head.as_ref());
        Some(node.value())
    }
}

impl<'a, T, S> IntoIterator for &'a HashNode<T, S> {
    type Item = &'a T;
    type IntoIter = Values<'a, T, S>;

    fn into_iter(self) -> Values<'a, T, S> {
        self.values()
    }
}

/// Canonicalizing node store. The sole way to construct `HashNode`s.
///
/// Cheap to clone; clones share one table. Separate caches are isolated:
/// a successor minted by another cache is rejected with [`ForeignNode`].
pub struct NodeCache<T, S = RandomState> {
    shared: Arc<Shared<T, S>>,
}

impl<T, S> Clone for NodeCache<T, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> NodeCache<T>
where
    T: Hash + PartialEq,
{
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }
}

impl<T> Default for NodeCache<T>
where
    T: Hash + PartialEq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> NodeCache<T, S>
where
    T: Hash + PartialEq,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            shared: Arc::new(Shared {
                hasher,
                table: Mutex::new(CanonTable::new()),
                reentrancy: DebugReentrancy::new(),
            }),
        }
    }

    /// Number of live canonical nodes. Deterministic: a node's entry is
    /// unlinked inside its `Drop`, so no collection pass is needed.
    pub fn len(&self) -> usize {
        let _g = self.shared.reentrancy.enter();
        self.shared.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make a node, or retrieve the suitable one that already exists.
    ///
    /// Duplicate construction is the expected, common case: a request for
    /// a `(value, next)` pair whose node is still alive returns that very
    /// node. Fails only if `next` was minted by a different cache.
    pub fn node(&self, value: T, next: Option<Head<T, S>>) -> Result<Head<T, S>, ForeignNode> {
        self.node_boxed(ValueBox::new(value), next)
    }

    /// Like [`node`](Self::node), but accepting a caller-shared box.
    ///
    /// Presenting one box twice canonicalizes by object identity, which
    /// is the only way a self-unequal value (`x == x` false) can reuse
    /// its node.
    pub fn node_boxed(
        &self,
        boxed: ValueBox<T>,
        next: Option<Head<T, S>>,
    ) -> Result<Head<T, S>, ForeignNode> {
        if let Some(n) = next.as_ref() {
            if !Arc::ptr_eq(&n.cache, &self.shared) {
                return Err(ForeignNode);
            }
        }
        Ok(self.intern(boxed, next))
    }

    /// Make a singly linked list of the given values. Returns the head,
    /// or `None` if `values` is empty.
    ///
    /// The chain is built tail-first so every cell canonicalizes against
    /// an already-canonical successor.
    pub fn from_iter<I>(&self, values: I) -> Option<Head<T, S>>
    where
        I: IntoIterator<Item = T>,
    {
        let values: Vec<T> = values.into_iter().collect();
        let mut acc = None;
        for value in values.into_iter().rev() {
            acc = Some(self.intern(ValueBox::new(value), acc));
        }
        acc
    }

    fn intern(&self, boxed: ValueBox<T>, next: Option<Head<T, S>>) -> Head<T, S> {
        // Element Hash runs here, before the lock is taken.
        let hash = self.key_hash(&boxed, next.as_ref());

        // Declared before the guard so parked candidates drop only after
        // the lock is released: one of them may hold the last strong
        // reference by then, and its Drop re-takes the lock.
        let mut parked = Vec::new();
        let node = {
            let _g = self.shared.reentrancy.enter();
            let mut table = self.shared.table();
            let hit = table.find(hash, &boxed, next.as_ref(), &mut parked);
            match hit {
                // The freshly made box was never installed; it is
                // discarded once the lock is gone.
                Some(existing) => existing,
                None => Arc::new_cyclic(|weak| HashNode {
                    slot: table.insert(hash, weak.clone()),
                    boxed,
                    next,
                    hash,
                    cache: Arc::clone(&self.shared),
                }),
            }
        };
        drop(parked);
        node
    }

    /// Key hash over the box's value and the successor's identity. The
    /// suffix is already canonical, so its address stands in for its
    /// structure.
    fn key_hash(&self, boxed: &ValueBox<T>, next: Option<&Head<T, S>>) -> u64 {
        let mut state = self.shared.hasher.build_hasher();
        boxed.hash(&mut state);
        let next_addr = match next {
            Some(n) => Arc::as_ptr(n) as usize,
            None => 0,
        };
        next_addr.hash(&mut state);
        state.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Invariant: a single-value node exposes its value and no successor.
    #[test]
    fn leaf_node_accessors() {
        let cache: NodeCache<&'static str> = NodeCache::new();
        let n = cache.node("a", None).unwrap();
        assert_eq!(*n.value(), "a");
        assert!(n.next().is_none());
        assert_eq!(cache.len(), 1);
    }

    /// Invariant: `next` links to the given node, and the link is the
    /// identical Arc.
    #[test]
    fn linked_node_accessors() {
        let cache: NodeCache<&'static str> = NodeCache::new();
        let tail = cache.node("b", None).unwrap();
        let head = cache.node("a", Some(tail.clone())).unwrap();
        assert_eq!(*head.value(), "a");
        assert!(Arc::ptr_eq(head.next().unwrap(), &tail));
    }

    /// Invariant: a successor minted by a different cache is rejected and
    /// nothing is inserted.
    #[test]
    fn foreign_successor_rejected() {
        let a: NodeCache<u32> = NodeCache::new();
        let b: NodeCache<u32> = NodeCache::new();
        let foreign = b.node(1, None).unwrap();
        assert_eq!(a.node(2, Some(foreign.clone())), Err(ForeignNode));
        assert_eq!(a.len(), 0);
        assert_eq!(b.len(), 1);
    }

    /// Invariant: node equality is reference equality; distinct nodes
    /// compare unequal even with equal values.
    #[test]
    fn node_equality_is_identity() {
        let cache: NodeCache<u32> = NodeCache::new();
        let tail = cache.node(2, None).unwrap();
        let a = cache.node(1, Some(tail.clone())).unwrap();
        let b = cache.node(1, Some(tail.clone())).unwrap();
        let c = cache.node(1, None).unwrap();
        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
        assert_ne!(*a, *tail);
    }

    /// Invariant: Debug shows the whole list front to back.
    #[test]
    fn debug_shows_chain() {
        let cache: NodeCache<u32> = NodeCache::new();
        let head = cache.from_iter([1, 2, 3]).unwrap();
        assert_eq!(format!("{:?}", head), "HashNode[1, 2, 3]");
    }

    /// Invariant (debug-only): re-entering the cache from an element's
    /// PartialEq during probing panics via the reentrancy guard rather
    /// than deadlocking the table mutex.
    #[cfg(debug_assertions)]
    #[test]
    fn reentrancy_panics_from_eq_during_probe() {
        use core::hash::Hasher;

        #[derive(Clone, Default)]
        struct ConstBuildHasher;
        struct ConstHasher;
        impl BuildHasher for ConstBuildHasher {
            type Hasher = ConstHasher;
            fn build_hasher(&self) -> Self::Hasher {
                ConstHasher
            }
        }
        impl Hasher for ConstHasher {
            fn write(&mut self, _bytes: &[u8]) {}
            fn finish(&self) -> u64 {
                0 // force every key into the same bucket
            }
        }

        struct ReentryValue {
            id: u32,
            cache: *const NodeCache<ReentryValue, ConstBuildHasher>,
            trigger: bool,
        }
        impl PartialEq for ReentryValue {
            fn eq(&self, other: &Self) -> bool {
                if other.trigger || self.trigger {
                    // Attempt to re-enter the same cache during probing.
                    let cache = if other.trigger { other.cache } else { self.cache };
                    unsafe {
                        let _ = (*cache).node(
                            ReentryValue {
                                id: 99,
                                cache: core::ptr::null(),
                                trigger: false,
                            },
                            None,
                        );
                    }
                }
                self.id == other.id
            }
        }
        impl Hash for ReentryValue {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.id.hash(state);
            }
        }

        let cache: NodeCache<ReentryValue, ConstBuildHasher> =
            NodeCache::with_hasher(ConstBuildHasher);
        let _held = cache
            .node(
                ReentryValue {
                    id: 1,
                    cache: core::ptr::null(),
                    trigger: false,
                },
                None,
            )
            .unwrap();

        // Probing for a different id collides with the held entry and runs
        // the triggering eq under the lock.
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = cache.node(
                ReentryValue {
                    id: 2,
                    cache: &cache as *const _,
                    trigger: true,
                },
                None,
            );
        }));
        assert!(res.is_err(), "expected reentrancy to panic in debug builds");
    }
}
