//! ValueBox: shared-ownership wrapper giving element values an identity.

use core::fmt;
use core::hash::{Hash, Hasher};
use std::sync::Arc;

/// Wrapper for the element value held by a node.
///
/// Nodes hold their box strongly; the canonicalization table only ever
/// reaches a box through a weak reference to its node, so the table never
/// keeps an element alive on its own.
///
/// Equality checks identity before value: two boxes are equal when they
/// share one value object, or when the values compare equal. The identity
/// short-circuit is what keeps self-unequal values (NaN-like types, where
/// `x == x` is false) from minting duplicate nodes when the same box is
/// presented twice.
pub struct ValueBox<T>(Arc<T>);

impl<T> ValueBox<T> {
    /// Wrap one element value.
    pub fn new(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// The element value held by this wrapper.
    pub fn value(&self) -> &T {
        &self.0
    }

    /// Whether two boxes wrap the literal same value object.
    pub fn same(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.0, &other.0)
    }
}

impl<T> Clone for ValueBox<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: PartialEq> PartialEq for ValueBox<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

/// A box hashes the same as its boxed value, consistent with the equality
/// rule: two boxes sharing one object trivially hash alike.
impl<T: Hash> Hash for ValueBox<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl<T: fmt::Debug> fmt::Debug for ValueBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ValueBox").field(&self.0).finish()
    }
}
