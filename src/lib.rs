//! hashcons-list: immutable singly linked lists with global hash consing.
//!
//! Structurally equal lists are represented by exactly one shared node
//! chain: constructing a node for a `(value, next)` pair that already has
//! a live node returns the identical `Arc`, not merely an equal one. All
//! lists built through one `NodeCache` therefore form a single
//! "upside-down" tree whose root is the empty list, with `next` pointers
//! acting as parent pointers, and reference equality of heads coincides
//! with structural equality of the lists they head.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a canonicalization table that finds live nodes by key without
//!   keeping them alive, built in layers that can be reasoned about
//!   independently.
//! - Layers:
//!   - ValueBox<T>: shared-ownership wrapper giving every element an
//!     identity; boxes are equal when they share one value object or the
//!     values compare equal, so self-unequal (NaN-like) values still
//!     canonicalize when the same object is presented twice.
//!   - CanonTable<T, S>: structural layer. A hashbrown `HashTable` index
//!     over slotmap storage, where each entry holds a precomputed `u64`
//!     key hash and a `Weak` reference to its node. Probing upgrades
//!     candidates; a dead entry never matches.
//!   - NodeCache<T, S> / HashNode<T, S>: public API. The cache owns the
//!     table behind a mutex; a node strongly owns its box and successor,
//!     records its table slot and stored hash, and unlinks exactly its
//!     own entry in `Drop`.
//!
//! Constraints
//! - Thread-safe: find + insert form one critical section, so at most one
//!   live node exists per key at every observation point.
//! - User `Hash` runs before the lock is taken; only `PartialEq` runs
//!   under the lock, while probing. Removal and relocation use the stored
//!   hash only and never call back into element code.
//! - Entries are removed only by their own node's `Drop`, keyed by
//!   generational slot. A construction racing with an in-flight removal
//!   inserts a fresh slot; the dying node cannot unlink it.
//! - Candidates upgraded during a probe may hold the last strong
//!   reference by the time they are released; they are parked and dropped
//!   only after the lock is gone, since their `Drop` re-takes it.
//! - Chain teardown is iterative: a dropping node unlinks its entry,
//!   releases the lock, then peels exclusively owned successors with
//!   `Arc::try_unwrap`. Recursion depth stays constant for lists of any
//!   length.
//!
//! Reentrancy
//! - Element `PartialEq` code runs while the table lock is held. Entering
//!   the same cache again from there (constructing a node, dropping the
//!   last handle to one, or asking for `len`) would deadlock the mutex.
//!   A debug-only, thread-local guard turns that into a panic naming the
//!   misuse; release builds compile it out.
//!
//! Notes and non-goals
//! - Nodes are immutable post-construction; there are no mutating
//!   accessors and no explicit removal. An entry disappears exactly when
//!   the last strong reference to its node does.
//! - `len()` is deterministic: removal happens inside `Drop`, so no
//!   collection pass is needed before observing it.
//! - `NodeCache` is cheaply cloneable and shares one table, but each
//!   constructed cache is isolated; a successor interned by a different
//!   cache is rejected with `ForeignNode`.

mod boxed;
mod canon_table;
mod node;
mod reentrancy;

// Public surface
pub use boxed::ValueBox;
pub use node::{ForeignNode, HashNode, Head, NodeCache, Values};
