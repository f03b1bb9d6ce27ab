//! A cycle-collecting reference-counted memory manager.
//!
//! `ouro-gc` provides a [`Handle<T>`] smart reference to heap records owned
//! by a [`Context`]. Handles maintain strong counts automatically, so acyclic
//! records are freed the instant their last handle drops, like `Rc<T>`.
//! Unlike `Rc<T>`, records that keep each other alive in reference cycles are
//! reclaimed by an explicit trial-deletion pass over the context's registry.
//!
//! The collector does not trace arbitrary values. Each record type carries a
//! compact schema (the byte offsets of its managed-handle slots) declared
//! once through the [`Managed`] trait and sealed at first allocation.
//! `#[derive(Managed)]` generates the declaration from fields marked
//! `#[gc(slot)]`.
//!
//! # Quick start
//!
//! ```
//! use ouro_gc::{collect, make, Handle, Managed};
//!
//! #[derive(Managed)]
//! struct Node {
//!     value: i32,
//!     #[gc(slot)]
//!     next: Handle<Node>,
//! }
//!
//! let a = make(Node { value: 1, next: Handle::null() });
//! let b = make(Node { value: 2, next: Handle::null() });
//! assert_eq!(a.borrow().value, 1);
//!
//! // Form a cycle: a -> b -> a.
//! a.borrow_mut().next = b.clone();
//! b.borrow_mut().next = a.clone();
//!
//! drop(a);
//! drop(b);
//! collect(); // the cycle is reclaimed
//! ```
//!
//! # Contexts
//!
//! [`make`] and [`collect`] use a per-thread default context. Embedders that
//! want explicit ownership create their own [`Context`]; dropping it runs a
//! final collection. A context and everything it allocated belong to one
//! thread, since handles are not `Send`, but separate contexts on separate
//! threads are fully independent.
//!
//! # Schemas
//!
//! The schema contract is what the collector's safety rests on: every
//! managed-handle slot in a record type listed exactly once, and nothing
//! else. The derive upholds it mechanically; manual [`Managed`]
//! implementations are `unsafe` for this reason. Handles tucked away where
//! the schema cannot see them (in a `Vec`, a `Box`, an enum) still keep
//! their referents alive, but cycles through them are never collected.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod context;
mod heap;
mod list;
mod metrics;
mod ptr;
mod schema;
mod tracing;

pub use context::{collect, last_collect_metrics, make, Context};
pub use heap::AllocError;
pub use metrics::CollectMetrics;
pub use ptr::{BorrowError, BorrowMutError, Handle, Ref, RefMut};
pub use schema::{Managed, SchemaBuilder, Slots};

// Re-export the derive macro when the feature is enabled.
#[cfg(feature = "derive")]
pub use ouro_gc_derive::Managed;
