//! Reference management for a tracing, generational, sandboxed garbage
//! collector.
//!
//! `tether-gc` provides the satellite structures a collector and its
//! mutators must agree on, without owning the managed heap itself:
//!
//! - **Handle registries**: stable, opaque roots over a slab-allocated node
//!   arena, with weak handles and a two-pass callback protocol
//!   ([`HandleRegistry`]).
//! - **Cross-thread persistents**: the same lifecycle, safe for concurrent
//!   create/destroy/assign under a single region lock
//!   ([`CrossThreadHandle`]).
//! - **Entity table**: sandbox-safe indirection mapping small integer
//!   handles to tagged, markable out-of-sandbox addresses
//!   ([`EntityTable`]).
//! - **Write barrier**: the per-store decision between doing nothing,
//!   feeding the concurrent marker, and recording an old→young pointer
//!   ([`WriteBarrier`]), triggered through the typed slot accessors
//!   ([`TaggedField`]).
//!
//! # Quick Start
//!
//! ```
//! use tether_gc::{HandleRegistry, Page, RegionId};
//!
//! let page = Page::new(RegionId(0));
//! let mut registry = HandleRegistry::new();
//!
//! let handle = registry.create(page.object_at(64)).unwrap();
//! assert_eq!(registry.handles_count(), 1);
//!
//! registry.destroy(handle);
//! assert_eq!(registry.handles_count(), 0);
//! ```
//!
//! # Threading
//!
//! Structures assume one of three disciplines: single-threaded main/GC
//! access (registries), the shared [`PersistentRegionLock`] (cross-thread
//! persistents), or explicitly atomic single-word primitives (entity-table
//! `get`/`mark`, the barrier's enabled check). Sweeping requires a
//! [`GlobalSafepointScope`](safepoint::GlobalSafepointScope).

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod field;
mod trace;
mod tracing;

pub mod barrier;
pub mod handles;
pub mod heap;
pub mod safepoint;
pub mod table;

// Re-export the primary API surface.
pub use barrier::{
    BarrierKind, BarrierParams, CollectorState, RememberedEntry, RememberedSet, SlotPrecision,
    WriteBarrier,
};
pub use error::GcError;
pub use field::TaggedField;
pub use handles::cross_thread::{
    CrossThreadHandle, CrossThreadPersistentRegion, PersistentRegionGuard, PersistentRegionLock,
};
pub use handles::{Handle, HandleRegistry, WeakCallback, WeakCallbackInfo, WeaknessType};
pub use heap::{ObjectRef, Page, RegionId};
pub use table::{Address, EntityHandle, EntitySpace, EntityTable, EntityTag, NULL_ENTITY_HANDLE};
pub use trace::RootVisitor;
