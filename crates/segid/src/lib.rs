//! Segment-based unique id allocation.
//!
//! For every tag configured in an [`AllocStore`], [`SegmentAllocator`] hands
//! out a strictly increasing, gap-tolerant sequence of `i64` ids. Ranges are
//! reserved from the store in batches ("segments") and served from memory;
//! each tag keeps two segments so the next range is reserved in the
//! background before the current one runs out.
//!
//! Enable the `tracing` feature to get structured logs of initialization,
//! refills, step adaptation and reconciliation.

mod allocator;
mod buffer;
mod cache;
mod config;
mod error;
mod loader;
mod pool;
mod segment;
mod status;
mod store;
mod time;


pub use crate::allocator::*;
pub use crate::buffer::BufferSnapshot;
pub use crate::cache::ReconcileReport;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::segment::SegmentSnapshot;
pub use crate::status::*;
pub use crate::store::*;
pub use crate::time::*;
