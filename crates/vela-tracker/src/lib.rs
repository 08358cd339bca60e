//! Vela Tracker
//!
//! Resource trackers are the per-revision ledgers of everything a workflow
//! applied. [`ResourceKeeper`] appends to them; [`GarbageCollector`] reads
//! them back to delete what no kept revision still references.
//!
//! Liveness is decided by reference counting on resource identity, so a
//! resource created by an old revision and re-applied by a newer one stays
//! alive for as long as any kept revision tracks it.

mod error;
mod gc;
mod keeper;

pub use error::GcError;
pub use gc::{GarbageCollector, SweepReport};
pub use keeper::ResourceKeeper;
