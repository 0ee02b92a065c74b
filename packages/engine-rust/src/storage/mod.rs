//! Typed object storage with secondary indexing.
//!
//! Two layers:
//!
//! - **Layer 1** ([`RecordTable`]): concurrent in-memory map from
//!   [`RecordId`](tidepool_core::RecordId) to record, with cursor paging
//! - **Layer 2** ([`ObjectStore`]): per-entity repository that keeps a
//!   [`SecondaryIndex`] and any extra [`MutationObserver`]s in step with
//!   every write
//!
//! [`CompositeMutationObserver`] fans notifications out to multiple
//! observers.

pub mod cursor;
pub mod error;
pub mod index;
pub mod mutation_observer;
pub mod object_store;
pub mod table;

pub use cursor::*;
pub use error::*;
pub use index::*;
pub use mutation_observer::*;
pub use object_store::*;
pub use table::*;
