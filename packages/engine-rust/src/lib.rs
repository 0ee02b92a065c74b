//! Tidepool engine: an in-process data engine with typed object stores,
//! secondary indexes, geospatial radius queries, glob pub/sub and a
//! single-flight read-through cache.

pub mod cache;
pub mod config;
pub mod engine;
pub mod geo;
pub mod pubsub;
pub mod storage;
pub mod worker;

pub use config::EngineConfig;
pub use engine::Engine;
pub use tidepool_core::{DistanceUnit, Entity, IndexValue, IndexedField, Point, RecordId};
