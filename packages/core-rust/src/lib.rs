//! Tidepool core types: record identity, index values, geo math and topic patterns.

pub mod entity;
pub mod geo;
pub mod pattern;
pub mod types;

pub use entity::Entity;
pub use geo::{haversine_meters, DistanceUnit, Point};
pub use pattern::TopicPattern;
pub use types::{IndexValue, IndexedField, RecordId};
