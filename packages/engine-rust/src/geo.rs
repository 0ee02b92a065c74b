//! Geospatial index: named point sets with radius queries.
//!
//! Distances use the haversine formula over a spherical earth (see
//! [`tidepool_core::geo`]). Queries scan the whole set; sets are expected to
//! hold thousands of members, not millions.

use std::cmp::Ordering;
use std::collections::HashMap;

use dashmap::DashMap;
use ordered_float::OrderedFloat;
use tidepool_core::{DistanceUnit, Point};
use tracing::debug;

/// Errors returned by [`GeoIndex`] operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeoError {
    #[error("invalid coordinate {point}: latitude must be within [-90, 90] and longitude within [-180, 180]")]
    InvalidCoordinate { point: Point },
    #[error("invalid radius {radius}: must be finite and non-negative")]
    InvalidRadius { radius: f64 },
    #[error("member `{member}` not found in geo set `{set}`")]
    MemberNotFound { set: String, member: String },
}

/// One member returned by a radius query.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoMatch {
    pub member: String,
    /// Distance from the query center, in the query's unit.
    pub distance: f64,
    pub point: Point,
}

/// Result ordering for radius queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Nearest first.
    #[default]
    Ascending,
    /// Farthest first.
    Descending,
}

/// Optional knobs for [`GeoIndex::radius_query_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RadiusOptions {
    /// Keep at most this many matches after sorting.
    pub count: Option<usize>,
    pub order: SortOrder,
}

/// Concurrent collection of named geo sets.
///
/// Each set lives in its own `DashMap` entry, so writes to different sets
/// proceed in parallel and a query sees a consistent view of one set.
#[derive(Default)]
pub struct GeoIndex {
    sets: DashMap<String, HashMap<String, Point>>,
}

impl GeoIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `member` at `point`, overwriting any previous position.
    ///
    /// Returns `true` if the member was not in the set before.
    ///
    /// # Errors
    ///
    /// Returns [`GeoError::InvalidCoordinate`] if `point` is out of range.
    pub fn add_point(&self, set: &str, member: &str, point: Point) -> Result<bool, GeoError> {
        check_point(point)?;
        let added = self
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string(), point)
            .is_none();
        debug!(set, member, %point, added, "geo point stored");
        Ok(added)
    }

    /// Members of `set` within `radius` of `center`, nearest first.
    ///
    /// Distances are reported in `unit`. Ties are broken by member name.
    /// An unknown set yields an empty list.
    ///
    /// # Errors
    ///
    /// - [`GeoError::InvalidCoordinate`] if `center` is out of range.
    /// - [`GeoError::InvalidRadius`] if `radius` is negative or not finite.
    pub fn radius_query(
        &self,
        set: &str,
        center: Point,
        radius: f64,
        unit: DistanceUnit,
    ) -> Result<Vec<GeoMatch>, GeoError> {
        self.radius_query_with(set, center, radius, unit, RadiusOptions::default())
    }

    /// [`radius_query`](Self::radius_query) with a result limit and order.
    ///
    /// # Errors
    ///
    /// Same as [`radius_query`](Self::radius_query).
    pub fn radius_query_with(
        &self,
        set: &str,
        center: Point,
        radius: f64,
        unit: DistanceUnit,
        options: RadiusOptions,
    ) -> Result<Vec<GeoMatch>, GeoError> {
        check_point(center)?;
        if !radius.is_finite() || radius < 0.0 {
            return Err(GeoError::InvalidRadius { radius });
        }
        let radius_m = unit.to_meters(radius);

        let Some(members) = self.sets.get(set) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<(f64, &str, Point)> = Vec::new();
        for (member, point) in members.iter() {
            let meters = center.distance_meters(point);
            if meters <= radius_m {
                hits.push((meters, member.as_str(), *point));
            }
        }

        hits.sort_by(|a, b| by_distance_then_name(a.0, a.1, b.0, b.1, options.order));
        if let Some(count) = options.count {
            hits.truncate(count);
        }

        Ok(hits
            .into_iter()
            .map(|(meters, member, point)| GeoMatch {
                member: member.to_string(),
                distance: unit.from_meters(meters),
                point,
            })
            .collect())
    }

    /// Radius query centered on an existing member's position.
    ///
    /// The member itself is included at distance zero.
    ///
    /// # Errors
    ///
    /// - [`GeoError::MemberNotFound`] if `member` is not in `set`.
    /// - [`GeoError::InvalidRadius`] as for [`radius_query`](Self::radius_query).
    pub fn radius_query_by_member(
        &self,
        set: &str,
        member: &str,
        radius: f64,
        unit: DistanceUnit,
    ) -> Result<Vec<GeoMatch>, GeoError> {
        let center = self
            .position(set, member)
            .ok_or_else(|| not_found(set, member))?;
        self.radius_query(set, center, radius, unit)
    }

    /// Stored position of `member`, if any.
    pub fn position(&self, set: &str, member: &str) -> Option<Point> {
        self.sets.get(set)?.get(member).copied()
    }

    /// Distance between two members of `set` in `unit`.
    ///
    /// # Errors
    ///
    /// Returns [`GeoError::MemberNotFound`] naming the first missing member.
    pub fn distance(&self, set: &str, a: &str, b: &str, unit: DistanceUnit) -> Result<f64, GeoError> {
        let members = self.sets.get(set).ok_or_else(|| not_found(set, a))?;
        let pa = members.get(a).ok_or_else(|| not_found(set, a))?;
        let pb = members.get(b).ok_or_else(|| not_found(set, b))?;
        Ok(unit.from_meters(pa.distance_meters(pb)))
    }

    /// Removes `member` from `set`. Returns `true` if it was present.
    ///
    /// A set left empty is dropped.
    pub fn remove_member(&self, set: &str, member: &str) -> bool {
        let removed = match self.sets.get_mut(set) {
            Some(mut members) => members.remove(member).is_some(),
            None => return false,
        };
        self.sets.remove_if(set, |_, members| members.is_empty());
        removed
    }

    /// Number of members in `set` (0 for an unknown set).
    pub fn set_len(&self, set: &str) -> usize {
        self.sets.get(set).map_or(0, |members| members.len())
    }

    /// Drops `set` entirely. Returns `true` if it existed.
    pub fn remove_set(&self, set: &str) -> bool {
        self.sets.remove(set).is_some()
    }
}

fn check_point(point: Point) -> Result<(), GeoError> {
    if point.is_valid() {
        Ok(())
    } else {
        Err(GeoError::InvalidCoordinate { point })
    }
}

fn not_found(set: &str, member: &str) -> GeoError {
    GeoError::MemberNotFound {
        set: set.to_string(),
        member: member.to_string(),
    }
}

/// Orders by distance in `order`; equal distances always sort by ascending
/// member name.
fn by_distance_then_name(da: f64, na: &str, db: f64, nb: &str, order: SortOrder) -> Ordering {
    let by_distance = OrderedFloat(da).cmp(&OrderedFloat(db));
    let by_distance = match order {
        SortOrder::Ascending => by_distance,
        SortOrder::Descending => by_distance.reverse(),
    };
    by_distance.then_with(|| na.cmp(nb))
}
