//! Great-circle distance utilities for geospatial proximity queries.
//!
//! Distances use the haversine formula on a spherical earth whose radius
//! matches the one used by common key-value stores for their geo commands.
//! Those stores quantise coordinates into a geohash first, so results agree
//! with their `GEODIST` output to within a meter rather than exactly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Earth radius in meters used for all distance computations.
pub const EARTH_RADIUS_METERS: f64 = 6_372_797.560_856;

/// A point on the earth's surface in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Latitude in degrees, `-90..=90`.
    pub latitude: f64,
    /// Longitude in degrees, `-180..=180`.
    pub longitude: f64,
}

impl Point {
    /// Creates a point from latitude and longitude (in that order).
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both coordinates are finite and within range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance to `other` in meters.
    #[must_use]
    pub fn distance_meters(&self, other: &Point) -> f64 {
        haversine_meters(*self, *other)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.latitude, self.longitude)
    }
}

/// Computes the haversine distance between two points in meters.
#[must_use]
pub fn haversine_meters(a: Point, b: Point) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let u = ((b.latitude - a.latitude).to_radians() / 2.0).sin();
    let v = ((b.longitude - a.longitude).to_radians() / 2.0).sin();
    let h = u * u + lat1.cos() * lat2.cos() * v * v;
    // Rounding can push `h` a hair above 1 for antipodal points.
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

/// Unit for radii and reported distances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnit {
    Meters,
    Kilometers,
    Miles,
    Feet,
}

impl DistanceUnit {
    /// Number of meters in one unit.
    #[must_use]
    pub const fn meters_per_unit(self) -> f64 {
        match self {
            Self::Meters => 1.0,
            Self::Kilometers => 1000.0,
            Self::Miles => 1609.344,
            Self::Feet => 0.3048,
        }
    }

    /// Converts a distance expressed in this unit to meters.
    #[must_use]
    pub fn to_meters(self, value: f64) -> f64 {
        value * self.meters_per_unit()
    }

    /// Converts a distance in meters to this unit.
    #[must_use]
    pub fn from_meters(self, meters: f64) -> f64 {
        meters / self.meters_per_unit()
    }

    /// Short symbol: `m`, `km`, `mi` or `ft`.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Meters => "m",
            Self::Kilometers => "km",
            Self::Miles => "mi",
            Self::Feet => "ft",
        }
    }
}

impl fmt::Display for DistanceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for DistanceUnit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "m" | "meters" => Ok(Self::Meters),
            "km" | "kilometers" => Ok(Self::Kilometers),
            "mi" | "miles" => Ok(Self::Miles),
            "ft" | "feet" => Ok(Self::Feet),
            other => anyhow::bail!("unknown distance unit: {other}"),
        }
    }
}
