//! Geographic points and great-circle distance.
//!
//! [`distance_km`] is the only place distances are computed. Proximity
//! ranking, radius filtering, and the distances persisted on matched
//! contacts all go through it, so units and rounding stay consistent.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{Error, Result};
use crate::models::ContactEntry;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Extra margin added to bounding boxes so that rounding in
/// [`distance_km`] can never place an entry inside the radius while the
/// box excludes it.
const BOUNDS_MARGIN_KM: f64 = 0.01;

/// A WGS84 point, `(longitude, latitude)` in degrees.
///
/// Serialized as a GeoJSON point: `{"type":"Point","coordinates":[lon,lat]}`.
/// Deserialization validates ranges, so a `GeoPoint` value is always valid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GeoJsonPoint", into = "GeoJsonPoint")]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    /// Build a validated point.
    pub fn new(longitude: f64, latitude: f64) -> Result<Self> {
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::validation(
                "location.coordinates",
                format!("longitude {} must be within -180..180", longitude),
            ));
        }
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(Error::validation(
                "location.coordinates",
                format!("latitude {} must be within -90..90", latitude),
            ));
        }
        Ok(Self {
            longitude,
            latitude,
        })
    }
}

/// GeoJSON wire form of a point as sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GeoJsonPoint {
    #[serde(rename = "type", default = "point_type")]
    pub kind: String,
    /// `[longitude, latitude]`
    pub coordinates: Vec<f64>,
}

fn point_type() -> String {
    "Point".to_string()
}

impl TryFrom<GeoJsonPoint> for GeoPoint {
    type Error = Error;

    fn try_from(value: GeoJsonPoint) -> Result<Self> {
        if value.kind != "Point" {
            return Err(Error::validation(
                "location.type",
                format!("expected \"Point\", got \"{}\"", value.kind),
            ));
        }
        match value.coordinates.as_slice() {
            [lon, lat] => GeoPoint::new(*lon, *lat),
            other => Err(Error::validation(
                "location.coordinates",
                format!(
                    "expected exactly two numbers [longitude, latitude], got {}",
                    other.len()
                ),
            )),
        }
    }
}

impl From<GeoPoint> for GeoJsonPoint {
    fn from(p: GeoPoint) -> Self {
        Self {
            kind: point_type(),
            coordinates: vec![p.longitude, p.latitude],
        }
    }
}

/// Raw haversine distance in kilometers.
fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Great-circle distance in kilometers, rounded to two decimals (10 m).
pub fn distance_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    (haversine_km(a, b) * 100.0).round() / 100.0
}

/// Distance from a directory entry to a point, in kilometers.
pub fn distance_to(entry: &ContactEntry, point: &GeoPoint) -> f64 {
    distance_km(&entry.location, point)
}

/// Latitude/longitude rectangle enclosing a search circle.
///
/// Used only as a cheap pre-filter for candidate fetches; the exact
/// radius check is always done with [`distance_km`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    /// Longitude intervals to accept. Two intervals when the box crosses
    /// the antimeridian, `None` when every longitude qualifies.
    pub longitude_ranges: Option<[(f64, f64); 2]>,
}

impl BoundingBox {
    /// Smallest box containing every point within `radius_km` of `center`.
    pub fn around(center: &GeoPoint, radius_km: f64) -> Self {
        let angular = (radius_km.max(0.0) + BOUNDS_MARGIN_KM) / EARTH_RADIUS_KM;
        let lat = center.latitude.to_radians();
        let min_lat = lat - angular;
        let max_lat = lat + angular;

        let half_pi = std::f64::consts::FRAC_PI_2;
        if min_lat <= -half_pi || max_lat >= half_pi {
            // Circle covers a pole: every longitude is reachable.
            return Self {
                min_latitude: min_lat.to_degrees().max(-90.0),
                max_latitude: max_lat.to_degrees().min(90.0),
                longitude_ranges: None,
            };
        }

        let delta_lon = (angular.sin() / lat.cos()).asin().to_degrees();
        let min_lon = center.longitude - delta_lon;
        let max_lon = center.longitude + delta_lon;

        let longitude_ranges = if min_lon < -180.0 {
            Some([(min_lon + 360.0, 180.0), (-180.0, max_lon)])
        } else if max_lon > 180.0 {
            Some([(min_lon, 180.0), (-180.0, max_lon - 360.0)])
        } else {
            Some([(min_lon, max_lon), (min_lon, max_lon)])
        };

        Self {
            min_latitude: min_lat.to_degrees(),
            max_latitude: max_lat.to_degrees(),
            longitude_ranges,
        }
    }

    /// Whether a point falls inside the box.
    pub fn contains(&self, p: &GeoPoint) -> bool {
        if p.latitude < self.min_latitude || p.latitude > self.max_latitude {
            return false;
        }
        match self.longitude_ranges {
            None => true,
            Some(ranges) => ranges
                .iter()
                .any(|(lo, hi)| p.longitude >= *lo && p.longitude <= *hi),
        }
    }
}
