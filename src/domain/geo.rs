//! Spherical geometry used by proximity reads.

use std::str::FromStr;

use super::error::DomainError;

/// Earth radius in kilometres, as used for radian conversions.
pub const EARTH_RADIUS_KM: f64 = 6378.1;
/// Earth radius in miles, as used for radian conversions.
pub const EARTH_RADIUS_MI: f64 = 3963.2;
/// Earth radius in metres; angular distances are reported in metres first.
pub const EARTH_RADIUS_M: f64 = EARTH_RADIUS_KM * 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceUnit {
    Miles,
    Kilometres,
}

impl DistanceUnit {
    /// Convert a distance in this unit into a central angle in radians.
    pub fn to_radians(self, distance: f64) -> f64 {
        match self {
            DistanceUnit::Miles => distance / EARTH_RADIUS_MI,
            DistanceUnit::Kilometres => distance / EARTH_RADIUS_KM,
        }
    }

    /// Factor applied to a distance in metres to express it in this unit.
    pub fn metre_multiplier(self) -> f64 {
        match self {
            DistanceUnit::Miles => 0.000621371,
            DistanceUnit::Kilometres => 0.001,
        }
    }
}

impl FromStr for DistanceUnit {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "mi" => Ok(DistanceUnit::Miles),
            "km" => Ok(DistanceUnit::Kilometres),
            other => Err(DomainError::validation(
                "unit",
                format!("`{other}` is not supported, use `mi` or `km`"),
            )),
        }
    }
}

/// A `lat,lng` pair as accepted by proximity reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    /// GeoJSON coordinate order.
    pub fn to_lng_lat(self) -> [f64; 2] {
        [self.lng, self.lat]
    }
}

impl FromStr for LatLng {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            DomainError::validation("latlng", "please provide latitude and longitude as `lat,lng`")
        };
        let (lat, lng) = value.split_once(',').ok_or_else(invalid)?;
        let lat: f64 = lat.trim().parse().map_err(|_| invalid())?;
        let lng: f64 = lng.trim().parse().map_err(|_| invalid())?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(invalid());
        }
        Ok(Self { lat, lng })
    }
}

/// Central angle in radians between two `[lng, lat]` points (haversine).
pub fn angular_distance(from: [f64; 2], to: [f64; 2]) -> f64 {
    let (lng1, lat1) = (from[0].to_radians(), from[1].to_radians());
    let (lng2, lat2) = (to[0].to_radians(), to[1].to_radians());
    let d_lat = lat2 - lat1;
    let d_lng = lng2 - lng1;
    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}
