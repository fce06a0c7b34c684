//! Great-circle distance math for the "tours near a point" endpoints.

use crate::error::{ApiError, ApiResult};

const EARTH_RADIUS_MI: f64 = 3963.2;
const EARTH_RADIUS_KM: f64 = 6378.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Miles,
    Kilometers,
}

impl Unit {
    pub fn parse(s: &str) -> ApiResult<Self> {
        match s {
            "mi" => Ok(Self::Miles),
            "km" => Ok(Self::Kilometers),
            _ => Err(ApiError::validation("Unit must be either mi or km")),
        }
    }

    pub fn earth_radius(self) -> f64 {
        match self {
            Self::Miles => EARTH_RADIUS_MI,
            Self::Kilometers => EARTH_RADIUS_KM,
        }
    }
}

/// Parse a `lat,lng` path segment.
pub fn parse_latlng(s: &str) -> ApiResult<(f64, f64)> {
    let mut parts = s.split(',');
    let lat = parts.next().and_then(|p| p.trim().parse::<f64>().ok());
    let lng = parts.next().and_then(|p| p.trim().parse::<f64>().ok());
    match (lat, lng, parts.next()) {
        (Some(lat), Some(lng), None)
            if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng) =>
        {
            Ok((lat, lng))
        }
        _ => Err(ApiError::validation(
            "Please provide latitude and longitude in the format lat,lng.",
        )),
    }
}

/// Haversine distance between two points, in the given unit.
pub fn distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64, unit: Unit) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    unit.earth_radius() * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_parsing() {
        assert_eq!(Unit::parse("mi").unwrap(), Unit::Miles);
        assert_eq!(Unit::parse("km").unwrap(), Unit::Kilometers);
        assert!(Unit::parse("furlong").is_err());
    }

    #[test]
    fn latlng_parsing() {
        assert_eq!(parse_latlng("34.1,-118.1").unwrap(), (34.1, -118.1));
        assert!(parse_latlng("34.1").is_err());
        assert!(parse_latlng("abc,def").is_err());
        assert!(parse_latlng("95.0,10.0").is_err());
        assert!(parse_latlng("10.0,999.0").is_err());
        assert!(parse_latlng("10.0,-181.0").is_err());
        assert!(parse_latlng("-90.0,180.0").is_ok());
        assert!(parse_latlng("1.0,2.0,3.0").is_err());
    }

    #[test]
    fn london_to_paris_is_about_343_km() {
        let d = distance(51.5074, -0.1278, 48.8566, 2.3522, Unit::Kilometers);
        assert!((d - 343.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn zero_distance_to_self() {
        let d = distance(40.0, -70.0, 40.0, -70.0, Unit::Miles);
        assert!(d.abs() < 1e-9);
    }

    #[test]
    fn miles_shorter_than_kilometers() {
        let mi = distance(51.5, 0.0, 48.8, 2.3, Unit::Miles);
        let km = distance(51.5, 0.0, 48.8, 2.3, Unit::Kilometers);
        assert!(mi < km);
    }
}
