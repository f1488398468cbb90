//! Geographic coordinates for flyover capture.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

#[derive(Debug, Error)]
#[error("Invalid coordinates: {0}")]
pub struct CoordinatesError(pub String);

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct Coordinates {
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: f64,
}

impl Coordinates {
    /// Create validated coordinates.
    pub fn new(lat: f64, lng: f64) -> Result<Self, CoordinatesError> {
        let coords = Self { lat, lng };
        coords
            .validate()
            .map_err(|e| CoordinatesError(e.to_string()))?;
        if !lat.is_finite() || !lng.is_finite() {
            return Err(CoordinatesError(format!("non-finite value ({}, {})", lat, lng)));
        }
        Ok(coords)
    }

    /// Canonical string used in cache keys.
    ///
    /// Rounded to 6 decimal places (~0.1 m) so float noise from different
    /// sources maps to the same flyover.
    pub fn canonical(&self) -> String {
        format!("{:.6},{:.6}", self.lat, self.lng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_coordinates() {
        let c = Coordinates::new(37.7749, -122.4194).unwrap();
        assert_eq!(c.canonical(), "37.774900,-122.419400");
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(Coordinates::new(91.0, 0.0).is_err());
        assert!(Coordinates::new(0.0, -181.0).is_err());
        assert!(Coordinates::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_canonical_absorbs_float_noise() {
        let a = Coordinates::new(40.7128, -74.0060).unwrap();
        let b = Coordinates::new(40.712800000001, -74.006000000002).unwrap();
        assert_eq!(a.canonical(), b.canonical());
    }
}
