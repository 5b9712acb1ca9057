//! Coordinate type

use serde::{Deserialize, Serialize};

/// A WGS-84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Whether both components lie in their valid ranges.
    pub fn in_range(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }

    /// `lat,lng` rendering used in navigation URLs and provider requests.
    pub fn as_param(&self) -> String {
        format!("{},{}", self.lat, self.lng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_range_accepts_bounds() {
        assert!(Coordinates::new(90.0, 180.0).in_range());
        assert!(Coordinates::new(-90.0, -180.0).in_range());
        assert!(Coordinates::new(0.0, 0.0).in_range());
    }

    #[test]
    fn test_in_range_rejects_out_of_bounds() {
        assert!(!Coordinates::new(90.5, 0.0).in_range());
        assert!(!Coordinates::new(-91.0, 0.0).in_range());
        assert!(!Coordinates::new(0.0, 180.1).in_range());
        assert!(!Coordinates::new(0.0, -200.0).in_range());
    }

    #[test]
    fn test_as_param_format() {
        let c = Coordinates::new(40.7128, -74.006);
        assert_eq!(c.as_param(), "40.7128,-74.006");
    }
}
