use geo_types::{coord, Point, Rect};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::routing::RouteStep;

pub const EARTH_RADIUS_METERS: f64 = 6371000.0;
pub const METERS_PER_MILE: f64 = 1609.34;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPosition {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        GeoPosition {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance in meters.
    pub fn haversine_distance(&self, other: &GeoPosition) -> f64 {
        let phi1 = self.latitude.to_radians();
        let phi2 = other.latitude.to_radians();
        let delta_phi = (other.latitude - self.latitude).to_radians();
        let delta_lambda = (other.longitude - self.longitude).to_radians();

        let half_phi = (delta_phi / 2.0).sin();
        let half_lambda = (delta_lambda / 2.0).sin();
        // rounding can push `a` just past 1 for antipodal points
        let a = (half_phi * half_phi + phi1.cos() * phi2.cos() * half_lambda * half_lambda)
            .clamp(0.0, 1.0);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_METERS * c
    }

    /// Initial bearing towards `other`, in degrees clockwise from north (0..360).
    pub fn initial_bearing(&self, other: &GeoPosition) -> f64 {
        let phi1 = self.latitude.to_radians();
        let phi2 = other.latitude.to_radians();
        let delta_lambda = (other.longitude - self.longitude).to_radians();

        let y = delta_lambda.sin() * phi2.cos();
        let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lambda.cos();
        (y.atan2(x).to_degrees() + 360.0) % 360.0
    }

    pub fn to_query(&self) -> String {
        format!("{},{}", self.latitude, self.longitude)
    }
}

impl fmt::Display for GeoPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

impl From<GeoPosition> for Point<f64> {
    fn from(position: GeoPosition) -> Self {
        Point::new(position.longitude, position.latitude)
    }
}

impl From<Point<f64>> for GeoPosition {
    fn from(point: Point<f64>) -> Self {
        GeoPosition {
            latitude: point.y(),
            longitude: point.x(),
        }
    }
}

pub fn meters_to_miles(meters: f64) -> f64 {
    meters / METERS_PER_MILE
}

// Bounding box over every step endpoint, used by the host to fit the map
// camera to the route. Coordinates are (x = longitude, y = latitude).
pub fn route_bounds(steps: &[RouteStep]) -> Option<Rect<f64>> {
    let mut positions = steps
        .iter()
        .flat_map(|step| [step.start_position, step.end_position]);
    let first = positions.next()?;
    let (mut lat_min, mut lat_max) = (first.latitude, first.latitude);
    let (mut lng_min, mut lng_max) = (first.longitude, first.longitude);
    for position in positions {
        lat_min = lat_min.min(position.latitude);
        lat_max = lat_max.max(position.latitude);
        lng_min = lng_min.min(position.longitude);
        lng_max = lng_max.max(position.longitude);
    }
    Some(Rect::new(
        coord! { x: lng_min, y: lat_min },
        coord! { x: lng_max, y: lat_max },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearing_cardinal_directions() {
        let origin = GeoPosition::new(0.0, 0.0);
        let north = origin.initial_bearing(&GeoPosition::new(1.0, 0.0));
        let east = origin.initial_bearing(&GeoPosition::new(0.0, 1.0));
        let south = origin.initial_bearing(&GeoPosition::new(-1.0, 0.0));
        let west = origin.initial_bearing(&GeoPosition::new(0.0, -1.0));
        assert!(north.abs() < 1e-9);
        assert!((east - 90.0).abs() < 1e-9);
        assert!((south - 180.0).abs() < 1e-9);
        assert!((west - 270.0).abs() < 1e-9);
    }

    #[test]
    fn point_conversion_swaps_axes() {
        let position = GeoPosition::new(37.7749, -122.4194);
        let point: Point<f64> = position.into();
        assert_eq!(point.x(), -122.4194);
        assert_eq!(point.y(), 37.7749);
        assert_eq!(GeoPosition::from(point), position);
    }

    #[test]
    fn bounds_cover_all_steps() {
        assert!(route_bounds(&[]).is_none());

        let steps = vec![
            RouteStep {
                instruction_text: "Head north".to_string(),
                start_position: GeoPosition::new(37.7749, -122.4194),
                end_position: GeoPosition::new(37.7800, -122.4194),
            },
            RouteStep {
                instruction_text: "Turn right".to_string(),
                start_position: GeoPosition::new(37.7800, -122.4194),
                end_position: GeoPosition::new(37.7849, -122.4094),
            },
        ];
        let bounds = route_bounds(&steps).unwrap();
        assert_eq!(bounds.min().x, -122.4194);
        assert_eq!(bounds.min().y, 37.7749);
        assert_eq!(bounds.max().x, -122.4094);
        assert_eq!(bounds.max().y, 37.7849);
    }
}
