use anyhow::Result;

use super::{RouteStep, RoutingProvider};
use crate::position::GeoPosition;

// Anything closer than this is treated as already being there.
const ARRIVAL_RADIUS_M: f64 = 1.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum CompassDirection {
    North,
    Northeast,
    East,
    Southeast,
    South,
    Southwest,
    West,
    Northwest,
}

impl CompassDirection {
    pub fn from_bearing(bearing: f64) -> Self {
        const DIRECTIONS: [CompassDirection; 8] = [
            CompassDirection::North,
            CompassDirection::Northeast,
            CompassDirection::East,
            CompassDirection::Southeast,
            CompassDirection::South,
            CompassDirection::Southwest,
            CompassDirection::West,
            CompassDirection::Northwest,
        ];
        let normalized = bearing.rem_euclid(360.0);
        DIRECTIONS[(normalized / 45.0).round() as usize % 8]
    }
}

fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{meters:.0} m")
    } else {
        format!("{:.1} km", meters / 1000.0)
    }
}

/// Offline routing: one step straight towards the destination. Used when no
/// directions service is configured.
#[derive(Default)]
pub struct StraightLineRouter {}

impl StraightLineRouter {
    pub fn new() -> Self {
        StraightLineRouter {}
    }

    pub fn route(&self, origin: GeoPosition, destination: GeoPosition) -> Vec<RouteStep> {
        let distance = origin.haversine_distance(&destination);
        let instruction_text = if distance < ARRIVAL_RADIUS_M {
            "You have arrived at your destination".to_string()
        } else {
            let direction = CompassDirection::from_bearing(origin.initial_bearing(&destination));
            format!("Head {} for {}", direction, format_distance(distance))
        };
        vec![RouteStep {
            instruction_text,
            start_position: origin,
            end_position: destination,
        }]
    }
}

impl RoutingProvider for StraightLineRouter {
    async fn compute_route(
        &self,
        origin: GeoPosition,
        destination: GeoPosition,
    ) -> Result<Vec<RouteStep>> {
        Ok(self.route(origin, destination))
    }
}
