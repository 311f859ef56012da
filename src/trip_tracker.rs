use chrono::{DateTime, Utc};
use geo_types::Rect;
use serde::Serialize;
use snafu::{ensure, OptionExt};

use crate::config::TrackerConfig;
use crate::error::{
    InvalidTargetSnafu, PositionUnavailableSnafu, Result, RoutingStaleSnafu,
    RoutingUnavailableSnafu,
};
use crate::position::{self, meters_to_miles, GeoPosition};
use crate::routing::RouteStep;

// Fuel use is derived from the target, so the computed efficiency lands on the
// target give or take float rounding.
const EFFICIENCY_TOLERANCE: f64 = 1e-9;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct IncentivePolicy {
    pub baseline: f64,
    pub step: f64,
}

impl From<&TrackerConfig> for IncentivePolicy {
    fn from(config: &TrackerConfig) -> Self {
        IncentivePolicy {
            baseline: config.incentive_baseline,
            step: config.incentive_step,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TripState {
    pub origin_position: GeoPosition,
    pub destination_position: GeoPosition,
    pub target_efficiency: f64,
    pub cumulative_distance_meters: f64,
    pub cumulative_fuel_gallons: f64,
    pub current_efficiency: f64,
    pub incentive_accrued: f64,
    pub route_steps: Vec<RouteStep>,
    pub active_step_index: usize,
    pub previous_position: GeoPosition,
    pub started_at: DateTime<Utc>,
    pub update_count: u64,
    /// Generation of the most recently issued route request.
    pub route_generation: u64,
}

impl TripState {
    pub fn cumulative_distance_miles(&self) -> f64 {
        meters_to_miles(self.cumulative_distance_meters)
    }

    pub fn current_step(&self) -> Option<&RouteStep> {
        self.route_steps.get(self.active_step_index)
    }

    pub fn snapshot(&self) -> TripSnapshot {
        TripSnapshot {
            destination_position: self.destination_position,
            cumulative_distance_meters: self.cumulative_distance_meters,
            cumulative_fuel_gallons: self.cumulative_fuel_gallons,
            current_efficiency: self.current_efficiency,
            target_efficiency: self.target_efficiency,
            incentive_accrued: self.incentive_accrued,
            current_instruction: self.current_step().map(|step| step.instruction_text.clone()),
            active_step_index: self.active_step_index,
            step_count: self.route_steps.len(),
            update_count: self.update_count,
            route_bounds: position::route_bounds(&self.route_steps),
        }
    }

    fn summary(&self, ended_at: DateTime<Utc>) -> TripSummary {
        TripSummary {
            origin_position: self.origin_position,
            destination_position: self.destination_position,
            distance_meters: self.cumulative_distance_meters,
            distance_miles: self.cumulative_distance_miles(),
            fuel_gallons: self.cumulative_fuel_gallons,
            efficiency: self.current_efficiency,
            target_efficiency: self.target_efficiency,
            incentive_accrued: self.incentive_accrued,
            update_count: self.update_count,
            started_at: self.started_at,
            ended_at,
        }
    }
}

/// What the presentation layer gets to see of a trip.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripSnapshot {
    pub destination_position: GeoPosition,
    pub cumulative_distance_meters: f64,
    pub cumulative_fuel_gallons: f64,
    pub current_efficiency: f64,
    pub target_efficiency: f64,
    pub incentive_accrued: f64,
    pub current_instruction: Option<String>,
    pub active_step_index: usize,
    pub step_count: usize,
    pub update_count: u64,
    pub route_bounds: Option<Rect<f64>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripSummary {
    pub origin_position: GeoPosition,
    pub destination_position: GeoPosition,
    pub distance_meters: f64,
    pub distance_miles: f64,
    pub fuel_gallons: f64,
    pub efficiency: f64,
    pub target_efficiency: f64,
    pub incentive_accrued: f64,
    pub update_count: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RouteRequest {
    pub generation: u64,
    pub origin: GeoPosition,
    pub destination: GeoPosition,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TripUpdateResult {
    /// No trip is active, nothing changed.
    Idle,
    Updated {
        snapshot: TripSnapshot,
        route_request: RouteRequest,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    Applied,
    Stale,
    NoTrip,
}

pub struct TripTracker {
    incentive: IncentivePolicy,
    last_known_position: Option<GeoPosition>,
    // Never reset between trips, so a late response from an earlier trip can
    // not be mistaken for a current one.
    route_generation: u64,
    state: Option<TripState>,
}

impl TripTracker {
    pub fn new(incentive: IncentivePolicy) -> Self {
        TripTracker {
            incentive,
            last_known_position: None,
            route_generation: 0,
            state: None,
        }
    }

    pub fn last_known_position(&self) -> Option<GeoPosition> {
        self.last_known_position
    }

    pub fn state(&self) -> Option<&TripState> {
        self.state.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn snapshot(&self) -> Option<TripSnapshot> {
        self.state.as_ref().map(TripState::snapshot)
    }

    pub fn observe_position(&mut self, position: GeoPosition) {
        self.last_known_position = Some(position);
    }

    /// Starts a trip from the last known position. `initial_route` is the
    /// route already computed for (last known position, `destination`).
    /// Any trip in progress is discarded.
    pub fn begin_trip(
        &mut self,
        destination: GeoPosition,
        target_efficiency: f64,
        initial_route: Vec<RouteStep>,
    ) -> Result<TripSnapshot> {
        let origin = self.last_known_position.context(PositionUnavailableSnafu)?;
        ensure!(
            target_efficiency.is_finite() && target_efficiency > 0.0,
            InvalidTargetSnafu {
                target: target_efficiency
            }
        );
        ensure!(
            !initial_route.is_empty(),
            RoutingUnavailableSnafu {
                reason: "route has no steps"
            }
        );

        if let Some(previous) = self.state.take() {
            info!(
                "discarding trip to {} for new destination {}",
                previous.destination_position, destination
            );
        }
        self.route_generation += 1;
        let state = TripState {
            origin_position: origin,
            destination_position: destination,
            target_efficiency,
            cumulative_distance_meters: 0.0,
            cumulative_fuel_gallons: 0.0,
            current_efficiency: 0.0,
            incentive_accrued: self.incentive.baseline,
            route_steps: initial_route,
            active_step_index: 0,
            previous_position: origin,
            started_at: Utc::now(),
            update_count: 0,
            route_generation: self.route_generation,
        };
        info!(
            "trip started from {} to {}, target {} mpg, {} route steps",
            origin,
            destination,
            target_efficiency,
            state.route_steps.len()
        );
        let snapshot = state.snapshot();
        self.state = Some(state);
        Ok(snapshot)
    }

    pub fn on_position_update(&mut self, new_position: GeoPosition) -> TripUpdateResult {
        let state = match self.state.as_mut() {
            None => return TripUpdateResult::Idle,
            Some(state) => state,
        };
        self.last_known_position = Some(new_position);

        let distance = state.previous_position.haversine_distance(&new_position);
        state.cumulative_distance_meters += distance;
        state.cumulative_fuel_gallons += meters_to_miles(distance) / state.target_efficiency;
        if state.cumulative_fuel_gallons > 0.0 {
            state.current_efficiency =
                state.cumulative_distance_miles() / state.cumulative_fuel_gallons;
        }
        let target_met =
            state.current_efficiency >= state.target_efficiency * (1.0 - EFFICIENCY_TOLERANCE);
        if target_met {
            state.incentive_accrued += self.incentive.step;
        }
        state.update_count += 1;
        state.previous_position = new_position;

        self.route_generation += 1;
        state.route_generation = self.route_generation;
        debug!(
            "update #{}: +{:.1} m, total {:.1} m, {:.2} mpg, incentive {:.2}",
            state.update_count,
            distance,
            state.cumulative_distance_meters,
            state.current_efficiency,
            state.incentive_accrued
        );

        TripUpdateResult::Updated {
            snapshot: state.snapshot(),
            route_request: RouteRequest {
                generation: state.route_generation,
                origin: new_position,
                destination: state.destination_position,
            },
        }
    }

    /// Delivers the result of a route request. Only the response to the most
    /// recently issued request may replace the route; anything else keeps the
    /// current steps and step index.
    pub fn apply_route_response(
        &mut self,
        generation: u64,
        result: anyhow::Result<Vec<RouteStep>>,
    ) -> RouteOutcome {
        let state = match self.state.as_mut() {
            None => {
                debug!("route response #{generation} arrived without an active trip");
                return RouteOutcome::NoTrip;
            }
            Some(state) => state,
        };

        let reason = if generation != state.route_generation {
            format!("superseded by #{}", state.route_generation)
        } else {
            match result {
                Err(e) => format!("{e:#}"),
                Ok(steps) if steps.is_empty() => "route has no steps".to_string(),
                Ok(steps) => {
                    state.route_steps = steps;
                    state.active_step_index = 0;
                    return RouteOutcome::Applied;
                }
            }
        };
        let err = RoutingStaleSnafu { generation, reason }.build();
        warn!("{err}, keeping previous route");
        RouteOutcome::Stale
    }

    /// Moves on to the next instruction, staying on the last one.
    pub fn advance_step(&mut self) -> Option<TripSnapshot> {
        let state = self.state.as_mut()?;
        if state.active_step_index + 1 < state.route_steps.len() {
            state.active_step_index += 1;
        }
        Some(state.snapshot())
    }

    pub fn end_trip(&mut self) -> Option<TripSummary> {
        let state = self.state.take()?;
        let summary = state.summary(Utc::now());
        info!(
            "trip ended: {:.2} mi, {:.3} gal, incentive {:.2}",
            summary.distance_miles, summary.fuel_gallons, summary.incentive_accrued
        );
        Some(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(text: &str) -> RouteStep {
        RouteStep {
            instruction_text: text.to_string(),
            start_position: GeoPosition::new(37.7749, -122.4194),
            end_position: GeoPosition::new(37.7849, -122.4094),
        }
    }

    fn tracker() -> TripTracker {
        TripTracker::new(IncentivePolicy {
            baseline: 1.25,
            step: 0.05,
        })
    }

    #[test]
    fn invalid_target() {
        let mut tracker = tracker();
        tracker.observe_position(GeoPosition::new(37.7749, -122.4194));
        for target in [0.0, -3.0, f64::NAN, f64::INFINITY] {
            let result = tracker.begin_trip(GeoPosition::new(37.7849, -122.4094), target, vec![step("a")]);
            assert!(matches!(result, Err(crate::TripError::InvalidTarget { .. })));
        }
        assert!(!tracker.is_active());
    }

    #[test]
    fn advance_step_stays_in_bounds() {
        let mut tracker = tracker();
        tracker.observe_position(GeoPosition::new(37.7749, -122.4194));
        tracker
            .begin_trip(GeoPosition::new(37.7849, -122.4094), 45.0, vec![step("a"), step("b")])
            .unwrap();
        assert_eq!(tracker.advance_step().unwrap().active_step_index, 1);
        let snapshot = tracker.advance_step().unwrap();
        assert_eq!(snapshot.active_step_index, 1);
        assert_eq!(snapshot.current_instruction.as_deref(), Some("b"));

        tracker.end_trip();
        assert!(tracker.advance_step().is_none());
    }

    #[test]
    fn generations_keep_growing_across_trips() {
        let mut tracker = tracker();
        let destination = GeoPosition::new(37.7849, -122.4094);
        tracker.observe_position(GeoPosition::new(37.7749, -122.4194));
        tracker.begin_trip(destination, 45.0, vec![step("a")]).unwrap();
        let first = match tracker.on_position_update(GeoPosition::new(37.7750, -122.4194)) {
            TripUpdateResult::Updated { route_request, .. } => route_request.generation,
            TripUpdateResult::Idle => panic!("trip should be active"),
        };
        tracker.end_trip();

        tracker.begin_trip(destination, 45.0, vec![step("b")]).unwrap();
        // the response for the first trip's request must not touch this trip
        assert_eq!(
            tracker.apply_route_response(first, Ok(vec![step("stale")])),
            RouteOutcome::Stale
        );
        assert_eq!(tracker.snapshot().unwrap().current_instruction.as_deref(), Some("b"));
    }
}
