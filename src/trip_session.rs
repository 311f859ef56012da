use snafu::{ensure, OptionExt};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{
    InvalidTargetSnafu, PositionUnavailableSnafu, Result, RoutingUnavailableSnafu, TripError,
};
use crate::position::GeoPosition;
use crate::position_source::{PositionStreamSource, Subscription};
use crate::routing::{RouteStep, RoutingProvider};
use crate::trip_tracker::{
    IncentivePolicy, RouteOutcome, TripSnapshot, TripSummary, TripTracker, TripUpdateResult,
};

type RouteResponse = (u64, anyhow::Result<Vec<RouteStep>>);

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct ActiveTrip<S: PositionStreamSource> {
    // field order matters: stop delivering positions before the loop goes
    _subscription: Subscription<S>,
    _event_loop: AbortOnDrop,
}

/// Drives a `TripTracker` from a position source and a routing provider.
///
/// Position updates are handled one at a time by a single task. Each update
/// starts a route request and aborts the one before it, and responses that
/// still arrive late are rejected by the tracker, so the newest request always
/// wins. Ending the trip, or dropping the session, releases the position
/// subscription.
pub struct TripSession<S: PositionStreamSource, R: RoutingProvider> {
    source: Arc<S>,
    routing: Arc<R>,
    tracker: Arc<Mutex<TripTracker>>,
    snapshots: Arc<watch::Sender<Option<TripSnapshot>>>,
    active: Option<ActiveTrip<S>>,
}

impl<S: PositionStreamSource, R: RoutingProvider> TripSession<S, R> {
    pub fn new(source: Arc<S>, routing: Arc<R>, incentive: IncentivePolicy) -> Self {
        let (snapshots, _) = watch::channel(None);
        TripSession {
            source,
            routing,
            tracker: Arc::new(Mutex::new(TripTracker::new(incentive))),
            snapshots: Arc::new(snapshots),
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn snapshot(&self) -> Option<TripSnapshot> {
        self.tracker.lock().unwrap().snapshot()
    }

    /// Every published snapshot, `None` while no trip is running.
    pub fn watch(&self) -> watch::Receiver<Option<TripSnapshot>> {
        self.snapshots.subscribe()
    }

    pub fn last_known_position(&self) -> Option<GeoPosition> {
        self.tracker.lock().unwrap().last_known_position()
    }

    /// A handle that can compute a trip's starting route without borrowing
    /// the session, so callers need not hold a lock on the session meanwhile.
    pub fn planner(&self) -> TripPlanner<S, R> {
        TripPlanner {
            source: self.source.clone(),
            routing: self.routing.clone(),
            tracker: self.tracker.clone(),
        }
    }

    pub async fn begin_trip(
        &mut self,
        destination: GeoPosition,
        target_efficiency: f64,
    ) -> Result<TripSnapshot> {
        self.end_trip();
        let plan = self.planner().plan(destination, target_efficiency).await?;
        self.start_planned(plan)
    }

    /// Starts the trip `plan` describes, ending whatever trip is running.
    pub fn start_planned(&mut self, plan: TripPlan) -> Result<TripSnapshot> {
        self.end_trip();
        let TripPlan {
            destination,
            target_efficiency,
            route,
        } = plan;
        let snapshot = self
            .tracker
            .lock()
            .unwrap()
            .begin_trip(destination, target_efficiency, route)?;

        let (position_tx, position_rx) = mpsc::unbounded_channel();
        let subscription = Subscription::new(
            self.source.clone(),
            Box::new(move |position| {
                // the receiver is gone once the trip is over
                let _ = position_tx.send(position);
            }),
            Box::new(|err| warn!("position stream error: {err:#}")),
        );
        let subscription = match subscription {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!("failed to subscribe to position updates: {e:#}");
                self.tracker.lock().unwrap().end_trip();
                return PositionUnavailableSnafu.fail();
            }
        };

        let event_loop = tokio::spawn(run_event_loop(
            self.tracker.clone(),
            self.routing.clone(),
            self.snapshots.clone(),
            position_rx,
        ));
        self.active = Some(ActiveTrip {
            _subscription: subscription,
            _event_loop: AbortOnDrop(event_loop),
        });
        self.snapshots.send_replace(Some(snapshot.clone()));
        Ok(snapshot)
    }

    pub fn advance_step(&self) -> Option<TripSnapshot> {
        let snapshot = self.tracker.lock().unwrap().advance_step()?;
        self.snapshots.send_replace(Some(snapshot.clone()));
        Some(snapshot)
    }

    /// Stops tracking and returns the trip's summary. Calling it without an
    /// active trip does nothing.
    pub fn end_trip(&mut self) -> Option<TripSummary> {
        self.active = None;
        let summary = self.tracker.lock().unwrap().end_trip();
        if summary.is_some() {
            self.snapshots.send_replace(None);
        }
        summary
    }
}

/// A computed starting route, ready to be handed to `TripSession::start_planned`.
#[derive(Clone, Debug, PartialEq)]
pub struct TripPlan {
    pub destination: GeoPosition,
    pub target_efficiency: f64,
    pub route: Vec<RouteStep>,
}

pub struct TripPlanner<S: PositionStreamSource, R: RoutingProvider> {
    source: Arc<S>,
    routing: Arc<R>,
    tracker: Arc<Mutex<TripTracker>>,
}

impl<S: PositionStreamSource, R: RoutingProvider> TripPlanner<S, R> {
    /// Routes from the current position, or the last known one when the
    /// source has no fix right now.
    pub async fn plan(
        &self,
        destination: GeoPosition,
        target_efficiency: f64,
    ) -> Result<TripPlan> {
        ensure!(
            target_efficiency.is_finite() && target_efficiency > 0.0,
            InvalidTargetSnafu {
                target: target_efficiency
            }
        );

        let origin = match self.source.get_current_position() {
            Ok(position) => {
                self.tracker.lock().unwrap().observe_position(position);
                position
            }
            Err(e) => {
                warn!("failed to get current position: {e:#}");
                let last_known = self.tracker.lock().unwrap().last_known_position();
                last_known.context(PositionUnavailableSnafu)?
            }
        };

        let route = self
            .routing
            .compute_route(origin, destination)
            .await
            .map_err(|e| TripError::RoutingUnavailable {
                reason: format!("{e:#}"),
            })?;
        ensure!(
            !route.is_empty(),
            RoutingUnavailableSnafu {
                reason: "route has no steps"
            }
        );
        Ok(TripPlan {
            destination,
            target_efficiency,
            route,
        })
    }
}

async fn run_event_loop<R: RoutingProvider>(
    tracker: Arc<Mutex<TripTracker>>,
    routing: Arc<R>,
    snapshots: Arc<watch::Sender<Option<TripSnapshot>>>,
    mut positions: mpsc::UnboundedReceiver<GeoPosition>,
) {
    let (route_tx, mut route_rx) = mpsc::unbounded_channel::<RouteResponse>();
    let mut in_flight: Option<AbortOnDrop> = None;
    loop {
        tokio::select! {
            position = positions.recv() => {
                let position = match position {
                    Some(position) => position,
                    None => break,
                };
                let result = tracker.lock().unwrap().on_position_update(position);
                if let TripUpdateResult::Updated { snapshot, route_request } = result {
                    snapshots.send_replace(Some(snapshot));
                    let routing = routing.clone();
                    let route_tx = route_tx.clone();
                    // replacing the handle aborts the superseded request
                    in_flight = Some(AbortOnDrop(tokio::spawn(async move {
                        let result = routing
                            .compute_route(route_request.origin, route_request.destination)
                            .await;
                        let _ = route_tx.send((route_request.generation, result));
                    })));
                }
            }
            Some((generation, result)) = route_rx.recv() => {
                let mut guard = tracker.lock().unwrap();
                if guard.apply_route_response(generation, result) == RouteOutcome::Applied {
                    snapshots.send_replace(guard.snapshot());
                }
            }
        }
    }
    drop(in_flight);
    debug!("position stream closed, trip event loop finished");
}
