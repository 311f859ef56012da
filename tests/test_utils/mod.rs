#![allow(dead_code)]

use anyhow::Result;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use vroom_core::gps_processor::RawData;
use vroom_core::position::GeoPosition;
use vroom_core::position_source::{
    PositionCallback, PositionErrorCallback, PositionStreamSource, SubscriptionHandle,
};
use vroom_core::routing::{RouteStep, RoutingProvider};
use vroom_core::trip_tracker::TripSnapshot;

pub const SF_ORIGIN: GeoPosition = GeoPosition {
    latitude: 37.7749,
    longitude: -122.4194,
};
pub const SF_DESTINATION: GeoPosition = GeoPosition {
    latitude: 37.7849,
    longitude: -122.4094,
};

pub fn step(text: &str) -> RouteStep {
    RouteStep {
        instruction_text: text.to_string(),
        start_position: SF_ORIGIN,
        end_position: SF_DESTINATION,
    }
}

/// `n`-th point of a drive heading north from `SF_ORIGIN`, roughly 111 m apart.
pub fn north_of_origin(n: u32) -> GeoPosition {
    GeoPosition::new(SF_ORIGIN.latitude + 0.001 * n as f64, SF_ORIGIN.longitude)
}

pub fn raw_data(position: GeoPosition, timestamp_ms: i64) -> RawData {
    RawData {
        latitude: position.latitude,
        longitude: position.longitude,
        timestamp_ms: Some(timestamp_ms),
        accuracy: Some(4.0),
    }
}

/// A position source the test drives by hand.
pub struct FakePositionSource {
    current: Mutex<Option<GeoPosition>>,
    subscribers: Mutex<HashMap<SubscriptionHandle, (PositionCallback, PositionErrorCallback)>>,
    subscribe_calls: AtomicUsize,
}

impl FakePositionSource {
    pub fn new(current: Option<GeoPosition>) -> Self {
        FakePositionSource {
            current: Mutex::new(current),
            subscribers: Mutex::new(HashMap::new()),
            subscribe_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_current(&self, position: Option<GeoPosition>) {
        *self.current.lock().unwrap() = position;
    }

    pub fn emit(&self, position: GeoPosition) {
        *self.current.lock().unwrap() = Some(position);
        for (on_update, _) in self.subscribers.lock().unwrap().values_mut() {
            on_update(position);
        }
    }

    pub fn emit_error(&self, message: &str) {
        let err = anyhow::anyhow!("{message}");
        for (_, on_error) in self.subscribers.lock().unwrap().values_mut() {
            on_error(&err);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }
}

impl PositionStreamSource for FakePositionSource {
    fn get_current_position(&self) -> Result<GeoPosition> {
        self.current
            .lock()
            .unwrap()
            .ok_or_else(|| anyhow::anyhow!("no fix"))
    }

    fn subscribe(
        &self,
        on_update: PositionCallback,
        on_error: PositionErrorCallback,
    ) -> Result<SubscriptionHandle> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let handle = SubscriptionHandle::new();
        self.subscribers
            .lock()
            .unwrap()
            .insert(handle, (on_update, on_error));
        Ok(handle)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.subscribers.lock().unwrap().remove(&handle);
    }
}

pub enum Scripted {
    Steps(Vec<RouteStep>),
    Fail(&'static str),
}

/// Answers route requests from a script, in call order. Requests whose origin
/// has a gate wait for the test to release them instead. Once the script runs
/// out every request gets a single step named after its origin.
pub struct ScriptedRouter {
    script: Mutex<VecDeque<Scripted>>,
    gates: Mutex<Vec<(GeoPosition, oneshot::Receiver<Vec<RouteStep>>)>>,
    calls: Mutex<Vec<GeoPosition>>,
}

impl ScriptedRouter {
    pub fn new(script: Vec<Scripted>) -> Self {
        ScriptedRouter {
            script: Mutex::new(script.into()),
            gates: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn gate(&self, origin: GeoPosition) -> oneshot::Sender<Vec<RouteStep>> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().push((origin, rx));
        tx
    }

    pub fn calls(&self) -> Vec<GeoPosition> {
        self.calls.lock().unwrap().clone()
    }
}

impl RoutingProvider for ScriptedRouter {
    async fn compute_route(
        &self,
        origin: GeoPosition,
        destination: GeoPosition,
    ) -> Result<Vec<RouteStep>> {
        self.calls.lock().unwrap().push(origin);
        let gate = {
            let mut gates = self.gates.lock().unwrap();
            gates
                .iter()
                .position(|(gated, _)| *gated == origin)
                .map(|index| gates.remove(index).1)
        };
        if let Some(gate) = gate {
            return gate.await.map_err(|_| anyhow::anyhow!("gate dropped"));
        }
        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(Scripted::Steps(steps)) => Ok(steps),
            Some(Scripted::Fail(reason)) => Err(anyhow::anyhow!(reason)),
            None => Ok(vec![RouteStep {
                instruction_text: format!("from {origin}"),
                start_position: origin,
                end_position: destination,
            }]),
        }
    }
}

pub async fn wait_for_snapshot<F>(
    rx: &mut watch::Receiver<Option<TripSnapshot>>,
    mut predicate: F,
) -> TripSnapshot
where
    F: FnMut(&TripSnapshot) -> bool,
{
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|snapshot| snapshot.as_ref().is_some_and(&mut predicate)),
    )
    .await
    .expect("timed out waiting for snapshot")
    .expect("snapshot channel closed");
    result.clone().unwrap()
}
