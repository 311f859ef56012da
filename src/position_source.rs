use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::gps_processor::{GpsProcessor, ProcessResult, RawData};
use crate::position::GeoPosition;

pub type PositionCallback = Box<dyn FnMut(GeoPosition) + Send>;
pub type PositionErrorCallback = Box<dyn FnMut(&anyhow::Error) + Send>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(Uuid);

impl SubscriptionHandle {
    pub fn new() -> Self {
        SubscriptionHandle(Uuid::new_v4())
    }
}

/// Where positions come from. Callbacks are invoked from whatever thread the
/// source delivers on and must not call back into the source.
pub trait PositionStreamSource: Send + Sync + 'static {
    fn get_current_position(&self) -> Result<GeoPosition>;

    fn subscribe(
        &self,
        on_update: PositionCallback,
        on_error: PositionErrorCallback,
    ) -> Result<SubscriptionHandle>;

    fn unsubscribe(&self, handle: SubscriptionHandle);
}

/// A live subscription. Unsubscribes when dropped, so a tracker that goes away
/// (normally or by unwinding) never leaves location tracking running.
pub struct Subscription<S: PositionStreamSource + ?Sized> {
    source: Arc<S>,
    handle: SubscriptionHandle,
}

impl<S: PositionStreamSource + ?Sized> Subscription<S> {
    pub fn new(
        source: Arc<S>,
        on_update: PositionCallback,
        on_error: PositionErrorCallback,
    ) -> Result<Self> {
        let handle = source.subscribe(on_update, on_error)?;
        Ok(Subscription { source, handle })
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }
}

impl<S: PositionStreamSource + ?Sized> Drop for Subscription<S> {
    fn drop(&mut self) {
        debug!("releasing position subscription {:?}", self.handle);
        self.source.unsubscribe(self.handle);
    }
}

struct Subscriber {
    on_update: PositionCallback,
    on_error: PositionErrorCallback,
}

struct DeviceState {
    gps_processor: GpsProcessor,
    last_position: Option<GeoPosition>,
    subscribers: HashMap<SubscriptionHandle, Subscriber>,
}

/// Positions reported by the device. The host pushes location fixes in with
/// `on_location_update`; accepted ones are fanned out to subscribers.
pub struct DevicePositionSource {
    state: Mutex<DeviceState>,
}

impl DevicePositionSource {
    pub fn new(accuracy_threshold: f32) -> Self {
        DevicePositionSource {
            state: Mutex::new(DeviceState {
                gps_processor: GpsProcessor::new(accuracy_threshold),
                last_position: None,
                subscribers: HashMap::new(),
            }),
        }
    }

    /// Returns how many of the fixes were accepted.
    pub fn on_location_update(&self, mut raw_data_list: Vec<RawData>) -> usize {
        // NOTE: On Android, we might receive a batch of location updates that
        // are out of order.
        raw_data_list.sort_by(|a, b| a.timestamp_ms.cmp(&b.timestamp_ms));

        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let mut accepted = 0;
        for raw_data in raw_data_list {
            match state.gps_processor.preprocess(&raw_data) {
                ProcessResult::Ignore => {
                    debug!("ignoring location fix {:?}", raw_data);
                }
                ProcessResult::Accept => {
                    let position = raw_data.position();
                    state.last_position = Some(position);
                    for subscriber in state.subscribers.values_mut() {
                        (subscriber.on_update)(position);
                    }
                    accepted += 1;
                }
            }
        }
        accepted
    }

    pub fn on_location_error(&self, message: &str) {
        let err = anyhow!("location error: {}", message);
        warn!("{err}");
        let mut state = self.state.lock().unwrap();
        for subscriber in state.subscribers.values_mut() {
            (subscriber.on_error)(&err);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().unwrap().subscribers.len()
    }
}

impl PositionStreamSource for DevicePositionSource {
    fn get_current_position(&self) -> Result<GeoPosition> {
        self.state
            .lock()
            .unwrap()
            .last_position
            .ok_or_else(|| anyhow!("no location fix received yet"))
    }

    fn subscribe(
        &self,
        on_update: PositionCallback,
        on_error: PositionErrorCallback,
    ) -> Result<SubscriptionHandle> {
        let handle = SubscriptionHandle::new();
        let mut state = self.state.lock().unwrap();
        state.subscribers.insert(
            handle,
            Subscriber {
                on_update,
                on_error,
            },
        );
        Ok(handle)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut state = self.state.lock().unwrap();
        if state.subscribers.remove(&handle).is_none() {
            warn!("unsubscribe called with unknown handle {:?}", handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn fix(latitude: f64, timestamp_ms: i64, accuracy: f32) -> RawData {
        RawData {
            latitude,
            longitude: -122.4194,
            timestamp_ms: Some(timestamp_ms),
            accuracy: Some(accuracy),
        }
    }

    #[test]
    fn no_fix_yet() {
        let source = DevicePositionSource::new(12.0);
        assert!(source.get_current_position().is_err());
        source.on_location_update(vec![fix(37.7749, 1000, 3.0)]);
        assert_eq!(
            source.get_current_position().unwrap(),
            GeoPosition::new(37.7749, -122.4194)
        );
    }

    #[test]
    fn batches_are_sorted_and_filtered() {
        let source = Arc::new(DevicePositionSource::new(12.0));
        let (tx, rx) = mpsc::channel();
        let subscription = Subscription::new(
            source.clone(),
            Box::new(move |position| tx.send(position.latitude).unwrap()),
            Box::new(|_| {}),
        )
        .unwrap();

        let accepted = source.on_location_update(vec![
            fix(37.7751, 3000, 3.0),
            fix(37.7749, 1000, 3.0),
            fix(37.7750, 2000, 80.0),
        ]);
        assert_eq!(accepted, 2);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![37.7749, 37.7751]);

        // older than what we already have
        assert_eq!(source.on_location_update(vec![fix(37.7700, 500, 3.0)]), 0);

        drop(subscription);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn errors_reach_subscribers() {
        let source = Arc::new(DevicePositionSource::new(12.0));
        let (tx, rx) = mpsc::channel();
        let _subscription = Subscription::new(
            source.clone(),
            Box::new(|_| {}),
            Box::new(move |err| tx.send(err.to_string()).unwrap()),
        )
        .unwrap();
        source.on_location_error("permission denied");
        assert_eq!(
            rx.try_recv().unwrap(),
            "location error: permission denied"
        );
    }
}
