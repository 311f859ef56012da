use rand::Rng;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use vroom_core::gps_processor::RawData;
use vroom_core::position_source::DevicePositionSource;
use vroom_core::routing::Router;
use vroom_core::trip_session::TripSession;
use vroom_core::trip_tracker::IncentivePolicy;
use vroom_core::{GeoPosition, TrackerConfig};

const STEPS: u32 = 20;

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    let config = match args.get(1) {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    };

    let origin = GeoPosition::new(37.7749, -122.4194);
    let destination = GeoPosition::new(37.7849, -122.4094);

    let source = Arc::new(DevicePositionSource::new(config.accuracy_threshold_m));
    let router = Arc::new(Router::from_config(&config)?);
    let mut session = TripSession::new(source.clone(), router, IncentivePolicy::from(&config));

    let mut timestamp_ms = 1_700_000_000_000;
    let fix = |position: GeoPosition, timestamp_ms: i64| RawData {
        latitude: position.latitude,
        longitude: position.longitude,
        timestamp_ms: Some(timestamp_ms),
        accuracy: Some(5.0),
    };
    source.on_location_update(vec![fix(origin, timestamp_ms)]);

    let snapshot = session
        .begin_trip(destination, config.target_efficiency_mpg)
        .await?;
    println!(
        "trip started, target {} mpg: {}",
        snapshot.target_efficiency,
        snapshot.current_instruction.unwrap_or_default()
    );

    let mut rx = session.watch();
    let mut rng = rand::rng();
    for i in 1..=STEPS {
        let t = i as f64 / STEPS as f64;
        let position = GeoPosition::new(
            origin.latitude + (destination.latitude - origin.latitude) * t
                + rng.random_range(-0.00005..0.00005),
            origin.longitude + (destination.longitude - origin.longitude) * t
                + rng.random_range(-0.00005..0.00005),
        );
        timestamp_ms += 1_000;
        source.on_location_update(vec![fix(position, timestamp_ms)]);

        rx.changed().await?;
        if let Some(snapshot) = rx.borrow_and_update().clone() {
            println!(
                "{:>3}: {:>7.1} m  {:>5.1} mpg  ${:.2} saved  {}",
                snapshot.update_count,
                snapshot.cumulative_distance_meters,
                snapshot.current_efficiency,
                snapshot.incentive_accrued,
                snapshot.current_instruction.unwrap_or_default()
            );
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if let Some(summary) = session.end_trip() {
        println!(
            "done: {:.2} mi on {:.3} gal, ${:.2} saved",
            summary.distance_miles, summary.fuel_gallons, summary.incentive_accrued
        );
    }
    Ok(())
}
