use std::sync::{mpsc, Arc, Mutex, OnceLock};

use crate::config::TrackerConfig;
use crate::gps_processor::RawData;
use crate::logs;
use crate::position::GeoPosition;
use crate::position_source::{DevicePositionSource, PositionStreamSource};
use crate::routing::Router;
use crate::trip_session::TripSession;
use crate::trip_tracker::{IncentivePolicy, TripSnapshot, TripSummary};
use anyhow::{Context, Result};
use tokio::runtime::Runtime;

// NOTE: `session` and `destination` are never locked at the same time.
struct MainState {
    cache_dir: String,
    config: TrackerConfig,
    runtime: Runtime,
    source: Arc<DevicePositionSource>,
    session: Mutex<TripSession<DevicePositionSource, Router>>,
    destination: Mutex<Option<GeoPosition>>,
}

static MAIN_STATE: OnceLock<MainState> = OnceLock::new();

pub fn init(cache_dir: String, config_path: Option<String>) -> Result<()> {
    if MAIN_STATE.get().is_some() {
        warn!("`init` is called multiple times");
        return Ok(());
    }

    logs::init(&cache_dir)?;
    let config = match config_path {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    };
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("vroom-core")
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let source = Arc::new(DevicePositionSource::new(config.accuracy_threshold_m));
    let router = Arc::new(Router::from_config(&config)?);
    let session = TripSession::new(source.clone(), router, IncentivePolicy::from(&config));

    let state = MainState {
        cache_dir,
        config,
        runtime,
        source,
        session: Mutex::new(session),
        destination: Mutex::new(None),
    };
    if MAIN_STATE.set(state).is_err() {
        warn!("`init` raced with another `init`, keeping the first one");
    } else {
        info!("initialized");
    }
    Ok(())
}

fn get() -> &'static MainState {
    MAIN_STATE.get().expect("main state is not initialized")
}

pub fn on_location_update(raw_data_list: Vec<RawData>) {
    let accepted = get().source.on_location_update(raw_data_list);
    debug!("{accepted} location fixes accepted");
}

pub fn on_location_error(message: String) {
    get().source.on_location_error(&message);
}

pub fn get_current_position() -> Option<GeoPosition> {
    get().source.get_current_position().ok()
}

/// The driver tapped a point on the map. Picking a new destination ends the
/// trip in progress. Returns the MPG target offered for the new trip.
pub fn select_destination(latitude: f64, longitude: f64) -> f64 {
    let state = get();
    if let Some(summary) = state.session.lock().unwrap().end_trip() {
        info!(
            "destination changed, previous trip ended after {:.2} mi",
            summary.distance_miles
        );
    }
    let destination = GeoPosition::new(latitude, longitude);
    *state.destination.lock().unwrap() = Some(destination);
    info!("destination selected: {}", destination);
    state.config.target_efficiency_mpg
}

/// Starts tracking towards the selected destination.
pub fn start_trip() -> Result<TripSnapshot> {
    let state = get();
    let destination = *state.destination.lock().unwrap();
    let destination = destination.context("no destination selected")?;
    let target_efficiency = state.config.target_efficiency_mpg;

    // Routing may wait on the network, keep the session usable meanwhile.
    let planner = state.session.lock().unwrap().planner();
    let plan = state
        .runtime
        .block_on(planner.plan(destination, target_efficiency))?;
    if *state.destination.lock().unwrap() != Some(destination) {
        bail!("destination changed while the route was computed");
    }

    let _runtime = state.runtime.enter();
    let snapshot = state.session.lock().unwrap().start_planned(plan)?;
    Ok(snapshot)
}

pub fn get_trip_snapshot() -> Option<TripSnapshot> {
    get().session.lock().unwrap().snapshot()
}

pub fn next_instruction() -> Option<TripSnapshot> {
    get().session.lock().unwrap().advance_step()
}

pub fn end_trip() -> Option<TripSummary> {
    let state = get();
    *state.destination.lock().unwrap() = None;
    state.session.lock().unwrap().end_trip()
}

/// Log lines are forwarded to `sink` from now on, replacing any earlier sink.
pub fn subscribe_to_log_stream(sink: mpsc::Sender<String>) {
    logs::set_host_sink(sink);
}

pub fn export_logs(target_file_path: String) -> Result<()> {
    logs::export(&get().cache_dir, &target_file_path)
}
