pub mod directions;
pub mod straight_line;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::config::TrackerConfig;
use crate::position::GeoPosition;
pub use directions::DirectionsClient;
pub use straight_line::StraightLineRouter;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStep {
    pub instruction_text: String,
    pub start_position: GeoPosition,
    pub end_position: GeoPosition,
}

/// Something that can turn an origin and a destination into turn-by-turn
/// steps. Implementations are expected to return an error rather than an empty
/// route, but callers treat both the same way.
pub trait RoutingProvider: Send + Sync + 'static {
    fn compute_route(
        &self,
        origin: GeoPosition,
        destination: GeoPosition,
    ) -> impl Future<Output = Result<Vec<RouteStep>>> + Send;
}

pub enum Router {
    Directions(DirectionsClient),
    StraightLine(StraightLineRouter),
}

impl Router {
    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        match &config.directions {
            Some(directions) => Ok(Router::Directions(DirectionsClient::new(
                directions.clone(),
            )?)),
            None => {
                info!("no directions service configured, using straight line routing");
                Ok(Router::StraightLine(StraightLineRouter::new()))
            }
        }
    }
}

impl RoutingProvider for Router {
    async fn compute_route(
        &self,
        origin: GeoPosition,
        destination: GeoPosition,
    ) -> Result<Vec<RouteStep>> {
        match self {
            Router::Directions(client) => client.compute_route(origin, destination).await,
            Router::StraightLine(router) => router.compute_route(origin, destination).await,
        }
    }
}
