use snafu::Snafu;

pub type Result<T> = std::result::Result<T, TripError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TripError {
    #[snafu(display("no position fix is available to start a trip from"))]
    PositionUnavailable {},
    #[snafu(display("no route could be computed for the trip: {reason}"))]
    RoutingUnavailable { reason: String },
    // Never returned to callers, only logged while a trip keeps going.
    #[snafu(display("route request #{generation} discarded: {reason}"))]
    RoutingStale { generation: u64, reason: String },
    #[snafu(display("target efficiency must be a positive number, got {target}"))]
    InvalidTarget { target: f64 },
}
