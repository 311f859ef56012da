use crate::position::GeoPosition;

#[derive(Clone, Debug, PartialEq)]
pub struct RawData {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp_ms: Option<i64>,
    pub accuracy: Option<f32>,
}

impl RawData {
    pub fn position(&self) -> GeoPosition {
        GeoPosition::new(self.latitude, self.longitude)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProcessResult {
    Accept,
    Ignore,
}

pub struct GpsProcessor {
    accuracy_threshold: f32,
    last_data: Option<RawData>,
}

impl GpsProcessor {
    pub fn new(accuracy_threshold: f32) -> Self {
        GpsProcessor {
            accuracy_threshold,
            last_data: None,
        }
    }

    pub fn last_data(&self) -> Option<&RawData> {
        self.last_data.as_ref()
    }

    pub fn preprocess(&mut self, curr_data: &RawData) -> ProcessResult {
        let too_inaccurate = match curr_data.accuracy {
            Some(accuracy) => accuracy > self.accuracy_threshold,
            None => false,
        };
        if too_inaccurate {
            return ProcessResult::Ignore;
        }

        let out_of_order = match &self.last_data {
            None => false,
            Some(last_data) => curr_data
                .timestamp_ms
                .and_then(|now| last_data.timestamp_ms.map(|prev| now < prev))
                .unwrap_or(false),
        };
        if out_of_order {
            // NOTE: We could get a location update from a while ago. Feeding it
            // to a trip would add a bogus back-and-forth to the distance, so we
            // simply drop it.
            return ProcessResult::Ignore;
        }

        self.last_data = Some(curr_data.clone());
        ProcessResult::Accept
    }
}
