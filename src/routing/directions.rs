use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use super::{RouteStep, RoutingProvider};
use crate::config::DirectionsConfig;
use crate::position::GeoPosition;

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
struct Route {
    legs: Vec<Leg>,
}

#[derive(Debug, Deserialize)]
struct Leg {
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
struct Step {
    html_instructions: String,
    start_location: LatLng,
    end_location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

impl From<LatLng> for GeoPosition {
    fn from(location: LatLng) -> Self {
        GeoPosition::new(location.lat, location.lng)
    }
}

/// Client for a Google Directions compatible JSON endpoint.
pub struct DirectionsClient {
    http: reqwest::Client,
    config: DirectionsConfig,
}

impl DirectionsClient {
    pub fn new(config: DirectionsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build directions http client")?;
        Ok(DirectionsClient { http, config })
    }
}

impl RoutingProvider for DirectionsClient {
    async fn compute_route(
        &self,
        origin: GeoPosition,
        destination: GeoPosition,
    ) -> Result<Vec<RouteStep>> {
        let body = self
            .http
            .get(&self.config.base_url)
            .query(&[
                ("origin", origin.to_query()),
                ("destination", destination.to_query()),
                ("mode", self.config.travel_mode.clone()),
                ("key", self.config.api_key.clone()),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_directions(&body)
    }
}

// Only the first route and its first leg are used; we never ask for
// alternatives or waypoints.
pub fn parse_directions(body: &str) -> Result<Vec<RouteStep>> {
    let response: DirectionsResponse =
        serde_json::from_str(body).context("malformed directions response")?;
    if response.status != "OK" {
        match response.error_message {
            Some(message) => bail!("directions request failed: {} ({})", response.status, message),
            None => bail!("directions request failed: {}", response.status),
        }
    }
    let leg = response
        .routes
        .into_iter()
        .next()
        .and_then(|route| route.legs.into_iter().next())
        .ok_or_else(|| anyhow!("directions response contains no route"))?;
    let steps: Vec<RouteStep> = leg
        .steps
        .into_iter()
        .map(|step| RouteStep {
            instruction_text: strip_html(&step.html_instructions),
            start_position: step.start_location.into(),
            end_position: step.end_location.into(),
        })
        .collect();
    if steps.is_empty() {
        bail!("directions response contains no steps");
    }
    Ok(steps)
}

pub fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut chars = html.chars();
    while let Some(c) = chars.next() {
        if c == '<' {
            let tag: String = chars.by_ref().take_while(|c| *c != '>').collect();
            // block elements start a new sentence in the rendered panel
            if tag.starts_with("div") || tag.starts_with("/div") || tag.starts_with("br") {
                text.push(' ');
            }
        } else {
            text.push(c);
        }
    }
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&#39;", "'")
        .replace("&quot;", "\"");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
